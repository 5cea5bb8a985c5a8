use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the mdexport binary.
#[derive(Debug, Parser)]
#[command(
    name = "mdexport",
    version,
    about = "Markdown preview and Word/PDF export server"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MDEXPORT_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Convert a single Markdown file without starting the server.
    Convert(ConvertArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PandocOverrides {
    /// Override the Pandoc executable path.
    #[arg(long = "pandoc-binary", value_name = "PATH")]
    pub binary: Option<PathBuf>,

    /// Override the reference document used for Word output.
    #[arg(long = "pandoc-reference-doc", value_name = "PATH")]
    pub reference_doc: Option<PathBuf>,

    /// Override the syntax highlighting style (a built-in name or a .theme file).
    #[arg(long = "pandoc-highlight-style", value_name = "STYLE")]
    pub highlight_style: Option<String>,

    /// Replace the list of Lua filters passed to Pandoc. Repeat for several filters.
    #[arg(long = "pandoc-lua-filter", value_name = "PATH")]
    pub lua_filters: Vec<PathBuf>,

    /// Override the PDF engine.
    #[arg(long = "pandoc-pdf-engine", value_name = "ENGINE")]
    pub pdf_engine: Option<String>,

    /// Override the main font used for PDF output.
    #[arg(long = "pandoc-main-font", value_name = "FONT")]
    pub main_font: Option<String>,

    /// Override the directory holding per-conversion scratch files.
    #[arg(long = "pandoc-work-dir", value_name = "PATH")]
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the Mermaid CLI executable path used for diagram rendering.
    #[arg(long = "render-mermaid-cli-path", value_name = "PATH")]
    pub mermaid_cli_path: Option<PathBuf>,

    /// Override the directory used to cache rendered Mermaid diagrams.
    #[arg(long = "render-mermaid-cache-dir", value_name = "PATH")]
    pub mermaid_cache_dir: Option<PathBuf>,

    /// Override the time allowed for all diagrams of one preview.
    #[arg(long = "render-mermaid-timeout", value_name = "SECONDS")]
    pub mermaid_timeout_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub pandoc: PandocOverrides,

    #[command(flatten)]
    pub render: RenderOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the number of conversions allowed to run at once.
    #[arg(long = "workers", value_name = "COUNT")]
    pub workers: Option<u32>,

    /// Override the per-conversion timeout.
    #[arg(long = "timeout", value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Override the maximum accepted request body size in bytes.
    #[arg(long = "max-request-bytes", value_name = "BYTES")]
    pub max_request_bytes: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub pandoc: PandocOverrides,

    /// Output format (docx or pdf).
    #[arg(long, short = 'f', default_value = "docx", value_name = "FORMAT")]
    pub format: String,

    /// Destination path; defaults to the input path with the format's extension.
    #[arg(long, short = 'o', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Override the conversion timeout.
    #[arg(long = "timeout", value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Markdown file to convert.
    #[arg(value_name = "INPUT", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,
}
