//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, ConvertArgs, LoggingOverrides, PandocOverrides, RenderOverrides, ServeArgs,
    ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "mdexport";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8055;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_WORKERS: u32 = 2;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_REQUEST_BYTES: u64 = 10 * 1024 * 1024;
pub(crate) const DEFAULT_PANDOC_BINARY: &str = "pandoc";
pub(crate) const DEFAULT_INPUT_FORMAT: &str =
    "markdown+raw_tex+tex_math_dollars+tex_math_double_backslash";
pub(crate) const DEFAULT_REFERENCE_DOC: &str = "reference.docx";
pub(crate) const DEFAULT_HIGHLIGHT_STYLE: &str = "pygments";
pub(crate) const DEFAULT_LUA_FILTER: &str = "mermaid_filter.lua";
pub(crate) const DEFAULT_PDF_ENGINE: &str = "xelatex";
pub(crate) const DEFAULT_MAIN_FONT: &str = "Noto Sans CJK SC";
pub(crate) const DEFAULT_MERMAID_CLI_PATH: &str = "mmdc";
pub(crate) const DEFAULT_MERMAID_CACHE_DIR: &str = "/tmp/mdexport-mermaid";
const DEFAULT_MERMAID_TIMEOUT_SECS: u64 = 30;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub workers: WorkerSettings,
    pub logging: LoggingSettings,
    pub pandoc: PandocSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

/// Bounds applied to conversions: how many run at once and how long each may take.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: NonZeroU32,
    pub request_timeout: Duration,
    pub max_request_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct PandocSettings {
    pub binary: PathBuf,
    pub input_format: String,
    pub reference_doc: Option<PathBuf>,
    pub highlight_style: String,
    pub lua_filters: Vec<PathBuf>,
    pub pdf_engine: String,
    pub main_font: String,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub mermaid_cli_path: PathBuf,
    pub mermaid_cache_dir: PathBuf,
    /// Budget shared by every `mmdc` run within one preview.
    pub mermaid_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("MDEXPORT")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("pandoc.lua_filters")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Convert(args)) => raw.apply_convert_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    workers: RawWorkerSettings,
    logging: RawLoggingSettings,
    pandoc: RawPandocSettings,
    render: RawRenderSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(workers) = overrides.workers {
            self.workers.concurrency = Some(workers);
        }
        if let Some(seconds) = overrides.timeout_seconds {
            self.workers.request_timeout_seconds = Some(seconds);
        }
        if let Some(limit) = overrides.max_request_bytes {
            self.workers.max_request_bytes = Some(limit);
        }
        self.apply_logging_overrides(&overrides.logging);
        self.apply_pandoc_overrides(&overrides.pandoc);
        self.apply_render_overrides(&overrides.render);
    }

    fn apply_convert_overrides(&mut self, args: &ConvertArgs) {
        if let Some(seconds) = args.timeout_seconds {
            self.workers.request_timeout_seconds = Some(seconds);
        }
        self.apply_logging_overrides(&args.logging);
        self.apply_pandoc_overrides(&args.pandoc);
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_pandoc_overrides(&mut self, overrides: &PandocOverrides) {
        if let Some(binary) = overrides.binary.as_ref() {
            self.pandoc.binary = Some(binary.clone());
        }
        if let Some(reference) = overrides.reference_doc.as_ref() {
            self.pandoc.reference_doc = Some(reference.clone());
        }
        if let Some(style) = overrides.highlight_style.as_ref() {
            self.pandoc.highlight_style = Some(style.clone());
        }
        if !overrides.lua_filters.is_empty() {
            self.pandoc.lua_filters = Some(overrides.lua_filters.clone());
        }
        if let Some(engine) = overrides.pdf_engine.as_ref() {
            self.pandoc.pdf_engine = Some(engine.clone());
        }
        if let Some(font) = overrides.main_font.as_ref() {
            self.pandoc.main_font = Some(font.clone());
        }
        if let Some(dir) = overrides.work_dir.as_ref() {
            self.pandoc.work_dir = Some(dir.clone());
        }
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(path) = overrides.mermaid_cli_path.as_ref() {
            self.render.mermaid_cli_path = Some(path.clone());
        }
        if let Some(dir) = overrides.mermaid_cache_dir.as_ref() {
            self.render.mermaid_cache_dir = Some(dir.clone());
        }
        if let Some(seconds) = overrides.mermaid_timeout_seconds {
            self.render.mermaid_timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            workers,
            logging,
            pandoc,
            render,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            workers: build_worker_settings(workers)?,
            logging: build_logging_settings(logging)?,
            pandoc: build_pandoc_settings(pandoc)?,
            render: build_render_settings(render)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_worker_settings(workers: RawWorkerSettings) -> Result<WorkerSettings, LoadError> {
    let concurrency = non_zero_u32(
        workers.concurrency.unwrap_or(DEFAULT_WORKERS).into(),
        "workers.concurrency",
    )?;

    let timeout_secs = workers
        .request_timeout_seconds
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "workers.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let max_request_bytes_value = workers
        .max_request_bytes
        .unwrap_or(DEFAULT_MAX_REQUEST_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("workers.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "workers.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(WorkerSettings {
        concurrency,
        request_timeout: Duration::from_secs(timeout_secs),
        max_request_bytes,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_pandoc_settings(pandoc: RawPandocSettings) -> Result<PandocSettings, LoadError> {
    let binary = non_empty_path(
        pandoc.binary,
        DEFAULT_PANDOC_BINARY,
        "pandoc.binary",
    )?;

    let input_format = non_empty_string(
        pandoc.input_format,
        DEFAULT_INPUT_FORMAT,
        "pandoc.input_format",
    )?;

    // An explicitly empty path disables the reference document.
    let reference_doc = match pandoc.reference_doc {
        Some(path) if path.as_os_str().is_empty() => None,
        Some(path) => Some(path),
        None => Some(PathBuf::from(DEFAULT_REFERENCE_DOC)),
    };

    let highlight_style = non_empty_string(
        pandoc.highlight_style,
        DEFAULT_HIGHLIGHT_STYLE,
        "pandoc.highlight_style",
    )?;

    let lua_filters = pandoc
        .lua_filters
        .unwrap_or_else(|| vec![PathBuf::from(DEFAULT_LUA_FILTER)])
        .into_iter()
        .filter(|path| !path.as_os_str().is_empty())
        .collect();

    let pdf_engine = non_empty_string(
        pandoc.pdf_engine,
        DEFAULT_PDF_ENGINE,
        "pandoc.pdf_engine",
    )?;
    let main_font = non_empty_string(pandoc.main_font, DEFAULT_MAIN_FONT, "pandoc.main_font")?;

    let work_dir = match pandoc.work_dir {
        Some(dir) if dir.as_os_str().is_empty() => {
            return Err(LoadError::invalid(
                "pandoc.work_dir",
                "path must not be empty",
            ));
        }
        Some(dir) => dir,
        None => std::env::temp_dir(),
    };

    Ok(PandocSettings {
        binary,
        input_format,
        reference_doc,
        highlight_style,
        lua_filters,
        pdf_engine,
        main_font,
        work_dir,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let mermaid_cli_path = non_empty_path(
        render.mermaid_cli_path,
        DEFAULT_MERMAID_CLI_PATH,
        "render.mermaid_cli_path",
    )?;
    let mermaid_cache_dir = non_empty_path(
        render.mermaid_cache_dir,
        DEFAULT_MERMAID_CACHE_DIR,
        "render.mermaid_cache_dir",
    )?;

    let timeout_secs = render
        .mermaid_timeout_seconds
        .unwrap_or(DEFAULT_MERMAID_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "render.mermaid_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RenderSettings {
        mermaid_cli_path,
        mermaid_cache_dir,
        mermaid_timeout: Duration::from_secs(timeout_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    concurrency: Option<u32>,
    request_timeout_seconds: Option<u64>,
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPandocSettings {
    binary: Option<PathBuf>,
    input_format: Option<String>,
    reference_doc: Option<PathBuf>,
    highlight_style: Option<String>,
    lua_filters: Option<Vec<PathBuf>>,
    pdf_engine: Option<String>,
    main_font: Option<String>,
    work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    mermaid_cli_path: Option<PathBuf>,
    mermaid_cache_dir: Option<PathBuf>,
    mermaid_timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }

    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;

    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

fn non_empty_string(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    let value = value.unwrap_or_else(|| default.to_string());
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "value must not be empty"));
    }
    Ok(trimmed.to_string())
}
