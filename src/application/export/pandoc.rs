use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncReadExt, process::Command};
use tracing::{debug, warn};

use crate::{config::PandocSettings, infra::process::ProcessGroupGuard};

use super::{
    format::ExportFormat,
    types::{DocumentConverter, ExportError},
};

const INPUT_FILE_NAME: &str = "input.md";

/// Runs the `pandoc` binary against a scratch directory per conversion.
#[derive(Debug, Clone)]
pub struct PandocConverter {
    binary: PathBuf,
    input_format: String,
    reference_doc: Option<PathBuf>,
    highlight_style: String,
    lua_filters: Vec<PathBuf>,
    pdf_engine: String,
    main_font: String,
    work_dir: PathBuf,
}

impl PandocConverter {
    /// Asset files that are missing on disk are dropped with a warning so a
    /// bare deployment still produces plain documents.
    pub fn new(settings: &PandocSettings) -> Self {
        let reference_doc = settings
            .reference_doc
            .as_ref()
            .filter(|path| asset_exists(path, "reference_doc"))
            .cloned();
        let lua_filters = settings
            .lua_filters
            .iter()
            .filter(|path| asset_exists(path, "lua_filter"))
            .cloned()
            .collect();

        Self {
            binary: settings.binary.clone(),
            input_format: settings.input_format.clone(),
            reference_doc,
            highlight_style: settings.highlight_style.clone(),
            lua_filters,
            pdf_engine: settings.pdf_engine.clone(),
            main_font: settings.main_font.clone(),
            work_dir: settings.work_dir.clone(),
        }
    }

    pub(crate) fn build_args(
        &self,
        format: ExportFormat,
        input: &Path,
        output: &Path,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            input.as_os_str().to_owned(),
            "-f".into(),
            self.input_format.as_str().into(),
            "-t".into(),
            format.pandoc_target().into(),
            "-o".into(),
            output.as_os_str().to_owned(),
        ];

        for filter in &self.lua_filters {
            args.push(prefixed("--lua-filter=", filter.as_os_str()));
        }

        match format {
            ExportFormat::Docx => {
                args.push(format!("--highlight-style={}", self.highlight_style).into());
                if let Some(reference) = &self.reference_doc {
                    args.push(prefixed("--reference-doc=", reference.as_os_str()));
                }
            }
            ExportFormat::Pdf => {
                args.push(format!("--pdf-engine={}", self.pdf_engine).into());
                args.push("-V".into());
                args.push(format!("mainfont={}", self.main_font).into());
                args.push(format!("--highlight-style={}", self.highlight_style).into());
            }
        }

        args
    }
}

#[async_trait]
impl DocumentConverter for PandocConverter {
    async fn convert(&self, markdown: &str, format: ExportFormat) -> Result<Bytes, ExportError> {
        let started_at = Instant::now();

        // Dropping the guard removes the input and output files.
        let scratch = tempfile::Builder::new()
            .prefix("mdexport-")
            .tempdir_in(&self.work_dir)?;
        let input_path = scratch.path().join(INPUT_FILE_NAME);
        let output_path = scratch.path().join(format!("output.{}", format.extension()));

        fs::write(&input_path, markdown).await?;

        let args = self.build_args(format, &input_path, &output_path);
        debug!(
            target = "application::export::pandoc",
            binary = %self.binary.display(),
            ?args,
            "Invoking pandoc"
        );

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|err| {
            warn!(
                target = "application::export::pandoc",
                op = "pandoc::convert",
                result = "error",
                format = %format,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error_code = "spawn",
                error = %err,
                "Failed to spawn pandoc"
            );
            if err.kind() == ErrorKind::NotFound {
                ExportError::ConverterUnavailable {
                    binary: self.binary.display().to_string(),
                    source: err,
                }
            } else {
                ExportError::Io(err)
            }
        })?;
        // Dropped with this future on timeout, taking pdf engines down too.
        let group = ProcessGroupGuard::new(child.id());

        let stderr_pipe = child.stderr.take();
        let collect_stderr = async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                pipe.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };
        let (status, stderr) = tokio::try_join!(child.wait(), collect_stderr)?;
        group.disarm();

        if !status.success() {
            let exit_code = status.code();
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            warn!(
                target = "application::export::pandoc",
                op = "pandoc::convert",
                result = "error",
                format = %format,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                stderr = %stderr,
                "Pandoc exited with failure"
            );
            return Err(ExportError::ConverterFailed { exit_code, stderr });
        }

        let bytes = match fs::read(&output_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ExportError::MissingOutput { format });
            }
            Err(err) => return Err(ExportError::Io(err)),
        };

        debug!(
            target = "application::export::pandoc",
            op = "pandoc::convert",
            result = "ok",
            format = %format,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            output_bytes = bytes.len(),
            "Pandoc conversion finished"
        );

        Ok(Bytes::from(bytes))
    }
}

fn asset_exists(path: &Path, kind: &'static str) -> bool {
    if path.exists() {
        return true;
    }
    warn!(
        target = "application::export::pandoc",
        asset = kind,
        path = %path.display(),
        "Pandoc asset not found; omitting its flag"
    );
    false
}

fn prefixed(flag: &str, value: &std::ffi::OsStr) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push(value);
    arg
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings_in(dir: &Path) -> PandocSettings {
        PandocSettings {
            binary: PathBuf::from("pandoc"),
            input_format: "markdown+tex_math_dollars".to_string(),
            reference_doc: Some(dir.join("reference.docx")),
            highlight_style: "pygments".to_string(),
            lua_filters: vec![dir.join("mermaid_filter.lua")],
            pdf_engine: "xelatex".to_string(),
            main_font: "Noto Sans CJK SC".to_string(),
            work_dir: dir.to_path_buf(),
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn docx_arguments_use_reference_doc_and_filters() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("reference.docx"), b"ref").expect("write ref");
        std::fs::write(dir.path().join("mermaid_filter.lua"), b"-- lua").expect("write lua");
        let converter = PandocConverter::new(&settings_in(dir.path()));

        let args = strings(converter.build_args(
            ExportFormat::Docx,
            Path::new("in.md"),
            Path::new("out.docx"),
        ));

        assert_eq!(
            args,
            vec![
                "in.md".to_string(),
                "-f".to_string(),
                "markdown+tex_math_dollars".to_string(),
                "-t".to_string(),
                "docx".to_string(),
                "-o".to_string(),
                "out.docx".to_string(),
                format!("--lua-filter={}", dir.path().join("mermaid_filter.lua").display()),
                "--highlight-style=pygments".to_string(),
                format!("--reference-doc={}", dir.path().join("reference.docx").display()),
            ]
        );
    }

    #[test]
    fn pdf_arguments_select_engine_and_font() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("mermaid_filter.lua"), b"-- lua").expect("write lua");
        let converter = PandocConverter::new(&settings_in(dir.path()));

        let args = strings(converter.build_args(
            ExportFormat::Pdf,
            Path::new("in.md"),
            Path::new("out.pdf"),
        ));

        assert_eq!(&args[3..5], ["-t", "pdf"]);
        assert_eq!(
            &args[7..],
            [
                format!("--lua-filter={}", dir.path().join("mermaid_filter.lua").display()),
                "--pdf-engine=xelatex".to_string(),
                "-V".to_string(),
                "mainfont=Noto Sans CJK SC".to_string(),
                "--highlight-style=pygments".to_string(),
            ]
        );
        assert!(!args.iter().any(|arg| arg.starts_with("--reference-doc")));
    }

    #[test]
    fn missing_assets_are_omitted() {
        let dir = TempDir::new().expect("temp dir");
        let converter = PandocConverter::new(&settings_in(dir.path()));

        let args = strings(converter.build_args(
            ExportFormat::Docx,
            Path::new("in.md"),
            Path::new("out.docx"),
        ));

        assert!(!args.iter().any(|arg| arg.starts_with("--lua-filter")));
        assert!(!args.iter().any(|arg| arg.starts_with("--reference-doc")));
        assert!(args.contains(&"--highlight-style=pygments".to_string()));
    }

    #[tokio::test]
    async fn missing_binary_is_reported_as_unavailable() {
        let dir = TempDir::new().expect("temp dir");
        let mut settings = settings_in(dir.path());
        settings.binary = dir.path().join("no-such-pandoc");
        let converter = PandocConverter::new(&settings);

        let err = converter
            .convert("# hi", ExportFormat::Docx)
            .await
            .expect_err("binary is missing");
        assert!(
            matches!(err, ExportError::ConverterUnavailable { .. }),
            "unexpected error: {err:?}"
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::application::export::ExportService;
        use std::{
            os::unix::fs::PermissionsExt,
            sync::{
                Arc,
                atomic::{AtomicUsize, Ordering},
            },
            time::Duration,
        };
        use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

        fn fake_pandoc(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-pandoc");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
            let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).expect("set perms");
            path
        }

        fn converter_with(dir: &TempDir, script: &str) -> (PandocConverter, PathBuf) {
            let work_dir = dir.path().join("work");
            std::fs::create_dir_all(&work_dir).expect("work dir");
            let mut settings = settings_in(dir.path());
            settings.binary = fake_pandoc(dir.path(), script);
            settings.work_dir = work_dir.clone();
            (PandocConverter::new(&settings), work_dir)
        }

        #[tokio::test]
        async fn returns_bytes_written_to_the_output_path() {
            let dir = TempDir::new().expect("temp dir");
            let (converter, work_dir) = converter_with(
                &dir,
                r#"set -eu
input="$1"
out=""
while [ "$#" -gt 0 ]; do
  if [ "$1" = "-o" ]; then
    shift
    out="$1"
  fi
  shift
done
{ printf 'converted:'; cat "$input"; } > "$out""#,
            );

            let bytes = converter
                .convert("# Title", ExportFormat::Pdf)
                .await
                .expect("conversion succeeds");

            assert_eq!(bytes.as_ref(), b"converted:# Title");
            let leftovers = std::fs::read_dir(&work_dir).expect("read work dir").count();
            assert_eq!(leftovers, 0, "scratch directory was not removed");
        }

        #[tokio::test]
        async fn surfaces_stderr_on_failure() {
            let dir = TempDir::new().expect("temp dir");
            let (converter, work_dir) = converter_with(
                &dir,
                r#"echo "xelatex not found" >&2
exit 43"#,
            );

            let err = converter
                .convert("# Title", ExportFormat::Pdf)
                .await
                .expect_err("conversion fails");

            match err {
                ExportError::ConverterFailed { exit_code, stderr } => {
                    assert_eq!(exit_code, Some(43));
                    assert_eq!(stderr, "xelatex not found");
                }
                other => panic!("unexpected error variant: {other:?}"),
            }
            let leftovers = std::fs::read_dir(&work_dir).expect("read work dir").count();
            assert_eq!(leftovers, 0, "scratch directory was not removed");
        }

        #[derive(Clone, Default)]
        struct InfoEvents(Arc<AtomicUsize>);

        impl<S: tracing::Subscriber> Layer<S> for InfoEvents {
            fn on_event(&self, event: &tracing::Event<'_>, _: Context<'_, S>) {
                if *event.metadata().level() == tracing::Level::INFO {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        #[tokio::test]
        async fn successful_export_logs_one_info_line() {
            let dir = TempDir::new().expect("temp dir");
            let (converter, _) = converter_with(
                &dir,
                r#"while [ "$#" -gt 0 ]; do
  if [ "$1" = "-o" ]; then shift; printf 'doc' > "$1"; fi
  shift
done"#,
            );
            let service =
                ExportService::with_limits(Arc::new(converter), 1, Duration::from_secs(5));
            let events = InfoEvents::default();
            let _guard = tracing::subscriber::set_default(
                tracing_subscriber::registry().with(events.clone()),
            );

            service
                .export("# Title", ExportFormat::Docx)
                .await
                .expect("conversion succeeds");

            assert_eq!(events.0.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn deadline_kills_pandoc_and_its_helpers() {
            let dir = TempDir::new().expect("temp dir");
            let marker = dir.path().join("engine-finished");
            let (converter, work_dir) = converter_with(
                &dir,
                &format!(
                    r#"( sleep 1; touch '{marker}' ) &
wait"#,
                    marker = marker.display()
                ),
            );
            let service = ExportService::with_limits(
                Arc::new(converter),
                1,
                Duration::from_millis(200),
            );

            let started = Instant::now();
            let err = service
                .export("# Slow", ExportFormat::Pdf)
                .await
                .expect_err("conversion outlives the deadline");

            assert!(matches!(err, ExportError::Timeout { .. }), "unexpected error: {err:?}");
            assert!(started.elapsed() < Duration::from_millis(900));

            tokio::time::sleep(Duration::from_millis(1500)).await;
            assert!(!marker.exists(), "helper process kept running after the timeout");
            let leftovers = std::fs::read_dir(&work_dir).expect("read work dir").count();
            assert_eq!(leftovers, 0, "scratch directory was not removed");
        }

        #[tokio::test]
        async fn success_without_output_is_an_error() {
            let dir = TempDir::new().expect("temp dir");
            let (converter, _) = converter_with(&dir, "exit 0");

            let err = converter
                .convert("# Title", ExportFormat::Docx)
                .await
                .expect_err("no output produced");
            assert!(matches!(
                err,
                ExportError::MissingOutput {
                    format: ExportFormat::Docx
                }
            ));
        }
    }
}
