use std::{
    fs,
    io::{self, ErrorKind, Read, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::infra::process::ProcessGroupGuard;

/// Fence languages rendered as diagrams instead of highlighted code.
const DIAGRAM_LANGUAGES: [&str; 3] = ["mermaid", "sequence", "flowchart"];

const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub(crate) fn is_diagram_language(language: &str) -> bool {
    DIAGRAM_LANGUAGES
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(language))
}

#[derive(Debug, Error)]
pub(crate) enum DiagramError {
    #[error("failed to prepare cache directory: {0}")]
    CacheInit(io::Error),
    #[error("failed to stage diagram source: {0}")]
    Io(io::Error),
    #[error("mmdc exited with {exit_code:?}: {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("mmdc is not installed: {0}")]
    NotFound(io::Error),
    #[error("failed to read rendered SVG: {0}")]
    Read(io::Error),
    #[error("mmdc did not finish within {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Shells out to the Mermaid CLI and keeps every SVG on disk keyed by the
/// SHA-256 of its source, so repeated previews never re-run `mmdc`.
#[derive(Debug, Clone)]
pub(crate) struct MermaidRenderer {
    cli_path: PathBuf,
    cache_dir: PathBuf,
}

impl MermaidRenderer {
    pub(crate) fn new(cli_path: PathBuf, cache_dir: PathBuf) -> Result<Self, DiagramError> {
        fs::create_dir_all(&cache_dir).map_err(DiagramError::CacheInit)?;
        Ok(Self {
            cli_path,
            cache_dir,
        })
    }

    pub(crate) fn cli_path(&self) -> &Path {
        &self.cli_path
    }

    /// Render `source`, killing `mmdc` and everything it launched once
    /// `deadline` passes.
    pub(crate) fn render_svg(
        &self,
        source: &str,
        deadline: Instant,
    ) -> Result<String, DiagramError> {
        let started_at = Instant::now();
        let cache_path = self.cache_dir.join(format!("{}.svg", hash_source(source)));

        match fs::read_to_string(&cache_path) {
            Ok(svg) => {
                debug!(
                    target = "application::render::mermaid",
                    op = "mermaid::render_svg",
                    result = "cache_hit",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    svg_bytes = svg.len(),
                    "Diagram served from cache"
                );
                return Ok(svg);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    target = "application::render::mermaid",
                    op = "mermaid::render_svg",
                    result = "cache_read_error",
                    cache_path = %cache_path.display(),
                    error = %err,
                    "Cached diagram unreadable; re-rendering"
                );
            }
        }

        let mut input_file = NamedTempFile::new().map_err(DiagramError::Io)?;
        input_file
            .write_all(source.as_bytes())
            .map_err(DiagramError::Io)?;
        input_file.flush().map_err(DiagramError::Io)?;

        let output_file = tempfile::Builder::new()
            .suffix(".svg")
            .tempfile_in(&self.cache_dir)
            .map_err(DiagramError::Io)?;

        let mut command = Command::new(&self.cli_path);
        command
            .arg("--input")
            .arg(input_file.path())
            .arg("--output")
            .arg(output_file.path())
            .arg("--outputFormat")
            .arg("svg")
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        let mut child = command.spawn().map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                DiagramError::NotFound(err)
            } else {
                DiagramError::Io(err)
            }
        })?;
        let group = ProcessGroupGuard::new(Some(child.id()));

        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        let status = loop {
            if let Some(status) = child.try_wait().map_err(DiagramError::Io)? {
                break status;
            }
            let now = Instant::now();
            if now >= deadline {
                drop(group);
                let _ = child.kill();
                let _ = child.wait();
                let budget = deadline.saturating_duration_since(started_at);
                warn!(
                    target = "application::render::mermaid",
                    op = "mermaid::render_svg",
                    result = "timeout",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "mmdc killed at the render deadline"
                );
                return Err(DiagramError::Timeout(budget));
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        };
        group.disarm();

        if !status.success() {
            let exit_code = status.code();
            let stderr = stderr_reader
                .and_then(|reader| reader.join().ok())
                .map(|buf| String::from_utf8_lossy(&buf).trim().to_string())
                .unwrap_or_default();
            warn!(
                target = "application::render::mermaid",
                op = "mermaid::render_svg",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                stderr = %stderr,
                "mmdc invocation failed"
            );
            return Err(DiagramError::Cli { exit_code, stderr });
        }

        match output_file.persist(&cache_path) {
            Ok(_) => {}
            // A concurrent preview cached the same diagram first.
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(DiagramError::Io(err.error)),
        }

        let svg = fs::read_to_string(&cache_path).map_err(DiagramError::Read)?;

        debug!(
            target = "application::render::mermaid",
            op = "mermaid::render_svg",
            result = "cache_miss",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            svg_bytes = svg.len(),
            "Diagram rendered via mmdc"
        );

        Ok(svg)
    }
}

fn hash_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}
