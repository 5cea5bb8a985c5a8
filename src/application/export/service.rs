use std::{sync::Arc, time::Duration, time::Instant};

use metrics::{counter, gauge, histogram};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::WorkerSettings;

use super::{
    format::ExportFormat,
    normalize::normalize_for_export,
    types::{DocumentConverter, ExportError, ExportedDocument},
};

const METRIC_EXPORT_TOTAL: &str = "mdexport_export_total";
const METRIC_EXPORT_MS: &str = "mdexport_export_ms";
const METRIC_EXPORT_INFLIGHT: &str = "mdexport_export_inflight";

/// Bounds concurrent conversions and enforces the per-request deadline.
#[derive(Clone)]
pub struct ExportService {
    converter: Arc<dyn DocumentConverter>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl ExportService {
    pub fn new(converter: Arc<dyn DocumentConverter>, workers: &WorkerSettings) -> Self {
        Self::with_limits(
            converter,
            workers.concurrency.get() as usize,
            workers.request_timeout,
        )
    }

    pub fn with_limits(
        converter: Arc<dyn DocumentConverter>,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            converter,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
        }
    }

    /// Normalise `markdown` and convert it once a worker permit is free.
    /// The deadline covers both the wait and the conversion.
    pub async fn export(
        &self,
        markdown: &str,
        format: ExportFormat,
    ) -> Result<ExportedDocument, ExportError> {
        let started_at = Instant::now();
        let normalized = normalize_for_export(markdown);

        let outcome = match tokio::time::timeout(self.timeout, self.run(&normalized, format)).await
        {
            Ok(result) => result,
            Err(_) => Err(ExportError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        };

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_EXPORT_MS, "format" => format.as_str()).record(elapsed_ms);

        match &outcome {
            Ok(document) => {
                counter!(METRIC_EXPORT_TOTAL, "format" => format.as_str(), "result" => "ok")
                    .increment(1);
                info!(
                    target = "application::export",
                    op = "export",
                    result = "ok",
                    format = %format,
                    elapsed_ms = elapsed_ms as u64,
                    input_bytes = markdown.len(),
                    output_bytes = document.bytes.len(),
                    "Export completed"
                );
            }
            Err(err) => {
                counter!(METRIC_EXPORT_TOTAL, "format" => format.as_str(), "result" => err.code())
                    .increment(1);
                warn!(
                    target = "application::export",
                    op = "export",
                    result = "error",
                    format = %format,
                    elapsed_ms = elapsed_ms as u64,
                    error_code = err.code(),
                    error = %err,
                    "Export failed"
                );
            }
        }

        outcome
    }

    async fn run(&self, markdown: &str, format: ExportFormat) -> Result<ExportedDocument, ExportError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ExportError::PoolClosed)?;
        let _inflight = InflightGuard::enter();

        let bytes = self.converter.convert(markdown, format).await?;
        Ok(ExportedDocument::new(format, bytes))
    }
}

struct InflightGuard;

impl InflightGuard {
    fn enter() -> Self {
        gauge!(METRIC_EXPORT_INFLIGHT).increment(1.0);
        Self
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(METRIC_EXPORT_INFLIGHT).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    #[derive(Default)]
    struct RecordingConverter {
        seen: Mutex<Vec<(String, ExportFormat)>>,
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl RecordingConverter {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl DocumentConverter for RecordingConverter {
        async fn convert(
            &self,
            markdown: &str,
            format: ExportFormat,
        ) -> Result<Bytes, ExportError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.seen
                .lock()
                .expect("lock")
                .push((markdown.to_string(), format));
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Bytes::from(format!("{format}:{markdown}")))
        }
    }

    struct FailingConverter;

    #[async_trait]
    impl DocumentConverter for FailingConverter {
        async fn convert(&self, _: &str, _: ExportFormat) -> Result<Bytes, ExportError> {
            Err(ExportError::ConverterFailed {
                exit_code: Some(1),
                stderr: "pandoc: boom".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn converter_receives_normalized_markdown() {
        let converter = Arc::new(RecordingConverter::default());
        let service = ExportService::with_limits(converter.clone(), 2, Duration::from_secs(5));

        let document = service
            .export(r"Inline \( x \)", ExportFormat::Pdf)
            .await
            .expect("export succeeds");

        assert_eq!(document.format, ExportFormat::Pdf);
        assert_eq!(document.bytes.as_ref(), b"pdf:Inline $x$");
        let seen = converter.seen.lock().expect("lock");
        assert_eq!(seen.as_slice(), [("Inline $x$".to_string(), ExportFormat::Pdf)]);
    }

    #[tokio::test]
    async fn slow_conversion_times_out() {
        let converter = Arc::new(RecordingConverter::with_delay(Duration::from_secs(5)));
        let service = ExportService::with_limits(converter, 1, Duration::from_millis(50));

        let err = service
            .export("# slow", ExportFormat::Docx)
            .await
            .expect_err("conversion exceeds the deadline");
        assert!(matches!(err, ExportError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn single_permit_serializes_exports() {
        let converter = Arc::new(RecordingConverter::with_delay(Duration::from_millis(30)));
        let service = ExportService::with_limits(converter.clone(), 1, Duration::from_secs(5));

        let (first, second, third) = tokio::join!(
            service.export("a", ExportFormat::Docx),
            service.export("b", ExportFormat::Docx),
            service.export("c", ExportFormat::Pdf),
        );

        assert!(first.is_ok() && second.is_ok() && third.is_ok());
        assert_eq!(converter.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(converter.seen.lock().expect("lock").len(), 3);
    }

    #[tokio::test]
    async fn waiting_for_a_permit_counts_against_the_deadline() {
        let converter = Arc::new(RecordingConverter::with_delay(Duration::from_millis(200)));
        let service = ExportService::with_limits(converter.clone(), 1, Duration::from_millis(300));

        let (first, second) = tokio::join!(
            service.export("a", ExportFormat::Docx),
            service.export("b", ExportFormat::Docx),
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(ExportError::Timeout { .. })));
    }

    #[tokio::test]
    async fn converter_errors_pass_through() {
        let service =
            ExportService::with_limits(Arc::new(FailingConverter), 2, Duration::from_secs(5));

        let err = service
            .export("# doc", ExportFormat::Docx)
            .await
            .expect_err("converter fails");
        match err {
            ExportError::ConverterFailed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(1));
                assert_eq!(stderr, "pandoc: boom");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }
}
