use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use metrics_util::debugging::DebuggingRecorder;

use mdexport::application::export::{
    DocumentConverter, ExportError, ExportFormat, ExportService,
};
use mdexport::application::render::PreviewRenderer;

struct EchoConverter;

#[async_trait]
impl DocumentConverter for EchoConverter {
    async fn convert(&self, markdown: &str, _: ExportFormat) -> Result<Bytes, ExportError> {
        if markdown.contains("fail") {
            return Err(ExportError::ConverterFailed {
                exit_code: Some(1),
                stderr: "requested failure".to_string(),
            });
        }
        Ok(Bytes::from(markdown.to_string()))
    }
}

#[tokio::test]
async fn export_and_preview_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let service = ExportService::with_limits(Arc::new(EchoConverter), 1, Duration::from_secs(5));
    service
        .export("# ok", ExportFormat::Docx)
        .await
        .expect("export succeeds");
    service
        .export("please fail", ExportFormat::Pdf)
        .await
        .expect_err("export fails");

    PreviewRenderer::without_diagrams()
        .render("*hello*")
        .expect("preview renders");

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for metric in [
        "mdexport_export_total",
        "mdexport_export_ms",
        "mdexport_export_inflight",
        "mdexport_preview_total",
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let results: HashSet<String> = snapshot
        .iter()
        .filter(|(composite_key, _, _, _)| composite_key.key().name() == "mdexport_export_total")
        .flat_map(|(composite_key, _, _, _)| {
            composite_key
                .key()
                .labels()
                .filter(|label| label.key() == "result")
                .map(|label| label.value().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    assert!(results.contains("ok"), "labels: {results:?}");
    assert!(results.contains("converter_failed"), "labels: {results:?}");
}
