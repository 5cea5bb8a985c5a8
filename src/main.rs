use std::{future::IntoFuture, path::PathBuf, process, sync::Arc};

use mdexport::{
    application::{
        error::AppError,
        export::{ExportFormat, ExportService, PandocConverter},
        render::PreviewRenderer,
    },
    config::{self, ConvertArgs},
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::{signal, sync::Notify};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Convert(args) => run_convert(settings, args).await,
    }
}

fn build_export_service(settings: &config::Settings) -> Arc<ExportService> {
    let converter = Arc::new(PandocConverter::new(&settings.pandoc));
    Arc::new(ExportService::new(converter, &settings.workers))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let state = HttpState {
        exports: build_export_service(&settings),
        preview: Arc::new(PreviewRenderer::new(&settings.render)),
        preview_timeout: settings.workers.request_timeout,
    };
    let body_limit = usize::try_from(settings.workers.max_request_bytes.get())
        .map_err(|_| AppError::validation("workers.max_request_bytes does not fit in memory"))?;
    let router = http::build_router(state, body_limit);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        addr = %settings.server.addr,
        workers = settings.workers.concurrency.get(),
        timeout_seconds = settings.workers.request_timeout.as_secs(),
        "mdexport listening"
    );

    let drain = Arc::new(Notify::new());
    let drain_signal = drain.clone();
    let mut server = tokio::spawn(
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move { drain_signal.notified().await })
            .into_future(),
    );

    tokio::select! {
        joined = &mut server => return server_outcome(joined),
        () = shutdown_signal() => {}
    }

    info!(
        grace_seconds = settings.server.graceful_shutdown.as_secs(),
        "Shutdown requested; draining in-flight requests"
    );
    drain.notify_one();

    match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
        Ok(joined) => server_outcome(joined),
        Err(_) => {
            warn!("Graceful shutdown window elapsed; aborting remaining requests");
            server.abort();
            Ok(())
        }
    }
}

fn server_outcome(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::from(InfraError::from(err))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn run_convert(settings: config::Settings, args: ConvertArgs) -> Result<(), AppError> {
    let format: ExportFormat = args
        .format
        .parse()
        .map_err(|err| AppError::validation(format!("{err}")))?;
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input, format));

    let markdown = tokio::fs::read_to_string(&args.input)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let service = build_export_service(&settings);
    let document = service.export(&markdown, format).await?;

    tokio::fs::write(&output_path, &document.bytes)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        input = %args.input.display(),
        output = %output_path.display(),
        format = %format,
        bytes = document.bytes.len(),
        "Document exported"
    );
    Ok(())
}

fn default_output_path(input: &std::path::Path, format: ExportFormat) -> PathBuf {
    input.with_extension(format.extension())
}
