use std::{process, sync::Arc};

use tidings::{
    application::{
        access::AccessService,
        dispatch::{DispatchEngine, DispatchSettings},
        error::AppError,
        gateway::{DeliveryFailure, Gateway},
    },
    config,
    domain::access::AccessOracle,
    infra::{
        blobs::BlobStorage,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HealthState},
        telegram::{TelegramGateway, TelegramSettings},
        telemetry,
    },
};
use tokio::sync::{mpsc, watch};
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
        error!(error = %error, kind = ?error.kind(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, kind = ?error.kind(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let loaded = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(loaded.logging()).map_err(AppError::from)?;

    match loaded {
        config::Loaded::Serve(settings) => run_serve(*settings).await,
        config::Loaded::Init(settings) => run_init(settings).await,
    }
}

async fn run_init(settings: config::InitSettings) -> Result<(), AppError> {
    init_repositories(&settings.database, &settings.store).await?;
    info!(
        target = "tidings::init",
        groups = ?settings.store.default_groups,
        "store initialised"
    );
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = init_repositories(&settings.database, &settings.store).await?;
    let blobs = Arc::new(
        BlobStorage::new(settings.blobs.directory.clone()).map_err(InfraError::from)?,
    );
    info!(
        target = "tidings::serve",
        directory = %blobs.root().display(),
        "blob storage ready"
    );

    let access = AccessService::new(
        AccessOracle::new(settings.access.admin_user_id),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    );

    let gateway: Arc<dyn Gateway> = Arc::new(TelegramGateway::new(
        TelegramSettings {
            api_base: settings.gateway.api_base.clone(),
            bot_token: settings.gateway.bot_token.clone(),
            timeout: settings.gateway.timeout,
            parse_mode: settings.gateway.parse_mode.clone(),
        },
        blobs.clone(),
    )?);

    let (failure_tx, failure_rx) = mpsc::unbounded_channel();
    let engine = DispatchEngine::new(
        store.clone(),
        gateway.clone(),
        blobs,
        access,
        DispatchSettings {
            timezone: settings.scheduler.timezone,
            send_timeout: settings.gateway.timeout,
            restart_delay: settings.scheduler.restart_delay,
        },
    )
    .with_failure_channel(failure_tx);

    let notifier = spawn_failure_notifier(gateway, settings.access.admin_user_id, failure_rx);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_handle = tokio::spawn(async move { engine.run(shutdown_rx).await });

    let result = serve_health(&settings, store).await;

    let _ = shutdown_tx.send(true);
    if let Err(err) = engine_handle.await {
        error!(target = "tidings::serve", error = %err, "dispatch engine task failed");
    }
    // The engine owned the last failure sender, so the notifier drains and exits.
    if let Err(err) = notifier.await {
        error!(target = "tidings::serve", error = %err, "failure notifier task failed");
    }

    result
}

async fn init_repositories(
    database: &config::DatabaseSettings,
    store: &config::StoreSettings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let pool = PostgresRepositories::connect(&database.url, database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let repositories = PostgresRepositories::new(pool);
    repositories
        .init(&store.default_groups)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(repositories))
}

/// Forward permanent delivery failures to the super-admin as plain text.
fn spawn_failure_notifier(
    gateway: Arc<dyn Gateway>,
    admin_chat: i64,
    mut failures: mpsc::UnboundedReceiver<DeliveryFailure>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            if let Err(err) = gateway.send_text(admin_chat, &failure.notice()).await {
                warn!(
                    target = "tidings::serve",
                    task_id = %failure.task_id,
                    error = %err,
                    "failed to notify super-admin about deactivated task"
                );
            }
        }
    })
}

async fn serve_health(
    settings: &config::Settings,
    store: Arc<PostgresRepositories>,
) -> Result<(), AppError> {
    let router = http::build_router(HealthState { store });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "tidings::serve",
        addr = %settings.server.addr,
        "health endpoint listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "tidings::serve", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target = "tidings::serve", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(target = "tidings::serve", "shutdown requested");
}
