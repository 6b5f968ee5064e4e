use std::{process, sync::Arc};

use axum::Router;
use htmlcache::{
    application::{error::AppError, pages::PageService},
    cache::{
        CacheOptions, CacheState, CacheStore, DeploymentCheck, DurableCacheBackend, EnvDeployment,
        MemoryDurableCache, MemoryFastCache, PageRequest, RenderCache, RequestContext,
        SystemClock,
    },
    config,
    infra::{
        db::PostgresDurableCache,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
    minify::{MinifyOptions, minify},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::Notify,
};
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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Minify(args) => run_minify(args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache = build_render_cache(&settings).await?;
    let options = build_cache_options(&settings.cache);

    let http_state = HttpState {
        pages: Arc::new(PageService::new(settings.server.pages_dir.clone())),
        cache: CacheState {
            cache,
            options,
            privileged_header: settings.cache.privileged_header.clone(),
        },
    };

    info!(
        target = "htmlcache::serve",
        addr = %settings.server.addr,
        pages_dir = %settings.server.pages_dir.display(),
        durable = settings.cache.use_durable_tier,
        "starting page server"
    );

    serve_http(&settings, http::build_router(http_state)).await
}

async fn build_render_cache(settings: &config::Settings) -> Result<RenderCache, AppError> {
    let clock = Arc::new(SystemClock);
    let fast = Arc::new(MemoryFastCache::new(
        settings.cache.fast_capacity,
        clock.clone(),
    ));
    let mut store = CacheStore::new(fast, clock);

    if settings.cache.use_durable_tier {
        store = store.with_durable(init_durable_tier(&settings.database).await?);
    }

    let deployment = Arc::new(EnvDeployment::new(
        settings.cache.deployment_env_var.clone(),
        settings.cache.development_prefix.clone(),
    ));

    if deployment.is_development() {
        warn!(
            target = "htmlcache::serve",
            var = %settings.cache.deployment_env_var,
            "development deployment, pages are rendered on every request"
        );
    }

    Ok(RenderCache::new(store, deployment))
}

async fn init_durable_tier(
    database: &config::DatabaseSettings,
) -> Result<Arc<dyn DurableCacheBackend>, AppError> {
    let Some(url) = database.url.as_deref() else {
        warn!(
            target = "htmlcache::serve",
            "database url is not configured, durable tier is kept in memory"
        );
        return Ok(Arc::new(MemoryDurableCache::new()));
    };

    let pool = PostgresDurableCache::connect(url, database.max_connections.get())
        .await
        .map_err(InfraError::from)?;
    PostgresDurableCache::run_migrations(&pool)
        .await
        .map_err(InfraError::from)?;

    Ok(Arc::new(PostgresDurableCache::new(pool)))
}

fn build_cache_options(settings: &config::CacheSettings) -> CacheOptions<PageRequest> {
    let prefixes = settings.skip_prefixes.clone();
    CacheOptions::<PageRequest>::from(settings).skip_when(move |request: &PageRequest| {
        prefixes
            .iter()
            .any(|prefix| request.path().starts_with(prefix.as_str()))
    })
}

async fn serve_http(settings: &config::Settings, router: Router) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;

    let drain = Arc::new(Notify::new());
    let drain_signal = drain.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move { drain_signal.notified().await })
            .await
    });

    tokio::select! {
        joined = &mut server => return server_result(joined),
        () = shutdown_signal() => {}
    }

    info!(target = "htmlcache::serve", "shutdown requested, draining connections");
    drain.notify_one();

    match tokio::time::timeout(settings.server.graceful_shutdown, server).await {
        Ok(joined) => server_result(joined),
        Err(_) => {
            warn!(
                target = "htmlcache::serve",
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "graceful shutdown timed out"
            );
            Ok(())
        }
    }
}

fn server_result(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(result) => result.map_err(|err| AppError::from(InfraError::server(err.to_string()))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
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
                error!(error = %err, "failed to listen for SIGTERM");
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

async fn run_minify(args: config::MinifyArgs) -> Result<(), AppError> {
    let markup = match args.file.as_ref() {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(InfraError::from)?,
        None => {
            let mut buffer = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buffer)
                .await
                .map_err(InfraError::from)?;
            buffer
        }
    };

    let options = MinifyOptions::with_comments(args.include_comments);
    let minified = minify(&markup, &options)?;

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(minified.as_bytes())
        .await
        .map_err(InfraError::from)?;
    stdout.flush().await.map_err(InfraError::from)?;

    Ok(())
}
