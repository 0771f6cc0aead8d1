use std::{process, sync::Arc};

use murmur::{
    application::{
        error::AppError,
        fanout::{
            ChannelBroker, FanoutContext, FanoutProducer, TaskBroker, TaskRegistry, WorkerOptions,
        },
        repos::Repository,
        timeline::TimelineService,
    },
    cache::{CacheConfig, CacheStore, CachedRepository, MemoryCacheStore, RedisCacheStore},
    config::{self, BrokerBackend, CacheBackend, OriginMode, StorageMode},
    infra::{
        db::PostgresRepository,
        error::InfraError,
        http::{self, HttpState},
        memory::MemoryRepository,
        queue::{self, FanoutWorkerContext, PostgresBroker},
        telemetry,
    },
};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const SOURCE: &str = "murmur::main";

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
        config::Command::Worker(_) => run_worker(settings).await,
    }
}

/// Long-lived handles shared by both process modes.
struct Runtime {
    repository: Arc<dyn Repository>,
    /// The store behind any cache layer; same as `repository` without one.
    origin: Arc<dyn Repository>,
    pool: Option<PgPool>,
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let runtime = init_runtime(&settings).await?;
    let fanout = fanout_context(&settings, &runtime);

    let mut local = None;
    let broker: Arc<dyn TaskBroker> = match settings.broker {
        BrokerBackend::Memory => {
            let (broker, queue) = ChannelBroker::channel();
            let worker = queue
                .into_worker(
                    TaskRegistry::with_default_handlers(),
                    fanout,
                    worker_options(&settings),
                )
                .spawn();
            local = Some((broker.clone(), worker));
            Arc::new(broker)
        }
        BrokerBackend::Postgres => Arc::new(PostgresBroker::new(
            require_pool(&runtime)?.clone(),
            settings.fanout.max_attempts.get(),
        )),
    };

    let timeline = TimelineService::new(
        runtime.repository.clone(),
        FanoutProducer::new(broker),
        settings.server.request_timeout,
    );
    let result = serve_http(&settings, HttpState::new(timeline)).await;

    if let Some((broker, worker)) = local {
        drain_local_worker(&settings, broker, worker).await;
    }

    result
}

async fn run_worker(settings: config::Settings) -> Result<(), AppError> {
    if settings.broker != BrokerBackend::Postgres {
        return Err(AppError::from(InfraError::configuration(
            "worker mode requires the postgres broker; the memory broker runs inside `serve`",
        )));
    }

    let runtime = init_runtime(&settings).await?;
    let pool = require_pool(&runtime)?.clone();
    let context = FanoutWorkerContext {
        fanout: fanout_context(&settings, &runtime),
    };

    let mut monitor = queue::spawn_fanout_monitor(pool, context, &settings.fanout);
    info!(target = SOURCE, "fan-out worker running");

    let finished = tokio::select! {
        _ = shutdown_signal() => None,
        joined = &mut monitor => Some(joined),
    };
    match finished {
        None => {
            monitor.abort();
            let _ = monitor.await;
        }
        Some(Err(err)) => {
            return Err(AppError::unexpected(format!("fan-out monitor panicked: {err}")));
        }
        Some(Ok(())) => {}
    }

    Ok(())
}

async fn init_runtime(settings: &config::Settings) -> Result<Runtime, AppError> {
    let needs_pool =
        settings.storage.uses_postgres() || settings.broker == BrokerBackend::Postgres;
    let pool = if needs_pool {
        Some(init_pool(settings).await?)
    } else {
        None
    };

    let (repository, origin): (Arc<dyn Repository>, Arc<dyn Repository>) =
        match settings.storage.mode {
            StorageMode::Memory => {
                let memory: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
                (memory.clone(), memory)
            }
            StorageMode::Postgres => {
                let postgres = postgres_repository(pool.as_ref())?;
                (postgres.clone(), postgres)
            }
            StorageMode::Cached => {
                let origin: Arc<dyn Repository> = match settings.storage.cached_origin {
                    OriginMode::Memory => Arc::new(MemoryRepository::new()),
                    OriginMode::Postgres => postgres_repository(pool.as_ref())?,
                };
                let cache_config = CacheConfig::from(&settings.cache);
                let store = init_cache_store(settings, &cache_config).await?;
                let cached: Arc<dyn Repository> =
                    Arc::new(CachedRepository::new(origin.clone(), store, cache_config));
                (cached, origin)
            }
        };

    info!(
        target = SOURCE,
        storage = ?settings.storage.mode,
        broker = ?settings.broker,
        "storage initialized"
    );

    Ok(Runtime {
        repository,
        origin,
        pool,
    })
}

async fn init_pool(settings: &config::Settings) -> Result<PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepository::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    PostgresRepository::ensure_schema(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    if settings.broker == BrokerBackend::Postgres {
        queue::ensure_queue_schema(&pool)
            .await
            .map_err(AppError::from)?;
    }

    Ok(pool)
}

async fn init_cache_store(
    settings: &config::Settings,
    cache_config: &CacheConfig,
) -> Result<Arc<dyn CacheStore>, AppError> {
    match settings.cache.backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryCacheStore::new(cache_config))),
        CacheBackend::Redis => {
            let url = settings
                .cache
                .redis_url
                .as_ref()
                .ok_or_else(|| InfraError::configuration("redis url is not configured"))
                .map_err(AppError::from)?;
            let store = RedisCacheStore::connect(url)
                .await
                .map_err(|err| AppError::from(InfraError::cache_backend(err.to_string())))?;
            Ok(Arc::new(store))
        }
    }
}

fn postgres_repository(pool: Option<&PgPool>) -> Result<Arc<dyn Repository>, AppError> {
    let pool = pool
        .ok_or_else(|| InfraError::configuration("database pool is not initialized"))
        .map_err(AppError::from)?;
    Ok(Arc::new(PostgresRepository::new(pool.clone())))
}

fn require_pool(runtime: &Runtime) -> Result<&PgPool, AppError> {
    runtime
        .pool
        .as_ref()
        .ok_or_else(|| AppError::from(InfraError::configuration("database url is not configured")))
}

fn fanout_context(settings: &config::Settings, runtime: &Runtime) -> FanoutContext {
    FanoutContext::new(runtime.repository.clone(), settings.fanout.handler_timeout)
        .with_origin(runtime.origin.clone())
        .with_backfill_page_size(settings.fanout.backfill_page_size.get())
}

fn worker_options(settings: &config::Settings) -> WorkerOptions {
    let concurrency = settings.fanout.distribute_concurrency.get()
        + settings.fanout.backfill_concurrency.get();
    WorkerOptions {
        concurrency: concurrency as usize,
        max_attempts: settings.fanout.max_attempts.get(),
    }
}

/// Give in-flight local tasks a bounded window to finish after the listener stops.
async fn drain_local_worker(
    settings: &config::Settings,
    broker: ChannelBroker,
    worker: JoinHandle<()>,
) {
    let pending = broker.pending();
    if pending > 0
        && tokio::time::timeout(settings.server.graceful_shutdown, broker.wait_idle())
            .await
            .is_err()
    {
        warn!(
            target = SOURCE,
            pending = broker.pending(),
            "local fan-out tasks abandoned at shutdown"
        );
    }
    worker.abort();
    let _ = worker.await;
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(target = SOURCE, addr = %settings.server.addr, "http listener bound");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target = SOURCE, error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = SOURCE, "shutdown requested");
}
