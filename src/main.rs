//! TalkTime engine
//!
//! Meters prepaid voice-changer calls driven by FreeSWITCH events, sweeps
//! expired voice entitlements on a schedule, and serves the operator API.

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use std::env;
use std::sync::Arc;
use talktime_api::AppState;
use talktime_core::{config::AppConfig, AppError};
use talktime_db::{
    create_pool, run_migrations, PgBalanceRepository, PgCallHistoryRepository,
    PgEntitlementHistoryRepository, PgEntitlementRepository, PgUserDirectory,
    PgVoiceTypeRepository,
};
use talktime_esl::{EslCallControl, EslClient};
use talktime_services::{
    BalanceLedger, CallEngine, CallHistoryRecorder, EngineSettings, EntitlementResolver,
    ExpirySweeper, LifecycleHooks, Scheduler, SessionTracker, Watchdog,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
///
/// `RUST_LOG` wins over `LOG_LEVEL`; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "talktime_engine={0},talktime_services={0},talktime_esl={0},talktime_api={0},talktime_db={0},actix_web=info,sqlx=warn",
            log_level
        ))
    });

    let json = env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting TalkTime engine v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("Failed to load configuration")?;

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, Some(config.database.max_connections)).await?;
    if config.database.run_migrations {
        run_migrations(&pool).await?;
    }

    // Storage
    let users = Arc::new(PgUserDirectory::new(pool.clone()));
    let voice_types = Arc::new(PgVoiceTypeRepository::new(pool.clone()));
    let entitlements = Arc::new(PgEntitlementRepository::new(pool.clone()));
    let history = Arc::new(PgEntitlementHistoryRepository::new(pool.clone()));
    let call_history = Arc::new(PgCallHistoryRepository::new(pool.clone()));
    let balances = Arc::new(PgBalanceRepository::new(pool.clone()));

    // Services
    let ledger = Arc::new(BalanceLedger::new(balances));
    let resolver = Arc::new(EntitlementResolver::new(entitlements.clone(), users.clone()));
    let sweeper = Arc::new(ExpirySweeper::new(
        entitlements.clone(),
        history,
        resolver.clone(),
        config.entitlements.recent_window_days,
    ));
    let recorder = Arc::new(CallHistoryRecorder::new(call_history));
    let hooks = Arc::new(LifecycleHooks::new(
        users.clone(),
        voice_types,
        entitlements,
        ledger.clone(),
        resolver.clone(),
        config.registration.clone(),
    ));

    let control = Arc::new(EslCallControl::new(&config.freeswitch));
    let (watchdog_handle, watchdog, fired) = Watchdog::channel();
    let engine = Arc::new(CallEngine::new(
        users,
        ledger.clone(),
        resolver.clone(),
        Arc::new(SessionTracker::new()),
        recorder.clone(),
        control.clone(),
        watchdog_handle,
        EngineSettings::from(&config.metering),
    ));

    if config.entitlements.sweep_on_startup {
        match sweeper.sweep().await {
            Ok(report) => info!(
                "Startup sweep moved {} of {} entitlements ({} failed)",
                report.moved_to_history, report.processed, report.failed
            ),
            Err(e) => warn!("Startup sweep failed: {}", e),
        }
    }

    // Background tasks
    let shutdown = CancellationToken::new();
    let mut tasks =
        Scheduler::for_entitlements(&config.entitlements, sweeper.clone(), resolver.clone())?
            .spawn(shutdown.clone());
    tasks.push(tokio::spawn(watchdog.run(shutdown.clone())));
    tasks.push(tokio::spawn(
        engine.clone().run_watchdog(fired, shutdown.clone()),
    ));

    if config.freeswitch.servers.is_empty() {
        warn!("No FreeSWITCH servers configured, signaling is disabled");
    }
    tasks.extend(EslClient::spawn_all(
        &config.freeswitch,
        control,
        engine.clone(),
        shutdown.clone(),
    ));

    let state = AppState {
        ledger,
        resolver,
        sweeper,
        recorder,
        engine,
        hooks,
    };

    let bind_addr = config.server_addr();
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, config.server.workers
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                AppError::Validation(err.to_string()).into()
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                AppError::InvalidInput(err.to_string()).into()
            }))
            .wrap(TracingLogger::default())
            .wrap(middleware::NormalizePath::trim())
            .service(web::scope("/api/v1").configure(talktime_api::configure))
    })
    .workers(config.server.workers)
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    shutdown.cancel();
    server_handle.stop(true).await;
    server_task.await??;

    for task in tasks {
        let _ = task.await;
    }

    info!("TalkTime engine stopped");
    Ok(())
}
