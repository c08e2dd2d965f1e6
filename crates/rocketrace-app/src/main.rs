// Rocket race client entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not terminal)
// 2. Load config
// 3. Open database and restore the saved session
// 4. Build the GraphQL transport
// 5. Create mpsc channels
// 6. Set up cross-tab sync
// 7. Spawn app logic task
// 8. Run the console until the user quits
// 9. Cleanup on exit

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

use rocketrace::app;
use rocketrace::console;
use rocketrace::graphql::GraphqlClient;
use rocketrace_core::config;
use rocketrace_core::db::Database;
use rocketrace_core::replicator::{Replicator, SqliteChannel};
use rocketrace_core::session::SessionMachine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Rocket race client starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: server={}, policy={:?}, namespace={}",
        config.server.http_url, config.race.completion_policy, config.storage.namespace
    );

    // 3. Open database and restore the saved session
    let db_path = config.storage.db_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {}", parent.display()))?;
    }
    let db_path_str = db_path.to_string_lossy().into_owned();
    let db = Arc::new(Database::open(&db_path_str).context("failed to open database")?);
    info!("Database opened at {db_path_str}");

    let saved = db.load_session(&config.storage.namespace);
    let mut machine = SessionMachine::restore(saved, config.race.completion_policy);
    if let Some(race_id) = db.load_stuck_race(&config.storage.namespace) {
        machine.restore_exhausted(&race_id);
    }
    info!(
        phase = ?machine.phase(),
        history = machine.finished_races().len(),
        "Session restored"
    );

    // 4. Transport
    let transport = Arc::new(GraphqlClient::new(
        config.server.http_url.clone(),
        config.server.ws_url.clone(),
    ));

    // 5. Channels
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (ui_tx, ui_rx) = mpsc::channel(256);
    let (feed_tx, feed_rx) = mpsc::channel(256);
    let (reconcile_tx, reconcile_rx) = mpsc::channel(64);
    let (sync_tx, sync_rx) = mpsc::channel(256);

    // 6. Cross-tab sync
    let replicator = if config.sync.enabled {
        let channel = Arc::new(SqliteChannel::new(Arc::clone(&db), config.sync.poll_interval()));
        Replicator::new(channel, config.storage.namespace.clone())
    } else {
        info!("Cross-tab sync disabled");
        Replicator::disabled(config.storage.namespace.clone())
    };
    // With sync disabled this drops the only sender and the loop stops
    // listening for remote messages.
    let sync_handle = replicator.spawn_inbound(sync_tx);
    info!(
        tab_id = replicator.tab_id(),
        enabled = replicator.is_enabled(),
        "Replicator ready"
    );

    // 7. Spawn app logic task
    let app_state = app::AppState::new(
        config.clone(),
        machine,
        Arc::clone(&db),
        transport,
        feed_tx,
        replicator,
        reconcile_tx,
    );
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(cmd_rx, feed_rx, reconcile_rx, sync_rx, ui_tx, app_state).await {
            error!("Application loop error: {}", e);
        }
    });

    // 8. Console (blocks until the user quits or stdin closes)
    info!("Application ready");
    if let Err(e) = console::run(ui_rx, cmd_tx).await {
        error!("Console error: {}", e);
    }

    // 9. Cleanup: wait for app task to finish (with timeout)
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let _ = app_handle.await;
    })
    .await;

    if let Some(handle) = sync_handle {
        handle.abort();
    }

    info!("Rocket race client shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (not the terminal, which is used by the console).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("rocketrace.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rocketrace=info,rocketrace_core=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    Ok(())
}
