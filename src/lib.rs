mod utils;

pub mod chart;
pub mod db;
pub mod device;
pub mod error;
pub mod events;
pub mod history;
pub mod models;
pub mod monitor;
pub mod options;
pub mod settings;

use std::{fs, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::{io::BufReader, sync::Mutex};

use db::Database;
use device::{DeviceConnector, SystemConnector};
use events::{EventSink, StdoutSink};
use monitor::{commands::run_console, LiveMonitor, SessionController};
use options::{parse_args, Parsed, StartupOptions, SETTINGS_FILE};
use settings::SettingsStore;

pub struct AppState {
    pub db: Database,
    pub controller: SessionController,
    pub live: Mutex<LiveMonitor>,
    pub settings: SettingsStore,
    pub sink: Arc<dyn EventSink>,
}

impl AppState {
    pub fn new(
        db: Database,
        connector: Arc<dyn DeviceConnector>,
        sink: Arc<dyn EventSink>,
        settings: SettingsStore,
    ) -> Self {
        let window_capacity = settings.current().window_capacity;
        let controller = SessionController::new(db.clone(), connector, sink.clone(), window_capacity);
        Self {
            db,
            controller,
            live: Mutex::new(LiveMonitor::new()),
            settings,
            sink,
        }
    }

    /// Stops the live loop and releases the device. Safe to call when idle.
    pub async fn shutdown(&self) {
        if let Err(err) = self.live.lock().await.stop_streaming().await {
            warn!("Live loop did not shut down cleanly: {err:#}");
        }
        if let Some(session) = self.controller.stop().await {
            info!("Released device for session {} on shutdown", session.id);
        }
    }
}

fn build_state(options: &StartupOptions) -> Result<AppState> {
    fs::create_dir_all(&options.data_dir).with_context(|| {
        format!("Failed to create data directory {}", options.data_dir.display())
    })?;

    let settings = SettingsStore::new(options.data_dir.join(SETTINGS_FILE))?;
    if !settings.path().exists() {
        // Give the operator a file to edit.
        settings.save()?;
        info!("Wrote default settings to {}", settings.path().display());
    }
    settings.apply(|s| {
        if let Some(port) = &options.port {
            s.device_port = port.clone();
        }
        s.simulate |= options.simulate;
        s.fake_fallback |= options.fake_fallback;
    });

    let database = Database::new(options.db_path.clone())?;
    let connector = Arc::new(SystemConnector::new(settings.current()));
    Ok(AppState::new(database, connector, Arc::new(StdoutSink), settings))
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("stress-dashboard");
    let options = match parse_args(program, args.get(1..).unwrap_or_default()) {
        Ok(Parsed::Run(options)) => options,
        Ok(Parsed::Help(usage)) => {
            println!("{usage}");
            return Ok(());
        }
        Err(usage) => anyhow::bail!(usage),
    };

    utils::logging::init_logging();
    info!("Stress dashboard starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(async move {
        let state = build_state(&options)?;

        // Close out sessions that were running when the app last crashed.
        for event in state.db.recover_unterminated_sessions().await? {
            warn!(
                "Recovered unterminated session for player {} on device {}; stop recorded at {}",
                event.player_id, event.device_id, event.timestamp
            );
        }

        info!(
            "Database at {}; device port {}",
            state.db.path().display(),
            state.settings.current().device_port
        );

        let console = run_console(&state, BufReader::new(tokio::io::stdin()));
        let outcome = tokio::select! {
            result = console => result,
            signal = tokio::signal::ctrl_c() => {
                info!("Interrupted; shutting down");
                signal.context("Failed to listen for Ctrl-C")
            }
        };

        state.shutdown().await;
        outcome
    });

    // A pending stdin read would otherwise keep the runtime alive.
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::EventKind,
        device::testing::ScriptedConnector,
        events::testing::RecordingSink,
        models::Sample,
        monitor::commands::start_session,
    };
    use chrono::Utc;

    const DEVICE_ID: i64 = 4;

    async fn event_kinds(state: &AppState, player_id: i64) -> Vec<EventKind> {
        state
            .db
            .list_events(player_id, DEVICE_ID)
            .await
            .expect("events")
            .into_iter()
            .map(|e| e.event)
            .collect()
    }

    #[tokio::test]
    async fn shutdown_releases_device_and_records_stop() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = Database::new(dir.path().join("app.sqlite3")).expect("database");
        let player_id = db.insert_player("P").await.expect("player").id;
        let settings = SettingsStore::new(dir.path().join(SETTINGS_FILE)).expect("settings");
        settings.apply(|s| s.refresh_interval_ms = 10);

        let origin = Utc::now();
        let batch: Vec<Sample> = (0..5)
            .map(|i| Sample::from_raw(origin + chrono::Duration::milliseconds(10 * i), 1500, 2048))
            .collect();
        let connector = Arc::new(ScriptedConnector::new(DEVICE_ID, vec![batch]));
        let state = AppState::new(
            db,
            connector.clone(),
            Arc::new(RecordingSink::default()),
            settings,
        );

        start_session(&state, "P", "Aristotle").await.expect("start");
        assert!(state.live.lock().await.is_running());

        // The operator never pressed stop.
        state.shutdown().await;

        assert!(!state.live.lock().await.is_running());
        assert!(!state.controller.is_active().await);
        assert_eq!(connector.ends(), 1);
        assert_eq!(
            event_kinds(&state, player_id).await,
            vec![EventKind::StartGame, EventKind::StopGame]
        );

        state.shutdown().await;
        assert_eq!(connector.ends(), 1);
        assert_eq!(
            event_kinds(&state, player_id).await,
            vec![EventKind::StartGame, EventKind::StopGame]
        );
    }
}
