use std::{collections::VecDeque, sync::Arc};

use chrono::Utc;
use log::{error, info};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    db::{Database, EventKind, MeasurementEvent},
    device::{DeviceConnector, SensorDevice},
    error::MonitorError,
    events::{emit_notice, emit_serialized, EventSink, NoticeLevel, SESSION_STATE_EVENT},
    models::{Annotation, Sample, Session, SessionStatus},
};

use super::{RollingWindow, SessionState};

/// What one refresh tick hands to the chart renderer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveFrame {
    pub session: Session,
    pub samples: Vec<Sample>,
    pub annotations: Vec<Annotation>,
    /// Samples drained from the device during this tick.
    pub fresh: usize,
}

struct LiveSession {
    state: SessionState,
    device: Option<Box<dyn SensorDevice>>,
    port: String,
    pending: VecDeque<Sample>,
    window: RollingWindow,
    annotations: Vec<Annotation>,
    device_fault: Option<String>,
}

impl LiveSession {
    fn new(window_capacity: usize) -> Self {
        Self {
            state: SessionState::new(),
            device: None,
            port: String::new(),
            pending: VecDeque::new(),
            window: RollingWindow::new(window_capacity),
            annotations: Vec::new(),
            device_fault: None,
        }
    }

    fn begin(&mut self, session: Session, device: Box<dyn SensorDevice>) {
        self.port = device.port().to_string();
        self.device = Some(device);
        self.state.begin_session(session);
        self.pending.clear();
        self.window.clear();
        self.annotations.clear();
        self.device_fault = None;
    }

    /// Next buffered sample. Only refills from the device once the local
    /// buffer is empty, and the device drain never blocks.
    fn poll(&mut self) -> Option<Sample> {
        if self.pending.is_empty() {
            let device = self.device.as_mut()?;
            match device.drain_buffered_samples() {
                Ok(batch) => self.pending.extend(batch),
                Err(err) => {
                    self.device_fault = Some(format!("{err:#}"));
                    return None;
                }
            }
        }

        let sample = self.pending.pop_front()?;
        self.state.last_sample = Some(sample);
        Some(sample)
    }
}

/// Owns the device handle and the live view for the single active session.
/// Start, ping and stop are plain async calls so any front end (or a test)
/// can drive them.
#[derive(Clone)]
pub struct SessionController {
    live: Arc<Mutex<LiveSession>>,
    db: Database,
    connector: Arc<dyn DeviceConnector>,
    sink: Arc<dyn EventSink>,
}

impl SessionController {
    pub fn new(
        db: Database,
        connector: Arc<dyn DeviceConnector>,
        sink: Arc<dyn EventSink>,
        window_capacity: usize,
    ) -> Self {
        Self {
            live: Arc::new(Mutex::new(LiveSession::new(window_capacity))),
            db,
            connector,
            sink,
        }
    }

    pub async fn get_state(&self) -> SessionState {
        self.live.lock().await.state.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.live.lock().await.state.active_session().is_some()
    }

    /// Opens the device and records `start_game`. Calling it while a session
    /// is active returns that session untouched.
    pub async fn start(
        &self,
        player_id: Option<i64>,
        game_label: &str,
        device_port: &str,
    ) -> Result<Session, MonitorError> {
        let mut live = self.live.lock().await;
        if let Some(session) = live.state.active_session() {
            return Ok(session.clone());
        }

        let player_id = player_id.ok_or(MonitorError::PlayerNotSelected)?;
        // Taken before the device starts so every sample lands inside the session.
        let start_time = Utc::now();

        let unavailable = |err: anyhow::Error| MonitorError::DeviceUnavailable {
            port: device_port.to_string(),
            reason: format!("{err:#}"),
        };
        let mut device = self.connector.open(device_port).map_err(unavailable)?;
        device.begin_acquisition().map_err(unavailable)?;

        let session = Session {
            id: Uuid::new_v4().to_string(),
            player_id,
            device_id: device.id(),
            game_label: game_label.to_string(),
            start_time,
            end_time: None,
            status: SessionStatus::Active,
        };
        live.begin(session.clone(), device);
        info!(
            "Session {} started for player {} on device {} ({})",
            session.id, player_id, session.device_id, game_label
        );

        let mut started = MeasurementEvent::new(
            player_id,
            session.device_id,
            EventKind::StartGame,
            game_label,
        );
        started.timestamp = start_time;
        self.record(started).await;

        emit_notice(self.sink.as_ref(), NoticeLevel::Info, "Device connected");
        emit_serialized(self.sink.as_ref(), SESSION_STATE_EVENT, &live.state);

        Ok(session)
    }

    /// Annotates the most recent sample and records a `ping` event.
    pub async fn ping(&self, text: &str) -> Result<Annotation, MonitorError> {
        let mut live = self.live.lock().await;
        let session = live
            .state
            .active_session()
            .cloned()
            .ok_or(MonitorError::NoActiveSession)?;
        let latest = live.state.last_sample.ok_or(MonitorError::NoSampleYet)?;

        let annotation = Annotation::anchored_to(&latest, text);
        live.annotations.push(annotation.clone());
        live.state.annotation_count = live.annotations.len();

        self.record(MeasurementEvent::new(
            session.player_id,
            session.device_id,
            EventKind::Ping,
            text,
        ))
        .await;

        emit_notice(self.sink.as_ref(), NoticeLevel::Info, "Ping sent");
        Ok(annotation)
    }

    /// Releases the device and records `stop_game`. Returns the session it
    /// stopped, or `None` when nothing was active.
    pub async fn stop(&self) -> Option<Session> {
        let mut guard = self.live.lock().await;
        let live = &mut *guard;
        let device_id = live.state.active_session()?.device_id;

        // Drain what the device buffered since the last tick before closing it.
        let mut tail = Vec::new();
        while let Some(sample) = live.poll() {
            live.window.append(sample);
            tail.push(sample);
        }
        if let Some(reason) = live.device_fault.take() {
            error!("Final drain on {} failed: {reason}", live.port);
        }

        if let Some(mut device) = live.device.take() {
            if let Err(err) = device.end_acquisition() {
                error!("Failed to end acquisition on {}: {err:#}", live.port);
            }
        }
        live.pending.clear();

        if let Err(err) = self.db.insert_samples(device_id, &tail).await {
            self.report(MonitorError::persistence("sensor_data", &err));
        }

        let stopped_at = Utc::now();
        live.state.stop(stopped_at);

        let session = live.state.session.clone()?;
        info!("Session {} stopped ({} trailing samples)", session.id, tail.len());

        let mut stopped = MeasurementEvent::new(
            session.player_id,
            session.device_id,
            EventKind::StopGame,
            "",
        );
        stopped.timestamp = stopped_at;
        self.record(stopped).await;

        emit_notice(self.sink.as_ref(), NoticeLevel::Info, "Device disconnected");
        emit_serialized(self.sink.as_ref(), SESSION_STATE_EVENT, &live.state);

        Some(session)
    }

    /// Next buffered sample, or `None` if the device has nothing new.
    pub async fn poll(&self) -> Option<Sample> {
        self.live.lock().await.poll()
    }

    /// One refresh tick: drain the device into the rolling window, store the
    /// new samples, and return what the chart should show.
    pub async fn refresh(&self) -> Result<LiveFrame, MonitorError> {
        let (frame, fresh, fault, port) = {
            let mut guard = self.live.lock().await;
            let live = &mut *guard;
            let session = live
                .state
                .active_session()
                .cloned()
                .ok_or(MonitorError::NoActiveSession)?;

            let mut fresh = Vec::new();
            while let Some(sample) = live.poll() {
                live.window.append(sample);
                fresh.push(sample);
            }

            let frame = LiveFrame {
                samples: live.window.samples().to_vec(),
                annotations: live.window.visible_annotations(&live.annotations),
                fresh: fresh.len(),
                session,
            };
            (frame, fresh, live.device_fault.take(), live.port.clone())
        };

        if let Err(err) = self.db.insert_samples(frame.session.device_id, &fresh).await {
            self.report(MonitorError::persistence("sensor_data", &err));
        }

        match fault {
            Some(reason) => Err(MonitorError::DeviceUnavailable { port, reason }),
            None => Ok(frame),
        }
    }

    /// Persistence failures are reported but never interrupt the session.
    async fn record(&self, event: MeasurementEvent) {
        let kind = event.event;
        if let Err(err) = self.db.insert_event(&event).await {
            self.report(MonitorError::persistence(kind.as_str(), &err));
        }
    }

    fn report(&self, err: MonitorError) {
        error!("{err}");
        emit_notice(self.sink.as_ref(), NoticeLevel::Error, &err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::testing::ScriptedConnector,
        events::{testing::RecordingSink, NOTICE_EVENT},
    };
    use chrono::{DateTime, Duration, TimeZone};

    struct Harness {
        _dir: tempfile::TempDir,
        db: Database,
        sink: Arc<RecordingSink>,
        connector: Arc<ScriptedConnector>,
        controller: SessionController,
        player_id: i64,
    }

    const DEVICE_ID: i64 = 7;

    fn t(index: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 11, 14, 51, 19).unwrap() + Duration::milliseconds(10 * index)
    }

    /// t0..t(n-1) with strictly increasing GSR.
    fn rising_samples(n: i64) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample::from_raw(t(i), 1000 + 10 * i as u16, 2048))
            .collect()
    }

    async fn harness(connector: ScriptedConnector) -> Harness {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = Database::new(dir.path().join("monitor.sqlite3")).expect("database");
        let player_id = db.insert_player("P").await.expect("player").id;
        let sink = Arc::new(RecordingSink::default());
        let connector = Arc::new(connector);
        let controller = SessionController::new(db.clone(), connector.clone(), sink.clone(), 40);
        Harness {
            _dir: dir,
            db,
            sink,
            connector,
            controller,
            player_id,
        }
    }

    async fn event_kinds(h: &Harness) -> Vec<EventKind> {
        h.db.list_events(h.player_id, DEVICE_ID)
            .await
            .expect("events")
            .into_iter()
            .map(|e| e.event)
            .collect()
    }

    #[tokio::test]
    async fn full_session_logs_start_ping_stop_in_order() {
        let h = harness(ScriptedConnector::new(DEVICE_ID, vec![rising_samples(50)])).await;

        let session = h
            .controller
            .start(Some(h.player_id), "Aristotle", "COM8")
            .await
            .expect("start");
        assert_eq!(session.device_id, DEVICE_ID);
        assert_eq!(session.status, SessionStatus::Active);

        let frame = h.controller.refresh().await.expect("refresh");
        assert_eq!(frame.fresh, 50);
        assert_eq!(frame.samples.len(), 40);
        assert_eq!(frame.samples.first().map(|s| s.timestamp), Some(t(10)));
        assert_eq!(frame.samples.last().map(|s| s.timestamp), Some(t(49)));

        let annotation = h.controller.ping("heart racing").await.expect("ping");
        let t49 = rising_samples(50)[49];
        assert_eq!(annotation.timestamp, t49.timestamp);
        assert_eq!(annotation.y_value, t49.gsr);

        let frame = h.controller.refresh().await.expect("refresh");
        assert_eq!(frame.annotations, vec![annotation]);

        let stopped = h.controller.stop().await.expect("stopped session");
        assert!(stopped.end_time.is_some());

        assert_eq!(
            event_kinds(&h).await,
            vec![EventKind::StartGame, EventKind::Ping, EventKind::StopGame]
        );
        let events = h.db.list_events(h.player_id, DEVICE_ID).await.expect("events");
        assert_eq!(events[0].note, "Aristotle");
        assert_eq!(events[1].note, "heart racing");

        let stored = h
            .db
            .fetch_samples(DEVICE_ID, t(0), t(49))
            .await
            .expect("stored samples");
        assert_eq!(stored.len(), 50);
    }

    #[tokio::test]
    async fn second_stop_is_a_noop() {
        let h = harness(ScriptedConnector::new(DEVICE_ID, vec![])).await;
        h.controller
            .start(Some(h.player_id), "Aristotle", "COM8")
            .await
            .expect("start");

        assert!(h.controller.stop().await.is_some());
        assert!(h.controller.stop().await.is_none());

        assert_eq!(event_kinds(&h).await, vec![EventKind::StartGame, EventKind::StopGame]);
        assert_eq!(h.connector.ends(), 1);
        assert_eq!(h.controller.get_state().await.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn ping_without_session_is_rejected() {
        let h = harness(ScriptedConnector::new(DEVICE_ID, vec![])).await;
        assert_eq!(
            h.controller.ping("too early").await,
            Err(MonitorError::NoActiveSession)
        );
        assert_eq!(h.controller.get_state().await.annotation_count, 0);
        assert!(event_kinds(&h).await.is_empty());
    }

    #[tokio::test]
    async fn ping_before_first_sample_is_rejected() {
        let h = harness(ScriptedConnector::new(DEVICE_ID, vec![])).await;
        h.controller
            .start(Some(h.player_id), "MoveSense", "COM8")
            .await
            .expect("start");
        assert_eq!(h.controller.ping("nothing yet").await, Err(MonitorError::NoSampleYet));
        assert_eq!(event_kinds(&h).await, vec![EventKind::StartGame]);
    }

    #[tokio::test]
    async fn start_requires_a_player() {
        let h = harness(ScriptedConnector::new(DEVICE_ID, vec![])).await;
        assert_eq!(
            h.controller.start(None, "Aristotle", "COM8").await,
            Err(MonitorError::PlayerNotSelected)
        );
        assert_eq!(h.connector.begins(), 0);
        assert!(!h.controller.is_active().await);
    }

    #[tokio::test]
    async fn unavailable_device_aborts_start_only() {
        let h = harness(ScriptedConnector::unavailable()).await;
        let result = h.controller.start(Some(h.player_id), "Aristotle", "COM3").await;
        assert!(matches!(
            result,
            Err(MonitorError::DeviceUnavailable { ref port, .. }) if port == "COM3"
        ));
        assert!(!h.controller.is_active().await);
        assert_eq!(h.controller.get_state().await.status, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn start_while_active_returns_existing_session() {
        let h = harness(ScriptedConnector::new(DEVICE_ID, vec![])).await;
        let first = h
            .controller
            .start(Some(h.player_id), "Aristotle", "COM8")
            .await
            .expect("start");
        let second = h
            .controller
            .start(Some(h.player_id), "Stack Tower", "COM9")
            .await
            .expect("idempotent start");

        assert_eq!(first, second);
        assert_eq!(h.connector.begins(), 1);
        assert_eq!(event_kinds(&h).await, vec![EventKind::StartGame]);
    }

    #[tokio::test]
    async fn poll_hands_out_samples_one_at_a_time() {
        let batches = vec![rising_samples(3)];
        let h = harness(ScriptedConnector::new(DEVICE_ID, batches)).await;
        assert!(h.controller.poll().await.is_none());

        h.controller
            .start(Some(h.player_id), "Aristotle", "COM8")
            .await
            .expect("start");
        for index in 0..3 {
            let sample = h.controller.poll().await.expect("buffered sample");
            assert_eq!(sample.timestamp, t(index));
        }
        assert!(h.controller.poll().await.is_none());
        assert_eq!(
            h.controller.get_state().await.last_sample.map(|s| s.timestamp),
            Some(t(2))
        );
    }

    #[tokio::test]
    async fn persistence_failure_does_not_stop_streaming() {
        let h = harness(ScriptedConnector::new(DEVICE_ID, vec![rising_samples(5)])).await;
        // No such player row, so every measurement insert trips the foreign key.
        let session = h
            .controller
            .start(Some(9999), "Aristotle", "COM8")
            .await
            .expect("session starts despite logging failure");
        assert!(session.is_active());

        let frame = h.controller.refresh().await.expect("still streaming");
        assert_eq!(frame.samples.len(), 5);
        assert!(h.controller.ping("still here").await.is_ok());

        let errors: Vec<_> = h
            .sink
            .named(NOTICE_EVENT)
            .into_iter()
            .filter(|notice| notice["level"] == "error")
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0]["message"]
            .as_str()
            .unwrap_or_default()
            .contains("start_game"));
    }

    #[tokio::test]
    async fn device_failure_surfaces_from_refresh() {
        let mut connector = ScriptedConnector::new(DEVICE_ID, vec![rising_samples(2)]);
        connector.fail_after_script = true;
        let h = harness(connector).await;
        h.controller
            .start(Some(h.player_id), "Aristotle", "COM8")
            .await
            .expect("start");

        let result = h.controller.refresh().await;
        assert!(matches!(result, Err(MonitorError::DeviceUnavailable { .. })));
        // Samples drained before the failure are still stored.
        let stored = h.db.fetch_samples(DEVICE_ID, t(0), t(1)).await.expect("stored");
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn restart_after_stop_begins_fresh_window() {
        let h = harness(ScriptedConnector::new(DEVICE_ID, vec![rising_samples(4)])).await;
        h.controller
            .start(Some(h.player_id), "Aristotle", "COM8")
            .await
            .expect("start");
        h.controller.refresh().await.expect("refresh");
        h.controller.ping("first").await.expect("ping");
        h.controller.stop().await;

        h.controller
            .start(Some(h.player_id), "Stack Tower", "COM8")
            .await
            .expect("restart");
        let frame = h.controller.refresh().await.expect("refresh");
        assert!(frame.samples.is_empty());
        assert!(frame.annotations.is_empty());
        assert_eq!(frame.session.game_label, "Stack Tower");
    }

    #[tokio::test]
    async fn stop_keeps_samples_buffered_since_last_tick() {
        let late: Vec<Sample> = (50..55).map(|i| Sample::from_raw(t(i), 1500, 2048)).collect();
        let h = harness(ScriptedConnector::new(
            DEVICE_ID,
            vec![rising_samples(5), vec![], late],
        ))
        .await;
        h.controller
            .start(Some(h.player_id), "Aristotle", "COM8")
            .await
            .expect("start");

        let frame = h.controller.refresh().await.expect("refresh");
        assert_eq!(frame.fresh, 5);

        h.controller.stop().await.expect("stopped session");

        let stored = h
            .db
            .fetch_samples(DEVICE_ID, t(0), t(54))
            .await
            .expect("stored samples");
        assert_eq!(stored.len(), 10);
        assert_eq!(stored.last().map(|s| s.timestamp), Some(t(54)));
        assert_eq!(h.connector.ends(), 1);
    }

    #[tokio::test]
    async fn simulated_samples_fall_inside_the_session() {
        use crate::{db::helpers::format_datetime, device::SystemConnector, settings::MonitorSettings};

        let dir = tempfile::tempdir().expect("temp dir");
        let db = Database::new(dir.path().join("monitor.sqlite3")).expect("database");
        let player_id = db.insert_player("P").await.expect("player").id;
        let settings = MonitorSettings {
            simulate: true,
            ..MonitorSettings::default()
        };
        let device_id = settings.default_device_id;
        let controller = SessionController::new(
            db.clone(),
            Arc::new(SystemConnector::new(settings)),
            Arc::new(RecordingSink::default()),
            40,
        );

        let session = controller
            .start(Some(player_id), "Aristotle", "SIM")
            .await
            .expect("start");
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        let stopped = controller.stop().await.expect("stopped session");
        let end = stopped.end_time.expect("end time");

        let events = db.list_events(player_id, device_id).await.expect("events");
        assert_eq!(events.len(), 2);
        assert_eq!(
            format_datetime(&events[0].timestamp),
            format_datetime(&session.start_time)
        );
        assert_eq!(format_datetime(&events[1].timestamp), format_datetime(&end));

        let everything = db
            .fetch_samples(
                device_id,
                session.start_time - Duration::hours(1),
                end + Duration::hours(1),
            )
            .await
            .expect("all samples");
        assert!(!everything.is_empty());
        let in_session = db
            .fetch_samples(device_id, session.start_time, end)
            .await
            .expect("session samples");
        assert_eq!(in_session.len(), everything.len());
    }
}
