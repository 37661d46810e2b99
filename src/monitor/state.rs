use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Sample, Session, SessionStatus};

/// Snapshot of the session lifecycle: idle -> active -> stopped, and back to
/// active on the next start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub status: SessionStatus,
    pub session: Option<Session>,
    /// Most recent sample polled from the device; pings anchor to it.
    pub last_sample: Option<Sample>,
    pub annotation_count: usize,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.session.as_ref().filter(|session| session.is_active())
    }

    pub fn begin_session(&mut self, session: Session) {
        *self = Self {
            status: SessionStatus::Active,
            session: Some(session),
            last_sample: None,
            annotation_count: 0,
        };
    }

    pub fn stop(&mut self, stopped_at: DateTime<Utc>) {
        if self.status != SessionStatus::Active {
            return;
        }
        self.status = SessionStatus::Stopped;
        if let Some(session) = self.session.as_mut() {
            session.end_time = Some(stopped_at);
            session.status = SessionStatus::Stopped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            id: "s1".into(),
            player_id: 1,
            device_id: 2,
            game_label: "Aristotle".into(),
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Active,
        }
    }

    #[test]
    fn lifecycle_moves_idle_active_stopped() {
        let mut state = SessionState::new();
        assert_eq!(state.status, SessionStatus::Idle);
        assert!(state.active_session().is_none());

        state.begin_session(session());
        assert_eq!(state.status, SessionStatus::Active);
        assert!(state.active_session().is_some());

        let stopped_at = Utc::now();
        state.stop(stopped_at);
        assert_eq!(state.status, SessionStatus::Stopped);
        assert!(state.active_session().is_none());
        let ended = state.session.as_ref().expect("session kept after stop");
        assert_eq!(ended.end_time, Some(stopped_at));
        assert_eq!(ended.status, SessionStatus::Stopped);
    }

    #[test]
    fn stop_only_applies_once() {
        let mut state = SessionState::new();
        state.begin_session(session());
        let first = Utc::now();
        state.stop(first);
        state.stop(first + chrono::Duration::seconds(5));
        assert_eq!(state.session.and_then(|s| s.end_time), Some(first));
    }
}
