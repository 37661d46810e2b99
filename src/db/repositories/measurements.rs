use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{format_datetime, parse_datetime, parse_event_kind},
        models::{EventKind, MeasurementEvent, PingEvent},
    },
    models::{Session, SessionStatus},
};

pub const RECOVERED_NOTE: &str = "recovered";

fn row_to_event(row: &Row) -> Result<MeasurementEvent> {
    let event: String = row.get("event")?;
    let timestamp: String = row.get("timestamp")?;
    Ok(MeasurementEvent {
        id: Some(row.get("id")?),
        player_id: row.get("player_id")?,
        device_id: row.get("device_id")?,
        event: parse_event_kind(&event)?,
        note: row.get("note")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
    })
}

/// Pairs each `stop_game` with the `start_game` immediately before it for the
/// same player and device. A start superseded by a later start stays
/// unpaired. Events must be ordered by player, device, time.
fn pair_sessions(events: &[MeasurementEvent]) -> Vec<Session> {
    let mut sessions = Vec::new();
    let mut pending: Option<&MeasurementEvent> = None;

    for event in events {
        if let Some(start) = pending {
            if start.player_id != event.player_id || start.device_id != event.device_id {
                pending = None;
            }
        }

        match event.event {
            EventKind::StartGame => pending = Some(event),
            EventKind::StopGame => {
                if let Some(start) = pending.take() {
                    if start.timestamp < event.timestamp {
                        sessions.push(Session {
                            id: start.id.map(|id| id.to_string()).unwrap_or_default(),
                            player_id: start.player_id,
                            device_id: start.device_id,
                            game_label: start.note.clone(),
                            start_time: start.timestamp,
                            end_time: Some(event.timestamp),
                            status: SessionStatus::Stopped,
                        });
                    }
                }
            }
            EventKind::Ping => {}
        }
    }

    sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    sessions
}

impl Database {
    pub async fn insert_event(&self, event: &MeasurementEvent) -> Result<i64> {
        let record = event.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO measurement (player_id, device_id, event, note, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.player_id,
                    record.device_id,
                    record.event.as_str(),
                    record.note,
                    format_datetime(&record.timestamp),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn list_events(&self, player_id: i64, device_id: i64) -> Result<Vec<MeasurementEvent>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, player_id, device_id, event, note, timestamp
                 FROM measurement
                 WHERE player_id = ?1 AND device_id = ?2
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let mut rows = stmt.query(params![player_id, device_id])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }
            Ok(events)
        })
        .await
    }

    pub async fn list_ping_events(
        &self,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PingEvent>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, note FROM measurement
                 WHERE event = 'ping' AND device_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let mut rows = stmt.query(params![
                device_id,
                format_datetime(&start),
                format_datetime(&end)
            ])?;
            let mut pings = Vec::new();
            while let Some(row) = rows.next()? {
                let timestamp: String = row.get(0)?;
                pings.push(PingEvent {
                    timestamp: parse_datetime(&timestamp, "timestamp")?,
                    note: row.get(1)?,
                });
            }
            Ok(pings)
        })
        .await
    }

    /// Completed sessions, most recent first.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let events = self
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, player_id, device_id, event, note, timestamp
                     FROM measurement
                     WHERE event IN ('start_game', 'stop_game')
                     ORDER BY player_id, device_id, timestamp ASC, id ASC",
                )?;
                let mut rows = stmt.query([])?;
                let mut events = Vec::new();
                while let Some(row) = rows.next()? {
                    events.push(row_to_event(row)?);
                }
                Ok(events)
            })
            .await?;

        Ok(pair_sessions(&events))
    }

    /// Distinct game labels from `start_game` events, with "None" sorted last.
    pub async fn list_games_played(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT note FROM (
                     SELECT DISTINCT note FROM measurement WHERE event = 'start_game'
                 )
                 ORDER BY note = 'None', note",
            )?;
            let games = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(games)
        })
        .await
    }

    /// Closes sessions left open by a crash. The stop event is stamped at the
    /// later of the last logged event and the last stored sample.
    pub async fn recover_unterminated_sessions(&self) -> Result<Vec<MeasurementEvent>> {
        self.execute(|conn| {
            let tx = conn.transaction()?;
            let mut open = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT id, player_id, device_id, event, note, timestamp
                     FROM measurement m
                     WHERE m.id = (
                         SELECT latest.id FROM measurement latest
                         WHERE latest.player_id = m.player_id AND latest.device_id = m.device_id
                         ORDER BY latest.timestamp DESC, latest.id DESC
                         LIMIT 1
                     )
                     AND m.event != 'stop_game'",
                )?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    open.push(row_to_event(row)?);
                }
            }

            let mut recovered = Vec::new();
            for last in open {
                let last_start: Option<String> = tx
                    .query_row(
                        "SELECT MAX(timestamp) FROM measurement
                         WHERE player_id = ?1 AND device_id = ?2 AND event = 'start_game'",
                        params![last.player_id, last.device_id],
                        |row| row.get::<_, Option<String>>(0),
                    )
                    .optional()?
                    .flatten();
                let Some(last_start) = last_start else {
                    continue;
                };

                let last_sample: Option<String> = tx
                    .query_row(
                        "SELECT MAX(timestamp) FROM sensor_data
                         WHERE device_id = ?1 AND timestamp >= ?2",
                        params![last.device_id, last_start],
                        |row| row.get::<_, Option<String>>(0),
                    )
                    .optional()?
                    .flatten();

                let mut stopped_at = last.timestamp;
                if let Some(raw) = last_sample {
                    stopped_at = stopped_at.max(parse_datetime(&raw, "timestamp")?);
                }

                let mut stop = MeasurementEvent::new(
                    last.player_id,
                    last.device_id,
                    EventKind::StopGame,
                    RECOVERED_NOTE,
                );
                stop.timestamp = stopped_at;
                tx.execute(
                    "INSERT INTO measurement (player_id, device_id, event, note, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        stop.player_id,
                        stop.device_id,
                        stop.event.as_str(),
                        stop.note,
                        format_datetime(&stop.timestamp),
                    ],
                )?;
                stop.id = Some(tx.last_insert_rowid());
                recovered.push(stop);
            }

            tx.commit()?;
            Ok(recovered)
        })
        .await
    }
}
