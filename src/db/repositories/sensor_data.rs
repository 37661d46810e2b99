use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{format_datetime, parse_datetime, to_adc},
    },
    models::Sample,
};

fn row_to_sample(row: &Row) -> Result<Sample> {
    let timestamp: String = row.get("timestamp")?;
    let gsr_raw: i64 = row.get("gsr_raw")?;
    let ppg_raw: i64 = row.get("ppg_raw")?;
    Ok(Sample::from_raw(
        parse_datetime(&timestamp, "timestamp")?,
        to_adc(gsr_raw, "gsr_raw")?,
        to_adc(ppg_raw, "ppg_raw")?,
    ))
}

impl Database {
    /// Stores one drained batch atomically.
    pub async fn insert_samples(&self, device_id: i64, samples: &[Sample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }

        let batch = samples.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO sensor_data (device_id, timestamp, gsr_raw, ppg_raw)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for sample in &batch {
                    stmt.execute(params![
                        device_id,
                        format_datetime(&sample.timestamp),
                        sample.gsr_raw,
                        sample.ppg_raw,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(batch.len())
        })
        .await
    }

    /// Samples of one device within `[start, end]`, oldest first.
    pub async fn fetch_samples(
        &self,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, gsr_raw, ppg_raw FROM sensor_data
                 WHERE device_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let mut rows = stmt.query(params![
                device_id,
                format_datetime(&start),
                format_datetime(&end)
            ])?;
            let mut samples = Vec::new();
            while let Some(row) = rows.next()? {
                samples.push(row_to_sample(row)?);
            }
            Ok(samples)
        })
        .await
    }
}
