use std::{
    f64::consts::PI,
    sync::{atomic::Ordering, mpsc::Sender},
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::models::Sample;

use super::{acquisition::AcquisitionWorker, SensorDevice};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

const PRODUCE_EVERY: Duration = Duration::from_millis(20);
const PULSE_HZ: f64 = 1.2;

/// Stand-in for the wearable when no hardware is attached. Produces a
/// wandering GSR level and a ~72 bpm pulse wave at the configured rate.
pub struct SimulatedDevice {
    id: i64,
    port: String,
    sampling_rate_hz: f64,
    worker: Option<AcquisitionWorker>,
}

impl SimulatedDevice {
    pub fn new(id: i64, port: &str, sampling_rate_hz: f64) -> Self {
        Self {
            id,
            port: port.to_string(),
            sampling_rate_hz: sampling_rate_hz.max(1.0),
            worker: None,
        }
    }
}

impl SensorDevice for SimulatedDevice {
    fn id(&self) -> i64 {
        self.id
    }

    fn port(&self) -> &str {
        &self.port
    }

    fn begin_acquisition(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let rate = self.sampling_rate_hz;
        let worker = AcquisitionWorker::spawn("simulated-device", move |sender, stop| {
            let origin = Utc::now();
            let started = Instant::now();
            let mut generator = SignalGenerator::new(rate);
            let mut produced: u64 = 0;

            while !stop.load(Ordering::SeqCst) {
                let due = (started.elapsed().as_secs_f64() * rate) as u64;
                if !generator.emit_until(due, &mut produced, origin, &sender) {
                    break;
                }
                thread::sleep(PRODUCE_EVERY);
            }
            log_debug!("simulated device produced {produced} samples");
        })?;

        log_info!("Simulated device {} streaming at {} Hz", self.id, rate);
        self.worker = Some(worker);
        Ok(())
    }

    fn drain_buffered_samples(&mut self) -> Result<Vec<Sample>> {
        match &self.worker {
            Some(worker) => worker.drain(),
            None => bail!("acquisition not started"),
        }
    }

    fn end_acquisition(&mut self) -> Result<()> {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown()?;
            log_info!("Simulated device {} stopped", self.id);
        }
        Ok(())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        if let Err(err) = self.end_acquisition() {
            log_error!("Failed to release simulated device {}: {err:#}", self.port);
        }
    }
}

struct SignalGenerator {
    period_us: f64,
    rate: f64,
    gsr_level: f64,
}

impl SignalGenerator {
    fn new(rate: f64) -> Self {
        Self {
            period_us: 1_000_000.0 / rate,
            rate,
            gsr_level: 2000.0,
        }
    }

    /// Sends samples `produced..due`. Returns false once the receiver is gone.
    fn emit_until(
        &mut self,
        due: u64,
        produced: &mut u64,
        origin: DateTime<Utc>,
        sender: &Sender<Sample>,
    ) -> bool {
        let mut rng = rand::thread_rng();
        while *produced < due {
            let index = *produced;
            let offset = chrono::Duration::microseconds((index as f64 * self.period_us) as i64);
            let t = index as f64 / self.rate;

            self.gsr_level = (self.gsr_level + rng.gen_range(-3.0..3.0)).clamp(1200.0, 3500.0);
            let pulse = 400.0 * (2.0 * PI * PULSE_HZ * t).sin()
                + 120.0 * (2.0 * PI * 2.0 * PULSE_HZ * t + 0.6).sin();
            let ppg = 2048.0 + pulse + rng.gen_range(-20.0..20.0);

            let sample = Sample::from_raw(origin + offset, self.gsr_level as u16, ppg as u16);
            if sender.send(sample).is_err() {
                return false;
            }
            *produced += 1;
        }
        true
    }
}
