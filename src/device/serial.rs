//! Wearable attached through a serial bridge.
//!
//! The bridge speaks a line protocol: `start\n` / `stop\n` toggle streaming and
//! each sample arrives as an ASCII line `gsr_raw,ppg_raw`. Samples are
//! timestamped on receipt.

use std::{
    io::{self, BufRead, BufReader, Write},
    sync::atomic::Ordering,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serialport::SerialPort;

use crate::models::Sample;

use super::{acquisition::AcquisitionWorker, SensorDevice};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const READ_TIMEOUT: Duration = Duration::from_millis(100);

pub struct SerialDevice {
    id: i64,
    port_name: String,
    port: Box<dyn SerialPort>,
    worker: Option<AcquisitionWorker>,
}

impl SerialDevice {
    pub fn open(port_name: &str, baud: u32, id: i64) -> Result<Self> {
        let port = serialport::new(port_name, baud)
            .timeout(READ_TIMEOUT)
            .open()
            .with_context(|| format!("failed to open serial port {port_name}"))?;

        log_info!("Opened serial port {port_name} at {baud} baud");
        Ok(Self {
            id,
            port_name: port_name.to_string(),
            port,
            worker: None,
        })
    }
}

impl SensorDevice for SerialDevice {
    fn id(&self) -> i64 {
        self.id
    }

    fn port(&self) -> &str {
        &self.port_name
    }

    fn begin_acquisition(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let reader_port = self
            .port
            .try_clone()
            .context("failed to clone serial port handle")?;
        self.port
            .write_all(b"start\n")
            .context("failed to send start command")?;

        let port_name = self.port_name.clone();
        let worker = AcquisitionWorker::spawn("serial-device", move |sender, stop| {
            let mut reader = BufReader::new(reader_port);
            let mut line = Vec::new();

            while !stop.load(Ordering::SeqCst) {
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => {
                        log_warn!("serial port {port_name} closed");
                        break;
                    }
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        match parse_line(&text) {
                            Some((gsr_raw, ppg_raw)) => {
                                let sample = Sample::from_raw(Utc::now(), gsr_raw, ppg_raw);
                                if sender.send(sample).is_err() {
                                    break;
                                }
                            }
                            None => log_warn!("skipping malformed line {:?}", text.trim()),
                        }
                        line.clear();
                    }
                    Err(err) if err.kind() == io::ErrorKind::TimedOut => continue,
                    Err(err) => {
                        log_error!("serial read on {port_name} failed: {err}");
                        break;
                    }
                }
            }
        })?;

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
        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };

        let command = self.port.write_all(b"stop\n");
        worker.shutdown()?;
        command.context("failed to send stop command")?;
        log_info!("Serial device on {} stopped", self.port_name);
        Ok(())
    }
}

impl Drop for SerialDevice {
    fn drop(&mut self) {
        if let Err(err) = self.end_acquisition() {
            log_error!("Failed to release serial device {}: {err:#}", self.port_name);
        }
    }
}

/// `"1234,2048"` -> `(1234, 2048)`.
pub fn parse_line(line: &str) -> Option<(u16, u16)> {
    let mut fields = line.trim().split(',');
    let gsr = fields.next()?.trim().parse().ok()?;
    let ppg = fields.next()?.trim().parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((gsr, ppg))
}
