//! Device boundary: opening a wearable, starting and stopping acquisition, and
//! draining whatever it buffered since the last call.

pub mod acquisition;
pub mod gsr;
pub mod serial;
pub mod simulated;

use anyhow::Result;
use log::warn;

use crate::{models::Sample, settings::MonitorSettings};

pub use serial::SerialDevice;
pub use simulated::SimulatedDevice;

/// An opened device. Acquisition runs on its own thread; the handle only
/// drains what was buffered, so none of these calls block on the hardware.
pub trait SensorDevice: Send {
    fn id(&self) -> i64;
    fn port(&self) -> &str;
    fn begin_acquisition(&mut self) -> Result<()>;
    fn drain_buffered_samples(&mut self) -> Result<Vec<Sample>>;
    fn end_acquisition(&mut self) -> Result<()>;
}

pub trait DeviceConnector: Send + Sync {
    fn open(&self, port: &str) -> Result<Box<dyn SensorDevice>>;
}

/// Opens the serial bridge, or the simulated device when configured to.
pub struct SystemConnector {
    settings: MonitorSettings,
}

impl SystemConnector {
    pub fn new(settings: MonitorSettings) -> Self {
        Self { settings }
    }

    fn simulated(&self, port: &str) -> Box<dyn SensorDevice> {
        Box::new(SimulatedDevice::new(
            self.settings.device_id_for(port),
            port,
            self.settings.sampling_rate_hz,
        ))
    }
}

impl DeviceConnector for SystemConnector {
    fn open(&self, port: &str) -> Result<Box<dyn SensorDevice>> {
        if self.settings.simulate {
            return Ok(self.simulated(port));
        }

        match SerialDevice::open(port, self.settings.serial_baud, self.settings.device_id_for(port)) {
            Ok(device) => Ok(Box::new(device)),
            Err(err) if self.settings.fake_fallback => {
                warn!("{err:#}; falling back to simulated device");
                Ok(self.simulated(port))
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted devices for deterministic controller tests.

    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use anyhow::{anyhow, bail, Result};

    use super::{DeviceConnector, SensorDevice};
    use crate::models::Sample;

    #[derive(Default)]
    pub struct DeviceLog {
        pub begins: usize,
        pub ends: usize,
    }

    /// Hands out one batch of samples per drain call; an empty script drains nothing.
    pub struct ScriptedConnector {
        pub device_id: i64,
        pub batches: Mutex<VecDeque<Vec<Sample>>>,
        pub fail_open: bool,
        pub fail_after_script: bool,
        pub log: Arc<Mutex<DeviceLog>>,
    }

    impl ScriptedConnector {
        pub fn new(device_id: i64, batches: Vec<Vec<Sample>>) -> Self {
            Self {
                device_id,
                batches: Mutex::new(batches.into()),
                fail_open: false,
                fail_after_script: false,
                log: Arc::new(Mutex::new(DeviceLog::default())),
            }
        }

        pub fn unavailable() -> Self {
            Self {
                fail_open: true,
                ..Self::new(1, Vec::new())
            }
        }

        pub fn begins(&self) -> usize {
            self.log.lock().map(|log| log.begins).unwrap_or(0)
        }

        pub fn ends(&self) -> usize {
            self.log.lock().map(|log| log.ends).unwrap_or(0)
        }
    }

    impl DeviceConnector for ScriptedConnector {
        fn open(&self, port: &str) -> Result<Box<dyn SensorDevice>> {
            if self.fail_open {
                bail!("no device on {port}");
            }
            let batches = std::mem::take(
                &mut *self.batches.lock().map_err(|_| anyhow!("script poisoned"))?,
            );
            Ok(Box::new(ScriptedDevice {
                id: self.device_id,
                port: port.to_string(),
                batches,
                fail_after_script: self.fail_after_script,
                log: self.log.clone(),
            }))
        }
    }

    pub struct ScriptedDevice {
        id: i64,
        port: String,
        batches: VecDeque<Vec<Sample>>,
        fail_after_script: bool,
        log: Arc<Mutex<DeviceLog>>,
    }

    impl SensorDevice for ScriptedDevice {
        fn id(&self) -> i64 {
            self.id
        }

        fn port(&self) -> &str {
            &self.port
        }

        fn begin_acquisition(&mut self) -> Result<()> {
            if let Ok(mut log) = self.log.lock() {
                log.begins += 1;
            }
            Ok(())
        }

        fn drain_buffered_samples(&mut self) -> Result<Vec<Sample>> {
            match self.batches.pop_front() {
                Some(batch) => Ok(batch),
                None if self.fail_after_script => bail!("device went away"),
                None => Ok(Vec::new()),
            }
        }

        fn end_acquisition(&mut self) -> Result<()> {
            if let Ok(mut log) = self.log.lock() {
                log.ends += 1;
            }
            Ok(())
        }
    }
}
