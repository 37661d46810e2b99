use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
};

use anyhow::{bail, Context, Result};

use crate::models::Sample;

/// Background thread that pushes samples into a channel until told to stop.
pub struct AcquisitionWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    receiver: Receiver<Sample>,
}

impl AcquisitionWorker {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(Sender<Sample>, Arc<AtomicBool>) + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();

        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || body(sender, stop_for_thread))
            .with_context(|| format!("failed to spawn {name} thread"))?;

        Ok(Self {
            stop,
            handle: Some(handle),
            receiver,
        })
    }

    /// Everything buffered so far, without blocking. Errors once the thread
    /// has exited and its buffer is empty.
    pub fn drain(&self) -> Result<Vec<Sample>> {
        let mut samples = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(sample) => samples.push(sample),
                Err(TryRecvError::Empty) => return Ok(samples),
                Err(TryRecvError::Disconnected) => {
                    if samples.is_empty() {
                        bail!("acquisition thread exited");
                    }
                    return Ok(samples);
                }
            }
        }
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                bail!("acquisition thread panicked");
            }
        }
        Ok(())
    }
}

impl Drop for AcquisitionWorker {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("Failed to stop acquisition thread: {err}");
        }
    }
}
