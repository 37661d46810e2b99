use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{chart::ChartOptions, events::EventSink};

use super::{loop_worker::refresh_loop, SessionController};

/// Owns the spawned refresh loop for the active session.
pub struct LiveMonitor {
    handle: Option<JoinHandle<()>>,
    stop_token: Option<CancellationToken>,
}

impl Default for LiveMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveMonitor {
    pub fn new() -> Self {
        Self {
            handle: None,
            stop_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawns the loop unless one is already running.
    pub fn start_streaming(
        &mut self,
        controller: SessionController,
        sink: Arc<dyn EventSink>,
        tick: Duration,
        options: ChartOptions,
    ) -> bool {
        if self.is_running() {
            return false;
        }

        let stop_token = CancellationToken::new();
        let handle = tokio::spawn(refresh_loop(
            controller,
            sink,
            stop_token.clone(),
            tick,
            options,
        ));

        self.handle = Some(handle);
        self.stop_token = Some(stop_token);
        true
    }

    /// Asks the loop to stop at its next tick and waits for it to release the
    /// session.
    pub async fn stop_streaming(&mut self) -> Result<()> {
        if let Some(token) = self.stop_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle.await.context("refresh loop task failed to join")?;
            info!("Refresh loop joined");
        }
        Ok(())
    }
}
