use std::sync::Arc;

use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    chart::{render_live_chart, ChartOptions},
    error::MonitorError,
    events::{emit_notice, emit_serialized, EventSink, NoticeLevel, LIVE_CHART_EVENT},
};

use super::SessionController;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

/// Poll, render, sleep. The stop token is only looked at once per tick, and
/// the loop releases the session itself before it exits.
pub async fn refresh_loop(
    controller: SessionController,
    sink: Arc<dyn EventSink>,
    stop_token: CancellationToken,
    tick: Duration,
    options: ChartOptions,
) {
    let mut ticker = time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if stop_token.is_cancelled() {
            controller.stop().await;
            log_info!("refresh loop stopped on request");
            break;
        }

        match controller.refresh().await {
            Ok(frame) => {
                log_debug!(
                    "tick: {} new samples, {} in window, {} annotations",
                    frame.fresh,
                    frame.samples.len(),
                    frame.annotations.len()
                );
                let chart = render_live_chart(&frame.samples, &frame.annotations, options);
                emit_serialized(sink.as_ref(), LIVE_CHART_EVENT, &chart);
            }
            Err(MonitorError::NoActiveSession) => {
                log_info!("session ended elsewhere; refresh loop exiting");
                break;
            }
            Err(err @ MonitorError::DeviceUnavailable { .. }) => {
                log_error!("{err}; ending session");
                emit_notice(sink.as_ref(), NoticeLevel::Error, &err.to_string());
                controller.stop().await;
                break;
            }
            Err(err) => {
                log_error!("refresh failed: {err}");
            }
        }
    }
}
