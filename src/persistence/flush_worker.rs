use std::sync::Arc;

use chrono::Utc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::counter::{IntervalSink, StepCounter};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const SLOW_FLUSH: Duration = Duration::from_secs(10);

/// Periodically persist the counter until cancelled, then flush once more.
pub async fn flush_loop(
    counter: StepCounter,
    sink: Arc<dyn IntervalSink>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; nothing has been counted yet.
    ticker.tick().await;

    log_info!("flush worker started (every {}s)", period.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush_once(&counter, sink.as_ref(), "periodic", SLOW_FLUSH).await;
            }
            _ = cancel_token.cancelled() => {
                flush_once(&counter, sink.as_ref(), "final", SLOW_FLUSH).await;
                log_info!("flush worker shutting down");
                break;
            }
        }
    }
}

/// Runs one flush to completion. A queued insert commits even if nobody
/// waits for it, so a slow write is reported but never abandoned.
async fn flush_once(
    counter: &StepCounter,
    sink: &dyn IntervalSink,
    reason: &str,
    slow_after: Duration,
) {
    let started = Instant::now();
    let result = counter.flush(sink, Utc::now()).await;

    let elapsed = started.elapsed();
    if elapsed > slow_after {
        log_warn!("{reason} flush took {}ms", elapsed.as_millis());
    }

    match result {
        Ok(Some(report)) if report.wrote_row() => log_debug!(
            "{reason} flush saved {} steps [{}, {}]",
            report.interval.step_count,
            report.interval.start_time,
            report.interval.end_time
        ),
        Ok(_) => log_debug!("{reason} flush: nothing pending"),
        Err(err) => log_error!("{reason} flush failed, steps kept for the next attempt: {err:?}"),
    }
}
