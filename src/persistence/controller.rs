use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::info;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::counter::{FlushReport, IntervalSink, StepCounter};
use crate::db::ModeId;

use super::flush_worker::flush_loop;

/// Owns the background flush task for a [`StepCounter`]. On-demand flushes
/// and mode switches go through here as well, so only this side ever drains
/// the counter.
pub struct FlushController {
    counter: StepCounter,
    sink: Arc<dyn IntervalSink>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl FlushController {
    pub fn new(counter: StepCounter, sink: Arc<dyn IntervalSink>) -> Self {
        Self {
            counter,
            sink,
            handle: None,
            cancel_token: None,
        }
    }

    pub fn counter(&self) -> &StepCounter {
        &self.counter
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, period: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("flush worker already running");
        }
        if period.is_zero() {
            bail!("flush interval must be positive");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(flush_loop(
            self.counter.clone(),
            Arc::clone(&self.sink),
            period,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Persist whatever the counter holds right now.
    pub async fn flush_now(&self) -> Result<Option<FlushReport>> {
        self.counter.flush(self.sink.as_ref(), Utc::now()).await
    }

    /// Save pending steps under the current mode, then make `mode` active
    /// on the counter.
    pub async fn switch_mode(&self, mode: ModeId) -> Result<FlushReport> {
        let report = self
            .counter
            .switch_mode(self.sink.as_ref(), mode, Utc::now())
            .await?;
        info!("Active walking mode switched to {mode}");
        Ok(report)
    }

    /// Stop the worker after its final flush.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("flush worker task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
