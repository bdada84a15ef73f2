//! Per-session capture context.
//!
//! Owns the page listener lifecycle for one browser session: `start` installs
//! the listener and spawns a fixed-interval poller, `drain` hands back what
//! was committed since the last drain (used at step boundaries), and `stop`
//! shuts the poller down and flushes everything still buffered.

use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::processor::CaptureProcessor;
use super::script::drain_script;
use super::types::{CaptureError, DrainResponse};
use crate::codec::ActionRecord;
use crate::config::CaptureSettings;
use crate::driver::BrowserDriver;

#[derive(Debug)]
struct CaptureState {
    processor: CaptureProcessor,
    dropped: u64,
    failures: Vec<CaptureError>,
    reinstalls: usize,
}

pub struct CaptureContext {
    driver: Arc<dyn BrowserDriver>,
    settings: CaptureSettings,
    script: Arc<String>,
    state: Arc<Mutex<CaptureState>>,
    poller: Option<JoinHandle<()>>,
    stop_tx: Option<watch::Sender<bool>>,
}

impl CaptureContext {
    pub fn new(driver: Arc<dyn BrowserDriver>, settings: CaptureSettings) -> Self {
        let state = CaptureState {
            processor: CaptureProcessor::new(&settings),
            dropped: 0,
            failures: Vec::new(),
            reinstalls: 0,
        };
        Self {
            driver,
            script: Arc::new(drain_script(settings.queue_cap)),
            settings,
            state: Arc::new(Mutex::new(state)),
            poller: None,
            stop_tx: None,
        }
    }

    /// Install the listener and start the background drain loop
    pub async fn start(&mut self) {
        if self.poller.is_some() {
            return;
        }
        poll_once(&self.driver, &self.state, &self.script).await;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let driver = Arc::clone(&self.driver);
        let state = Arc::clone(&self.state);
        let script = Arc::clone(&self.script);
        let interval = self.settings.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        poll_once(&driver, &state, &script).await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        self.poller = Some(handle);
        self.stop_tx = Some(stop_tx);
    }

    /// Drain the page queue now and return committed actions, treating the
    /// call as a step boundary (pending text input is committed)
    pub async fn drain(&self) -> Vec<ActionRecord> {
        poll_once(&self.driver, &self.state, &self.script).await;
        let mut state = self.state.lock().await;
        state.processor.flush();
        state.processor.take()
    }

    /// Stop polling, flush buffered events and return whatever remained
    pub async fn stop(&mut self) -> Vec<ActionRecord> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(handle) = self.poller.take() {
            if let Err(e) = handle.await {
                tracing::warn!("capture poller ended abnormally: {}", e);
            }
        }
        self.drain().await
    }

    pub fn is_running(&self) -> bool {
        self.poller.is_some()
    }

    /// Non-fatal capture failures seen so far
    pub async fn failures(&self) -> Vec<CaptureError> {
        self.state.lock().await.failures.clone()
    }

    /// Events lost page-side because the bounded queue overflowed
    pub async fn dropped(&self) -> u64 {
        self.state.lock().await.dropped
    }

    /// Times the listener had to be re-installed after the first drain
    pub async fn reinstalls(&self) -> usize {
        self.state.lock().await.reinstalls
    }
}

impl Drop for CaptureContext {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.take() {
            handle.abort();
        }
    }
}

async fn poll_once(driver: &Arc<dyn BrowserDriver>, state: &Arc<Mutex<CaptureState>>, script: &str) {
    // Held across the evaluate so concurrent drains ingest in page order.
    let mut state = state.lock().await;

    let raw = match driver.evaluate(script).await {
        Ok(raw) => raw,
        Err(e) => {
            let failure = if state.failures.is_empty() && state.reinstalls == 0 {
                CaptureError::Injection(e.to_string())
            } else {
                CaptureError::Drain(e.to_string())
            };
            tracing::warn!("{} (capture continues polling)", failure);
            state.failures.push(failure);
            return;
        }
    };

    let response: DrainResponse = match serde_json::from_value(raw) {
        Ok(response) => response,
        Err(e) => {
            let failure = CaptureError::Malformed(e.to_string());
            tracing::warn!("{}", failure);
            state.failures.push(failure);
            return;
        }
    };

    if !response.installed {
        state.reinstalls += 1;
    }
    if response.dropped > 0 {
        tracing::warn!("capture queue overflowed, {} event(s) dropped", response.dropped);
        state.dropped += response.dropped;
    }
    for event in response.events {
        state.processor.ingest(event);
    }
    state.processor.tick(response.now);
}
