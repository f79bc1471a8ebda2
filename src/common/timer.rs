//! Periodic background task with bounded consecutive-failure tolerance
//!
//! A [`PeriodicTimer`] runs a callback on a tokio task every `interval`. Failed
//! callbacks are logged and counted; once the configured number of consecutive
//! failures is reached the loop terminates on its own, leaving `is_running()`
//! false so whoever owns the timer can notice and react.

use crate::common::{Error, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Default maximum consecutive failures before the timer exits.
pub const DEFAULT_MAX_FAILURE_COUNT: i64 = 10;

type Callback = Box<dyn FnMut() -> BoxFuture<'static, Result<()>> + Send>;

pub struct PeriodicTimer {
    name: String,
    interval: Duration,
    max_failure_count: i64,
    /// Taken by `start()`; `None` once the timer was started or stopped.
    callback: Mutex<Option<Callback>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
    running_tx: Arc<watch::Sender<bool>>,
    failure_count: Arc<AtomicU64>,
}

impl PeriodicTimer {
    /// Create a timer. Fails if `interval` is zero.
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, mut callback: F) -> Result<Self>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if interval.is_zero() {
            return Err(Error::InvalidConfig(
                "timer interval must be positive".into(),
            ));
        }

        let callback: Callback = Box::new(move || callback().boxed());
        let (stop_tx, _) = watch::channel(false);
        let (running_tx, _) = watch::channel(false);

        Ok(Self {
            name: name.into(),
            interval,
            max_failure_count: DEFAULT_MAX_FAILURE_COUNT,
            callback: Mutex::new(Some(callback)),
            handle: Mutex::new(None),
            stop_tx,
            running_tx: Arc::new(running_tx),
            failure_count: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Set the consecutive failure threshold. A non-positive value disables it.
    pub fn with_max_failure_count(mut self, max_failure_count: i64) -> Self {
        self.max_failure_count = max_failure_count;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the background loop. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                Error::AlreadyRunning(format!(
                    "periodic timer '{}' was already started or stopped",
                    self.name
                ))
            })?;

        self.running_tx.send_replace(true);

        let task = TimerTask {
            name: self.name.clone(),
            interval: self.interval,
            max_failure_count: self.max_failure_count,
            callback,
            stop_rx: self.stop_tx.subscribe(),
            running_tx: self.running_tx.clone(),
            failure_count: self.failure_count.clone(),
        };
        let handle = tokio::spawn(task.run());
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        tracing::debug!(timer = %self.name, interval = ?self.interval, "Periodic timer started");
        Ok(())
    }

    /// Signal the loop to stop and wait until it has exited.
    ///
    /// A stopped timer cannot be restarted.
    pub async fn stop(&self) {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.stop_tx.send_replace(true);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(timer = %self.name, "Periodic timer task failed: {}", e);
            }
        }
        self.running_tx.send_replace(false);
    }

    pub fn is_running(&self) -> bool {
        *self.running_tx.borrow()
    }

    /// Consecutive failures so far; reset to zero by every successful callback.
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Resolves once the loop is no longer running, whether stopped or self-terminated.
    pub async fn stopped(&self) {
        let mut running_rx = self.running_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = running_rx.wait_for(|running| !*running).await;
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

impl std::fmt::Debug for PeriodicTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTimer")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("max_failure_count", &self.max_failure_count)
            .field("running", &self.is_running())
            .field("failure_count", &self.failure_count())
            .finish()
    }
}

struct TimerTask {
    name: String,
    interval: Duration,
    max_failure_count: i64,
    callback: Callback,
    stop_rx: watch::Receiver<bool>,
    running_tx: Arc<watch::Sender<bool>>,
    failure_count: Arc<AtomicU64>,
}

impl TimerTask {
    async fn run(mut self) {
        let mut last_success = Instant::now();

        loop {
            tokio::select! {
                // Also fires when the owning timer is dropped.
                _ = self.stop_rx.wait_for(|stop| *stop) => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let outcome = AssertUnwindSafe((self.callback)()).catch_unwind().await;
            let error = match outcome {
                Ok(Ok(())) => {
                    self.failure_count.store(0, Ordering::SeqCst);
                    last_success = Instant::now();
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "callback panicked".to_string(),
            };

            let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::warn!(
                timer = %self.name,
                failures,
                "Error during periodic timer callback: {}",
                error
            );

            if self.max_failure_count > 0 && failures >= self.max_failure_count as u64 {
                tracing::error!(
                    timer = %self.name,
                    "Maximum number of failures reached (count: {}) in {:.2} seconds, terminating periodic timer",
                    failures,
                    last_success.elapsed().as_secs_f64()
                );
                break;
            }
        }

        tracing::info!(timer = %self.name, "Periodic timer terminated");
        self.running_tx.send_replace(false);
    }
}
