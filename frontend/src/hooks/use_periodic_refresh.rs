use chrono::{DateTime, Local};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for periodic refresh behavior
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicRefreshConfig {
    pub interval: Duration,
    pub initial_delay: Option<Duration>,
}

impl Default for PeriodicRefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_delay: None,
        }
    }
}

impl PeriodicRefreshConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            initial_delay: None,
        }
    }

    /// Delay the first run, so that several lists polling at the same rate
    /// don't all hit the backend together.
    pub fn staggered(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshStatus {
    pub is_running: bool,
    /// Consecutive failures; reset by the next success
    pub error_count: u32,
    pub last_refresh_time: Option<DateTime<Local>>,
    pub runs: u64,
}

/// A repeating refresh bound to the lifetime of this handle.
///
/// Dropping the handle cancels the task. A refresh still in flight at that
/// point is dropped with it, so its result is never applied.
pub struct PeriodicRefresh {
    name: &'static str,
    cancel: CancellationToken,
    status: Arc<Mutex<RefreshStatus>>,
    task: Option<JoinHandle<()>>,
}

impl PeriodicRefresh {
    /// Start polling. `refresh` is called once per tick; it owns applying its
    /// result to whatever view state it refreshes.
    pub fn spawn<F, Fut, E>(name: &'static str, config: PeriodicRefreshConfig, mut refresh: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let status = Arc::new(Mutex::new(RefreshStatus {
            is_running: true,
            ..RefreshStatus::default()
        }));

        let task = {
            let cancel = cancel.clone();
            let status = status.clone();
            tokio::spawn(async move {
                info!(component = "periodic-refresh", name, interval_ms = config.interval.as_millis() as u64, "Polling started");

                if let Some(delay) = config.initial_delay {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            set_stopped(&status);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                let mut ticker = tokio::time::interval(config.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!(component = "periodic-refresh", name, "Discarding in-flight refresh");
                            break;
                        }
                        result = refresh() => result,
                    };

                    let mut current = status.lock().unwrap_or_else(|p| p.into_inner());
                    current.runs += 1;
                    match result {
                        Ok(()) => {
                            current.error_count = 0;
                            current.last_refresh_time = Some(Local::now());
                        }
                        Err(err) => {
                            current.error_count += 1;
                            warn!(
                                component = "periodic-refresh",
                                name,
                                error = %err,
                                consecutive_failures = current.error_count,
                                "Periodic refresh failed"
                            );
                        }
                    }
                }

                set_stopped(&status);
            })
        };

        Self {
            name,
            cancel,
            status,
            task: Some(task),
        }
    }

    pub fn status(&self) -> RefreshStatus {
        self.status.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Cancel and wait for the task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(component = "periodic-refresh", name = self.name, error = %err, "Polling task ended abnormally");
            }
        }
    }
}

impl Drop for PeriodicRefresh {
    fn drop(&mut self) {
        self.cancel.cancel();
        debug!(component = "periodic-refresh", name = self.name, "Polling cancelled");
    }
}

fn set_stopped(status: &Mutex<RefreshStatus>) {
    status.lock().unwrap_or_else(|p| p.into_inner()).is_running = false;
}
