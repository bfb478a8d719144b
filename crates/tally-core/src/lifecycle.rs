//! Shared shutdown and periodic-task plumbing for the server and the agent.
//!
//! A [`Lifecycle`] owns one shutdown flag (a `watch` channel) and the join
//! handles of every ticker spawned through it. [`Lifecycle::shutdown`]
//! raises the flag and waits for all tickers to return, so the caller can run
//! a final flush knowing no periodic task is still in flight.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shutdown coordinator
pub struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
    triggered: AtomicBool,
    tickers: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            triggered: AtomicBool::new(false),
            tickers: Mutex::new(Vec::new()),
        }
    }

    /// Raise the shutdown flag. Only the first call has any effect.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutdown requested");
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Receiver that flips to `true` on shutdown
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Resolve once shutdown has been triggered
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Run `task` every `period` until shutdown.
    ///
    /// The first run happens one full period after spawning. A zero period
    /// disables the ticker entirely. A run that is in progress when shutdown
    /// is triggered completes before the ticker returns.
    pub fn spawn_ticker<F, Fut>(&self, name: &'static str, period: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            debug!(ticker = name, "Ticker disabled");
            return;
        }

        let mut rx = self.subscribe();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    // The watch guard must not outlive this arm; it is not Send
                    _ = async { let _ = rx.wait_for(|stop| *stop).await; } => break,
                    _ = interval.tick() => task().await,
                }
            }
            debug!(ticker = name, "Ticker stopped");
        });

        debug!(ticker = name, period = ?period, "Ticker started");
        self.tickers.lock().push((name, handle));
    }

    /// Trigger shutdown and wait for every ticker to finish
    pub async fn shutdown(&self) {
        self.trigger();
        let tickers = std::mem::take(&mut *self.tickers.lock());
        for (name, handle) in tickers {
            if let Err(e) = handle.await {
                warn!(ticker = name, error = %e, "Ticker ended abnormally");
            }
        }
    }
}

/// Wait for SIGINT, SIGTERM or SIGQUIT and return the signal name
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
