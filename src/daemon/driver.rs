//! Background tick thread.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, tick};

use crate::core::errors::{LgError, Result};
use crate::daemon::orchestrator::{FeedbackLoop, TickResult};

/// Runs [`FeedbackLoop::tick`] on a fixed cadence until stopped.
///
/// Results go to a bounded channel. A slow consumer loses results (counted),
/// never slows the cadence.
pub struct TickDriver {
    shutdown_tx: Sender<()>,
    join: Option<thread::JoinHandle<u64>>,
    dropped: Arc<AtomicU64>,
}

impl TickDriver {
    pub fn spawn(
        feedback: Arc<FeedbackLoop>,
        interval: Duration,
        capacity: usize,
    ) -> Result<(Self, Receiver<TickResult>)> {
        if interval.is_zero() {
            return Err(LgError::invalid("runtime.tick_interval_ms", "must be positive"));
        }
        let (result_tx, result_rx) = bounded(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let dropped = Arc::new(AtomicU64::new(0));
        let dropped_thread = Arc::clone(&dropped);

        let join = thread::Builder::new()
            .name("loadgov-tick".to_string())
            .spawn(move || run(&feedback, interval, &shutdown_rx, &result_tx, &dropped_thread))
            .map_err(|e| LgError::Runtime {
                details: format!("failed to spawn tick thread: {e}"),
            })?;

        Ok((
            Self {
                shutdown_tx,
                join: Some(join),
                dropped,
            },
            result_rx,
        ))
    }

    /// Tick results discarded because the receiver fell behind.
    #[must_use]
    pub fn dropped_results(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the thread and wait for it. Returns the number of ticks it ran.
    pub fn stop(mut self) -> Result<u64> {
        let _ = self.shutdown_tx.try_send(());
        match self.join.take() {
            Some(join) => join.join().map_err(|_| LgError::Runtime {
                details: "tick thread panicked".to_string(),
            }),
            None => Ok(0),
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run(
    feedback: &FeedbackLoop,
    interval: Duration,
    shutdown: &Receiver<()>,
    results: &Sender<TickResult>,
    dropped: &AtomicU64,
) -> u64 {
    let ticker = tick(interval);
    let mut ticks = 0u64;
    let mut receiver_gone = false;
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> _ => {
                let result = feedback.tick(Instant::now());
                ticks += 1;
                match results.try_send(result) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    // Ticking continues: sinks and the activity log still consume events.
                    Err(TrySendError::Disconnected(_)) => {
                        if !receiver_gone {
                            receiver_gone = true;
                            feedback.report_error(&LgError::ChannelClosed {
                                component: "tick-results",
                            });
                        }
                    }
                }
            }
        }
    }
    ticks
}
