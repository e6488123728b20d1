//! Coarse position clock
//!
//! A background thread fires a callback once per interval until cancelled.
//! Cancellation joins the thread, so no callback runs after `cancel` returns.

use crossbeam_channel::{bounded, select, tick, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Running {
    /// Dropping this disconnects the ticker thread's cancel receiver
    cancel_tx: Sender<()>,
    thread: JoinHandle<()>,
}

/// Cancellable periodic timer
pub struct PositionTicker {
    interval: Duration,
    running: Option<Running>,
}

impl PositionTicker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start firing `on_tick` every interval, replacing any running timer
    pub fn start<F>(&mut self, mut on_tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.cancel();

        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let interval = self.interval;
        let thread = thread::spawn(move || {
            let ticks = tick(interval);
            loop {
                select! {
                    recv(cancel_rx) -> _ => break,
                    recv(ticks) -> _ => {
                        // Cancellation wins over a tick that arrived at the same time
                        if matches!(cancel_rx.try_recv(), Err(TryRecvError::Disconnected)) {
                            break;
                        }
                        on_tick();
                    }
                }
            }
        });

        self.running = Some(Running { cancel_tx, thread });
    }

    /// Stop the timer and wait for its thread to exit
    pub fn cancel(&mut self) {
        if let Some(running) = self.running.take() {
            drop(running.cancel_tx);
            if running.thread.join().is_err() {
                tracing::warn!("position ticker thread panicked");
            }
        }
    }
}

impl Drop for PositionTicker {
    fn drop(&mut self) {
        self.cancel();
    }
}
