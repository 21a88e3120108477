//! Wall-clock budget enforcement.
//!
//! A [`TimeoutAlarm`] owns a watchdog thread that sleeps for the session's
//! remaining budget. If it is not disarmed first it cancels the session's
//! [`CancellationToken`] and fires the backend's interrupter, which breaks
//! a step that would otherwise block forever (an infinite loop in the target,
//! a read from a terminal that never answers).
//!
//! The driver also checks elapsed time itself before every stop, so a
//! backend without an interrupter still terminates between steps.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::Interrupt;

/// Shared flag set once the budget is exhausted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Watchdog that fires once after a budget unless disarmed.
pub struct TimeoutAlarm {
    disarm_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutAlarm {
    /// Start the watchdog.
    ///
    /// # Errors
    /// Returns an error if the watchdog thread cannot be spawned
    pub fn arm(
        budget: Duration,
        token: CancellationToken,
        interrupter: Option<Arc<dyn Interrupt>>,
    ) -> std::io::Result<Self> {
        let (disarm_tx, disarm_rx) = bounded::<()>(0);

        let handle = std::thread::Builder::new().name("steptrace-alarm".to_string()).spawn(move || {
            match disarm_rx.recv_timeout(budget) {
                Err(RecvTimeoutError::Timeout) => {
                    info!("Time budget of {} ms exhausted, interrupting target", budget.as_millis());
                    token.cancel();
                    if let Some(interrupter) = interrupter {
                        interrupter.interrupt();
                    }
                }
                // Sender dropped or explicit disarm
                Ok(()) | Err(RecvTimeoutError::Disconnected) => debug!("Alarm disarmed"),
            }
        })?;

        Ok(Self { disarm_tx: Some(disarm_tx), handle: Some(handle) })
    }

    /// Stop the watchdog and wait for its thread.
    pub fn disarm(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        drop(self.disarm_tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimeoutAlarm {
    fn drop(&mut self) {
        self.stop();
    }
}
