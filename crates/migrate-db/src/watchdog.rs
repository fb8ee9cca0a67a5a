use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use rusqlite::InterruptHandle;
use tracing::warn;

/// Interrupts the connection if a statement runs past its deadline.
///
/// The interrupted statement fails with `SQLITE_INTERRUPT`, which the executor
/// reports as a statement failure, so the unit is rolled back.
pub struct Watchdog {
    done: Option<mpsc::Sender<()>>,
    fired: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn arm(interrupt: Arc<InterruptHandle>, timeout: Duration) -> Self {
        let (done, rx) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let thread = std::thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(timeout) {
                warn!("statement exceeded {timeout:?}, interrupting");
                flag.store(true, Ordering::SeqCst);
                interrupt.interrupt();
            }
        });
        Self {
            done: Some(done),
            fired,
            thread: Some(thread),
        }
    }

    /// Stop the timer; returns whether it fired.
    pub fn disarm(mut self) -> bool {
        self.stop();
        self.fired.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        // dropping the sender wakes the timer thread
        self.done.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
