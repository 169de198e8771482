//! Trailing-edge debounce for repeated "apply" requests.
//!
//! Each [`Debouncer::call`] supersedes the pending one; only the last call in a
//! burst runs, `wait` after it was made. Pending work can be cancelled through
//! the debouncer or through the [`DebounceHandle`] returned for that call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default delay before an "apply" request fires.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Runs only the latest scheduled closure after a quiet period.
#[derive(Debug, Clone)]
pub struct Debouncer {
    wait: Duration,
    generation: Arc<AtomicU64>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl Debouncer {
    /// Debouncer with the given quiet period.
    #[must_use]
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The quiet period.
    #[must_use]
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Schedule `f`, superseding anything still pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer thread cannot be spawned.
    pub fn call<F>(&self, f: F) -> std::io::Result<DebounceHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::clone(&self.generation);
        let wait = self.wait;
        std::thread::Builder::new()
            .name("debounce".to_string())
            .spawn(move || {
                std::thread::sleep(wait);
                // claim the ticket so a late cancel on the handle reports false
                let claimed = generation
                    .compare_exchange(ticket, ticket + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
                if claimed {
                    f();
                } else {
                    tracing::trace!(ticket, "debounced call superseded");
                }
            })?;
        Ok(DebounceHandle {
            ticket,
            generation: Arc::clone(&self.generation),
        })
    }

    /// Drop whatever is pending.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Cancel handle for one [`Debouncer::call`].
#[derive(Debug)]
pub struct DebounceHandle {
    ticket: u64,
    generation: Arc<AtomicU64>,
}

impl DebounceHandle {
    /// Cancel this call if it is still the pending one.
    ///
    /// Returns `false` if it already ran or was superseded.
    pub fn cancel(&self) -> bool {
        self.generation
            .compare_exchange(
                self.ticket,
                self.ticket + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Whether this call is still waiting to fire.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.ticket
    }
}
