//! Deduplicated redirect-to-auth.
//!
//! When several concurrent operations fail unauthenticated at once, the
//! navigation action must run exactly once. The guard wins an in-flight flag
//! with compare-exchange and clears it on the next tick of the scheduler, so
//! every failure already queued in the same batch is absorbed while a later
//! batch may redirect again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Navigation primitive invoked on unauthenticated detection. Its concrete
/// behavior (screen stack manipulation) belongs to the host app.
pub type RedirectAction = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct RedirectGuard {
    in_flight: Arc<AtomicBool>,
    redirect: RedirectAction,
}

impl RedirectGuard {
    pub fn new(redirect: RedirectAction) -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
            redirect,
        }
    }

    /// Invoke the redirect action unless one is already in flight.
    /// Returns whether this call performed the redirect.
    pub fn trigger(&self) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("redirect already in flight, skipping");
            return false;
        }

        (self.redirect)();

        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            in_flight.store(false, Ordering::Release);
        });
        true
    }
}
