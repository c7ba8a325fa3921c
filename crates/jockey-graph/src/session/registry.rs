//! Session registry: at most one in-flight run per session id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use super::SessionError;
use crate::error::ClassifiedError;

#[derive(Debug, Default)]
struct SessionSlot {
    /// Generation and cancel token of the run holding the session
    in_flight: Option<(u64, CancellationToken)>,
    last_error: Option<ClassifiedError>,
}

/// Process-local bookkeeping of running sessions.
///
/// Claiming a session is a compare-and-set under one lock, so two callers
/// racing for the same id cannot both win.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<String, SessionSlot>>,
    generation: std::sync::atomic::AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a session for one run. Fails with [`SessionError::Busy`] while
    /// another run holds it.
    pub fn try_begin(self: &Arc<Self>, session_id: &str) -> Result<RunGuard, SessionError> {
        let mut slots = self.slots();
        let slot = slots.entry(session_id.to_string()).or_default();
        if slot.in_flight.is_some() {
            return Err(SessionError::Busy(session_id.to_string()));
        }

        let generation = self
            .generation
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let cancel = CancellationToken::new();
        slot.in_flight = Some((generation, cancel.clone()));
        Ok(RunGuard {
            registry: Arc::clone(self),
            session_id: session_id.to_string(),
            generation,
            cancel,
        })
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.slots()
            .get(session_id)
            .is_some_and(|slot| slot.in_flight.is_some())
    }

    /// Request cancellation of the in-flight run. Returns false when no run
    /// is in flight.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.slots().get(session_id).and_then(|slot| slot.in_flight.as_ref()) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Record how the latest run ended; `None` clears a previous failure.
    pub fn record_outcome(&self, session_id: &str, error: Option<ClassifiedError>) {
        self.slots().entry(session_id.to_string()).or_default().last_error = error;
    }

    pub fn last_error(&self, session_id: &str) -> Option<ClassifiedError> {
        self.slots()
            .get(session_id)
            .and_then(|slot| slot.last_error.clone())
    }

    /// Drop all bookkeeping for an idle session.
    pub fn forget(&self, session_id: &str) {
        let mut slots = self.slots();
        if slots
            .get(session_id)
            .is_some_and(|slot| slot.in_flight.is_none())
        {
            slots.remove(session_id);
        }
    }

    /// Sessions the registry currently keeps a slot for.
    pub fn tracked(&self) -> usize {
        self.slots().len()
    }

    /// Release a claim. A slot with no run and no failure to report is
    /// dropped, so idle sessions hold no bookkeeping.
    fn release(&self, session_id: &str, generation: u64) {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(session_id) else {
            return;
        };
        if matches!(&slot.in_flight, Some((current, _)) if *current == generation) {
            slot.in_flight = None;
        }
        if slot.in_flight.is_none() && slot.last_error.is_none() {
            slots.remove(session_id);
        }
    }
}

/// Proof of an exclusive claim on a session. Dropping it releases the claim.
#[derive(Debug)]
pub struct RunGuard {
    registry: Arc<SessionRegistry>,
    session_id: String,
    generation: u64,
    cancel: CancellationToken,
}

impl RunGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.release(&self.session_id, self.generation);
    }
}
