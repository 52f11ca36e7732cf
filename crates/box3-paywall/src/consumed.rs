//! Single-use tracking of presented proofs.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use box3_core::{proof::ProofId, types::TimestampSeconds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofStatus {
    /// Reserved by a request that has not finished settling.
    InFlight,
    /// Settled; never accepted again.
    Consumed,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    status: ProofStatus,
    valid_before: TimestampSeconds,
}

/// Proofs seen by the paywall, shared across clones.
///
/// Reservation is atomic: of two concurrent presentations of one proof, only one
/// obtains a [`Reservation`]. Consumed proofs are forgotten once their validity
/// window has closed, since an expired proof is refused before it gets here.
#[derive(Debug, Clone, Default)]
pub struct ReplayStore {
    proofs: Arc<Mutex<HashMap<ProofId, Entry>>>,
}

impl ReplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `id`, or report why it is unavailable.
    ///
    /// `valid_before` is the end of the proof's validity window.
    pub fn reserve(
        &self,
        id: ProofId,
        valid_before: TimestampSeconds,
    ) -> Result<Reservation, ProofStatus> {
        let mut proofs = self.proofs.lock().unwrap_or_else(PoisonError::into_inner);
        forget_expired(&mut proofs, TimestampSeconds::now());
        if let Some(entry) = proofs.get(&id) {
            return Err(entry.status);
        }
        proofs.insert(
            id.clone(),
            Entry {
                status: ProofStatus::InFlight,
                valid_before,
            },
        );
        Ok(Reservation {
            store: self.clone(),
            id,
            committed: false,
        })
    }

    pub fn status(&self, id: &ProofId) -> Option<ProofStatus> {
        let proofs = self.proofs.lock().unwrap_or_else(PoisonError::into_inner);
        proofs.get(id).map(|entry| entry.status)
    }

    /// Number of tracked proofs, in flight or consumed.
    pub fn len(&self) -> usize {
        self.proofs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop consumed proofs whose validity ended before `now`.
    pub fn prune(&self, now: TimestampSeconds) {
        let mut proofs = self.proofs.lock().unwrap_or_else(PoisonError::into_inner);
        forget_expired(&mut proofs, now);
    }

    fn finish(&self, id: &ProofId, committed: bool) {
        let mut proofs = self.proofs.lock().unwrap_or_else(PoisonError::into_inner);
        if committed {
            if let Some(entry) = proofs.get_mut(id) {
                entry.status = ProofStatus::Consumed;
            }
        } else {
            proofs.remove(id);
        }
    }
}

fn forget_expired(proofs: &mut HashMap<ProofId, Entry>, now: TimestampSeconds) {
    proofs.retain(|_, entry| entry.status == ProofStatus::InFlight || entry.valid_before >= now);
}

/// A proof held in flight. Dropping it without [`commit`](Reservation::commit)
/// releases the proof so it may be presented again.
#[derive(Debug)]
pub struct Reservation {
    store: ReplayStore,
    id: ProofId,
    committed: bool,
}

impl Reservation {
    pub fn id(&self) -> &ProofId {
        &self.id
    }

    /// Mark the proof consumed.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.store.finish(&self.id, self.committed);
    }
}
