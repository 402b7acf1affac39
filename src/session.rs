//! Single-active-client session bookkeeping.
//!
//! The accept loop calls [`SessionManager::supersede`] for every new
//! connection. That cancels whatever session was live and installs the new
//! one as current. Forwarding loops poll [`SessionManager::is_current`] and
//! clear the slot on exit with [`SessionManager::release`], which leaves a
//! newer session's slot untouched.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Identifier of one accepted connection.
pub type SessionId = u64;

struct Slot {
    id: SessionId,
    peer: SocketAddr,
    cancel: CancellationToken,
}

/// Handed to a forwarding loop; identifies its session and carries the
/// cancellation signal for supersession and shutdown.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub cancel: CancellationToken,
}

/// The session that was live when a new one superseded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Displaced {
    pub id: SessionId,
    pub peer: SocketAddr,
}

/// Owns the "current client" slot.
pub struct SessionManager {
    next_id: AtomicU64,
    current: Mutex<Option<Slot>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            current: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Slot>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a new session for `peer`, cancelling the live one if any.
    pub fn supersede(&self, peer: SocketAddr) -> (SessionHandle, Option<Displaced>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let previous = self.slot().replace(Slot {
            id,
            peer,
            cancel: cancel.clone(),
        });

        let displaced = previous.map(|old| {
            old.cancel.cancel();
            Displaced {
                id: old.id,
                peer: old.peer,
            }
        });

        (SessionHandle { id, peer, cancel }, displaced)
    }

    /// Whether `id` is still the recognized current client.
    pub fn is_current(&self, id: SessionId) -> bool {
        self.slot().as_ref().is_some_and(|s| s.id == id)
    }

    /// Clear the slot if `id` still owns it. Returns whether it did.
    pub fn release(&self, id: SessionId) -> bool {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|s| s.id == id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// The live session, if any.
    pub fn current(&self) -> Option<(SessionId, SocketAddr)> {
        self.slot().as_ref().map(|s| (s.id, s.peer))
    }

    /// Whether no session is live.
    pub fn is_idle(&self) -> bool {
        self.slot().is_none()
    }

    /// Cancel and clear the live session (server shutdown).
    pub fn close_current(&self) -> Option<Displaced> {
        self.slot().take().map(|old| {
            old.cancel.cancel();
            Displaced {
                id: old.id,
                peer: old.peer,
            }
        })
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
