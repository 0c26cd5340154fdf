//! Single-slot reply correlator.
//!
//! At most one request per connection waits for a reply. The next message
//! decoded after the waiter registers resolves it. A second registration
//! while one is outstanding fails with [`SockwireError::Busy`]; closing the
//! connection drops the waiter's sender, which the waiter observes as
//! [`SockwireError::ConnectionClosed`].

use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::{Result, SockwireError};
use crate::message::Message;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Message>,
}

#[derive(Default)]
struct SlotState {
    waiter: Option<Waiter>,
    closed: bool,
    next_id: u64,
}

/// Pending-request slot owned by a connection.
#[derive(Default)]
pub(crate) struct PendingSlot {
    state: Mutex<SlotState>,
}

impl PendingSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        // A panic while holding this lock cannot leave the slot inconsistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the slot.
    pub(crate) fn register(&self) -> Result<(u64, oneshot::Receiver<Message>)> {
        let mut state = self.lock();
        if state.closed {
            return Err(SockwireError::ConnectionClosed);
        }
        if state.waiter.is_some() {
            return Err(SockwireError::Busy);
        }

        state.next_id = state.next_id.wrapping_add(1);
        let id = state.next_id;
        let (tx, rx) = oneshot::channel();
        state.waiter = Some(Waiter { id, tx });
        Ok((id, rx))
    }

    /// Offer an inbound message to the waiter.
    ///
    /// Returns the message back if nobody was waiting for it.
    pub(crate) fn resolve(&self, message: Message) -> Option<Message> {
        let mut state = self.lock();
        match state.waiter.take() {
            // Send under the lock so a concurrent cancel sees a consistent slot.
            Some(waiter) => waiter.tx.send(message).err(),
            None => Some(message),
        }
    }

    /// Release the slot if it is still held by request `id`.
    ///
    /// Returns `false` if the request was already resolved or closed.
    pub(crate) fn cancel(&self, id: u64) -> bool {
        let mut state = self.lock();
        match &state.waiter {
            Some(waiter) if waiter.id == id => {
                state.waiter = None;
                true
            }
            _ => false,
        }
    }

    /// Refuse new waiters and fail the current one.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.waiter = None;
    }

    /// Whether a request is waiting for a reply.
    pub(crate) fn is_waiting(&self) -> bool {
        self.lock().waiter.is_some()
    }
}

/// Releases the slot when a waiting request is dropped or times out.
pub(crate) struct PendingGuard<'a> {
    slot: &'a PendingSlot,
    id: u64,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(slot: &'a PendingSlot, id: u64) -> Self {
        Self { slot, id }
    }

    pub(crate) fn cancel(&self) -> bool {
        self.slot.cancel(self.id)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.slot.cancel(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn msg(data: &'static [u8]) -> Message {
        Message::new(Bytes::from_static(data))
    }

    #[test]
    fn test_resolve_without_waiter_returns_message() {
        let slot = PendingSlot::new();
        assert_eq!(slot.resolve(msg(b"data")), Some(msg(b"data")));
    }

    #[tokio::test]
    async fn test_resolve_delivers_to_waiter() {
        let slot = PendingSlot::new();
        let (_id, rx) = slot.register().unwrap();

        assert!(slot.is_waiting());
        assert_eq!(slot.resolve(msg(b"reply")), None);
        assert!(!slot.is_waiting());
        assert_eq!(rx.await.unwrap(), msg(b"reply"));
    }

    #[test]
    fn test_second_register_is_busy() {
        let slot = PendingSlot::new();
        let (_id, _rx) = slot.register().unwrap();
        assert!(matches!(slot.register(), Err(SockwireError::Busy)));
    }

    #[test]
    fn test_only_first_message_resolves() {
        let slot = PendingSlot::new();
        let (_id, _rx) = slot.register().unwrap();

        assert_eq!(slot.resolve(msg(b"first")), None);
        assert_eq!(slot.resolve(msg(b"second")), Some(msg(b"second")));
    }

    #[tokio::test]
    async fn test_close_fails_waiter() {
        let slot = PendingSlot::new();
        let (_id, rx) = slot.register().unwrap();

        slot.close();

        assert!(rx.await.is_err());
        assert!(matches!(slot.register(), Err(SockwireError::ConnectionClosed)));
    }

    #[test]
    fn test_cancel_only_matching_request() {
        let slot = PendingSlot::new();
        let (first, _rx) = slot.register().unwrap();
        assert!(slot.cancel(first));

        let (second, _rx2) = slot.register().unwrap();
        assert!(!slot.cancel(first));
        assert!(slot.is_waiting());
        assert!(slot.cancel(second));
    }

    #[test]
    fn test_guard_releases_slot_on_drop() {
        let slot = PendingSlot::new();
        let (id, _rx) = slot.register().unwrap();
        {
            let _guard = PendingGuard::new(&slot, id);
        }
        assert!(!slot.is_waiting());
        assert!(slot.register().is_ok());
    }

    #[test]
    fn test_message_to_dropped_waiter_is_returned() {
        let slot = PendingSlot::new();
        let (_id, rx) = slot.register().unwrap();
        drop(rx);

        assert_eq!(slot.resolve(msg(b"orphan")), Some(msg(b"orphan")));
    }
}
