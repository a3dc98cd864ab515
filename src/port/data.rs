//! Shared state between two entangled endpoints.
//!
//! Each endpoint owns a [`PortData`]. Two locks protect it:
//!
//! - **The inner mutex** guards the incoming queue, the receive-enabled
//!   flag, and the owner wake handle. It is held briefly and never across
//!   codec work, user code, or acquisition of the pair mutex.
//! - **The pair mutex** guards the sibling link and is *shared* by both
//!   members of the pair for as long as they are entangled: a sender locks
//!   it to observe-and-use the sibling pointer atomically against
//!   teardown from the other side. Disentangling captures the shared
//!   mutex, holds it for the whole teardown, and swaps in a fresh private
//!   one, so that afterwards each ex-sibling serializes only its own state
//!   and cannot deadlock against a now-unrelated peer.
//!
//! The only nested acquisition is pair mutex → sibling slot → peer inner
//! mutex, uniform across send, teardown, and inspection.

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::env::AsyncHandle;
use crate::message::Message;

/// State shared between the two sides of an entangled port pair.
///
/// Created by a [`Port`](super::Port), handed between threads by
/// detach/adopt, destroyed once no port refers to it. Destruction
/// disentangles defensively and releases any queued messages.
pub struct PortData {
    /// Queue, receive flag, owner wake handle.
    inner: Mutex<Inner>,
    /// Link to the paired endpoint. Mutated only under the pair mutex.
    sibling: Mutex<Option<Weak<PortData>>>,
    /// Handle to the pair mutex. Shared with the sibling while entangled;
    /// replaced with a private one during disentangle.
    pair: Mutex<Arc<Mutex<()>>>,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<Message>,
    receiving: bool,
    owner: Option<Arc<dyn AsyncHandle>>,
}

impl PortData {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            sibling: Mutex::new(None),
            pair: Mutex::new(Arc::new(Mutex::new(()))),
        })
    }

    fn pair_handle(&self) -> Arc<Mutex<()>> {
        self.pair.lock().clone()
    }

    /// Appends a message to the incoming queue and wakes the owner.
    ///
    /// Callable from any thread.
    pub(crate) fn enqueue(&self, message: Message) {
        let inner = &mut *self.inner.lock();
        inner.queue.push_back(message);
        if let Some(owner) = &inner.owner {
            owner.signal();
        }
    }

    /// Sends a message to the entangled sibling, if any.
    ///
    /// A missing sibling (never entangled, torn down, or already dropped)
    /// swallows the message; this is deliberately not an error.
    pub(crate) fn send_to_sibling(&self, message: Message) {
        let pair = self.pair_handle();
        let _entangled = pair.lock();
        let sibling = self.sibling.lock().as_ref().and_then(Weak::upgrade);
        if let Some(sibling) = sibling {
            sibling.enqueue(message);
        } else {
            tracing::trace!("dropping message posted to a closed sibling");
        }
    }

    /// Returns true iff the paired endpoint is gone.
    pub(crate) fn is_sibling_closed(&self) -> bool {
        let pair = self.pair_handle();
        let _entangled = pair.lock();
        let slot = self.sibling.lock();
        slot.as_ref().and_then(Weak::upgrade).is_none()
    }

    /// Links `a` and `b` and makes them share one pair mutex.
    ///
    /// Both must be unlinked. The caller synchronizes externally against
    /// any in-flight access; the factory entangles before either port is
    /// visible to user code.
    pub(crate) fn entangle(a: &Arc<Self>, b: &Arc<Self>) {
        {
            let mut slot_a = a.sibling.lock();
            let mut slot_b = b.sibling.lock();
            assert!(slot_a.is_none(), "endpoint already entangled");
            assert!(slot_b.is_none(), "endpoint already entangled");
            *slot_a = Some(Arc::downgrade(b));
            *slot_b = Some(Arc::downgrade(a));
        }
        let shared = b.pair_handle();
        *a.pair.lock() = shared;
        tracing::debug!("entangled port pair");
    }

    /// Breaks the pair. Both ex-siblings report a closed sibling forever
    /// afterwards; both owners are woken so their delivery loops notice.
    pub(crate) fn disentangle(&self) {
        // Capture the current shared pair mutex and hold it for the whole
        // teardown: a concurrent send from the other side either finishes
        // before this point or observes the cleared link.
        let pair = self.pair_handle();
        let _entangled = pair.lock();

        // From here on each side has its own pair mutex; the sibling still
        // holds the old one and will replace it in its own disentangle.
        *self.pair.lock() = Arc::new(Mutex::new(()));

        let sibling = self.sibling.lock().take().and_then(|w| w.upgrade());
        if let Some(sibling) = &sibling {
            *sibling.sibling.lock() = None;
        }

        self.ping_owner();
        if let Some(sibling) = sibling {
            sibling.ping_owner();
        }
        tracing::debug!("disentangled port pair");
    }

    /// Wakes the attached owner, if any.
    fn ping_owner(&self) {
        let inner = self.inner.lock();
        if let Some(owner) = &inner.owner {
            owner.signal();
        }
    }

    /// Attaches an owner wake handle; wakes it immediately if messages
    /// are already waiting.
    pub(crate) fn attach_owner(&self, handle: Arc<dyn AsyncHandle>) {
        let inner = &mut *self.inner.lock();
        if !inner.queue.is_empty() {
            handle.signal();
        }
        inner.owner = Some(handle);
    }

    /// Clears the owner back-reference. Only the owner thread calls this.
    pub(crate) fn clear_owner(&self) {
        self.inner.lock().owner = None;
    }

    /// Enables delivery; wakes the owner if messages are waiting.
    pub(crate) fn start(&self) {
        let inner = &mut *self.inner.lock();
        inner.receiving = true;
        if !inner.queue.is_empty() {
            if let Some(owner) = &inner.owner {
                owner.signal();
            }
        }
    }

    /// Disables delivery. Queued messages stay put.
    pub(crate) fn stop(&self) {
        self.inner.lock().receiving = false;
    }

    /// Pops the head message, or `None` if delivery is disabled or the
    /// queue is empty.
    pub(crate) fn dequeue(&self) -> Option<Message> {
        let inner = &mut *self.inner.lock();
        if !inner.receiving {
            return None;
        }
        inner.queue.pop_front()
    }

    /// Returns true if messages are waiting.
    pub(crate) fn has_queued(&self) -> bool {
        !self.inner.lock().queue.is_empty()
    }

    /// Approximate memory held by the queue.
    pub(crate) fn queued_bytes(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .queue
            .iter()
            .map(|m| mem::size_of::<Message>() + m.blob_len())
            .sum()
    }
}

impl Drop for PortData {
    fn drop(&mut self) {
        debug_assert!(
            self.inner.lock().owner.is_none(),
            "port data dropped while still owned"
        );
        self.disentangle();
    }
}

impl std::fmt::Debug for PortData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PortData")
            .field("queued", &inner.queue.len())
            .field("receiving", &inner.receiving)
            .field("owned", &inner.owner.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Default)]
    struct CountingHandle {
        signals: AtomicUsize,
    }

    impl AsyncHandle for CountingHandle {
        fn signal(&self) {
            self.signals.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingHandle {
        fn count(&self) -> usize {
            self.signals.load(Ordering::SeqCst)
        }
    }

    fn pair() -> (Arc<PortData>, Arc<PortData>) {
        let a = PortData::new();
        let b = PortData::new();
        PortData::entangle(&a, &b);
        (a, b)
    }

    #[test]
    fn fresh_pair_is_not_sibling_closed() {
        let (a, b) = pair();
        assert!(!a.is_sibling_closed());
        assert!(!b.is_sibling_closed());
    }

    #[test]
    fn disentangle_closes_both_sides_forever() {
        let (a, b) = pair();
        a.disentangle();
        assert!(a.is_sibling_closed());
        assert!(b.is_sibling_closed());

        // Tearing down again from either side is harmless.
        b.disentangle();
        a.disentangle();
        assert!(a.is_sibling_closed());
    }

    #[test]
    fn dropping_one_side_closes_the_other() {
        let (a, b) = pair();
        drop(b);
        assert!(a.is_sibling_closed());
    }

    #[test]
    fn enqueue_wakes_owner() {
        let data = PortData::new();
        let handle = Arc::new(CountingHandle::default());
        data.attach_owner(handle.clone());

        data.enqueue(Message::default());
        assert_eq!(handle.count(), 1);
        assert!(data.has_queued());

        data.clear_owner();
        data.enqueue(Message::default());
        assert_eq!(handle.count(), 1);
    }

    #[test]
    fn attach_owner_wakes_when_messages_wait() {
        let data = PortData::new();
        data.enqueue(Message::default());

        let handle = Arc::new(CountingHandle::default());
        data.attach_owner(handle.clone());
        assert_eq!(handle.count(), 1);
        data.clear_owner();
    }

    #[test]
    fn dequeue_respects_receive_flag() {
        let data = PortData::new();
        data.enqueue(Message::default());
        assert!(data.dequeue().is_none());

        data.start();
        assert!(data.dequeue().is_some());
        assert!(data.dequeue().is_none());

        data.enqueue(Message::default());
        data.stop();
        assert!(data.dequeue().is_none());
        assert!(data.has_queued());
    }

    #[test]
    fn start_wakes_owner_only_with_backlog() {
        let data = PortData::new();
        let handle = Arc::new(CountingHandle::default());
        data.attach_owner(handle.clone());

        data.start();
        assert_eq!(handle.count(), 0);

        data.stop();
        data.enqueue(Message::default());
        assert_eq!(handle.count(), 1);
        data.start();
        assert_eq!(handle.count(), 2);
        data.clear_owner();
    }

    #[test]
    fn send_to_sibling_enqueues_on_the_peer() {
        let (a, b) = pair();
        a.send_to_sibling(Message::default());
        assert!(b.has_queued());
        assert!(!a.has_queued());
    }

    #[test]
    fn send_after_disentangle_is_swallowed() {
        let (a, b) = pair();
        b.disentangle();
        a.send_to_sibling(Message::default());
        assert!(!b.has_queued());
    }

    #[test]
    fn disentangle_wakes_both_owners() {
        let (a, b) = pair();
        let ha = Arc::new(CountingHandle::default());
        let hb = Arc::new(CountingHandle::default());
        a.attach_owner(ha.clone());
        b.attach_owner(hb.clone());

        a.disentangle();
        assert_eq!(ha.count(), 1);
        assert_eq!(hb.count(), 1);
        a.clear_owner();
        b.clear_owner();
    }

    #[test]
    fn queued_bytes_tracks_blob_sizes() {
        let data = PortData::new();
        assert_eq!(data.queued_bytes(), 0);
        data.enqueue(Message::default());
        assert_eq!(data.queued_bytes(), mem::size_of::<Message>());
    }

    #[test]
    fn concurrent_sends_race_teardown_without_deadlock() {
        for _ in 0..64 {
            let (a, b) = pair();
            let sender = {
                let a = Arc::clone(&a);
                thread::spawn(move || {
                    for _ in 0..32 {
                        a.send_to_sibling(Message::default());
                    }
                })
            };
            let closer = {
                let b = Arc::clone(&b);
                thread::spawn(move || {
                    b.disentangle();
                })
            };
            sender.join().expect("sender panicked");
            closer.join().expect("closer panicked");
            assert!(a.is_sibling_closed());
            assert!(b.is_sibling_closed());
        }
    }
}
