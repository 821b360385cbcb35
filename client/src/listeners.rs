//! Packet listeners registered by the UI, keyed by packet id

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use shared::{Packet, PacketId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

pub type PacketCallback = Arc<dyn Fn(Packet) + Send + Sync + 'static>;

type ListenerTable = RefCell<HashMap<PacketId, PacketCallback>>;

/// Mapping from packet id to the callback interested in it.
///
/// Every operation takes the same lock, and dispatch keeps it for the whole
/// lookup and invocation. Once `remove_listener` or `remove_all` returns, a
/// removed callback is neither running nor going to run. The lock is
/// reentrant so a listener may still change the table from its own body.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: ReentrantMutex<ListenerTable>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ReentrantMutexGuard<'_, ListenerTable> {
        self.listeners.lock()
    }

    /// Registers `callback` for `id`, replacing any earlier registration.
    pub fn add_listener<F>(&self, id: PacketId, callback: F)
    where
        F: Fn(Packet) + Send + Sync + 'static,
    {
        self.lock().borrow_mut().insert(id, Arc::new(callback));
    }

    pub fn remove_listener(&self, id: PacketId) {
        self.lock().borrow_mut().remove(&id);
    }

    pub fn remove_all(&self) {
        self.lock().borrow_mut().clear();
    }

    pub fn contains(&self, id: PacketId) -> bool {
        self.lock().borrow().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().borrow().is_empty()
    }

    /// Invokes the listener for the packet's id. Returns `false` when nobody
    /// is listening.
    pub fn dispatch(&self, packet: Packet) -> bool {
        let table = self.lock();
        // The table borrow ends here; the lock is held until the callback returns
        let callback = table.borrow().get(&packet.id()).cloned();

        match callback {
            Some(callback) => {
                callback(packet);
                true
            }
            None => false,
        }
    }
}
