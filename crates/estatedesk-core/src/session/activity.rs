use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// User input that counts as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Pointer,
    Keyboard,
    Scroll,
    Touch,
}

/// Signals the idle monitor listens to.
pub const TRACKED_ACTIVITY: [ActivityKind; 4] = [
    ActivityKind::Pointer,
    ActivityKind::Keyboard,
    ActivityKind::Scroll,
    ActivityKind::Touch,
];

/// Handle returned by `add_listener`; the only way to remove that listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type ActivityListener = Arc<dyn Fn(ActivityKind) + Send + Sync>;

/// Fan-out point between the UI's input events and whoever cares about them.
#[derive(Default)]
pub struct ActivityHub {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, ActivityKind, ActivityListener)>>,
}

impl ActivityHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, kind: ActivityKind, listener: ActivityListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, kind, listener));
        id
    }

    /// Returns false if `id` was not attached (already removed).
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _, _)| *lid != id);
        listeners.len() != before
    }

    /// Deliver an input event to every listener registered for its kind.
    pub fn emit(&self, kind: ActivityKind) {
        let targets: Vec<ActivityListener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, l)| l.clone())
            .collect();
        for listener in targets {
            listener(kind);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_matching_kind_only() {
        let hub = ActivityHub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        hub.add_listener(
            ActivityKind::Keyboard,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        hub.emit(ActivityKind::Keyboard);
        hub.emit(ActivityKind::Scroll);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_uses_the_attached_handle() {
        let hub = ActivityHub::new();
        let listener: ActivityListener = Arc::new(|_| {});
        let a = hub.add_listener(ActivityKind::Pointer, listener.clone());
        let b = hub.add_listener(ActivityKind::Pointer, listener);
        assert_ne!(a, b);

        assert!(hub.remove_listener(a));
        assert!(!hub.remove_listener(a));
        assert_eq!(hub.listener_count(), 1);
        assert!(hub.remove_listener(b));
        assert_eq!(hub.listener_count(), 0);
    }
}
