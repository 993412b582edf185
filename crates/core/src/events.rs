//! In-process publish/subscribe for extension points.
//!
//! Registration maps a generated listener id to (owner, event type,
//! handler); revocation filters that mapping, never comparing handler
//! references. An extension that unloads revokes everything it owns in one
//! call.

use crate::instance::InstanceId;
use serde_json::Value;
use std::collections::BTreeMap;

/// Fixed set of extension-point event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionEvent {
    RenderTextSelectionPopup,
    RenderSidebarAnnotationHeader,
    RenderToolbar,
    CreateColorContextMenu,
    CreateViewContextMenu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

pub struct EventContext<'a> {
    pub instance: InstanceId,
    pub params: &'a Value,
}

/// Handlers receive the context and an append sink for their contributions.
/// Failures are not isolated: a panicking handler propagates to the
/// dispatching caller, so handlers must be defensive.
pub type EventHandler = Box<dyn Fn(&EventContext, &mut dyn FnMut(Value)) + Send + Sync>;

struct Listener {
    owner: Option<String>,
    event: ExtensionEvent,
    handler: EventHandler,
}

#[derive(Default)]
pub struct EventDispatcher {
    next_id: u64,
    listeners: BTreeMap<ListenerId, Listener>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        event: ExtensionEvent,
        handler: EventHandler,
        owner: Option<&str>,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.insert(id, Listener { owner: owner.map(str::to_owned), event, handler });
        id
    }

    pub fn unregister(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Bulk revocation for an unloading owner.
    pub fn unregister_by_owner(&mut self, owner: &str) -> usize {
        let before = self.listeners.len();
        self.listeners.retain(|_, l| l.owner.as_deref() != Some(owner));
        before - self.listeners.len()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Invoke every handler registered for `event` in registration order and
    /// collect their appended contributions.
    pub fn dispatch(&self, event: ExtensionEvent, instance: InstanceId, params: &Value) -> Vec<Value> {
        let mut appended = Vec::new();
        let context = EventContext { instance, params };
        for listener in self.listeners.values().filter(|l| l.event == event) {
            (listener.handler)(&context, &mut |value| appended.push(value));
        }
        appended
    }
}
