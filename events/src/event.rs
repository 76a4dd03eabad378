// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Events
//!
//! Application types become events by implementing the [`Event`] marker trait. Once
//! wrapped in an [`EventRef`] they are shared by every holder in the engine: inbox
//! slots, in-flight fan-out and listener callbacks. Each holder owns one reference;
//! the event is dropped on whichever thread releases the last one.
//!
//! There is no way to retain or release an event other than cloning and dropping the
//! handle, so a mismatched reference count cannot be expressed.
//!

use crate::{
    dispatcher::Dispatcher,
    priority::{DispatchMethod, Priority},
};

use tokio::time::Instant;

use std::{
    any::{Any, TypeId},
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, OnceLock},
    time::Duration,
};

/// Marker trait for messages that flow through the engine.
///
/// ```ignore
/// #[derive(Debug)]
/// struct TemperatureRead(f32);
///
/// impl Event for TemperatureRead {}
/// ```
pub trait Event: fmt::Debug + Send + Sync + 'static {}

/// Stable identifier of a concrete event type, used as the subscription key.
#[derive(Clone, Copy)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
}

impl EventType {
    /// Identifier of the event type `E`.
    pub fn of<E: Event>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
        }
    }

    /// Fully qualified type name, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventType({})", self.name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Object-safe view of an [`Event`] that still allows downcasting.
trait AnyEvent: fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<E: Event> AnyEvent for E {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct EventCell {
    event: Box<dyn AnyEvent>,
    event_type: EventType,
    dispatched_at: OnceLock<Instant>,
}

/// Shared handle to an event instance.
#[derive(Clone)]
pub struct EventRef(Arc<EventCell>);

impl EventRef {
    /// Wraps an application event. The event is not dispatched yet.
    pub fn new<E: Event>(event: E) -> Self {
        Self(Arc::new(EventCell {
            event: Box::new(event),
            event_type: EventType::of::<E>(),
            dispatched_at: OnceLock::new(),
        }))
    }

    /// Concrete type of the wrapped event.
    pub fn event_type(&self) -> EventType {
        self.0.event_type
    }

    /// True if the wrapped event is an `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.0.event_type.id == TypeId::of::<E>()
    }

    /// Typed access to the wrapped event.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.0.event.as_any().downcast_ref::<E>()
    }

    /// Submits the event for FIFO delivery through `dispatcher`.
    pub fn queue(&self, dispatcher: &Dispatcher, priority: Priority) {
        dispatcher.submit(self.clone(), priority, DispatchMethod::Queue);
    }

    /// Submits the event for LIFO delivery through `dispatcher`.
    pub fn stack(&self, dispatcher: &Dispatcher, priority: Priority) {
        dispatcher.submit(self.clone(), priority, DispatchMethod::Stack);
    }

    /// Instant of the first submission, if any.
    pub fn dispatch_time(&self) -> Option<Instant> {
        self.0.dispatched_at.get().copied()
    }

    /// Time elapsed since the first submission.
    ///
    /// Returns [`Duration::MAX`] for an event that has never been submitted, so age
    /// based filters treat it as infinitely old.
    pub fn time_since_dispatch(&self) -> Duration {
        self.dispatch_time()
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX)
    }

    /// True if both handles refer to the same event instance.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.0, &other.0)
    }

    /// Records the dispatch instant on first submission only.
    pub(crate) fn stamp(&self) {
        self.0.dispatched_at.get_or_init(Instant::now);
    }

    #[cfg(test)]
    pub(crate) fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl<E: Event> From<E> for EventRef {
    fn from(event: E) -> Self {
        Self::new(event)
    }
}

impl fmt::Debug for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRef")
            .field("type", &self.0.event_type.name)
            .field("event", &self.0.event)
            .field("dispatched", &self.0.dispatched_at.get().is_some())
            .finish()
    }
}
