// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Receivers
//!
//! A [`Receiver`] is anything that accepts submitted events into its own inbox. The
//! dispatcher keeps a type indexed table of receivers and fans every drained event
//! out to each receiver subscribed to its concrete type.
//!

use crate::{
    event::{EventRef, EventType},
    priority::{DispatchMethod, Priority},
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use std::{collections::HashMap, sync::Weak};

/// Capability to accept events for later delivery.
pub trait Receiver: Send + Sync {
    /// Buffers `event` for FIFO delivery.
    fn queue_event(&self, event: EventRef, priority: Priority);

    /// Buffers `event` for LIFO delivery.
    fn stack_event(&self, event: EventRef, priority: Priority);

    /// Buffers `event` with the given discipline.
    fn submit(&self, event: EventRef, priority: Priority, method: DispatchMethod) {
        match method {
            DispatchMethod::Queue => self.queue_event(event, priority),
            DispatchMethod::Stack => self.stack_event(event, priority),
        }
    }
}

/// Type indexed table of downstream receivers.
///
/// Receivers are not owned by the table: a receiver that has been dropped is
/// skipped (and forgotten) during fan-out. Buckets are created on first
/// registration and survive when they become empty.
#[derive(Default)]
pub(crate) struct ReceiverRegistry {
    buckets: Mutex<HashMap<EventType, Vec<Weak<dyn Receiver>>>>,
}

impl ReceiverRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Subscribes `receiver` to `event_type`. Registering the same receiver twice
    /// is a no-op; returns whether it was added.
    pub(crate) fn register(
        &self,
        event_type: EventType,
        receiver: Weak<dyn Receiver>,
    ) -> bool {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(event_type).or_default();
        if bucket.iter().any(|known| Weak::ptr_eq(known, &receiver)) {
            return false;
        }
        bucket.push(receiver);
        debug!("Receiver registered for {}.", event_type);
        true
    }

    /// Removes the first registration of `receiver` for `event_type`, if any.
    pub(crate) fn unregister(
        &self,
        event_type: EventType,
        receiver: &Weak<dyn Receiver>,
    ) -> bool {
        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get_mut(&event_type) else {
            return false;
        };
        match bucket.iter().position(|known| Weak::ptr_eq(known, receiver)) {
            Some(index) => {
                bucket.remove(index);
                debug!("Receiver unregistered from {}.", event_type);
                true
            }
            None => false,
        }
    }

    /// Removes `receiver` from every bucket.
    pub(crate) fn unregister_all(&self, receiver: &Weak<dyn Receiver>) {
        let mut buckets = self.buckets.lock();
        for bucket in buckets.values_mut() {
            bucket.retain(|known| !Weak::ptr_eq(known, receiver));
        }
    }

    /// Hands a reference to `event` to every live receiver subscribed to its type,
    /// then releases the reference owned by the caller.
    ///
    /// Returns the number of receivers reached; zero means nobody consumed it.
    pub(crate) fn fan_out(
        &self,
        event: EventRef,
        method: DispatchMethod,
        priority: Priority,
    ) -> usize {
        let event_type = event.event_type();
        let mut delivered = 0;
        {
            let mut buckets = self.buckets.lock();
            if let Some(bucket) = buckets.get_mut(&event_type) {
                bucket.retain(|known| match known.upgrade() {
                    Some(receiver) => {
                        receiver.submit(event.clone(), priority, method);
                        delivered += 1;
                        true
                    }
                    None => false,
                });
            }
        }
        if delivered == 0 {
            trace!("No receiver for {} event, releasing it.", event_type);
        }
        delivered
    }

    /// Number of live receivers subscribed to `event_type`.
    pub(crate) fn count(&self, event_type: EventType) -> usize {
        self.buckets
            .lock()
            .get(&event_type)
            .map(|bucket| {
                bucket.iter().filter(|known| known.strong_count() > 0).count()
            })
            .unwrap_or(0)
    }

    /// Drops every bucket.
    pub(crate) fn clear(&self) {
        self.buckets.lock().clear();
    }
}
