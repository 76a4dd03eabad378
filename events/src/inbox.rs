// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Inbox
//!
//! Buffered holding area for events that have not been delivered yet. Both the
//! dispatcher and every actor own one.
//!
//! Each dispatch method has a primary and an alternate buffer set ("revolving door").
//! A drain pass locks one buffer at a time and keeps it locked while its events are
//! visited. A producer only ever *tries* the locks: primary first, then alternate,
//! spinning between rounds. A drain holds at most one buffer, so the other one is
//! only ever held for a single push by another producer. A producer is never parked
//! behind a drain, and a visitor that submits back into the same inbox from inside
//! the drain cannot deadlock.
//!

use crate::{
    event::EventRef,
    priority::{DispatchMethod, Priority},
};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::trace;

/// Per-priority event sequences. A level is only allocated on first use.
#[derive(Default)]
struct Buckets {
    levels: [Option<Vec<EventRef>>; Priority::COUNT],
}

impl Buckets {
    fn push(&mut self, priority: Priority, event: EventRef) {
        self.levels[priority.index()]
            .get_or_insert_with(Vec::new)
            .push(event);
    }

    /// Hands every buffered event to `visit`, highest priority first, and leaves
    /// the visited levels empty.
    fn drain<F>(&mut self, method: DispatchMethod, visit: &mut F) -> usize
    where
        F: FnMut(EventRef, DispatchMethod, Priority),
    {
        let mut visited = 0;
        for priority in Priority::DESCENDING {
            let Some(events) = self.levels[priority.index()].as_mut() else {
                continue;
            };
            visited += events.len();
            match method {
                DispatchMethod::Stack => {
                    for event in events.drain(..).rev() {
                        visit(event, method, priority);
                    }
                }
                DispatchMethod::Queue => {
                    for event in events.drain(..) {
                        visit(event, method, priority);
                    }
                }
            }
        }
        visited
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.levels.iter().flatten().map(Vec::len).sum()
    }
}

/// Primary and alternate buffer sets for one dispatch method.
#[derive(Default)]
struct DoubleBuffer {
    primary: Mutex<Buckets>,
    alternate: Mutex<Buckets>,
}

impl DoubleBuffer {
    fn insert(&self, priority: Priority, event: EventRef) {
        self.writable().push(priority, event);
    }

    /// First free buffer set, primary preferred.
    fn writable(&self) -> MutexGuard<'_, Buckets> {
        let mut rounds = 0u32;
        loop {
            if let Some(primary) = self.primary.try_lock() {
                return primary;
            }
            if let Some(alternate) = self.alternate.try_lock() {
                return alternate;
            }
            // Both held for a moment; a drain never holds both.
            rounds = rounds.saturating_add(1);
            if rounds < 16 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    fn drain<F>(&self, method: DispatchMethod, visit: &mut F) -> usize
    where
        F: FnMut(EventRef, DispatchMethod, Priority),
    {
        let visited = self.primary.lock().drain(method, visit);
        visited + self.alternate.lock().drain(method, visit)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.primary.lock().len() + self.alternate.lock().len()
    }
}

/// Double-buffered priority queue/stack engine with a wake signal.
#[derive(Default)]
pub(crate) struct Inbox {
    queues: DoubleBuffer,
    stacks: DoubleBuffer,
    wake: Notify,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Buffers `event`, which carries the reference owned by this inbox from now on.
    /// Stamps the dispatch time on first submission and wakes the drain task.
    pub(crate) fn submit(
        &self,
        event: EventRef,
        priority: Priority,
        method: DispatchMethod,
    ) {
        event.stamp();
        trace!(
            "Buffering {} event {} with {} priority.",
            method,
            event.event_type(),
            priority
        );
        self.buffers(method).insert(priority, event);
        self.wake.notify_one();
    }

    /// Visits every buffered event: stacks before queues, each from high to low
    /// priority, primary set before alternate set. Ownership of each event moves
    /// into `visit`, so the inbox reference is released when the visit returns.
    ///
    /// Returns the number of visited events.
    pub(crate) fn drain_all<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(EventRef, DispatchMethod, Priority),
    {
        DispatchMethod::DRAIN_ORDER
            .into_iter()
            .map(|method| self.buffers(method).drain(method, &mut visit))
            .sum()
    }

    /// Waits until something has been submitted since the last wake-up.
    ///
    /// Submissions that happen while nobody waits leave a single permit behind, so
    /// the next call returns immediately.
    pub(crate) async fn notified(&self) {
        self.wake.notified().await;
    }

    fn buffers(&self, method: DispatchMethod) -> &DoubleBuffer {
        match method {
            DispatchMethod::Stack => &self.stacks,
            DispatchMethod::Queue => &self.queues,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.queues.len() + self.stacks.len()
    }
}
