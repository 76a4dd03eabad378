// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Facade of the Rush event engine.
//! Re-exports the dispatcher, the actors and the event types of the `events` crate.

pub use events::{
    Actor, ActorBuilder, ActorConfig, Callback, DispatchMethod, Dispatcher,
    DispatcherConfig, Error as EventsError, Event, EventRef, EventType, Interest,
    InterestKind, Listenable, ListenerHandle, ListenerHook, ListenerRegistry,
    LoopOrder, Predicate, Priority, Receiver, Routine,
};
