// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Rush Events
//!
//! An in-process publish/subscribe event engine. Producers submit immutable events
//! into a dispatcher; the dispatcher forwards each event to every actor that has a
//! listener for its concrete type; each actor delivers the event to those listeners
//! on its own worker task.
//!
//! ## Overview
//!
//! Events travel two hops:
//!
//! 1. A producer submits an event to the [`Dispatcher`], either queued (FIFO) or
//!    stacked (LIFO), at one of three [`Priority`] levels. Submission never blocks
//!    behind a drain in progress.
//! 2. The dispatcher task wakes up, drains its inbox and hands a reference to the
//!    event to every [`Receiver`] subscribed to the event type.
//! 3. Each [`Actor`] wakes up, drains its own inbox and invokes the listeners of the
//!    event type, filtered by their [`Interest`].
//!
//! An event is shared, not copied. Every holder owns one reference ([`EventRef`]),
//! and the payload is dropped when the last holder releases it.
//!
//! ## Draining order
//!
//! Within one drain pass stacks are visited before queues, each from
//! [`Priority::High`] down to [`Priority::Low`]. Queued events of one level keep
//! their submission order and stacked events of one level are visited newest first.
//! Events submitted while a buffer is being drained land in an alternate buffer and
//! are visited in the same pass or the next one.
//!
//! ## Getting started
//!
//! ```ignore
//! use events::{
//!     Actor, ActorConfig, Dispatcher, DispatcherConfig, Event, Listenable, Priority,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! struct Temperature(f32);
//!
//! impl Event for Temperature {}
//!
//! let token = CancellationToken::new();
//! let dispatcher = Dispatcher::spawn(DispatcherConfig::default(), token.clone())?;
//! let actor = Actor::spawn(&dispatcher, ActorConfig::new("thermostat"), token.clone())?;
//!
//! let handle = actor.listen::<Temperature, _>(|temperature, _, _| {
//!     println!("{} degrees", temperature.0);
//! });
//!
//! dispatcher.queue(Temperature(21.5), Priority::Normal);
//! ```
//!
//! Dropping `handle` removes the listener, and the actor stops receiving
//! `Temperature` events once it has no listener left for that type.
//!

mod actor;
mod config;
mod dispatcher;
mod error;
mod event;
mod inbox;
mod listener;
mod priority;
mod receiver;

//
// Workers
//

/// Terminal consumer of events, running its listeners on a dedicated task.
pub use actor::Actor;

/// Builder for actors with a per-cycle [`Routine`].
pub use actor::ActorBuilder;

/// Work performed by an actor once per cycle.
pub use actor::Routine;

/// Dispatch authority: buffers every submitted event and fans it out to receivers.
pub use dispatcher::Dispatcher;

//
// Configuration
//

pub use config::{ActorConfig, DispatcherConfig, LoopOrder};

//
// Error Handling
//

/// Error type for every fallible operation of the engine.
pub use error::Error;

//
// Events
//

/// Marker trait for event payloads.
pub use event::Event;

/// Shared reference to a submitted event.
pub use event::EventRef;

/// Runtime identity of a concrete event type.
pub use event::EventType;

pub use priority::{DispatchMethod, Priority};

//
// Listeners and receivers
//

pub use listener::{
    Callback, Interest, InterestKind, Listenable, ListenerHandle, ListenerHook,
    ListenerRegistry, Predicate,
};

/// Capability to accept events for later delivery.
pub use receiver::Receiver;
