// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actors
//!
//! An [`Actor`] is the terminal consumer of events. It owns an inbox, a listener
//! registry and a worker task. The dispatcher forwards every event whose type has at
//! least one listener on the actor; the worker wakes up, drains the inbox and
//! delivers each event to the listeners of its type.
//!
//! The actor subscribes itself to the dispatcher when the first listener for a type
//! is registered, and unsubscribes when the last one for that type is removed.
//!
//! An optional [`Routine`] runs once per cycle, before or after the drain. With a
//! loop interval the worker also starts a cycle when the period elapses, even if no
//! event arrived.
//!

use crate::{
    Error,
    config::{ActorConfig, LoopOrder},
    dispatcher::Dispatcher,
    event::{EventRef, EventType},
    inbox::Inbox,
    listener::{
        Callback, Interest, Listenable, ListenerHandle, ListenerHook,
        ListenerRegistry,
    },
    priority::{DispatchMethod, Priority},
    receiver::Receiver,
};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    select,
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, trace};

use std::{
    fmt,
    panic::AssertUnwindSafe,
    sync::{Arc, Weak},
    time::Duration,
};

/// Work performed by an actor once per cycle.
#[async_trait]
pub trait Routine: Send + 'static {
    async fn on_loop(&mut self);
}

/// Builder for actors with a [`Routine`].
pub struct ActorBuilder {
    config: ActorConfig,
    routine: Option<Box<dyn Routine>>,
}

impl ActorBuilder {
    pub fn new(config: ActorConfig) -> Self {
        Self {
            config,
            routine: None,
        }
    }

    /// Sets the per-cycle routine.
    pub fn routine(mut self, routine: impl Routine) -> Self {
        self.routine = Some(Box::new(routine));
        self
    }

    /// Creates the actor and spawns its worker on the current tokio runtime. The
    /// worker runs until `token` is cancelled, [`Actor::shutdown`] is called or
    /// the last [`Actor`] handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration, `Error::AlreadyStopped`
    /// if `dispatcher` is no longer running and `Error::NoRuntime` outside of a
    /// tokio runtime.
    ///
    pub fn spawn(
        self,
        dispatcher: &Dispatcher,
        token: CancellationToken,
    ) -> Result<Actor, Error> {
        self.config.validate()?;
        if !dispatcher.is_running() {
            return Err(Error::AlreadyStopped(dispatcher.name().to_owned()));
        }
        let runtime = Handle::try_current()
            .map_err(|_| Error::NoRuntime(self.config.name.clone()))?;

        let name = self.config.name.clone();
        let token = token.child_token();
        let lifetime = Arc::new(token.clone().drop_guard());
        let inner = Arc::new_cyclic(|weak: &Weak<ActorInner>| {
            let receiver: Weak<dyn Receiver> = weak.clone();
            ActorInner {
                name,
                inbox: Inbox::new(),
                listeners: ListenerRegistry::with_hook(ReceiverLink {
                    dispatcher: dispatcher.clone(),
                    receiver,
                }),
                dispatcher: dispatcher.clone(),
                token,
                task: Mutex::new(None),
            }
        });

        let runner = ActorRunner {
            inner: inner.clone(),
            routine: self.routine,
            period: self.config.loop_interval(),
            order: self.config.loop_order,
        };
        *inner.task.lock() = Some(runtime.spawn(runner.run()));
        Ok(Actor {
            inner,
            _lifetime: lifetime,
        })
    }
}

/// Keeps the dispatcher subscriptions of an actor in line with its listeners.
struct ReceiverLink {
    dispatcher: Dispatcher,
    receiver: Weak<dyn Receiver>,
}

impl ListenerHook for ReceiverLink {
    fn on_listener_registered(&self, event_type: EventType) {
        self.dispatcher
            .register_receiver(event_type, self.receiver.clone());
    }

    fn on_listener_unregistered(&self, event_type: EventType, remaining: usize) {
        if remaining == 0 {
            self.dispatcher
                .unregister_receiver(event_type, &self.receiver);
        }
    }
}

struct ActorInner {
    name: String,
    inbox: Inbox,
    listeners: ListenerRegistry,
    dispatcher: Dispatcher,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ActorInner {
    fn accept(&self, event: EventRef, priority: Priority, method: DispatchMethod) {
        if self.token.is_cancelled() {
            trace!(
                "Event thread {} is stopped, releasing {} event.",
                self.name,
                event.event_type()
            );
            return;
        }
        self.inbox.submit(event, priority, method);
    }

    /// Delivers every buffered event to the listeners of its type.
    fn process_events(&self) -> usize {
        self.inbox.drain_all(|event, method, priority| {
            self.listeners.process(event, method, priority);
        })
    }
}

impl Receiver for ActorInner {
    fn queue_event(&self, event: EventRef, priority: Priority) {
        self.accept(event, priority, DispatchMethod::Queue);
    }

    fn stack_event(&self, event: EventRef, priority: Priority) {
        self.accept(event, priority, DispatchMethod::Stack);
    }
}

/// Worker loop of an actor.
struct ActorRunner {
    inner: Arc<ActorInner>,
    routine: Option<Box<dyn Routine>>,
    period: Option<Duration>,
    order: LoopOrder,
}

impl ActorRunner {
    async fn run(mut self) {
        debug!("Running event thread {}.", self.inner.name);
        // A period too long to be scheduled never ticks.
        let mut ticker = match (&self.routine, self.period) {
            (Some(_), Some(period)) => {
                Instant::now().checked_add(period).map(|start| {
                    let mut ticker = interval_at(start, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker
                })
            }
            _ => None,
        };

        loop {
            select! {
                _ = self.inner.token.cancelled() => break,
                _ = self.inner.inbox.notified() => {}
                _ = next_tick(&mut ticker) => {}
            }
            self.cycle().await;
        }

        let weak: Weak<ActorInner> = Arc::downgrade(&self.inner);
        let receiver: Weak<dyn Receiver> = weak;
        self.inner.dispatcher.forget_receiver(&receiver);
        let discarded = self.inner.inbox.drain_all(|_, _, _| {});
        debug!(
            "Event thread {} stopped, {} undelivered events released.",
            self.inner.name, discarded
        );
    }

    async fn cycle(&mut self) {
        if self.order == LoopOrder::BeforeEvents {
            self.run_routine().await;
        }
        let processed = self.inner.process_events();
        trace!("Event thread {} processed {} events.", self.inner.name, processed);
        if self.order == LoopOrder::AfterEvents {
            self.run_routine().await;
        }
    }

    async fn run_routine(&mut self) {
        let Some(routine) = self.routine.as_mut() else {
            return;
        };
        if AssertUnwindSafe(routine.on_loop())
            .catch_unwind()
            .await
            .is_err()
        {
            error!("Routine of event thread {} panicked.", self.inner.name);
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Handle to a running actor. Cloning is cheap; all clones drive the same worker.
///
/// The worker stops when the last handle is dropped. A listener callback that
/// captures a handle of its own actor keeps it alive; such an actor is stopped
/// through its token or [`Actor::shutdown`].
#[derive(Clone)]
pub struct Actor {
    inner: Arc<ActorInner>,
    _lifetime: Arc<DropGuard>,
}

impl Actor {
    /// Spawns an actor without a routine. See [`ActorBuilder::spawn`].
    pub fn spawn(
        dispatcher: &Dispatcher,
        config: ActorConfig,
        token: CancellationToken,
    ) -> Result<Self, Error> {
        ActorBuilder::new(config).spawn(dispatcher, token)
    }

    pub fn builder(config: ActorConfig) -> ActorBuilder {
        ActorBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True until the worker has been stopped.
    pub fn is_running(&self) -> bool {
        !self.inner.token.is_cancelled()
    }

    /// Number of listeners registered for `event_type`.
    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.inner.listeners.listener_count(event_type)
    }

    /// Stops the worker and waits for it to finish. The actor is removed from the
    /// dispatcher and events still buffered are released without being delivered.
    ///
    /// # Errors
    ///
    /// Returns `Error::Join` if the worker ended abnormally.
    ///
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.inner.token.cancel();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            task.await
                .map_err(|e| Error::Join(self.inner.name.clone(), e.to_string()))?;
        }
        Ok(())
    }
}

impl Receiver for Actor {
    fn queue_event(&self, event: EventRef, priority: Priority) {
        self.inner.queue_event(event, priority);
    }

    fn stack_event(&self, event: EventRef, priority: Priority) {
        self.inner.stack_event(event, priority);
    }
}

impl Listenable for Actor {
    fn register_listener(
        &self,
        event_type: EventType,
        callback: Callback,
        interest: Interest,
    ) -> ListenerHandle {
        self.inner
            .listeners
            .register_listener(event_type, callback, interest)
    }

    fn unregister_listener(
        &self,
        event_type: EventType,
        handle: &ListenerHandle,
    ) -> bool {
        self.inner.listeners.unregister_listener(event_type, handle)
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.inner.name)
            .field("running", &self.is_running())
            .finish()
    }
}
