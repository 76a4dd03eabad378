// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Event dispatcher
//!
//! The dispatcher is the mandatory first hop of every submitted event. It owns an
//! [`Inbox`] and a table of downstream receivers, and runs a dedicated task that
//! sleeps until something is submitted. On every wake-up the task drains the whole
//! inbox and fans each event out to the receivers subscribed to its concrete type.
//!
//! A dispatcher is created explicitly and handed to every actor that should receive
//! events through it. For applications that prefer a process-wide instance,
//! [`Dispatcher::install_global`] and [`Dispatcher::global`] provide a single,
//! initialize-once dispatcher.
//!

use crate::{
    Error,
    config::DispatcherConfig,
    event::{Event, EventRef, EventType},
    inbox::Inbox,
    priority::{DispatchMethod, Priority},
    receiver::{Receiver, ReceiverRegistry},
};

use parking_lot::Mutex;
use tokio::{runtime::Handle, select, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use std::{
    fmt,
    sync::{Arc, OnceLock, Weak},
};

static GLOBAL: OnceLock<Dispatcher> = OnceLock::new();

/// Handle to a running dispatcher. Cloning is cheap; all clones drive the same task.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    name: String,
    inbox: Inbox,
    receivers: ReceiverRegistry,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DispatcherInner {
    /// Drains the inbox once, fanning every event out to its receivers.
    fn dispatch_events(&self) -> usize {
        self.inbox.drain_all(|event, method, priority| {
            self.receivers.fan_out(event, method, priority);
        })
    }
}

/// Dispatch loop of a dispatcher.
struct DispatchRunner {
    inner: Arc<DispatcherInner>,
}

impl DispatchRunner {
    async fn run(self) {
        debug!("Running event dispatcher {}.", self.inner.name);
        loop {
            select! {
                _ = self.inner.token.cancelled() => break,
                _ = self.inner.inbox.notified() => {
                    let dispatched = self.inner.dispatch_events();
                    trace!(
                        "Dispatcher {} fanned out {} events.",
                        self.inner.name,
                        dispatched
                    );
                }
            }
        }
        let discarded = self.inner.inbox.drain_all(|_, _, _| {});
        debug!(
            "Event dispatcher {} stopped, {} undelivered events released.",
            self.inner.name, discarded
        );
    }
}

impl Dispatcher {
    /// Creates a dispatcher and spawns its task on the current tokio runtime. The
    /// task runs until `token` is cancelled or [`Dispatcher::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration and `Error::NoRuntime`
    /// when called outside of a tokio runtime.
    ///
    pub fn spawn(
        config: DispatcherConfig,
        token: CancellationToken,
    ) -> Result<Self, Error> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|_| Error::NoRuntime(config.name.clone()))?;

        let inner = Arc::new(DispatcherInner {
            name: config.name,
            inbox: Inbox::new(),
            receivers: ReceiverRegistry::new(),
            token,
            task: Mutex::new(None),
        });
        let runner = DispatchRunner {
            inner: inner.clone(),
        };
        *inner.task.lock() = Some(runtime.spawn(runner.run()));
        Ok(Self { inner })
    }

    /// Installs `dispatcher` as the process-wide instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::GlobalAlreadySet` if a global dispatcher already exists.
    ///
    pub fn install_global(dispatcher: Dispatcher) -> Result<(), Error> {
        GLOBAL.set(dispatcher).map_err(|_| Error::GlobalAlreadySet)
    }

    /// Process-wide dispatcher. The first access spawns a default dispatcher on the
    /// current runtime unless one has been installed.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoRuntime` if the dispatcher has to be created outside of a
    /// tokio runtime.
    ///
    pub fn global() -> Result<Dispatcher, Error> {
        if let Some(dispatcher) = GLOBAL.get() {
            return Ok(dispatcher.clone());
        }
        let candidate =
            Dispatcher::spawn(DispatcherConfig::default(), CancellationToken::new())?;
        let installed = GLOBAL.get_or_init(|| candidate.clone());
        if !installed.ptr_eq(&candidate) {
            // Lost the race against another thread.
            candidate.inner.token.cancel();
        }
        Ok(installed.clone())
    }

    /// Wraps `event` and submits it for FIFO delivery.
    pub fn queue<E: Event>(&self, event: E, priority: Priority) -> EventRef {
        let event = EventRef::new(event);
        event.queue(self, priority);
        event
    }

    /// Wraps `event` and submits it for LIFO delivery.
    pub fn stack<E: Event>(&self, event: E, priority: Priority) -> EventRef {
        let event = EventRef::new(event);
        event.stack(self, priority);
        event
    }

    /// Buffers `event` in the dispatcher inbox. Never blocks.
    pub(crate) fn submit(
        &self,
        event: EventRef,
        priority: Priority,
        method: DispatchMethod,
    ) {
        if self.inner.token.is_cancelled() {
            warn!(
                "Dispatcher {} is stopped, dropping {} event.",
                self.inner.name,
                event.event_type()
            );
            return;
        }
        self.inner.inbox.submit(event, priority, method);
    }

    /// Subscribes `receiver` to events of `event_type`. Returns `false` if it was
    /// already subscribed.
    pub fn register_receiver(
        &self,
        event_type: EventType,
        receiver: Weak<dyn Receiver>,
    ) -> bool {
        self.inner.receivers.register(event_type, receiver)
    }

    /// Unsubscribes `receiver` from events of `event_type`.
    pub fn unregister_receiver(
        &self,
        event_type: EventType,
        receiver: &Weak<dyn Receiver>,
    ) -> bool {
        self.inner.receivers.unregister(event_type, receiver)
    }

    /// Unsubscribes `receiver` from every event type.
    pub(crate) fn forget_receiver(&self, receiver: &Weak<dyn Receiver>) {
        self.inner.receivers.unregister_all(receiver);
    }

    /// Number of live receivers subscribed to `event_type`.
    pub fn receiver_count(&self, event_type: EventType) -> usize {
        self.inner.receivers.count(event_type)
    }

    /// Drops every receiver subscription.
    pub fn clear_receivers(&self) {
        self.inner.receivers.clear();
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True until the dispatcher has been stopped.
    pub fn is_running(&self) -> bool {
        !self.inner.token.is_cancelled()
    }

    /// True if both handles drive the same dispatcher.
    pub fn ptr_eq(&self, other: &Dispatcher) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stops the dispatch task and waits for it to finish. Events still buffered
    /// are released without being delivered. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Error::Join` if the dispatch task ended abnormally.
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

/// A dispatcher can itself be a downstream receiver of another dispatcher.
impl Receiver for Dispatcher {
    fn queue_event(&self, event: EventRef, priority: Priority) {
        self.submit(event, priority, DispatchMethod::Queue);
    }

    fn stack_event(&self, event: EventRef, priority: Priority) {
        self.submit(event, priority, DispatchMethod::Stack);
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.inner.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tracing_test::traced_test;

    #[derive(Debug)]
    struct Reading(u32);

    impl Event for Reading {}

    #[derive(Debug)]
    struct Dropped(Arc<AtomicUsize>);

    impl Event for Dropped {}

    impl Drop for Dropped {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(EventRef, DispatchMethod, Priority)>>,
    }

    impl Receiver for Recorder {
        fn queue_event(&self, event: EventRef, priority: Priority) {
            self.seen.lock().push((event, DispatchMethod::Queue, priority));
        }

        fn stack_event(&self, event: EventRef, priority: Priority) {
            self.seen.lock().push((event, DispatchMethod::Stack, priority));
        }
    }

    async fn eventually<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::spawn(DispatcherConfig::default(), CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn test_spawn_requires_runtime() {
        let result =
            Dispatcher::spawn(DispatcherConfig::default(), CancellationToken::new());
        assert_eq!(
            result.unwrap_err(),
            Error::NoRuntime("event-manager".to_owned())
        );
    }

    #[tokio::test]
    async fn test_spawn_validates_config() {
        let result =
            Dispatcher::spawn(DispatcherConfig::new(""), CancellationToken::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_fan_out_to_receiver() {
        let dispatcher = dispatcher();
        let recorder = Arc::new(Recorder::default());
        let receiver: Arc<dyn Receiver> = recorder.clone();
        let weak = Arc::downgrade(&receiver);
        assert!(dispatcher.register_receiver(EventType::of::<Reading>(), weak.clone()));
        assert!(!dispatcher.register_receiver(EventType::of::<Reading>(), weak.clone()));
        assert_eq!(dispatcher.receiver_count(EventType::of::<Reading>()), 1);

        let event = dispatcher.stack(Reading(4), Priority::High);
        assert!(event.dispatch_time().is_some());
        eventually(|| recorder.seen.lock().len() == 1).await;
        {
            let seen = recorder.seen.lock();
            assert!(EventRef::ptr_eq(&seen[0].0, &event));
            assert_eq!(seen[0].1, DispatchMethod::Stack);
            assert_eq!(seen[0].2, Priority::High);
        }

        assert!(dispatcher.unregister_receiver(EventType::of::<Reading>(), &weak));
        dispatcher.queue(Reading(5), Priority::Normal);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.seen.lock().len(), 1);
        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unhandled_event_is_released() {
        let dispatcher = dispatcher();
        let drops = Arc::new(AtomicUsize::new(0));
        dispatcher.queue(Dropped(drops.clone()), Priority::Low);
        eventually(|| drops.load(Ordering::SeqCst) == 1).await;
        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_receivers() {
        let dispatcher = dispatcher();
        let recorder = Arc::new(Recorder::default());
        let receiver: Arc<dyn Receiver> = recorder;
        dispatcher.register_receiver(EventType::of::<Reading>(), Arc::downgrade(&receiver));
        dispatcher.clear_receivers();
        assert_eq!(dispatcher.receiver_count(EventType::of::<Reading>()), 0);
    }

    #[tokio::test]
    async fn test_chained_dispatchers() {
        let upstream = dispatcher();
        let downstream = Arc::new(dispatcher());
        let recorder = Arc::new(Recorder::default());
        let receiver: Arc<dyn Receiver> = recorder.clone();
        downstream.register_receiver(EventType::of::<Reading>(), Arc::downgrade(&receiver));
        let next_hop: Arc<dyn Receiver> = downstream.clone();
        upstream.register_receiver(EventType::of::<Reading>(), Arc::downgrade(&next_hop));

        upstream.queue(Reading(1), Priority::Normal);
        eventually(|| recorder.seen.lock().len() == 1).await;
        upstream.shutdown().await.unwrap();
        downstream.shutdown().await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_shutdown() {
        let token = CancellationToken::new();
        let dispatcher =
            Dispatcher::spawn(DispatcherConfig::new("manager"), token.clone()).unwrap();
        assert!(dispatcher.is_running());
        assert_eq!(dispatcher.name(), "manager");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(logs_contain("Running event dispatcher manager."));

        dispatcher.shutdown().await.unwrap();
        assert!(!dispatcher.is_running());
        assert!(token.is_cancelled());
        assert!(logs_contain("Event dispatcher manager stopped"));
        // Idempotent.
        dispatcher.shutdown().await.unwrap();

        let drops = Arc::new(AtomicUsize::new(0));
        dispatcher.queue(Dropped(drops.clone()), Priority::High);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(logs_contain("is stopped, dropping"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_dispatcher() {
        let token = CancellationToken::new();
        let dispatcher =
            Dispatcher::spawn(DispatcherConfig::default(), token.clone()).unwrap();
        token.cancel();
        assert!(!dispatcher.is_running());
        dispatcher.shutdown().await.unwrap();
    }
}
