// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Listeners
//!
//! A [`ListenerRegistry`] maps concrete event types to the callbacks interested in
//! them. Every registration is represented by a [`ListenerHandle`] owned by whoever
//! registered it; dropping the handle unregisters the callback.
//!
//! Registration and unregistration take the registry's write lock. Processing an
//! event takes the read lock only to snapshot the matching registrations, so a
//! callback is free to (un)register listeners, including on the registry that is
//! currently invoking it. A registration that is revoked before its turn in a
//! snapshot is skipped.
//!
//! Unregistering waits for invocations of that listener running on other threads,
//! so once it returns the callback is never entered again. A callback revoking
//! its own registration does not wait for itself.
//!
//! Callbacks and custom interest predicates are isolated: a panic is logged and the
//! remaining listeners for the event still run.
//!

use crate::event::{Event, EventRef, EventType};
use crate::priority::{DispatchMethod, Priority};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Listener callback.
pub type Callback = Arc<dyn Fn(&EventRef, DispatchMethod, Priority) + Send + Sync>;

/// Custom interest predicate.
pub type Predicate = Arc<dyn Fn(&EventRef) -> bool + Send + Sync>;

/// Decides whether a listener is invoked for a given event.
#[derive(Clone, Default)]
pub enum Interest {
    /// Every event of the registered type.
    #[default]
    All,
    /// Events whose time since dispatch is strictly below the given age.
    YoungerThan(Duration),
    /// Events accepted by the predicate.
    Custom(Predicate),
}

impl Interest {
    /// Builds a [`Interest::Custom`] from a closure.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&EventRef) -> bool + Send + Sync + 'static,
    {
        Interest::Custom(Arc::new(predicate))
    }

    pub fn kind(&self) -> InterestKind {
        match self {
            Interest::All => InterestKind::All,
            Interest::YoungerThan(_) => InterestKind::YoungerThan,
            Interest::Custom(_) => InterestKind::Custom,
        }
    }

    fn admits(&self, event: &EventRef) -> bool {
        match self {
            Interest::All => true,
            Interest::YoungerThan(max_age) => event.time_since_dispatch() < *max_age,
            Interest::Custom(predicate) => {
                match panic::catch_unwind(AssertUnwindSafe(|| predicate(event))) {
                    Ok(interested) => interested,
                    Err(_) => {
                        error!(
                            "Interest predicate for {} panicked, skipping listener.",
                            event.event_type()
                        );
                        false
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interest::All => write!(f, "All"),
            Interest::YoungerThan(max_age) => {
                f.debug_tuple("YoungerThan").field(max_age).finish()
            }
            Interest::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Data-less discriminant of [`Interest`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum InterestKind {
    #[default]
    All,
    YoungerThan,
    Custom,
}

impl InterestKind {
    const ALL: [InterestKind; 3] =
        [InterestKind::All, InterestKind::YoungerThan, InterestKind::Custom];

    /// Next kind, wrapping around.
    pub fn next(self) -> Self {
        Self::ALL[(self as usize + 1) % Self::ALL.len()]
    }

    /// Previous kind, wrapping around.
    pub fn previous(self) -> Self {
        Self::ALL[(self as usize + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

/// Extension points invoked while the registry's write lock is held.
pub trait ListenerHook: Send + Sync {
    /// A listener for `event_type` has been added.
    fn on_listener_registered(&self, event_type: EventType);

    /// A listener for `event_type` has been removed; `remaining` listeners are left.
    fn on_listener_unregistered(&self, event_type: EventType, remaining: usize);
}

thread_local! {
    /// Registrations whose callback is running on this thread.
    static FIRING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a registration as firing on the current thread while alive.
struct FiringGuard(usize);

impl FiringGuard {
    fn enter(state: &Arc<HandleState>) -> Self {
        let key = Arc::as_ptr(state) as usize;
        FIRING.with(|firing| firing.borrow_mut().push(key));
        Self(key)
    }
}

impl Drop for FiringGuard {
    fn drop(&mut self) {
        FIRING.with(|firing| {
            let mut firing = firing.borrow_mut();
            if let Some(index) = firing.iter().rposition(|key| *key == self.0) {
                firing.remove(index);
            }
        });
    }
}

/// Shared registration state, referenced by the handle and by the registry entry.
struct HandleState {
    event_type: EventType,
    registered: AtomicBool,
    registry: Mutex<Option<Weak<RegistryShared>>>,
    /// Held shared for the whole check-and-invoke of a callback.
    gate: RwLock<()>,
}

impl HandleState {
    fn new(event_type: EventType, registry: Weak<RegistryShared>) -> Self {
        Self {
            event_type,
            registered: AtomicBool::new(true),
            registry: Mutex::new(Some(registry)),
            gate: RwLock::new(()),
        }
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Blocks until no other thread is inside this listener. Must be called
    /// after the registration has been revoked and without registry locks held.
    fn wait_idle(&self) {
        let key = self as *const HandleState as usize;
        if FIRING.with(|firing| firing.borrow().contains(&key)) {
            return;
        }
        drop(self.gate.write());
    }

    /// Marks the registration revoked and severs the link to the registry.
    fn force_unregister(&self) {
        self.registered.store(false, Ordering::Release);
        *self.registry.lock() = None;
    }
}

/// Revocable token for one listener registration.
///
/// The handle is owned by the registering party. Dropping it unregisters the listener;
/// [`ListenerHandle::unregister`] does the same explicitly and is idempotent. Both are
/// no-ops once the registry itself is gone.
pub struct ListenerHandle {
    state: Arc<HandleState>,
}

impl ListenerHandle {
    /// Event type this handle was registered for.
    pub fn event_type(&self) -> EventType {
        self.state.event_type
    }

    /// True while the listener is reachable from its registry.
    pub fn is_registered(&self) -> bool {
        self.state.is_registered()
    }

    /// Revokes the registration. Returns once no invocation of the listener is
    /// running on another thread.
    pub fn unregister(&self) {
        if self.state.is_registered() {
            let registry =
                self.state.registry.lock().as_ref().and_then(Weak::upgrade);
            match registry {
                Some(registry) => {
                    if !registry.unregister(self.state.event_type, &self.state) {
                        self.state.force_unregister();
                    }
                }
                None => self.state.force_unregister(),
            }
        }
        self.state.wait_idle();
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("event_type", &self.state.event_type)
            .field("registered", &self.is_registered())
            .finish()
    }
}

struct Registration {
    state: Arc<HandleState>,
    callback: Callback,
    interest: Interest,
}

impl Registration {
    /// Applies the interest policy and invokes the callback. Returns whether the
    /// callback was invoked.
    fn fire(
        &self,
        event: &EventRef,
        method: DispatchMethod,
        priority: Priority,
    ) -> bool {
        let _firing = FiringGuard::enter(&self.state);
        // Recursive, so a callback re-entering `process` cannot queue behind a
        // waiting writer.
        let _gate = self.state.gate.read_recursive();
        if !self.state.is_registered() || !self.interest.admits(event) {
            return false;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.callback)(event, method, priority)
        }));
        if result.is_err() {
            error!(
                "Listener for {} panicked, continuing with remaining listeners.",
                event.event_type()
            );
        }
        true
    }
}

type Buckets = HashMap<EventType, Vec<Arc<Registration>>>;

struct RegistryShared {
    buckets: RwLock<Buckets>,
    hook: Option<Box<dyn ListenerHook>>,
}

impl RegistryShared {
    fn unregister(&self, event_type: EventType, state: &Arc<HandleState>) -> bool {
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.get_mut(&event_type) else {
            return false;
        };
        let Some(index) = bucket
            .iter()
            .position(|registration| Arc::ptr_eq(&registration.state, state))
        else {
            return false;
        };
        let registration = bucket.remove(index);
        registration.state.force_unregister();
        let remaining = bucket.len();
        if remaining == 0 {
            buckets.remove(&event_type);
        }
        if let Some(hook) = &self.hook {
            hook.on_listener_unregistered(event_type, remaining);
        }
        drop(buckets);
        debug!("Listener unregistered from {}.", event_type);
        registration.state.wait_idle();
        // The callback may own handles of its own; drop it outside the lock.
        drop(registration);
        true
    }
}

impl Drop for RegistryShared {
    fn drop(&mut self) {
        for bucket in self.buckets.get_mut().values() {
            for registration in bucket {
                registration.state.force_unregister();
            }
        }
    }
}

/// Registration side of anything that accepts listeners.
///
/// The typed helpers key the registration by the static type `E` and hand the
/// callback an already downcast `&E`.
pub trait Listenable {
    /// Registers `callback` for events of `event_type`, filtered by `interest`.
    fn register_listener(
        &self,
        event_type: EventType,
        callback: Callback,
        interest: Interest,
    ) -> ListenerHandle;

    /// Revokes `handle` if it belongs to `event_type` on this registry.
    fn unregister_listener(&self, event_type: EventType, handle: &ListenerHandle) -> bool;

    /// Registers a typed callback for every `E`.
    fn listen<E, F>(&self, callback: F) -> ListenerHandle
    where
        Self: Sized,
        E: Event,
        F: Fn(&E, DispatchMethod, Priority) + Send + Sync + 'static,
    {
        self.listen_with::<E, F>(callback, Interest::All)
    }

    /// Registers a typed callback for the `E` events admitted by `interest`.
    fn listen_with<E, F>(&self, callback: F, interest: Interest) -> ListenerHandle
    where
        Self: Sized,
        E: Event,
        F: Fn(&E, DispatchMethod, Priority) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(
            move |event: &EventRef, method: DispatchMethod, priority: Priority| {
                if let Some(event) = event.downcast_ref::<E>() {
                    callback(event, method, priority);
                }
            },
        );
        self.register_listener(EventType::of::<E>(), callback, interest)
    }

    /// Revokes a handle registered for `E`.
    fn unregister<E: Event>(&self, handle: &ListenerHandle) -> bool
    where
        Self: Sized,
    {
        self.unregister_listener(EventType::of::<E>(), handle)
    }
}

/// Type indexed table of listener callbacks.
pub struct ListenerRegistry {
    shared: Arc<RegistryShared>,
}

impl ListenerRegistry {
    /// Creates a standalone registry.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a registry that reports (un)registrations to `hook`.
    pub fn with_hook(hook: impl ListenerHook + 'static) -> Self {
        Self::build(Some(Box::new(hook)))
    }

    fn build(hook: Option<Box<dyn ListenerHook>>) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                buckets: RwLock::new(HashMap::new()),
                hook,
            }),
        }
    }

    /// Delivers `event` to every interested listener of its concrete type, in
    /// registration order, and then releases it.
    ///
    /// Returns the number of callbacks invoked.
    pub fn process(
        &self,
        event: EventRef,
        method: DispatchMethod,
        priority: Priority,
    ) -> usize {
        let listeners = {
            let buckets = self.shared.buckets.read();
            match buckets.get(&event.event_type()) {
                Some(bucket) => bucket.clone(),
                None => {
                    trace!("No listener for {} event.", event.event_type());
                    return 0;
                }
            }
        };
        let mut invoked = 0;
        for registration in &listeners {
            if registration.fire(&event, method, priority) {
                invoked += 1;
            }
        }
        invoked
    }

    /// Number of listeners registered for `event_type`.
    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.shared
            .buckets
            .read()
            .get(&event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.shared.buckets.read().is_empty()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Listenable for ListenerRegistry {
    fn register_listener(
        &self,
        event_type: EventType,
        callback: Callback,
        interest: Interest,
    ) -> ListenerHandle {
        let state = Arc::new(HandleState::new(
            event_type,
            Arc::downgrade(&self.shared),
        ));
        let registration = Arc::new(Registration {
            state: state.clone(),
            callback,
            interest,
        });

        let mut buckets = self.shared.buckets.write();
        buckets.entry(event_type).or_default().push(registration);
        if let Some(hook) = &self.shared.hook {
            hook.on_listener_registered(event_type);
        }
        debug!("Listener registered for {}.", event_type);
        ListenerHandle { state }
    }

    fn unregister_listener(&self, event_type: EventType, handle: &ListenerHandle) -> bool {
        self.shared.unregister(event_type, &handle.state)
    }
}
