use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::{
    collections::{hash_map::Entry, HashMap, HashSet, VecDeque},
    sync::atomic::{AtomicBool, Ordering},
    thread::{self, ThreadId},
    time::Duration,
};
use tracing::{debug, debug_span, info, trace, warn};

use crate::{
    any::Instance,
    cache::{Cache, EarlyFactory, RegisterCallback},
    dependency::DependencyEdges,
    errors::{RegistryErrorKind, SUPPRESSED_ERRORS_LIMIT},
    finalizer::Disposable,
};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Default)]
struct CreationState {
    /// Names in creation and the thread creating each of them
    owners: HashMap<String, ThreadId>,
    /// Threads waiting for another thread to finish a creation
    waiting: HashMap<ThreadId, String>,
    /// Names exempted from the in-creation check
    exclusions: HashSet<String>,
}

impl CreationState {
    /// Follows the wait-for chain starting at the owner of `name`.
    /// Waiting on `name` deadlocks if the chain leads back to `current`.
    fn would_deadlock(&self, current: ThreadId, name: &str) -> bool {
        let mut seen = HashSet::new();
        let mut target = name;
        while seen.insert(target) {
            let Some(owner) = self.owners.get(target) else {
                return false;
            };
            if *owner == current {
                return true;
            }
            match self.waiting.get(owner) {
                Some(next) => target = next,
                None => return false,
            }
        }
        true
    }
}

enum Entered {
    Tracked,
    Exempt,
    Appeared(Instance),
}

/// Creation lock held by the current thread, recorded as the lock holder until dropped.
///
/// Threads that find the lock taken by a recorded holder create their own names
/// without it instead of blocking.
struct HeldLock<'a> {
    registry: &'a Registry,
    previous_holder: Option<ThreadId>,
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        *self.registry.creation_thread.lock() = self.previous_holder;
    }
}

/// Marks a name as in creation until dropped, so a panicking factory
/// doesn't leave waiters blocked forever.
struct CreationGuard<'a> {
    registry: &'a Registry,
    name: &'a str,
    tracked: bool,
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        if self.tracked {
            let mut state = self.registry.creation.lock();
            state.owners.remove(self.name);
            self.registry.creation_finished.notify_all();
        }
    }
}

/// Tiered registry of shared instances.
///
/// Finished instances are read without taking the creation lock. First
/// creation of a name happens under a reentrant creation lock; a thread that
/// can't take it because another thread is busy creating a different name
/// proceeds without it. Creation of the same name from two threads is
/// serialized: the second thread waits and reuses the first one's result.
#[derive(Default)]
pub struct Registry {
    cache: RwLock<Cache>,
    lock: ReentrantMutex<()>,
    creation_thread: Mutex<Option<ThreadId>>,
    creation: Mutex<CreationState>,
    creation_finished: Condvar,
    in_destruction: AtomicBool,
    suppressed: Mutex<HashMap<ThreadId, VecDeque<anyhow::Error>>>,
    disposables: Mutex<IndexMap<String, Disposable>>,
    edges: DependencyEdges,
}

impl Registry {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a finished instance under the given name.
    ///
    /// # Errors
    /// Returns [`RegistryErrorKind::Conflict`] if an instance is already bound to the name
    pub fn register_singleton(&self, name: &str, instance: Instance) -> Result<(), RegistryErrorKind> {
        let _guard = self.lock.lock();
        self.add_singleton(name, instance)
    }

    fn add_singleton(&self, name: &str, instance: Instance) -> Result<(), RegistryErrorKind> {
        let callback = self.cache.write().insert_finished(name, instance.clone())?;
        debug!(name, "Registered as finished");
        if let Some(callback) = callback {
            callback(&instance);
        }
        Ok(())
    }

    /// Registers a callback producing the early reference of `name`, used to resolve circular references.
    /// Ignored if the name is already finished.
    pub fn add_singleton_factory(&self, name: &str, factory: impl FnOnce() -> Instance + Send + Sync + 'static) -> bool {
        let factory: EarlyFactory = Box::new(factory);
        self.cache.write().insert_factory(name, factory)
    }

    /// Registers a callback called once with the instance when `name` gets finished.
    pub fn add_singleton_callback(&self, name: &str, callback: impl FnOnce(&Instance) + Send + Sync + 'static) {
        let callback: RegisterCallback = Box::new(callback);
        self.cache.write().insert_callback(name, callback);
    }

    /// Returns the finished instance of `name`, or its early reference if `name` is in creation.
    ///
    /// With `allow_early`, a registered early factory is consumed to produce the reference.
    /// This only happens on the thread holding the creation lock or on the thread creating `name`.
    #[must_use]
    pub fn get_singleton(&self, name: &str, allow_early: bool) -> Option<Instance> {
        if let Some(instance) = self.cache.read().get_finished(name) {
            return Some(instance);
        }
        if !self.is_singleton_currently_in_creation(name) {
            return None;
        }
        if let Some(instance) = self.cache.read().get_early(name) {
            return Some(instance);
        }
        if !allow_early {
            return None;
        }

        let guard = self.lock.try_lock();
        if guard.is_none() && !self.is_created_by_current_thread(name) {
            trace!(name, "Early reference not available outside of the creating thread");
            return None;
        }

        let factory = {
            let mut cache = self.cache.write();
            if let Some(instance) = cache.get_finished(name).or_else(|| cache.get_early(name)) {
                return Some(instance);
            }
            cache.take_factory(name)?
        };
        let instance = factory();
        debug!(name, "Early reference exposed");

        Some(self.cache.write().insert_early(name, instance))
    }

    /// Returns the early reference of `name` if it's in creation, producing it from the registered factory if needed.
    #[inline]
    #[must_use]
    pub fn get_early_reference(&self, name: &str) -> Option<Instance> {
        self.get_singleton(name, true)
    }

    /// Returns the finished instance of `name`, creating it with `factory` if absent.
    ///
    /// # Errors
    /// - Returns [`RegistryErrorKind::CreationNotAllowed`] if the registry is in destruction
    /// - Returns [`RegistryErrorKind::CurrentlyInCreation`] if `name` is already in creation on this thread,
    ///   or waiting for another thread would deadlock
    /// - Returns [`RegistryErrorKind::Creation`] if `factory` fails
    /// - Returns [`RegistryErrorKind::Conflict`] if `factory` registered `name` itself
    pub fn get_or_create<F>(&self, name: &str, factory: F) -> Result<Instance, RegistryErrorKind>
    where
        F: FnOnce() -> Result<Instance, anyhow::Error>,
    {
        if let Some(instance) = self.cache.read().get_finished(name) {
            return Ok(instance);
        }

        let span = debug_span!("get_or_create", name);
        let _span = span.enter();

        let current = thread::current().id();
        let _held = self.acquire_creation_lock(current);

        if let Some(instance) = self.cache.read().get_finished(name) {
            return Ok(instance);
        }
        if self.in_destruction.load(Ordering::Acquire) {
            return Err(RegistryErrorKind::CreationNotAllowed { name: name.to_owned() });
        }

        let tracked = match self.before_creation(name, current)? {
            Entered::Appeared(instance) => {
                debug!("Created by another thread in the meantime");
                return Ok(instance);
            }
            Entered::Tracked => true,
            Entered::Exempt => false,
        };
        let creation_guard = CreationGuard {
            registry: self,
            name,
            tracked,
        };
        let record_suppressed = self.start_recording_suppressed(current);

        debug!("Creating shared instance");
        let result = factory();

        let suppressed = if record_suppressed { self.suppressed.lock().remove(&current) } else { None };
        let outcome = match result {
            Ok(instance) => self.add_singleton(name, instance.clone()).map(|()| instance),
            Err(err) => {
                debug!(%err, "Creation failed");
                Err(RegistryErrorKind::creation(name, err, suppressed))
            }
        };
        drop(creation_guard);

        outcome
    }

    /// Takes the creation lock, or returns `None` if another thread holds it while creating other names.
    ///
    /// The holder is recorded under the `creation_thread` lock together with taking the creation lock,
    /// so a thread that finds the lock taken by a creation also finds its holder. A thread never blocks
    /// on a lock held by a creation: the holder may be waiting for a name this thread is creating.
    fn acquire_creation_lock(&self, current: ThreadId) -> Option<HeldLock<'_>> {
        loop {
            {
                let mut holder = self.creation_thread.lock();
                if let Some(guard) = self.lock.try_lock() {
                    let previous_holder = holder.replace(current);
                    return Some(HeldLock {
                        registry: self,
                        previous_holder,
                        _guard: guard,
                    });
                }
                if let Some(holder) = *holder {
                    info!(
                        ?holder,
                        "Creating instance while another thread holds the creation lock for other instances"
                    );
                    return None;
                }
            }

            // Held outside of a creation, e.g. by a registration
            if let Some(guard) = self.lock.try_lock_for(LOCK_POLL_INTERVAL) {
                let previous_holder = self.creation_thread.lock().replace(current);
                return Some(HeldLock {
                    registry: self,
                    previous_holder,
                    _guard: guard,
                });
            }
        }
    }

    fn before_creation(&self, name: &str, current: ThreadId) -> Result<Entered, RegistryErrorKind> {
        let mut state = self.creation.lock();
        if state.exclusions.contains(name) {
            return Ok(Entered::Exempt);
        }

        loop {
            match state.owners.get(name).copied() {
                None => {
                    state.owners.insert(name.to_owned(), current);
                    return Ok(Entered::Tracked);
                }
                Some(owner) if owner == current => {
                    return Err(RegistryErrorKind::CurrentlyInCreation { name: name.to_owned() });
                }
                Some(owner) => {
                    if state.would_deadlock(current, name) {
                        warn!(?owner, "Waiting for creation on another thread would deadlock");
                        return Err(RegistryErrorKind::CurrentlyInCreation { name: name.to_owned() });
                    }

                    debug!(?owner, "Waiting for creation on another thread");
                    state.waiting.insert(current, name.to_owned());
                    self.creation_finished.wait(&mut state);
                    state.waiting.remove(&current);

                    if !state.owners.contains_key(name) {
                        if let Some(instance) = self.cache.read().get_finished(name) {
                            return Ok(Entered::Appeared(instance));
                        }
                    }
                }
            }
        }
    }

    fn start_recording_suppressed(&self, current: ThreadId) -> bool {
        match self.suppressed.lock().entry(current) {
            Entry::Vacant(entry) => {
                entry.insert(VecDeque::new());
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Records an error suppressed during the outermost creation of the current thread.
    /// Only the most recent errors are kept, see [`SUPPRESSED_ERRORS_LIMIT`].
    pub fn on_suppressed_error(&self, err: anyhow::Error) {
        let current = thread::current().id();
        if let Some(errors) = self.suppressed.lock().get_mut(&current) {
            if errors.len() == SUPPRESSED_ERRORS_LIMIT {
                errors.pop_front();
            }
            errors.push_back(err);
        }
    }

    /// Removes `name` from all tiers without calling its finalizer.
    pub fn remove_singleton(&self, name: &str) {
        let _guard = self.lock.lock();
        self.cache.write().remove(name);
    }

    #[inline]
    #[must_use]
    pub fn contains_singleton(&self, name: &str) -> bool {
        self.cache.read().contains_finished(name)
    }

    /// Registered names in registration order
    #[inline]
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.cache.read().names()
    }

    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.cache.read().len()
    }

    /// Exempts `name` from (or subjects it back to) the in-creation check.
    pub fn set_currently_in_creation(&self, name: &str, in_creation: bool) {
        let mut state = self.creation.lock();
        if in_creation {
            state.exclusions.remove(name);
        } else {
            state.exclusions.insert(name.to_owned());
        }
    }

    #[must_use]
    pub fn is_currently_in_creation(&self, name: &str) -> bool {
        let state = self.creation.lock();
        !state.exclusions.contains(name) && state.owners.contains_key(name)
    }

    #[inline]
    #[must_use]
    pub fn is_singleton_currently_in_creation(&self, name: &str) -> bool {
        self.creation.lock().owners.contains_key(name)
    }

    fn is_created_by_current_thread(&self, name: &str) -> bool {
        self.creation.lock().owners.get(name) == Some(&thread::current().id())
    }

    #[inline]
    #[must_use]
    pub fn is_in_destruction(&self) -> bool {
        self.in_destruction.load(Ordering::Acquire)
    }

    /// Registers the destruction callback of `name`.
    pub fn register_disposable(&self, name: &str, disposable: Disposable) {
        self.disposables.lock().insert(name.to_owned(), disposable);
    }

    #[inline]
    #[must_use]
    pub fn has_disposable(&self, name: &str) -> bool {
        self.disposables.lock().contains_key(name)
    }

    /// Records that `outer` logically contains `inner`: `inner` is destroyed together with `outer`.
    #[inline]
    pub fn register_contained(&self, inner: &str, outer: &str) {
        self.edges.register_contained(inner, outer);
    }

    /// Records that `dependent` depends on `name`: `dependent` is destroyed before `name`.
    #[inline]
    pub fn register_dependent(&self, name: &str, dependent: &str) {
        self.edges.register_dependent(name, dependent);
    }

    /// Whether `dependent` depends on `name`, directly or transitively.
    #[inline]
    #[must_use]
    pub fn is_dependent(&self, name: &str, dependent: &str) -> bool {
        self.edges.is_dependent(name, dependent)
    }

    #[inline]
    #[must_use]
    pub fn has_dependents(&self, name: &str) -> bool {
        self.edges.has_dependents(name)
    }

    #[inline]
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.edges.dependents_of(name)
    }

    #[inline]
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.edges.dependencies_of(name)
    }

    /// Destroys every disposable instance in reverse registration order, dependents first, then clears all tiers.
    pub fn destroy_singletons(&self) {
        let span = debug_span!("destroy_singletons");
        let _span = span.enter();

        self.in_destruction.store(true, Ordering::Release);

        let names: Vec<String> = self.disposables.lock().keys().cloned().collect();
        for name in names.iter().rev() {
            self.destroy_singleton(name);
        }

        self.edges.clear();

        let _guard = self.lock.lock();
        self.cache.write().clear();
        self.in_destruction.store(false, Ordering::Release);
        debug!("Instances destroyed");
    }

    /// Destroys `name`, destroying its dependents first and its contained names after it.
    ///
    /// Outside of [`Self::destroy_singletons`] the name is also removed from all tiers.
    pub fn destroy_singleton(&self, name: &str) {
        let disposable = self.disposables.lock().shift_remove(name);
        self.destroy_instance(name, disposable);

        if !self.in_destruction.load(Ordering::Acquire) {
            let _guard = self.lock.lock();
            self.cache.write().remove(name);
        }
    }

    fn destroy_instance(&self, name: &str, disposable: Option<Disposable>) {
        if let Some(dependents) = self.edges.take_dependents(name) {
            trace!(name, ?dependents, "Destroying dependents first");
            for dependent in &dependents {
                self.destroy_singleton(dependent);
            }
        }

        if let Some(disposable) = disposable {
            match disposable.destroy() {
                Ok(()) => debug!(name, "Finalizer called"),
                Err(err) => warn!(name, %err, "Finalizer returned an error"),
            }
        }

        if let Some(contained) = self.edges.take_contained(name) {
            for inner in &contained {
                self.destroy_singleton(inner);
            }
        }

        self.edges.prune(name);
    }
}

#[cfg(test)]
mod tests {

    use super::Registry;
    use crate::{
        any::{downcast, share, Instance},
        errors::{RegistryErrorKind, SUPPRESSED_ERRORS_LIMIT},
        finalizer::Disposable,
    };

    use parking_lot::Mutex;
    use std::{
        sync::{
            atomic::{AtomicU8, Ordering},
            mpsc, Arc, Barrier, OnceLock,
        },
        thread,
        time::{Duration, Instant},
    };
    use tracing_test::traced_test;

    fn recording_disposable(name: &'static str, order: &Arc<Mutex<Vec<&'static str>>>) -> Disposable {
        let order = order.clone();
        Disposable::new(Arc::new(()), move |_: Arc<()>| -> anyhow::Result<()> {
            order.lock().push(name);
            Ok(())
        })
    }

    #[test]
    #[traced_test]
    fn test_register_twice_conflicts() {
        let registry = Registry::new();
        registry.register_singleton("a", share(1u8)).unwrap();

        let err = registry.register_singleton("a", share(2u8)).unwrap_err();

        assert!(matches!(err, RegistryErrorKind::Conflict { ref name } if name == "a"));
        let instance = registry.get_singleton("a", false).unwrap();
        assert_eq!(*instance.downcast::<u8>().unwrap(), 1);
        assert_eq!(registry.names(), ["a"]);
    }

    #[test]
    #[traced_test]
    fn test_get_or_create_caches() {
        let calls = Arc::new(AtomicU8::new(0));
        let registry = Registry::new();

        let factory = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(share(1u8))
        };
        let first = registry.get_or_create("a", factory).unwrap();
        let second = registry.get_or_create("a", factory).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!registry.is_singleton_currently_in_creation("a"));
    }

    #[test]
    #[traced_test]
    fn test_failed_creation_isnt_cached() {
        let registry = Registry::new();

        let err = registry
            .get_or_create("a", || Err(anyhow::anyhow!("boom")))
            .unwrap_err();
        assert!(matches!(err, RegistryErrorKind::Creation { ref name, .. } if name == "a"));
        assert!(!registry.contains_singleton("a"));
        assert!(!registry.is_singleton_currently_in_creation("a"));

        assert!(registry.get_or_create("a", || Ok(share(1u8))).is_ok());
        assert!(registry.contains_singleton("a"));
    }

    #[test]
    #[traced_test]
    fn test_reentrant_creation_fails() {
        let registry = Registry::new();

        let err = registry
            .get_or_create("a", || {
                registry.get_or_create("a", || Ok(share(())))?;
                Ok(share(()))
            })
            .unwrap_err();

        let RegistryErrorKind::Creation { source, .. } = err else {
            panic!("expected a creation error");
        };
        assert!(matches!(
            source.downcast_ref::<RegistryErrorKind>(),
            Some(RegistryErrorKind::CurrentlyInCreation { name }) if name == "a"
        ));
    }

    #[test]
    #[traced_test]
    fn test_exempt_name_isnt_reported_in_creation() {
        let registry = Registry::new();
        registry.set_currently_in_creation("a", false);

        registry
            .get_or_create("a", || {
                assert!(!registry.is_currently_in_creation("a"));
                Ok(share(()))
            })
            .unwrap();

        registry.set_currently_in_creation("b", true);
        registry
            .get_or_create("b", || {
                assert!(registry.is_currently_in_creation("b"));
                Ok(share(()))
            })
            .unwrap();
    }

    struct A {
        b: OnceLock<Arc<B>>,
    }

    struct B {
        a: Arc<A>,
    }

    #[test]
    #[traced_test]
    fn test_cycle_resolution_with_early_reference() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicU8::new(0));

        let create_b = || -> Result<Instance, anyhow::Error> {
            calls.fetch_add(1, Ordering::SeqCst);
            let a = registry
                .get_early_reference("a")
                .ok_or_else(|| anyhow::anyhow!("no early reference"))?
                .downcast::<A>()
                .map_err(|_| anyhow::anyhow!("incorrect type"))?;
            Ok(Arc::new(B { a }))
        };
        let create_a = || -> Result<Instance, anyhow::Error> {
            calls.fetch_add(1, Ordering::SeqCst);
            let a = Arc::new(A { b: OnceLock::new() });
            registry.add_singleton_factory("a", {
                let a = a.clone();
                move || a as Instance
            });
            let b = registry.get_or_create("b", create_b)?.downcast::<B>().unwrap();
            let _ = a.b.set(b);
            Ok(a)
        };

        let a = registry.get_or_create("a", create_a).unwrap().downcast::<A>().unwrap();
        let b = registry.get_or_create("b", create_b).unwrap().downcast::<B>().unwrap();

        assert!(Arc::ptr_eq(&b.a, &a));
        assert!(Arc::ptr_eq(a.b.get().unwrap(), &b));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let a_again = registry.get_or_create("a", create_a).unwrap();
        assert!(Arc::ptr_eq(&(a_again.downcast::<A>().unwrap()), &a));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.names(), ["a", "b"]);
    }

    #[test]
    #[traced_test]
    fn test_early_reference_requires_creation() {
        let registry = Registry::new();
        registry.add_singleton_factory("a", || share(()));

        assert!(registry.get_early_reference("a").is_none());
    }

    #[test]
    #[traced_test]
    fn test_concurrent_get_or_create_invokes_factory_once() {
        const THREADS: usize = 8;

        let registry = Registry::new();
        let calls = AtomicU8::new(0);
        let barrier = Barrier::new(THREADS);

        let instances: Vec<Instance> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        registry
                            .get_or_create("x", || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(20));
                                Ok(share(()))
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for instance in &instances {
            assert!(Arc::ptr_eq(instance, &instances[0]));
        }
    }

    #[test]
    #[traced_test]
    fn test_other_name_created_without_waiting_for_lock() {
        let registry = &Registry::new();
        let (started_tx, started_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        thread::scope(|s| {
            let slow = s.spawn(move || {
                registry.get_or_create("slow", || {
                    started_tx.send(()).unwrap();
                    done_rx.recv_timeout(Duration::from_secs(5))?;
                    Ok(share(()))
                })
            });

            started_rx.recv().unwrap();
            let fast = s.spawn(move || registry.get_or_create("fast", || Ok(share(()))));
            assert!(fast.join().unwrap().is_ok());
            done_tx.send(()).unwrap();

            assert!(slow.join().unwrap().is_ok());
        });

        assert_eq!(registry.count(), 2);
    }

    #[test]
    #[traced_test]
    fn test_cross_thread_cycle_doesnt_deadlock() {
        let registry = &Registry::new();
        let (a_started_tx, a_started_rx) = mpsc::channel();
        let (b_started_tx, b_started_rx) = mpsc::channel::<()>();

        let (a_result, b_result) = thread::scope(|s| {
            let a = s.spawn(move || {
                registry.get_or_create("a", || {
                    a_started_tx.send(()).unwrap();
                    b_started_rx.recv_timeout(Duration::from_secs(5))?;
                    registry.get_or_create("b", || Ok(share(())))?;
                    Ok(share(()))
                })
            });

            a_started_rx.recv().unwrap();
            let b = s.spawn(move || {
                registry.get_or_create("b", || {
                    b_started_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(20));
                    registry.get_or_create("a", || Ok(share(())))?;
                    Ok(share(()))
                })
            });

            (a.join().unwrap(), b.join().unwrap())
        });

        let failed: Vec<_> = [a_result, b_result].into_iter().filter_map(Result::err).collect();
        assert_eq!(failed.len(), 1);
        let RegistryErrorKind::Creation { source, .. } = &failed[0] else {
            panic!("unexpected error: {}", failed[0]);
        };
        assert!(matches!(
            source.downcast_ref::<RegistryErrorKind>(),
            Some(RegistryErrorKind::CurrentlyInCreation { .. })
        ));
        assert!(registry.contains_singleton("a"));
        assert!(registry.contains_singleton("b"));
    }

    #[test]
    #[traced_test]
    fn test_lock_holder_waiting_on_cooperative_creator_doesnt_deadlock() {
        let registry = Arc::new(Registry::new());
        let (s_started_tx, s_started_rx) = mpsc::channel();
        let (s_release_tx, s_release_rx) = mpsc::channel::<()>();
        let (x_started_tx, x_started_rx) = mpsc::channel();
        let (x_release_tx, x_release_rx) = mpsc::channel::<()>();
        let (x_done_tx, x_done_rx) = mpsc::channel();

        let holder = thread::spawn({
            let registry = registry.clone();
            move || {
                registry
                    .get_or_create("s", || {
                        s_started_tx.send(())?;
                        s_release_rx.recv_timeout(Duration::from_secs(5))?;
                        Ok(share(0u8))
                    })
                    .is_ok()
            }
        });
        s_started_rx.recv().unwrap();

        // Starts "x" without the lock, then asks for a new name once the lock changed hands
        let cooperative = thread::spawn({
            let registry = registry.clone();
            move || {
                let result = registry.get_or_create("x", || {
                    x_started_tx.send(())?;
                    x_release_rx.recv_timeout(Duration::from_secs(5))?;
                    registry.get_or_create("z", || Ok(share(2u8)))?;
                    Ok(share(1u8))
                });
                x_done_tx.send(result.is_ok()).unwrap();
            }
        });
        x_started_rx.recv().unwrap();
        s_release_tx.send(()).unwrap();
        assert!(holder.join().unwrap());

        let waiter = thread::spawn({
            let registry = registry.clone();
            move || {
                registry
                    .get_or_create("x", || Ok(share(9u8)))
                    .map(|instance| *downcast::<u8>(instance).unwrap())
            }
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        while !registry.creation.lock().waiting.values().any(|name| name == "x") {
            assert!(Instant::now() < deadline, "second thread never waited for \"x\"");
            thread::sleep(Duration::from_millis(1));
        }
        x_release_tx.send(()).unwrap();

        assert_eq!(x_done_rx.recv_timeout(Duration::from_secs(3)), Ok(true));
        assert_eq!(waiter.join().unwrap().unwrap(), 1);
        cooperative.join().unwrap();
        assert!(registry.contains_singleton("z"));
    }

    #[test]
    #[traced_test]
    fn test_creation_waits_for_registration_holding_lock() {
        let registry = Arc::new(Registry::new());
        let held = registry.lock.lock();

        let creating = thread::spawn({
            let registry = registry.clone();
            move || registry.get_or_create("a", || Ok(share(1u8))).is_ok()
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!registry.contains_singleton("a"));

        drop(held);
        assert!(creating.join().unwrap());
        assert!(registry.contains_singleton("a"));
    }

    #[test]
    #[traced_test]
    fn test_suppressed_errors_are_bounded() {
        let registry = Registry::new();

        let err = registry
            .get_or_create("a", || {
                for i in 0..150 {
                    registry.on_suppressed_error(anyhow::anyhow!("suppressed {i}"));
                }
                Err(anyhow::anyhow!("boom"))
            })
            .unwrap_err();

        let related = err.related();
        assert_eq!(related.len(), SUPPRESSED_ERRORS_LIMIT);
        assert_eq!(related[0].to_string(), "suppressed 50");
        assert_eq!(related[SUPPRESSED_ERRORS_LIMIT - 1].to_string(), "suppressed 149");

        // Nothing is recorded outside of a creation
        registry.on_suppressed_error(anyhow::anyhow!("ignored"));
        let err = registry.get_or_create("b", || Err(anyhow::anyhow!("boom"))).unwrap_err();
        assert!(err.related().is_empty());
    }

    #[test]
    #[traced_test]
    fn test_register_callback_called_once() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicU8::new(0));
        registry.add_singleton_callback("a", {
            let calls = calls.clone();
            move |instance| {
                assert!(instance.is::<u8>());
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });

        registry.get_or_create("a", || Ok(share(1u8))).unwrap();
        registry.get_or_create("a", || Ok(share(1u8))).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[traced_test]
    fn test_destroy_dependents_first() {
        let registry = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        registry.register_singleton("a", share(())).unwrap();
        registry.register_singleton("b", share(())).unwrap();
        registry.register_disposable("b", recording_disposable("b", &order));
        registry.register_disposable("a", recording_disposable("a", &order));
        registry.register_dependent("a", "b");

        registry.destroy_singletons();

        assert_eq!(*order.lock(), ["b", "a"]);
        assert_eq!(registry.count(), 0);
        assert!(registry.dependents_of("a").is_empty());
    }

    #[test]
    #[traced_test]
    fn test_destroy_reverse_registration_order_and_contained() {
        let registry = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["outer", "inner", "last"] {
            registry.register_singleton(name, share(())).unwrap();
        }
        registry.register_disposable("outer", recording_disposable("outer", &order));
        registry.register_disposable("inner", recording_disposable("inner", &order));
        registry.register_disposable("last", recording_disposable("last", &order));
        registry.register_contained("inner", "outer");

        registry.destroy_singletons();

        // "outer" depends on what it contains, so it goes first
        assert_eq!(*order.lock(), ["last", "outer", "inner"]);
    }

    #[test]
    #[traced_test]
    fn test_failing_finalizer_doesnt_stop_destruction() {
        let registry = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        registry.register_disposable("a", recording_disposable("a", &order));
        registry.register_disposable(
            "b",
            Disposable::new(Arc::new(()), |_: Arc<()>| -> anyhow::Result<()> { Err(anyhow::anyhow!("finalizer failed")) }),
        );
        registry.register_disposable("c", recording_disposable("c", &order));

        registry.destroy_singletons();

        assert_eq!(*order.lock(), ["c", "a"]);
        assert!(logs_contain("Finalizer returned an error"));
    }

    #[test]
    #[traced_test]
    fn test_creation_not_allowed_in_destruction() {
        let registry = Arc::new(Registry::new());
        let result = Arc::new(Mutex::new(None));

        registry.register_singleton("a", share(())).unwrap();
        registry.register_disposable(
            "a",
            Disposable::new(Arc::new(()), {
                let registry = registry.clone();
                let result = result.clone();
                move |_: Arc<()>| -> anyhow::Result<()> {
                    *result.lock() = Some(registry.get_or_create("late", || Ok(share(()))).map(|_| ()));
                    Ok(())
                }
            }),
        );

        registry.destroy_singletons();

        assert!(matches!(
            result.lock().take(),
            Some(Err(RegistryErrorKind::CreationNotAllowed { name })) if name == "late"
        ));
        assert!(!registry.is_in_destruction());
        assert!(registry.get_or_create("late", || Ok(share(()))).is_ok());
    }

    #[test]
    #[traced_test]
    fn test_destroy_single_removes_from_tiers() {
        let registry = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        registry.register_singleton("a", share(())).unwrap();
        registry.register_singleton("b", share(())).unwrap();
        registry.register_disposable("a", recording_disposable("a", &order));
        registry.register_disposable("b", recording_disposable("b", &order));
        registry.register_dependent("a", "b");

        registry.destroy_singleton("a");

        assert_eq!(*order.lock(), ["b", "a"]);
        assert_eq!(registry.count(), 0);
        assert!(!registry.has_disposable("b"));
    }
}
