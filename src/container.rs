use core::fmt::Display;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread::{self, Thread},
    time::SystemTime,
};
use tracing::{debug, info, info_span, trace, warn};

use crate::{
    any::{downcast, share, Instance},
    config::{Config, RefreshPolicy},
    definition::{Definition, DefinitionSource, Role},
    environment::{system_environment, Environment},
    errors::{ContainerErrorKind, FactoryErrorKind},
    event::{Event, EventPublisher, Listener, Multicaster, SimpleMulticaster},
    factory::Factory,
    lifecycle::{DefaultLifecycleProcessor, LifecycleProcessor},
    message::{DelegatingMessageSource, MessageSource},
    post_processor::{FactoryPostProcessor, InstancePostProcessor},
};

pub const ENVIRONMENT: &str = "environment";
pub const SYSTEM_ENVIRONMENT: &str = "systemEnvironment";
pub const MESSAGE_SOURCE: &str = "messageSource";
pub const EVENT_MULTICASTER: &str = "eventMulticaster";
pub const LIFECYCLE_PROCESSOR: &str = "lifecycleProcessor";

/// Extension points of a container refresh and close.
pub trait RefreshHooks: Send + Sync {
    /// Called before factory post-processors, with definitions loaded and well-known instances registered
    ///
    /// # Errors
    /// An error fails the refresh
    fn post_process_factory(&self, factory: &Factory) -> Result<(), anyhow::Error> {
        let _ = factory;
        Ok(())
    }

    /// Called after the message source and the multicaster are ready and before listeners are registered.
    /// Events published here are delivered once listeners are registered
    ///
    /// # Errors
    /// An error fails the refresh
    fn on_refresh(&self, factory: &Factory, publisher: &dyn EventPublisher) -> Result<(), anyhow::Error> {
        let _ = (factory, publisher);
        Ok(())
    }

    /// Called on close after instances are destroyed
    fn on_close(&self, factory: &Factory) {
        let _ = factory;
    }
}

struct NoHooks;

impl RefreshHooks for NoHooks {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    New,
    Active,
    Closed,
}

/// Owns a factory and drives its refresh and close.
///
/// Clones share the same container. It's closed when the last clone is dropped.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

pub struct ContainerBuilder {
    config: Config,
    hooks: Box<dyn RefreshHooks>,
    sources: Vec<Box<dyn DefinitionSource>>,
    definitions: Vec<Definition>,
    singletons: Vec<(String, Instance)>,
    listeners: Vec<Arc<dyn Listener>>,
    factory_post_processors: Vec<Arc<dyn FactoryPostProcessor>>,
    post_processors: Vec<Arc<dyn InstancePostProcessor>>,
    environment: Option<Arc<Environment>>,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            hooks: Box::new(NoHooks),
            sources: Vec::new(),
            definitions: Vec::new(),
            singletons: Vec::new(),
            listeners: Vec::new(),
            factory_post_processors: Vec::new(),
            post_processors: Vec::new(),
            environment: None,
        }
    }
}

impl ContainerBuilder {
    #[inline]
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    #[inline]
    #[must_use]
    pub fn hooks(mut self, hooks: impl RefreshHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Definitions loaded from `source` into a fresh factory on every refresh
    #[inline]
    #[must_use]
    pub fn source(mut self, source: impl DefinitionSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    #[inline]
    #[must_use]
    pub fn definition(mut self, definition: Definition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Instance created outside the container, registered as finished on every refresh
    #[inline]
    #[must_use]
    pub fn singleton<T: Send + Sync + 'static>(mut self, name: impl Into<String>, instance: Arc<T>) -> Self {
        let instance: Instance = instance;
        self.singletons.push((name.into(), instance));
        self
    }

    #[inline]
    #[must_use]
    pub fn message_source(self, message_source: Arc<dyn MessageSource>) -> Self {
        self.singleton(MESSAGE_SOURCE, Arc::new(message_source))
    }

    #[inline]
    #[must_use]
    pub fn multicaster(self, multicaster: Arc<dyn Multicaster>) -> Self {
        self.singleton(EVENT_MULTICASTER, Arc::new(multicaster))
    }

    #[inline]
    #[must_use]
    pub fn lifecycle_processor(self, processor: Arc<dyn LifecycleProcessor>) -> Self {
        self.singleton(LIFECYCLE_PROCESSOR, Arc::new(processor))
    }

    #[inline]
    #[must_use]
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(Arc::new(environment));
        self
    }

    #[inline]
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listeners.push(listener);
        self
    }

    #[inline]
    #[must_use]
    pub fn factory_post_processor(mut self, post_processor: Arc<dyn FactoryPostProcessor>) -> Self {
        self.factory_post_processors.push(post_processor);
        self
    }

    #[inline]
    #[must_use]
    pub fn post_processor(mut self, post_processor: Arc<dyn InstancePostProcessor>) -> Self {
        self.post_processors.push(post_processor);
        self
    }

    #[must_use]
    pub fn build(self) -> Container {
        Container {
            inner: Arc::new(ContainerInner {
                environment: self.environment.unwrap_or_else(|| Arc::new(Environment::from_process())),
                config: self.config,
                hooks: self.hooks,
                sources: self.sources,
                definitions: self.definitions,
                singletons: self.singletons,
                factory_post_processors: self.factory_post_processors,
                post_processors: self.post_processors,
                startup_shutdown: ReentrantMutex::new(()),
                owner: Mutex::new(None),
                factory: RwLock::new(None),
                startup_time: Mutex::new(None),
                active: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                refreshed: AtomicBool::new(false),
                listeners: RwLock::new(self.listeners),
                early_listeners: Mutex::new(None),
                early_events: Mutex::new(None),
                multicaster: RwLock::new(None),
                message_source: RwLock::new(None),
                lifecycle_processor: RwLock::new(None),
            }),
        }
    }
}

impl Container {
    #[inline]
    #[must_use]
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::default()
    }

    /// Loads definitions into a fresh factory and creates every non-lazy singleton.
    ///
    /// If a step after loading definitions fails, every instance created so far is destroyed
    /// and the container stays inactive.
    ///
    /// # Errors
    /// - Returns [`ContainerErrorKind::IllegalState`] if the container was already refreshed and
    ///   its [`RefreshPolicy`] is [`RefreshPolicy::Once`]
    /// - Returns the error of the failed step otherwise
    pub fn refresh(&self) -> Result<(), ContainerErrorKind> {
        self.inner.refresh()
    }

    /// Publishes [`Event::Closed`], stops lifecycle instances and destroys every singleton.
    /// Does nothing if the container isn't active. Failures are logged and never stop the close
    pub fn close(&self) {
        self.inner.close();
    }

    /// # Errors
    /// Returns [`ContainerErrorKind::IllegalState`] if the container isn't active
    pub fn factory(&self) -> Result<Arc<Factory>, ContainerErrorKind> {
        self.inner.factory()
    }

    /// Factory of the last refresh, even if the refresh failed. `None` before the first refresh and after close
    #[inline]
    #[must_use]
    pub fn raw_factory(&self) -> Option<Arc<Factory>> {
        self.inner.factory.read().clone()
    }

    /// # Errors
    /// See [`Self::factory`] and [`Factory::get`]
    pub fn get(&self, name: &str) -> Result<Instance, ContainerErrorKind> {
        let span = info_span!("get", name, container = %self.inner.config.id);
        let _guard = span.enter();

        Ok(self.factory()?.get(name)?)
    }

    /// # Errors
    /// See [`Self::factory`] and [`Factory::get_typed`]
    pub fn get_typed<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ContainerErrorKind> {
        let span = info_span!("get", name, container = %self.inner.config.id);
        let _guard = span.enter();

        Ok(self.factory()?.get_typed(name)?)
    }

    /// # Errors
    /// Returns an error if a listener fails to handle the event
    pub fn publish_event(&self, event: Event) -> Result<(), ContainerErrorKind> {
        self.inner.publish_event(event)
    }

    /// # Errors
    /// See [`Self::publish_event`]
    pub fn publish<T: Send + Sync + 'static>(&self, payload: T) -> Result<(), ContainerErrorKind> {
        self.inner.publish_event(Event::payload(payload))
    }

    /// Adds a listener to the current multicaster, if any, and to the listeners of later refreshes.
    /// Listeners added after the first refresh are dropped on close
    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        if let Some(multicaster) = self.inner.multicaster.read().as_ref() {
            multicaster.add_listener(listener.clone());
        }
        self.inner.listeners.write().push(listener);
    }

    /// # Errors
    /// Returns [`ContainerErrorKind::IllegalState`] if the container isn't refreshed
    pub fn get_message(&self, code: &str, args: &[&dyn Display], default: Option<&str>) -> Result<Option<String>, ContainerErrorKind> {
        let message_source = self
            .inner
            .message_source
            .read()
            .clone()
            .ok_or(ContainerErrorKind::IllegalState("message source not initialized, call `refresh` first"))?;
        Ok(message_source.get_message(code, args, default))
    }

    /// Starts every lifecycle instance and publishes [`Event::Started`].
    ///
    /// # Errors
    /// Returns [`ContainerErrorKind::IllegalState`] if the container isn't refreshed,
    /// [`ContainerErrorKind::Lifecycle`] if an instance failed to start
    pub fn start(&self) -> Result<(), ContainerErrorKind> {
        let processor = self.inner.lifecycle_processor()?;
        let factory = self.factory()?;
        processor.start(&factory).map_err(ContainerErrorKind::Lifecycle)?;
        self.publish_event(Event::Started)
    }

    /// Stops every running lifecycle instance and publishes [`Event::Stopped`].
    ///
    /// # Errors
    /// See [`Self::start`]
    pub fn stop(&self) -> Result<(), ContainerErrorKind> {
        let processor = self.inner.lifecycle_processor()?;
        let factory = self.factory()?;
        processor.stop(&factory).map_err(ContainerErrorKind::Lifecycle)?;
        self.publish_event(Event::Stopped)
    }

    /// Whether the lifecycle processor runs and every lifecycle instance it started is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .lifecycle_processor
            .read()
            .as_ref()
            .is_some_and(|processor| processor.is_running())
    }

    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state(&self) -> State {
        if self.inner.active.load(Ordering::Acquire) {
            State::Active
        } else if self.inner.closed.load(Ordering::Acquire) {
            State::Closed
        } else {
            State::New
        }
    }

    #[inline]
    #[must_use]
    pub fn startup_time(&self) -> Option<SystemTime> {
        *self.inner.startup_time.lock()
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    #[inline]
    #[must_use]
    pub fn environment(&self) -> Arc<Environment> {
        self.inner.environment.clone()
    }

    /// Handle to close the container from another thread, e.g. a signal handler.
    /// The handle doesn't keep the container alive
    #[inline]
    #[must_use]
    pub fn shutdown_hook(&self) -> ShutdownHook {
        ShutdownHook {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl EventPublisher for Container {
    fn publish_event(&self, event: Event) -> Result<(), ContainerErrorKind> {
        self.inner.publish_event(event)
    }
}

/// Closes a container from any thread.
///
/// If another thread holds the refresh/close lock, it's unparked and given the configured
/// `shutdown_grace` to release the lock. A thread still stuck after that leaves the container
/// marked as inactive without being closed.
#[derive(Clone)]
pub struct ShutdownHook {
    inner: Weak<ContainerInner>,
}

impl ShutdownHook {
    pub fn run(&self) {
        let Some(inner) = self.inner.upgrade() else {
            debug!("Container already dropped");
            return;
        };
        inner.close_from_hook();
    }
}

struct ContainerInner {
    config: Config,
    hooks: Box<dyn RefreshHooks>,
    sources: Vec<Box<dyn DefinitionSource>>,
    definitions: Vec<Definition>,
    singletons: Vec<(String, Instance)>,
    factory_post_processors: Vec<Arc<dyn FactoryPostProcessor>>,
    post_processors: Vec<Arc<dyn InstancePostProcessor>>,
    environment: Arc<Environment>,

    startup_shutdown: ReentrantMutex<()>,
    /// Thread holding `startup_shutdown`
    owner: Mutex<Option<Thread>>,

    factory: RwLock<Option<Arc<Factory>>>,
    startup_time: Mutex<Option<SystemTime>>,
    active: AtomicBool,
    closed: AtomicBool,
    refreshed: AtomicBool,

    listeners: RwLock<Vec<Arc<dyn Listener>>>,
    /// Listeners before the first refresh, restored on close
    early_listeners: Mutex<Option<Vec<Arc<dyn Listener>>>>,
    /// Events published before listeners are registered. `None` outside of a refresh
    early_events: Mutex<Option<Vec<Event>>>,
    multicaster: RwLock<Option<Arc<dyn Multicaster>>>,
    message_source: RwLock<Option<Arc<dyn MessageSource>>>,
    lifecycle_processor: RwLock<Option<Arc<dyn LifecycleProcessor>>>,
}

/// Holds the refresh/close lock, recording the current thread as its owner until dropped
struct OwnerGuard<'a> {
    inner: &'a ContainerInner,
    previous: Option<Thread>,
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl<'a> OwnerGuard<'a> {
    fn new(inner: &'a ContainerInner, guard: ReentrantMutexGuard<'a, ()>) -> Self {
        let previous = inner.owner.lock().replace(thread::current());
        Self {
            inner,
            previous,
            _guard: guard,
        }
    }
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        *self.inner.owner.lock() = self.previous.take();
    }
}

impl ContainerInner {
    fn factory(&self) -> Result<Arc<Factory>, ContainerErrorKind> {
        if !self.active.load(Ordering::Acquire) {
            if self.closed.load(Ordering::Acquire) {
                return Err(ContainerErrorKind::IllegalState("container has been closed already"));
            }
            return Err(ContainerErrorKind::IllegalState("container is not active, call `refresh` first"));
        }
        self.factory
            .read()
            .clone()
            .ok_or(ContainerErrorKind::IllegalState("container is not active, call `refresh` first"))
    }

    fn lifecycle_processor(&self) -> Result<Arc<dyn LifecycleProcessor>, ContainerErrorKind> {
        self.lifecycle_processor.read().clone().ok_or(ContainerErrorKind::IllegalState(
            "lifecycle processor not initialized, call `refresh` before invoking lifecycle methods",
        ))
    }

    fn refresh(&self) -> Result<(), ContainerErrorKind> {
        let _owner = OwnerGuard::new(self, self.startup_shutdown.lock());
        let span = info_span!("refresh", container = %self.config.id);
        let _guard = span.enter();

        if self.config.refresh_policy == RefreshPolicy::Once && self.refreshed.swap(true, Ordering::AcqRel) {
            return Err(ContainerErrorKind::IllegalState(
                "container does not support multiple refresh attempts, just call `refresh` once",
            ));
        }

        self.prepare_refresh();
        let factory = match self.obtain_fresh_factory() {
            Ok(factory) => factory,
            Err(err) => {
                warn!(%err, "Failed to load definitions, cancelling refresh attempt");
                self.active.store(false, Ordering::Release);
                *self.early_events.lock() = None;
                self.clear_references();
                return Err(err);
            }
        };

        if let Err(err) = self.refresh_factory(&factory) {
            warn!(%err, "Exception encountered during refresh, cancelling refresh attempt");
            factory.destroy_singletons();
            self.cancel_refresh(&factory);
            return Err(err);
        }

        info!("Container refreshed");
        Ok(())
    }

    fn prepare_refresh(&self) {
        *self.startup_time.lock() = Some(SystemTime::now());
        self.closed.store(false, Ordering::Release);
        self.active.store(true, Ordering::Release);
        debug!("Refreshing");

        {
            let mut early_listeners = self.early_listeners.lock();
            match early_listeners.as_ref() {
                None => *early_listeners = Some(self.listeners.read().clone()),
                Some(early) => *self.listeners.write() = early.clone(),
            }
        }
        *self.early_events.lock() = Some(Vec::new());
    }

    fn obtain_fresh_factory(&self) -> Result<Arc<Factory>, ContainerErrorKind> {
        if self.config.refresh_policy == RefreshPolicy::Repeatable {
            let previous = self.factory.write().take();
            if let Some(previous) = previous {
                debug!("Destroying instances of previous refresh");
                previous.destroy_singletons();
            }
        }

        let factory = Arc::new(Factory::new(&self.config));
        for definition in &self.definitions {
            factory.register_definition(definition.clone())?;
        }
        for source in &self.sources {
            source
                .load(&mut factory.definitions_mut())
                .map_err(ContainerErrorKind::Definitions)?;
        }
        for (name, instance) in &self.singletons {
            factory
                .registry()
                .register_singleton(name, instance.clone())
                .map_err(FactoryErrorKind::from)?;
        }
        debug!(definitions = factory.definition_names().len(), "Definitions loaded");

        *self.factory.write() = Some(factory.clone());
        Ok(factory)
    }

    fn prepare_factory(&self, factory: &Factory) -> Result<(), ContainerErrorKind> {
        if !factory.contains(ENVIRONMENT) {
            factory.register_singleton(ENVIRONMENT, self.environment.clone())?;
        }
        if !factory.contains(SYSTEM_ENVIRONMENT) {
            factory.register_singleton(SYSTEM_ENVIRONMENT, Arc::new(system_environment()))?;
        }
        Ok(())
    }

    fn refresh_factory(&self, factory: &Factory) -> Result<(), ContainerErrorKind> {
        self.prepare_factory(factory)?;
        self.hooks.post_process_factory(factory).map_err(ContainerErrorKind::Hook)?;
        self.invoke_factory_post_processors(factory)?;
        self.register_post_processors(factory)?;

        let message_source = well_known::<dyn MessageSource, _>(factory, MESSAGE_SOURCE, || Arc::new(DelegatingMessageSource::default()))?;
        *self.message_source.write() = Some(message_source);
        let multicaster = well_known::<dyn Multicaster, _>(factory, EVENT_MULTICASTER, || Arc::new(SimpleMulticaster::new()))?;
        *self.multicaster.write() = Some(multicaster.clone());

        self.hooks.on_refresh(factory, self).map_err(ContainerErrorKind::Hook)?;

        self.register_listeners(factory, multicaster.as_ref())?;

        factory.freeze();
        factory.pre_instantiate_singletons()?;

        factory.reset_caches();
        let processor = well_known::<dyn LifecycleProcessor, _>(factory, LIFECYCLE_PROCESSOR, || Arc::new(DefaultLifecycleProcessor::new()))?;
        *self.lifecycle_processor.write() = Some(processor.clone());
        processor.on_refresh(factory).map_err(ContainerErrorKind::Lifecycle)?;
        self.publish_event(Event::Refreshed)
    }

    fn invoke_factory_post_processors(&self, factory: &Factory) -> Result<(), ContainerErrorKind> {
        for post_processor in &self.factory_post_processors {
            post_processor.post_process(factory).map_err(ContainerErrorKind::PostProcessing)?;
        }
        for name in factory.names_by_role(Role::FactoryPostProcessor) {
            if let Some(post_processor) = factory.factory_post_processor(&name)? {
                debug!(name, "Invoking factory post-processor");
                post_processor.post_process(factory).map_err(ContainerErrorKind::PostProcessing)?;
            }
        }
        Ok(())
    }

    fn register_post_processors(&self, factory: &Factory) -> Result<(), ContainerErrorKind> {
        for post_processor in &self.post_processors {
            factory.add_post_processor(post_processor.clone());
        }
        for name in factory.names_by_role(Role::PostProcessor) {
            if let Some(post_processor) = factory.post_processor(&name)? {
                factory.add_post_processor(post_processor);
            }
        }
        debug!(count = factory.post_processor_count(), "Post-processors registered");
        Ok(())
    }

    fn register_listeners(&self, factory: &Factory, multicaster: &dyn Multicaster) -> Result<(), ContainerErrorKind> {
        for listener in self.listeners.read().iter() {
            multicaster.add_listener(listener.clone());
        }
        for name in factory.names_by_role(Role::Listener) {
            multicaster.add_listener_name(&name);
        }

        let early_events = self.early_events.lock().take().unwrap_or_default();
        if !early_events.is_empty() {
            debug!(count = early_events.len(), "Publishing early events");
        }
        for event in &early_events {
            multicaster.multicast(event, factory).map_err(ContainerErrorKind::Event)?;
        }
        Ok(())
    }

    fn cancel_refresh(&self, factory: &Factory) {
        self.active.store(false, Ordering::Release);
        *self.early_events.lock() = None;
        self.clear_references();
        factory.reset_caches();
    }

    /// Drops the well-known instances of the last refresh, so nothing resolves through a destroyed factory
    fn clear_references(&self) {
        *self.message_source.write() = None;
        *self.multicaster.write() = None;
        *self.lifecycle_processor.write() = None;
    }

    fn close(&self) {
        let _owner = OwnerGuard::new(self, self.startup_shutdown.lock());
        self.do_close();
    }

    fn close_from_hook(&self) {
        let guard = match self.startup_shutdown.try_lock() {
            Some(guard) => guard,
            None => {
                let current = thread::current().id();
                if let Some(owner) = self.owner.lock().as_ref().filter(|owner| owner.id() != current) {
                    info!(owner = ?owner.id(), "Unparking thread holding the refresh/close lock");
                    owner.unpark();
                }
                match self.startup_shutdown.try_lock_for(self.config.shutdown_grace) {
                    Some(guard) => guard,
                    None => {
                        warn!("Shutdown hook could not acquire the refresh/close lock, marking container as inactive");
                        self.active.store(false, Ordering::Release);
                        return;
                    }
                }
            }
        };
        let _owner = OwnerGuard::new(self, guard);
        self.do_close();
    }

    fn do_close(&self) {
        if !self.active.load(Ordering::Acquire)
            || self
                .closed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            trace!("Container isn't active, close skipped");
            return;
        }

        let span = info_span!("close", container = %self.config.id);
        let _guard = span.enter();
        debug!("Closing");

        if let Err(err) = self.publish_event(Event::Closed) {
            warn!(%err, "Exception thrown from listener handling close event");
        }

        let factory = self.factory.read().clone();
        if let Some(factory) = &factory {
            if let Some(processor) = self.lifecycle_processor.read().clone() {
                processor.on_close(factory);
            }
            factory.destroy_singletons();
        }
        *self.factory.write() = None;

        if let Some(factory) = &factory {
            self.hooks.on_close(factory);
            factory.reset_caches();
        }

        if let Some(early_listeners) = self.early_listeners.lock().as_ref() {
            *self.listeners.write() = early_listeners.clone();
        }
        self.clear_references();

        self.active.store(false, Ordering::Release);
        info!("Container closed");
    }
}

impl EventPublisher for ContainerInner {
    fn publish_event(&self, event: Event) -> Result<(), ContainerErrorKind> {
        {
            let mut early_events = self.early_events.lock();
            if let Some(early_events) = early_events.as_mut() {
                trace!(?event, "Listeners aren't registered yet, event buffered");
                early_events.push(event);
                return Ok(());
            }
        }

        let multicaster = self.multicaster.read().clone();
        let factory = self.factory.read().clone();
        match (multicaster, factory) {
            (Some(multicaster), Some(factory)) => multicaster.multicast(&event, &factory).map_err(ContainerErrorKind::Event),
            _ => {
                debug!(?event, "No multicaster, event dropped");
                Ok(())
            }
        }
    }
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        self.close();
        debug!("Container dropped");
    }
}

/// Resolves the well-known instance under `name`, creating the default one if there's none.
/// Well-known instances are stored as `Arc<dyn Trait>` values
fn well_known<T, F>(factory: &Factory, name: &str, default: F) -> Result<Arc<T>, FactoryErrorKind>
where
    T: ?Sized + Send + Sync + 'static,
    F: FnOnce() -> Arc<T>,
{
    let instance = if factory.contains(name) {
        debug!(name, "Using user-supplied instance");
        factory.get(name)?
    } else {
        factory
            .registry()
            .get_or_create(name, || Ok(share(default())))?
    };
    downcast::<Arc<T>>(instance)
        .map(|instance| Arc::clone(&*instance))
        .map_err(|_| FactoryErrorKind::IncorrectType {
            name: name.to_owned(),
            expected: core::any::type_name::<Arc<T>>(),
        })
}
