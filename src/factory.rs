use core::any::type_name;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    thread::{self, ThreadId},
};
use tracing::{debug, debug_span, trace};

use crate::{
    any::{downcast, Instance},
    config::Config,
    definition::{Adapter, Definition, DefinitionRegistry, Role, Roles},
    errors::{FactoryErrorKind, RegistryErrorKind},
    event::Listener,
    finalizer::Disposable,
    lifecycle::Lifecycle,
    post_processor::{FactoryPostProcessor, InstancePostProcessor},
    registry::Registry,
    scope::Scope,
};

/// Handle passed to instantiators and populators.
///
/// Every name resolved through it is recorded as a dependency of the name being created,
/// so the dependency is destroyed after it.
pub struct Resolver<'a> {
    factory: &'a Factory,
    name: &'a str,
}

impl<'a> Resolver<'a> {
    #[inline]
    #[must_use]
    pub(crate) fn new(factory: &'a Factory, name: &'a str) -> Self {
        Self { factory, name }
    }

    /// Name of the instance being created
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    #[inline]
    #[must_use]
    pub fn factory(&self) -> &'a Factory {
        self.factory
    }

    /// # Errors
    /// See [`Factory::get`]
    pub fn get(&self, name: &str) -> Result<Instance, FactoryErrorKind> {
        let instance = self.factory.get(name)?;
        self.factory.registry.register_dependent(name, self.name);
        Ok(instance)
    }

    /// # Errors
    /// See [`Factory::get_typed`]
    pub fn get_typed<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, FactoryErrorKind> {
        let instance = self.get(name)?;
        downcast(instance).map_err(|_| FactoryErrorKind::IncorrectType {
            name: name.to_owned(),
            expected: type_name::<T>(),
        })
    }

    /// Resolves `name` if it's known, `None` otherwise.
    ///
    /// # Errors
    /// See [`Factory::get`]
    pub fn get_optional<T: Send + Sync + 'static>(&self, name: &str) -> Result<Option<Arc<T>>, FactoryErrorKind> {
        if !self.factory.contains(name) {
            return Ok(None);
        }
        self.get_typed(name).map(Some)
    }

    /// # Errors
    /// See [`Factory::get_all_of_type`]
    pub fn get_all_of_type<T: Send + Sync + 'static>(&self) -> Result<Vec<(String, Arc<T>)>, FactoryErrorKind> {
        let instances = self.factory.get_all_of_type::<T>()?;
        for (name, _) in &instances {
            self.factory.registry.register_dependent(name, self.name);
        }
        Ok(instances)
    }
}

/// Creates instances from definitions and keeps the shared ones in a [`Registry`].
pub struct Factory {
    registry: Registry,
    definitions: RwLock<DefinitionRegistry>,
    post_processors: RwLock<Vec<Arc<dyn InstancePostProcessor>>>,
    prototypes_in_creation: Mutex<HashMap<ThreadId, HashSet<String>>>,
    allow_circular_references: bool,
}

impl Factory {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            registry: Registry::new(),
            definitions: RwLock::new(DefinitionRegistry::new(config.allow_definition_overriding)),
            post_processors: RwLock::new(Vec::new()),
            prototypes_in_creation: Mutex::new(HashMap::new()),
            allow_circular_references: config.allow_circular_references,
        }
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// # Errors
    /// See [`DefinitionRegistry::register`]
    pub fn register_definition(&self, definition: Definition) -> Result<(), FactoryErrorKind> {
        self.definitions.write().register(definition)
    }

    /// # Errors
    /// See [`DefinitionRegistry::modify`]
    pub fn modify_definition(&self, name: &str, modify: impl FnOnce(&mut Definition)) -> Result<(), FactoryErrorKind> {
        self.definitions.write().modify(name, modify)
    }

    /// Exclusive access to the definitions. Instances can't be resolved while the guard is held
    #[inline]
    pub fn definitions_mut(&self) -> RwLockWriteGuard<'_, DefinitionRegistry> {
        self.definitions.write()
    }

    #[inline]
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<Definition> {
        self.definitions.read().get(name).cloned()
    }

    #[inline]
    #[must_use]
    pub fn definition_names(&self) -> Vec<String> {
        self.definitions.read().names()
    }

    #[inline]
    #[must_use]
    pub fn names_by_role(&self, role: Role) -> Vec<String> {
        self.definitions.read().names_by_role(role)
    }

    /// Registers an instance created outside the container as finished.
    ///
    /// # Errors
    /// Returns [`RegistryErrorKind::Conflict`] if the name is taken
    pub fn register_singleton<T: Send + Sync + 'static>(&self, name: &str, instance: Arc<T>) -> Result<(), FactoryErrorKind> {
        self.registry.register_singleton(name, instance).map_err(Into::into)
    }

    /// Whether `name` has a finished instance or a definition
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains_singleton(name) || self.definitions.read().contains(name)
    }

    pub fn add_post_processor(&self, post_processor: Arc<dyn InstancePostProcessor>) {
        self.post_processors.write().push(post_processor);
    }

    #[inline]
    #[must_use]
    pub fn post_processor_count(&self) -> usize {
        self.post_processors.read().len()
    }

    /// Returns the instance of `name`, creating it if needed.
    ///
    /// A singleton in creation on the current thread is returned as its early reference.
    ///
    /// # Errors
    /// - Returns [`FactoryErrorKind::NoDefinition`] if `name` has neither an instance nor a definition
    /// - Returns [`FactoryErrorKind::CircularDependsOn`] if `depends_on` of definitions forms a cycle
    /// - Returns [`FactoryErrorKind::Registry`] if the creation failed
    pub fn get(&self, name: &str) -> Result<Instance, FactoryErrorKind> {
        let span = debug_span!("get", name);
        let _guard = span.enter();

        if let Some(instance) = self.registry.get_singleton(name, true) {
            if self.registry.is_singleton_currently_in_creation(name) {
                trace!("Returning early reference of instance in creation");
            }
            return Ok(instance);
        }

        let definition = self
            .definition(name)
            .ok_or_else(|| FactoryErrorKind::NoDefinition { name: name.to_owned() })?;

        for dependency in &definition.depends_on {
            if self.registry.is_dependent(name, dependency) {
                return Err(FactoryErrorKind::CircularDependsOn {
                    name: name.to_owned(),
                    dependency: dependency.clone(),
                });
            }
            self.registry.register_dependent(dependency, name);
            self.get(dependency)?;
        }

        match definition.scope {
            Scope::Singleton => self
                .registry
                .get_or_create(name, || self.create(name, &definition))
                .map_err(|err| {
                    if let RegistryErrorKind::Creation { .. } = err {
                        self.registry.destroy_singleton(name);
                    }
                    FactoryErrorKind::from(err)
                }),
            Scope::Prototype => self.get_prototype(name, &definition),
        }
    }

    /// # Errors
    /// Returns [`FactoryErrorKind::IncorrectType`] if the instance isn't a `T`, see [`Self::get`] for others
    pub fn get_typed<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, FactoryErrorKind> {
        let instance = self.get(name)?;
        downcast(instance).map_err(|_| FactoryErrorKind::IncorrectType {
            name: name.to_owned(),
            expected: type_name::<T>(),
        })
    }

    /// Resolves `name` if it's known, `None` otherwise.
    ///
    /// # Errors
    /// See [`Self::get_typed`]
    pub fn get_optional<T: Send + Sync + 'static>(&self, name: &str) -> Result<Option<Arc<T>>, FactoryErrorKind> {
        if !self.contains(name) {
            return Ok(None);
        }
        self.get_typed(name).map(Some)
    }

    /// Instances of every definition declaring type `T`, in definition order.
    ///
    /// Names that can't be resolved because they're in creation, e.g. the caller itself, are skipped.
    /// Their errors are attached to the current creation as suppressed errors.
    ///
    /// # Errors
    /// Returns the first error of another kind
    pub fn get_all_of_type<T: Send + Sync + 'static>(&self) -> Result<Vec<(String, Arc<T>)>, FactoryErrorKind> {
        let names: Vec<String> = {
            let definitions = self.definitions.read();
            definitions
                .names()
                .into_iter()
                .filter(|name| definitions.get(name).is_some_and(|definition| definition.type_info.is::<T>()))
                .collect()
        };

        let mut instances = Vec::with_capacity(names.len());
        for name in names {
            match self.get_typed::<T>(&name) {
                Ok(instance) => instances.push((name, instance)),
                Err(err) if err.is_currently_in_creation() => {
                    debug!(name, %err, "Skipping instance in creation");
                    self.registry.on_suppressed_error(anyhow::Error::new(err));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(instances)
    }

    fn get_prototype(&self, name: &str, definition: &Definition) -> Result<Instance, FactoryErrorKind> {
        let current = thread::current().id();
        if !self
            .prototypes_in_creation
            .lock()
            .entry(current)
            .or_default()
            .insert(name.to_owned())
        {
            return Err(RegistryErrorKind::CurrentlyInCreation { name: name.to_owned() }.into());
        }

        let result = self.create(name, definition);

        {
            let mut in_creation = self.prototypes_in_creation.lock();
            if let Some(names) = in_creation.get_mut(&current) {
                names.remove(name);
                if names.is_empty() {
                    in_creation.remove(&current);
                }
            }
        }

        result.map_err(|err| RegistryErrorKind::creation(name, err, None).into())
    }

    fn create(&self, name: &str, definition: &Definition) -> Result<Instance, anyhow::Error> {
        let resolver = Resolver::new(self, name);
        let raw = (definition.instantiator)(&resolver)?;
        let post_processors = self.post_processors.read().clone();

        let early_exposure = definition.scope.is_singleton()
            && self.allow_circular_references
            && self.registry.is_singleton_currently_in_creation(name);
        if early_exposure {
            debug!("Caching raw instance to allow resolving circular references");
            let raw = raw.clone();
            let owned_name = name.to_owned();
            let post_processors = post_processors.clone();
            self.registry.add_singleton_factory(name, move || {
                post_processors
                    .iter()
                    .fold(raw, |instance, post_processor| post_processor.early_reference(&owned_name, instance))
            });
        }

        if let Some(populate) = &definition.populator {
            populate(&raw, &resolver)?;
        }

        let mut exposed = raw.clone();
        for post_processor in &post_processors {
            exposed = post_processor.before_init(name, exposed)?;
        }
        if let Some(init) = &definition.init {
            init(&exposed, &resolver)?;
        }
        for post_processor in &post_processors {
            exposed = post_processor.after_init(name, exposed)?;
        }

        if early_exposure {
            if let Some(early) = self.registry.get_singleton(name, false) {
                if Arc::ptr_eq(&exposed, &raw) {
                    exposed = early;
                } else if self.registry.has_dependents(name) {
                    return Err(FactoryErrorKind::EarlyReferenceMismatch { name: name.to_owned() }.into());
                }
            }
        }

        if definition.scope.is_singleton() {
            if let Some(finalizer) = &definition.finalizer {
                self.registry
                    .register_disposable(name, Disposable::from_boxed(exposed.clone(), finalizer()));
            }
        }

        Ok(exposed)
    }

    /// Creates every non-lazy singleton that isn't created yet, in definition order.
    ///
    /// # Errors
    /// Returns the first creation error
    pub fn pre_instantiate_singletons(&self) -> Result<(), FactoryErrorKind> {
        let names = self.definition_names();
        debug!(count = names.len(), "Pre-instantiating singletons");

        for name in &names {
            let Some(definition) = self.definition(name) else {
                continue;
            };
            if definition.scope.is_singleton() && !definition.lazy {
                self.get(name)?;
            }
        }
        Ok(())
    }

    fn role<R: ?Sized>(&self, name: &str, adapter: impl FnOnce(&Roles) -> Option<Adapter<R>>) -> Result<Option<Arc<R>>, FactoryErrorKind> {
        let adapt = {
            let definitions = self.definitions.read();
            definitions.get(name).and_then(|definition| adapter(&definition.roles))
        };
        let Some(adapt) = adapt else {
            return Ok(None);
        };
        self.get(name).map(adapt)
    }

    /// # Errors
    /// See [`Self::get`]
    pub fn listener(&self, name: &str) -> Result<Option<Arc<dyn Listener>>, FactoryErrorKind> {
        self.role(name, |roles| roles.listener)
    }

    /// # Errors
    /// See [`Self::get`]
    pub fn lifecycle(&self, name: &str) -> Result<Option<Arc<dyn Lifecycle>>, FactoryErrorKind> {
        self.role(name, |roles| roles.lifecycle)
    }

    /// # Errors
    /// See [`Self::get`]
    pub fn post_processor(&self, name: &str) -> Result<Option<Arc<dyn InstancePostProcessor>>, FactoryErrorKind> {
        self.role(name, |roles| roles.post_processor)
    }

    /// # Errors
    /// See [`Self::get`]
    pub fn factory_post_processor(&self, name: &str) -> Result<Option<Arc<dyn FactoryPostProcessor>>, FactoryErrorKind> {
        self.role(name, |roles| roles.factory_post_processor)
    }

    #[inline]
    pub fn freeze(&self) {
        self.definitions.write().freeze();
    }

    #[inline]
    pub fn reset_caches(&self) {
        self.definitions.read().reset_caches();
    }

    #[inline]
    pub fn destroy_singletons(&self) {
        self.registry.destroy_singletons();
    }
}
