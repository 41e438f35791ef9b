use indexmap::IndexMap;
use parking_lot::Mutex;
use std::{collections::HashMap, marker::PhantomData, sync::Arc};
use tracing::{debug, info};

use crate::{
    any::{Instance, TypeInfo},
    errors::FactoryErrorKind,
    event::Listener,
    factory::Resolver,
    finalizer::Finalizer,
    instantiator::{boxed_instantiator, boxed_step, finalizer_factory, BoxedInstantiator, BoxedStep, FinalizerFactory, Instantiator},
    lifecycle::Lifecycle,
    post_processor::{FactoryPostProcessor, InstancePostProcessor},
    scope::Scope,
};

/// Converts an instance into a role trait object, `None` if the instance has another type
pub(crate) type Adapter<R> = fn(Instance) -> Option<Arc<R>>;

/// Infrastructure role a definition can play besides providing its instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Listener,
    Lifecycle,
    PostProcessor,
    FactoryPostProcessor,
}

#[derive(Clone, Copy, Default)]
pub(crate) struct Roles {
    pub(crate) listener: Option<Adapter<dyn Listener>>,
    pub(crate) lifecycle: Option<Adapter<dyn Lifecycle>>,
    pub(crate) post_processor: Option<Adapter<dyn InstancePostProcessor>>,
    pub(crate) factory_post_processor: Option<Adapter<dyn FactoryPostProcessor>>,
}

impl Roles {
    fn has(&self, role: Role) -> bool {
        match role {
            Role::Listener => self.listener.is_some(),
            Role::Lifecycle => self.lifecycle.is_some(),
            Role::PostProcessor => self.post_processor.is_some(),
            Role::FactoryPostProcessor => self.factory_post_processor.is_some(),
        }
    }
}

fn as_listener<T: Listener + 'static>(instance: Instance) -> Option<Arc<dyn Listener>> {
    instance.downcast::<T>().ok().map(|instance| instance as Arc<dyn Listener>)
}

fn as_lifecycle<T: Lifecycle + 'static>(instance: Instance) -> Option<Arc<dyn Lifecycle>> {
    instance.downcast::<T>().ok().map(|instance| instance as Arc<dyn Lifecycle>)
}

fn as_post_processor<T: InstancePostProcessor + 'static>(instance: Instance) -> Option<Arc<dyn InstancePostProcessor>> {
    instance.downcast::<T>().ok().map(|instance| instance as Arc<dyn InstancePostProcessor>)
}

fn as_factory_post_processor<T: FactoryPostProcessor + 'static>(instance: Instance) -> Option<Arc<dyn FactoryPostProcessor>> {
    instance
        .downcast::<T>()
        .ok()
        .map(|instance| instance as Arc<dyn FactoryPostProcessor>)
}

/// Recipe of one managed name.
///
/// Creation runs in two phases: the instantiator creates the raw instance, then the populator
/// wires it up. Between them the raw instance is exposed as an early reference, so populators of
/// two singletons can refer to each other.
#[derive(Clone)]
pub struct Definition {
    pub(crate) name: String,
    pub(crate) type_info: TypeInfo,
    pub(crate) instantiator: BoxedInstantiator,
    pub(crate) populator: Option<BoxedStep>,
    pub(crate) init: Option<BoxedStep>,
    pub(crate) finalizer: Option<FinalizerFactory>,
    pub(crate) scope: Scope,
    pub(crate) lazy: bool,
    pub(crate) depends_on: Vec<String>,
    pub(crate) roles: Roles,
}

impl Definition {
    /// Starts a singleton definition created by `instantiator`.
    /// See [`crate::instance`] for values created outside the container
    #[inline]
    #[must_use]
    pub fn builder<T, F>(name: impl Into<String>, instantiator: F) -> DefinitionBuilder<T>
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> Result<Arc<T>, anyhow::Error> + Send + Sync + 'static,
    {
        Self::with_instantiator::<T, F>(name, instantiator)
    }

    #[must_use]
    pub fn with_instantiator<T, Inst>(name: impl Into<String>, instantiator: Inst) -> DefinitionBuilder<T>
    where
        T: Send + Sync + 'static,
        Inst: Instantiator<T>,
    {
        DefinitionBuilder {
            definition: Definition {
                name: name.into(),
                type_info: TypeInfo::of::<T>(),
                instantiator: boxed_instantiator(instantiator),
                populator: None,
                init: None,
                finalizer: None,
                scope: Scope::Singleton,
                lazy: false,
                depends_on: Vec::new(),
                roles: Roles::default(),
            },
            _marker: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    #[inline]
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    #[inline]
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    #[inline]
    #[must_use]
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    #[inline]
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.has(role)
    }

    #[inline]
    pub fn set_scope(&mut self, scope: Scope) {
        self.scope = scope;
    }

    #[inline]
    pub fn set_lazy(&mut self, lazy: bool) {
        self.lazy = lazy;
    }

    pub fn add_depends_on(&mut self, name: impl Into<String>) {
        self.depends_on.push(name.into());
    }
}

pub struct DefinitionBuilder<T> {
    definition: Definition,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DefinitionBuilder<T>
where
    T: Send + Sync + 'static,
{
    #[inline]
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.definition.scope = scope;
        self
    }

    #[inline]
    #[must_use]
    pub fn prototype(self) -> Self {
        self.scope(Scope::Prototype)
    }

    /// Lazy singletons aren't created on refresh, only on first lookup
    #[inline]
    #[must_use]
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.definition.lazy = lazy;
        self
    }

    /// Names created before this one and destroyed after it
    #[must_use]
    pub fn depends_on(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.definition.depends_on.extend(names.into_iter().map(Into::into));
        self
    }

    /// Second creation phase, called with the raw instance after it was exposed as an early reference
    #[must_use]
    pub fn populate<F>(mut self, populator: F) -> Self
    where
        F: Fn(&Arc<T>, &Resolver<'_>) -> Result<(), anyhow::Error> + Send + Sync + 'static,
    {
        self.definition.populator = Some(boxed_step(populator));
        self
    }

    /// Called after population, between the `before_init` and `after_init` post-processing steps
    #[must_use]
    pub fn init<F>(mut self, init: F) -> Self
    where
        F: Fn(&Arc<T>) -> Result<(), anyhow::Error> + Send + Sync + 'static,
    {
        self.definition.init = Some(boxed_step(move |instance: &Arc<T>, _: &Resolver<'_>| init(instance)));
        self
    }

    /// Called on destruction of singletons. Prototypes are never finalized by the container
    #[must_use]
    pub fn finalizer<Fin>(mut self, finalizer: Fin) -> Self
    where
        Fin: Finalizer<T> + Clone + Sync,
    {
        self.definition.finalizer = Some(finalizer_factory(finalizer));
        self
    }

    #[must_use]
    pub fn build(self) -> Definition {
        self.definition
    }
}

impl<T> DefinitionBuilder<T>
where
    T: Listener + 'static,
{
    /// Registers the instance as an event listener. It's created on the first multicast event
    #[inline]
    #[must_use]
    pub fn listener(mut self) -> Self {
        self.definition.roles.listener = Some(as_listener::<T>);
        self
    }
}

impl<T> DefinitionBuilder<T>
where
    T: Lifecycle + 'static,
{
    #[inline]
    #[must_use]
    pub fn lifecycle(mut self) -> Self {
        self.definition.roles.lifecycle = Some(as_lifecycle::<T>);
        self
    }
}

impl<T> DefinitionBuilder<T>
where
    T: InstancePostProcessor + 'static,
{
    #[inline]
    #[must_use]
    pub fn post_processor(mut self) -> Self {
        self.definition.roles.post_processor = Some(as_post_processor::<T>);
        self
    }
}

impl<T> DefinitionBuilder<T>
where
    T: FactoryPostProcessor + 'static,
{
    #[inline]
    #[must_use]
    pub fn factory_post_processor(mut self) -> Self {
        self.definition.roles.factory_post_processor = Some(as_factory_post_processor::<T>);
        self
    }
}

/// Insertion-ordered definitions of a factory.
pub struct DefinitionRegistry {
    definitions: IndexMap<String, Definition>,
    allow_overriding: bool,
    frozen: bool,
    /// Names by role, built on demand and dropped on every change
    role_index: Mutex<HashMap<Role, Vec<String>>>,
}

impl DefinitionRegistry {
    #[inline]
    #[must_use]
    pub fn new(allow_overriding: bool) -> Self {
        Self {
            definitions: IndexMap::new(),
            allow_overriding,
            frozen: false,
            role_index: Mutex::new(HashMap::new()),
        }
    }

    /// # Errors
    /// - Returns [`FactoryErrorKind::Frozen`] if the registry is frozen
    /// - Returns [`FactoryErrorKind::DuplicateDefinition`] if the name is taken and overriding is disabled
    pub fn register(&mut self, definition: Definition) -> Result<(), FactoryErrorKind> {
        let name = definition.name.clone();
        if self.frozen {
            return Err(FactoryErrorKind::Frozen { name });
        }
        if let Some(existing) = self.definitions.get(&name) {
            if !self.allow_overriding {
                return Err(FactoryErrorKind::DuplicateDefinition { name });
            }
            info!(
                name,
                previous = %existing.type_info,
                current = %definition.type_info,
                "Overriding definition"
            );
        } else {
            debug!(name, type_info = %definition.type_info, "Definition registered");
        }

        self.definitions.insert(name, definition);
        self.reset_caches();
        Ok(())
    }

    /// Changes a registered definition in place.
    ///
    /// # Errors
    /// - Returns [`FactoryErrorKind::Frozen`] if the registry is frozen
    /// - Returns [`FactoryErrorKind::NoDefinition`] if there's no definition with this name
    pub fn modify(&mut self, name: &str, modify: impl FnOnce(&mut Definition)) -> Result<(), FactoryErrorKind> {
        if self.frozen {
            return Err(FactoryErrorKind::Frozen { name: name.to_owned() });
        }
        let definition = self
            .definitions
            .get_mut(name)
            .ok_or_else(|| FactoryErrorKind::NoDefinition { name: name.to_owned() })?;
        modify(definition);
        self.reset_caches();
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    #[inline]
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    #[must_use]
    pub fn names_by_role(&self, role: Role) -> Vec<String> {
        self.role_index
            .lock()
            .entry(role)
            .or_insert_with(|| {
                self.definitions
                    .values()
                    .filter(|definition| definition.roles.has(role))
                    .map(|definition| definition.name.clone())
                    .collect()
            })
            .clone()
    }

    /// Forbids further changes of definitions
    #[inline]
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    #[inline]
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[inline]
    pub fn reset_caches(&self) {
        self.role_index.lock().clear();
    }
}

/// Loads definitions into a fresh factory on every container refresh.
pub trait DefinitionSource: Send + Sync {
    /// # Errors
    /// An error fails the container refresh
    fn load(&self, definitions: &mut DefinitionRegistry) -> Result<(), anyhow::Error>;
}

impl<F> DefinitionSource for F
where
    F: Fn(&mut DefinitionRegistry) -> Result<(), anyhow::Error> + Send + Sync,
{
    #[inline]
    fn load(&self, definitions: &mut DefinitionRegistry) -> Result<(), anyhow::Error> {
        self(definitions)
    }
}

#[cfg(test)]
mod tests {
    use super::{Definition, DefinitionRegistry, Role};
    use crate::{
        errors::FactoryErrorKind,
        event::{Event, Listener},
        instantiator::instance,
        scope::Scope,
    };

    use std::sync::Arc;

    struct Audit;

    impl Listener for Audit {
        fn on_event(&self, _event: &Event) -> Result<(), anyhow::Error> {
            Ok(())
        }
    }

    #[test]
    fn test_builder() {
        let definition = Definition::builder("audit", instance(Arc::new(Audit)))
            .prototype()
            .lazy(true)
            .depends_on(["db"])
            .listener()
            .build();

        assert_eq!(definition.name(), "audit");
        assert!(definition.type_info().is::<Audit>());
        assert_eq!(definition.scope(), Scope::Prototype);
        assert!(definition.is_lazy());
        assert_eq!(definition.depends_on(), ["db"]);
        assert!(definition.has_role(Role::Listener));
        assert!(!definition.has_role(Role::Lifecycle));
    }

    #[test]
    fn test_overriding_policy() {
        let mut registry = DefinitionRegistry::new(false);
        registry.register(Definition::builder("a", instance(Arc::new(1u8))).build()).unwrap();

        let err = registry
            .register(Definition::builder("a", instance(Arc::new(2u8))).build())
            .unwrap_err();
        assert!(matches!(err, FactoryErrorKind::DuplicateDefinition { name } if name == "a"));

        let mut registry = DefinitionRegistry::new(true);
        registry.register(Definition::builder("a", instance(Arc::new(1u8))).build()).unwrap();
        registry.register(Definition::builder("a", instance(Arc::new("a"))).build()).unwrap();
        assert!(registry.get("a").unwrap().type_info().is::<&str>());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_frozen_rejects_changes() {
        let mut registry = DefinitionRegistry::new(true);
        registry.register(Definition::builder("a", instance(Arc::new(1u8))).build()).unwrap();
        registry.freeze();

        assert!(matches!(
            registry.register(Definition::builder("b", instance(Arc::new(1u8))).build()),
            Err(FactoryErrorKind::Frozen { .. })
        ));
        assert!(matches!(
            registry.modify("a", |definition| definition.set_lazy(true)),
            Err(FactoryErrorKind::Frozen { .. })
        ));
    }

    #[test]
    fn test_role_index_follows_changes() {
        let mut registry = DefinitionRegistry::new(true);
        registry.register(Definition::builder("audit", instance(Arc::new(Audit))).listener().build()).unwrap();
        registry.register(Definition::builder("plain", instance(Arc::new(1u8))).build()).unwrap();

        assert_eq!(registry.names_by_role(Role::Listener), ["audit"]);

        registry
            .register(Definition::builder("second", instance(Arc::new(Audit))).listener().build())
            .unwrap();
        assert_eq!(registry.names_by_role(Role::Listener), ["audit", "second"]);
        assert!(registry.names_by_role(Role::Lifecycle).is_empty());
    }
}
