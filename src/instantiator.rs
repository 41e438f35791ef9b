use std::sync::Arc;
use tracing::debug;

use crate::{
    any::{Instance, TypeInfo},
    factory::Resolver,
    finalizer::{boxed_finalizer, BoxedFinalizer, Finalizer},
};

/// Creates the raw instance of a definition. Dependencies requested through the [`Resolver`]
/// are recorded as dependencies of the created name.
pub trait Instantiator<T: ?Sized>: Send + Sync + 'static {
    fn instantiate(&self, resolver: &Resolver<'_>) -> Result<Arc<T>, anyhow::Error>;
}

impl<F, T> Instantiator<T> for F
where
    F: Fn(&Resolver<'_>) -> Result<Arc<T>, anyhow::Error> + Send + Sync + 'static,
    T: ?Sized,
{
    #[inline]
    fn instantiate(&self, resolver: &Resolver<'_>) -> Result<Arc<T>, anyhow::Error> {
        self(resolver)
    }
}

pub(crate) type BoxedInstantiator = Arc<dyn Fn(&Resolver<'_>) -> Result<Instance, anyhow::Error> + Send + Sync>;
pub(crate) type BoxedStep = Arc<dyn Fn(&Instance, &Resolver<'_>) -> Result<(), anyhow::Error> + Send + Sync>;
pub(crate) type FinalizerFactory = Arc<dyn Fn() -> BoxedFinalizer + Send + Sync>;

#[must_use]
pub(crate) fn boxed_instantiator<T, Inst>(instantiator: Inst) -> BoxedInstantiator
where
    T: Send + Sync + 'static,
    Inst: Instantiator<T>,
{
    Arc::new(move |resolver: &Resolver<'_>| -> Result<Instance, anyhow::Error> {
        let instance = instantiator.instantiate(resolver)?;
        debug!(name = resolver.name(), "Instantiated");
        Ok(instance as Instance)
    })
}

/// Erases the instance type of a populate or init step.
#[must_use]
pub(crate) fn boxed_step<T, F>(step: F) -> BoxedStep
where
    T: Send + Sync + 'static,
    F: Fn(&Arc<T>, &Resolver<'_>) -> Result<(), anyhow::Error> + Send + Sync + 'static,
{
    Arc::new(move |instance: &Instance, resolver: &Resolver<'_>| match instance.clone().downcast::<T>() {
        Ok(instance) => step(&instance, resolver),
        Err(_) => Err(anyhow::anyhow!(
            "instance '{}' is expected to be of type {}",
            resolver.name(),
            TypeInfo::of::<T>()
        )),
    })
}

/// Every instance gets its own copy of the finalizer.
#[must_use]
pub(crate) fn finalizer_factory<T, Fin>(finalizer: Fin) -> FinalizerFactory
where
    T: Send + Sync + 'static,
    Fin: Finalizer<T> + Clone + Sync,
{
    Arc::new(move || boxed_finalizer::<T, Fin>(finalizer.clone()))
}

/// Wrapper to create an instantiator that just returns passed value.
/// It can be used when the value was created outside the container.
#[inline]
#[must_use]
pub fn instance<T: Send + Sync + 'static>(
    value: Arc<T>,
) -> impl Fn(&Resolver<'_>) -> Result<Arc<T>, anyhow::Error> + Clone + Send + Sync + 'static {
    move |_: &Resolver<'_>| -> Result<Arc<T>, anyhow::Error> { Ok(value.clone()) }
}
