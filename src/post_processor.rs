use crate::{any::Instance, factory::Factory};

/// Hooks into the creation of every instance created after the hook was registered.
///
/// Each step may replace the instance, e.g. with a wrapper.
pub trait InstancePostProcessor: Send + Sync {
    /// Called when another instance asks for `name` while it's in creation.
    /// Must return the same reference it will return from [`Self::after_init`] for this instance.
    fn early_reference(&self, name: &str, instance: Instance) -> Instance {
        let _ = name;
        instance
    }

    /// # Errors
    /// An error fails the creation of `name`
    fn before_init(&self, name: &str, instance: Instance) -> Result<Instance, anyhow::Error> {
        let _ = name;
        Ok(instance)
    }

    /// # Errors
    /// An error fails the creation of `name`
    fn after_init(&self, name: &str, instance: Instance) -> Result<Instance, anyhow::Error> {
        let _ = name;
        Ok(instance)
    }
}

/// Mutates definitions before any regular instance is created.
pub trait FactoryPostProcessor: Send + Sync {
    /// # Errors
    /// An error fails the container refresh
    fn post_process(&self, factory: &Factory) -> Result<(), anyhow::Error>;
}

impl<F> FactoryPostProcessor for F
where
    F: Fn(&Factory) -> Result<(), anyhow::Error> + Send + Sync,
{
    #[inline]
    fn post_process(&self, factory: &Factory) -> Result<(), anyhow::Error> {
        self(factory)
    }
}
