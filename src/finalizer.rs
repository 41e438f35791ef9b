use std::sync::Arc;

use crate::any::{Instance, TypeInfo};

pub trait Finalizer<Dep: ?Sized>: Send + 'static {
    fn finalize(&mut self, instance: Arc<Dep>) -> Result<(), anyhow::Error>;
}

impl<F, Dep> Finalizer<Dep> for F
where
    F: FnMut(Arc<Dep>) -> Result<(), anyhow::Error> + Send + 'static,
    Dep: ?Sized,
{
    #[inline]
    fn finalize(&mut self, instance: Arc<Dep>) -> Result<(), anyhow::Error> {
        self(instance)
    }
}

pub(crate) type BoxedFinalizer = Box<dyn FnMut(Instance) -> Result<(), anyhow::Error> + Send>;

/// Erases the instance type of a finalizer, so it can be stored next to any other.
#[must_use]
pub(crate) fn boxed_finalizer<Dep, Fin>(mut finalizer: Fin) -> BoxedFinalizer
where
    Dep: Send + Sync + 'static,
    Fin: Finalizer<Dep>,
{
    Box::new(move |instance: Instance| match instance.downcast::<Dep>() {
        Ok(instance) => finalizer.finalize(instance),
        Err(_) => Err(anyhow::anyhow!(
            "finalizer expects an instance of type {}",
            TypeInfo::of::<Dep>()
        )),
    })
}

/// Destruction callback registered for one managed name.
///
/// The callback owns a handle to the instance, so the registration stays valid
/// even after the name is removed from the registry tiers.
pub struct Disposable {
    instance: Instance,
    finalizer: BoxedFinalizer,
}

impl Disposable {
    #[inline]
    #[must_use]
    pub fn new<Dep, Fin>(instance: Arc<Dep>, finalizer: Fin) -> Self
    where
        Dep: Send + Sync + 'static,
        Fin: Finalizer<Dep>,
    {
        Self {
            instance: instance as Instance,
            finalizer: boxed_finalizer(finalizer),
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn from_boxed(instance: Instance, finalizer: BoxedFinalizer) -> Self {
        Self { instance, finalizer }
    }

    /// Consumes the registration, calling its finalizer once
    pub(crate) fn destroy(mut self) -> Result<(), anyhow::Error> {
        (self.finalizer)(self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::{boxed_finalizer, Disposable};
    use crate::any::share;

    use std::sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    };

    #[test]
    fn test_disposable_calls_finalizer_with_instance() {
        let seen = Arc::new(AtomicU8::new(0));
        let disposable = Disposable::new(Arc::new(7u8), {
            let seen = seen.clone();
            move |value: Arc<u8>| -> anyhow::Result<()> {
                seen.store(*value, Ordering::SeqCst);
                Ok(())
            }
        });

        disposable.destroy().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_boxed_finalizer_type_mismatch() {
        let mut finalizer = boxed_finalizer::<u8, _>(|_: Arc<u8>| -> anyhow::Result<()> { Ok(()) });
        assert!(finalizer(share("not u8")).is_err());
        assert!(finalizer(share(1u8)).is_ok());
    }
}
