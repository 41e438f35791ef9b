use indexmap::IndexSet;
use std::collections::HashMap;

use crate::{any::Instance, errors::RegistryErrorKind};

/// Produces the early reference of an instance under construction
pub type EarlyFactory = Box<dyn FnOnce() -> Instance + Send + Sync>;
/// Called with the instance when its name is first registered as finished
pub type RegisterCallback = Box<dyn FnOnce(&Instance) + Send + Sync>;

/// Tiers of the instance registry.
///
/// A name lives in at most one of `finished`, `early` and `factories`:
/// every mutation below moves it between tiers instead of copying.
#[derive(Default)]
pub(crate) struct Cache {
    finished: HashMap<String, Instance>,
    early: HashMap<String, Instance>,
    factories: HashMap<String, EarlyFactory>,
    callbacks: HashMap<String, RegisterCallback>,
    registered: IndexSet<String>,
}

impl Cache {
    #[inline]
    #[must_use]
    pub(crate) fn get_finished(&self, name: &str) -> Option<Instance> {
        self.finished.get(name).cloned()
    }

    #[inline]
    #[must_use]
    pub(crate) fn contains_finished(&self, name: &str) -> bool {
        self.finished.contains_key(name)
    }

    #[inline]
    #[must_use]
    pub(crate) fn get_early(&self, name: &str) -> Option<Instance> {
        self.early.get(name).cloned()
    }

    #[cfg(test)]
    #[inline]
    #[must_use]
    pub(crate) fn has_factory(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Promotes `name` to the finished tier.
    ///
    /// Returns the on-register callback to be called outside of the cache lock.
    ///
    /// # Errors
    /// Returns [`RegistryErrorKind::Conflict`] if the name is already finished,
    /// leaving the existing instance untouched
    pub(crate) fn insert_finished(&mut self, name: &str, instance: Instance) -> Result<Option<RegisterCallback>, RegistryErrorKind> {
        if self.finished.contains_key(name) {
            return Err(RegistryErrorKind::Conflict { name: name.to_owned() });
        }
        self.finished.insert(name.to_owned(), instance);
        self.factories.remove(name);
        self.early.remove(name);
        self.registered.insert(name.to_owned());
        Ok(self.callbacks.remove(name))
    }

    /// Registers a factory-pending entry. Ignored if the name is already finished.
    pub(crate) fn insert_factory(&mut self, name: &str, factory: EarlyFactory) -> bool {
        if self.finished.contains_key(name) {
            return false;
        }
        self.factories.insert(name.to_owned(), factory);
        self.early.remove(name);
        self.registered.insert(name.to_owned());
        true
    }

    #[inline]
    #[must_use]
    pub(crate) fn take_factory(&mut self, name: &str) -> Option<EarlyFactory> {
        self.factories.remove(name)
    }

    /// Caches an early reference produced by a consumed factory.
    ///
    /// If the name got finished in the meantime, the finished instance wins and is returned instead.
    pub(crate) fn insert_early(&mut self, name: &str, instance: Instance) -> Instance {
        if let Some(finished) = self.finished.get(name) {
            return finished.clone();
        }
        self.early.insert(name.to_owned(), instance.clone());
        instance
    }

    #[inline]
    pub(crate) fn insert_callback(&mut self, name: &str, callback: RegisterCallback) {
        self.callbacks.insert(name.to_owned(), callback);
    }

    pub(crate) fn remove(&mut self, name: &str) {
        self.finished.remove(name);
        self.factories.remove(name);
        self.early.remove(name);
        self.registered.shift_remove(name);
    }

    pub(crate) fn clear(&mut self) {
        self.finished.clear();
        self.factories.clear();
        self.early.clear();
        self.registered.clear();
    }

    #[inline]
    #[must_use]
    pub(crate) fn names(&self) -> Vec<String> {
        self.registered.iter().cloned().collect()
    }

    #[inline]
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.registered.len()
    }
}
