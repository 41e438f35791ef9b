use core::{
    any::{type_name, Any, TypeId},
    cmp::Ordering,
    fmt,
};
use std::sync::Arc;

/// Shared handle to a managed instance.
///
/// Two names can hold each other through early references, so instances are
/// always reference counted and never uniquely owned by the registry.
pub type Instance = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    pub name: &'static str,
    pub id: TypeId,
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl PartialOrd for TypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl TypeInfo {
    #[inline]
    #[must_use]
    pub fn of<T>() -> Self
    where
        T: ?Sized + 'static,
    {
        Self {
            name: type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    #[inline]
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit_once("::").map_or(self.name, |(_, name)| name)
    }

    #[inline]
    #[must_use]
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

/// Wraps a value into an [`Instance`].
#[inline]
#[must_use]
pub fn share<T: Send + Sync + 'static>(value: T) -> Instance {
    Arc::new(value)
}

/// Downcasts an [`Instance`] to its concrete type, handing the instance back on mismatch.
#[inline]
pub fn downcast<T: Send + Sync + 'static>(instance: Instance) -> Result<Arc<T>, Instance> {
    instance.downcast::<T>()
}
