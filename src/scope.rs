use core::fmt;

/// Lifetime of the instances created from a definition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    /// One shared instance per container refresh, cached in the registry
    #[default]
    Singleton,
    /// A new instance on every lookup, never cached and never destroyed by the container
    Prototype,
}

impl Scope {
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Scope::Singleton => "singleton",
            Scope::Prototype => "prototype",
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_singleton(&self) -> bool {
        matches!(self, Scope::Singleton)
    }

    #[inline]
    #[must_use]
    pub const fn is_prototype(&self) -> bool {
        matches!(self, Scope::Prototype)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
