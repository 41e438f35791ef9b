use super::registry::RegistryErrorKind;

#[derive(thiserror::Error, Debug)]
pub enum FactoryErrorKind {
    #[error("No definition named '{name}' found")]
    NoDefinition { name: String },
    #[error("Instance '{name}' has incorrect type. Expected: {expected}")]
    IncorrectType { name: String, expected: &'static str },
    #[error("Circular depends-on relationship between '{name}' and '{dependency}'")]
    CircularDependsOn { name: String, dependency: String },
    #[error("Cannot register definition '{name}': there is already a definition bound and overriding is disabled")]
    DuplicateDefinition { name: String },
    #[error("Cannot register definition '{name}': configuration is frozen")]
    Frozen { name: String },
    #[error(
        "\
        Instance '{name}' has been injected into other instances in its raw version as part of a circular reference, \
        but has eventually been wrapped by a post-processor\
        "
    )]
    EarlyReferenceMismatch { name: String },
    #[error(transparent)]
    Registry(#[from] RegistryErrorKind),
}

impl FactoryErrorKind {
    /// Whether this is a re-entrant creation attempt, directly or wrapped in a creation failure
    #[must_use]
    pub fn is_currently_in_creation(&self) -> bool {
        match self {
            Self::Registry(RegistryErrorKind::CurrentlyInCreation { .. }) => true,
            Self::Registry(RegistryErrorKind::Creation { source, .. }) => source
                .downcast_ref::<FactoryErrorKind>()
                .is_some_and(FactoryErrorKind::is_currently_in_creation),
            _ => false,
        }
    }
}
