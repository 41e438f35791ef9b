use std::collections::VecDeque;

/// Max count of suppressed errors attached to a failed creation
pub const SUPPRESSED_ERRORS_LIMIT: usize = 100;

#[derive(thiserror::Error, Debug)]
pub enum RegistryErrorKind {
    #[error("Could not register instance under name '{name}': there is already an instance bound")]
    Conflict { name: String },
    #[error("Instance '{name}' is currently in creation: is there an unresolvable circular reference?")]
    CurrentlyInCreation { name: String },
    #[error(
        "\
        Creation of '{name}' not allowed while instances of this registry are in destruction. \
        Do not request an instance from a finalizer\
        "
    )]
    CreationNotAllowed { name: String },
    #[error("Error creating instance '{name}': {source}")]
    Creation {
        name: String,
        #[source]
        source: anyhow::Error,
        /// Errors suppressed while this creation was in progress, oldest first
        related: Vec<anyhow::Error>,
    },
}

impl RegistryErrorKind {
    #[inline]
    #[must_use]
    pub(crate) fn creation(name: &str, source: anyhow::Error, related: Option<VecDeque<anyhow::Error>>) -> Self {
        Self::Creation {
            name: name.to_owned(),
            source,
            related: related.map(Vec::from).unwrap_or_default(),
        }
    }

    /// Name of the slot this error refers to
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Conflict { name }
            | Self::CurrentlyInCreation { name }
            | Self::CreationNotAllowed { name }
            | Self::Creation { name, .. } => name,
        }
    }

    /// Errors suppressed during the failed creation, empty for other kinds
    #[must_use]
    pub fn related(&self) -> &[anyhow::Error] {
        match self {
            Self::Creation { related, .. } => related,
            _ => &[],
        }
    }
}
