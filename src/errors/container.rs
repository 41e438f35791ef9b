use super::factory::FactoryErrorKind;

#[derive(thiserror::Error, Debug)]
pub enum ContainerErrorKind {
    #[error("Illegal container state: {0}")]
    IllegalState(&'static str),
    #[error("Failed to load definitions: {0}")]
    Definitions(#[source] anyhow::Error),
    #[error("Factory post-processing failed: {0}")]
    PostProcessing(#[source] anyhow::Error),
    #[error("Event listener failed: {0}")]
    Event(#[source] anyhow::Error),
    #[error("Lifecycle processing failed: {0}")]
    Lifecycle(#[source] anyhow::Error),
    #[error("Refresh hook failed: {0}")]
    Hook(#[source] anyhow::Error),
    #[error(transparent)]
    Factory(#[from] FactoryErrorKind),
}
