mod container;
mod factory;
mod registry;

pub use container::ContainerErrorKind;
pub use factory::FactoryErrorKind;
pub use registry::{RegistryErrorKind, SUPPRESSED_ERRORS_LIMIT};
