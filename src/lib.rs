pub(crate) mod any;
pub(crate) mod cache;
pub(crate) mod config;
pub(crate) mod container;
pub(crate) mod definition;
pub(crate) mod dependency;
pub(crate) mod environment;
pub(crate) mod errors;
pub(crate) mod event;
pub(crate) mod factory;
pub(crate) mod finalizer;
pub(crate) mod instantiator;
pub(crate) mod lifecycle;
pub(crate) mod message;
pub(crate) mod post_processor;
pub(crate) mod registry;
pub(crate) mod scope;

pub use any::{downcast, share, Instance, TypeInfo};
pub use config::{Config, RefreshPolicy};
pub use container::{
    Container, ContainerBuilder, RefreshHooks, ShutdownHook, State, ENVIRONMENT, EVENT_MULTICASTER, LIFECYCLE_PROCESSOR,
    MESSAGE_SOURCE, SYSTEM_ENVIRONMENT,
};
pub use definition::{Definition, DefinitionBuilder, DefinitionRegistry, DefinitionSource, Role};
pub use environment::{system_environment, Environment};
pub use errors::{ContainerErrorKind, FactoryErrorKind, RegistryErrorKind, SUPPRESSED_ERRORS_LIMIT};
pub use event::{listener_fn, ErrorHandler, Event, EventPublisher, Listener, Multicaster, SimpleMulticaster};
pub use factory::{Factory, Resolver};
pub use finalizer::{Disposable, Finalizer};
pub use instantiator::{instance, Instantiator};
pub use lifecycle::{DefaultLifecycleProcessor, Lifecycle, LifecycleProcessor};
pub use message::{format_message, DelegatingMessageSource, MessageSource, StaticMessageSource};
pub use post_processor::{FactoryPostProcessor, InstancePostProcessor};
pub use registry::Registry;
pub use scope::Scope;
