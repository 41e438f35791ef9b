use core::{any::Any, fmt};
use indexmap::IndexSet;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::factory::Factory;

/// Event published by a container.
#[derive(Clone)]
pub enum Event {
    Refreshed,
    Started,
    Stopped,
    Closed,
    /// Arbitrary application event
    Payload(Arc<dyn Any + Send + Sync>),
}

impl Event {
    #[inline]
    #[must_use]
    pub fn payload<T: Send + Sync + 'static>(value: T) -> Self {
        Self::Payload(Arc::new(value))
    }

    /// Returns the payload if this is an application event carrying a `T`.
    #[must_use]
    pub fn downcast_payload<T: 'static>(&self) -> Option<&T> {
        match self {
            Self::Payload(payload) => payload.downcast_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refreshed => f.write_str("Refreshed"),
            Self::Started => f.write_str("Started"),
            Self::Stopped => f.write_str("Stopped"),
            Self::Closed => f.write_str("Closed"),
            Self::Payload(_) => f.write_str("Payload(..)"),
        }
    }
}

pub trait Listener: Send + Sync {
    fn on_event(&self, event: &Event) -> Result<(), anyhow::Error>;
}

impl<F> Listener for F
where
    F: Fn(&Event) -> Result<(), anyhow::Error> + Send + Sync,
{
    #[inline]
    fn on_event(&self, event: &Event) -> Result<(), anyhow::Error> {
        self(event)
    }
}

/// Wraps a closure into a shared [`Listener`].
#[inline]
#[must_use]
pub fn listener_fn<F>(f: F) -> Arc<dyn Listener>
where
    F: Fn(&Event) -> Result<(), anyhow::Error> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Accepts events published by publishers outside of the container internals, e.g. refresh hooks.
pub trait EventPublisher {
    /// # Errors
    /// Returns an error if a listener fails to handle the event
    fn publish_event(&self, event: Event) -> Result<(), crate::errors::ContainerErrorKind>;
}

/// Delivers events to registered listeners.
///
/// Listener names are resolved through the factory on every multicast, so listener instances
/// aren't created before the first event.
pub trait Multicaster: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn Listener>);

    fn add_listener_name(&self, name: &str);

    fn remove_all_listeners(&self);

    /// # Errors
    /// Returns the first listener error, unless the multicaster handles listener errors itself
    fn multicast(&self, event: &Event, factory: &Factory) -> Result<(), anyhow::Error>;
}

pub type ErrorHandler = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

#[derive(Default)]
pub struct SimpleMulticaster {
    listeners: RwLock<Vec<Arc<dyn Listener>>>,
    listener_names: RwLock<IndexSet<String>>,
    error_handler: Option<ErrorHandler>,
}

impl SimpleMulticaster {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener errors are passed to `handler` instead of being propagated to the publisher.
    #[inline]
    #[must_use]
    pub fn with_error_handler(handler: impl Fn(&anyhow::Error) + Send + Sync + 'static) -> Self {
        Self {
            error_handler: Some(Arc::new(handler)),
            ..Self::default()
        }
    }

    /// Handler that only logs listener errors
    #[must_use]
    pub fn logging() -> Self {
        Self::with_error_handler(|err| warn!(%err, "Listener failed to handle event"))
    }

    fn invoke(&self, listener: &dyn Listener, event: &Event) -> Result<(), anyhow::Error> {
        match (listener.on_event(event), &self.error_handler) {
            (Ok(()), _) => Ok(()),
            (Err(err), Some(handler)) => {
                handler(&err);
                Ok(())
            }
            (Err(err), None) => Err(err),
        }
    }
}

impl Multicaster for SimpleMulticaster {
    fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.listeners.write().push(listener);
    }

    fn add_listener_name(&self, name: &str) {
        self.listener_names.write().insert(name.to_owned());
    }

    fn remove_all_listeners(&self) {
        self.listeners.write().clear();
        self.listener_names.write().clear();
    }

    fn multicast(&self, event: &Event, factory: &Factory) -> Result<(), anyhow::Error> {
        let listeners = self.listeners.read().clone();
        let names: Vec<String> = self.listener_names.read().iter().cloned().collect();
        trace!(?event, listeners = listeners.len(), names = names.len(), "Multicasting");

        for listener in &listeners {
            self.invoke(listener.as_ref(), event)?;
        }
        for name in &names {
            match factory.listener(name)? {
                Some(listener) => self.invoke(listener.as_ref(), event)?,
                None => debug!(name, "Name isn't a listener anymore, skipped"),
            }
        }
        Ok(())
    }
}
