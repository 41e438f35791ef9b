use std::time::Duration;

/// Whether a container may be refreshed again after it was closed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// `New -> Active -> Closed` only once. A second refresh fails
    #[default]
    Once,
    /// `Active <-> Closed` cycles: every refresh builds a fresh factory, destroying the previous one
    Repeatable,
}

/// Config for a container
/// ## Fields
/// - `id`:
///   Display name of the container, attached to refresh and close spans.
/// - `refresh_policy`:
///   See [`RefreshPolicy`].
/// - `allow_circular_references`:
///   If `true`, singletons in creation expose early references, so circular references between them resolve.
///
///   Circular references through instantiators (not populators) never resolve.
/// - `allow_definition_overriding`:
///   If `true`, registering a definition under a taken name replaces the previous one.
/// - `shutdown_grace`:
///   How long a shutdown hook waits for a thread stuck in refresh or close before giving up.
#[derive(Clone, Debug)]
pub struct Config {
    pub id: String,
    pub refresh_policy: RefreshPolicy,
    pub allow_circular_references: bool,
    pub allow_definition_overriding: bool,
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: "sprout".to_owned(),
            refresh_policy: RefreshPolicy::Once,
            allow_circular_references: true,
            allow_definition_overriding: true,
            shutdown_grace: Duration::from_millis(10),
        }
    }
}

impl Config {
    #[inline]
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn refresh_policy(mut self, refresh_policy: RefreshPolicy) -> Self {
        self.refresh_policy = refresh_policy;
        self
    }

    #[inline]
    #[must_use]
    pub fn allow_circular_references(mut self, allow: bool) -> Self {
        self.allow_circular_references = allow;
        self
    }

    #[inline]
    #[must_use]
    pub fn allow_definition_overriding(mut self, allow: bool) -> Self {
        self.allow_definition_overriding = allow;
        self
    }

    #[inline]
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
