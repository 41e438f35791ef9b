use indexmap::IndexMap;
use parking_lot::RwLock;
use std::env;

/// String properties visible to every definition through the `environment` name.
///
/// Seeded from the process environment; programmatic properties override seeded ones.
#[derive(Default, Debug)]
pub struct Environment {
    properties: RwLock<IndexMap<String, String>>,
}

impl Environment {
    /// Empty environment, without process variables
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_process() -> Self {
        Self {
            properties: RwLock::new(system_environment()),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_property(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.write().insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get_property(&self, key: &str) -> Option<String> {
        self.properties.read().get(key).cloned()
    }

    #[must_use]
    pub fn get_property_or(&self, key: &str, default: &str) -> String {
        self.get_property(key).unwrap_or_else(|| default.to_owned())
    }

    #[inline]
    #[must_use]
    pub fn contains_property(&self, key: &str) -> bool {
        self.properties.read().contains_key(key)
    }
}

/// Snapshot of the process environment variables. Variables that aren't valid unicode are skipped
#[must_use]
pub fn system_environment() -> IndexMap<String, String> {
    env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::Environment;

    #[test]
    fn test_properties() {
        let environment = Environment::new().with_property("app.name", "sprout");

        assert_eq!(environment.get_property("app.name").as_deref(), Some("sprout"));
        assert_eq!(environment.get_property_or("app.port", "8080"), "8080");

        environment.set_property("app.name", "other");
        assert_eq!(environment.get_property("app.name").as_deref(), Some("other"));
        assert!(!environment.contains_property("app.port"));
    }

    #[test]
    fn test_from_process_sees_path() {
        let environment = Environment::from_process();
        if std::env::var("PATH").is_ok() {
            assert!(environment.contains_property("PATH"));
        }
    }
}
