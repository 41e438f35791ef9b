use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use std::collections::HashSet;

type Edges = IndexMap<String, IndexSet<String>>;

/// Destruction-ordering relationships between managed names.
///
/// `dependents` maps a name to the names that must be destroyed before it,
/// `dependencies` is the inverse index and `contained` maps an outer name to
/// the inner names it owns. Edges are independent of whether either side has
/// been created yet.
///
/// Each map sits behind its own lock, and no method holds two of them at once.
#[derive(Default)]
pub(crate) struct DependencyEdges {
    dependents: Mutex<Edges>,
    dependencies: Mutex<Edges>,
    contained: Mutex<Edges>,
}

impl DependencyEdges {
    /// Records that `dependent` depends on `name`.
    /// Returns `false` if the edge was already known.
    pub(crate) fn register_dependent(&self, name: &str, dependent: &str) -> bool {
        {
            let mut dependents = self.dependents.lock();
            if !dependents.entry(name.to_owned()).or_default().insert(dependent.to_owned()) {
                return false;
            }
        }
        self.dependencies
            .lock()
            .entry(dependent.to_owned())
            .or_default()
            .insert(name.to_owned());
        true
    }

    /// Records that `outer` logically contains `inner`.
    /// The outer name also becomes a dependent of the inner one.
    pub(crate) fn register_contained(&self, inner: &str, outer: &str) {
        {
            let mut contained = self.contained.lock();
            if !contained.entry(outer.to_owned()).or_default().insert(inner.to_owned()) {
                return;
            }
        }
        self.register_dependent(inner, outer);
    }

    /// Whether `dependent` depends on `name`, directly or transitively.
    pub(crate) fn is_dependent(&self, name: &str, dependent: &str) -> bool {
        let dependents = self.dependents.lock();

        let mut seen = HashSet::new();
        let mut stack = vec![name];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(direct) = dependents.get(current) else {
                continue;
            };
            if direct.contains(dependent) {
                return true;
            }
            stack.extend(direct.iter().map(String::as_str));
        }
        false
    }

    #[must_use]
    pub(crate) fn has_dependents(&self, name: &str) -> bool {
        self.dependents.lock().get(name).is_some_and(|set| !set.is_empty())
    }

    #[must_use]
    pub(crate) fn dependents_of(&self, name: &str) -> Vec<String> {
        self.dependents
            .lock()
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub(crate) fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.dependencies
            .lock()
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub(crate) fn take_dependents(&self, name: &str) -> Option<IndexSet<String>> {
        self.dependents.lock().shift_remove(name)
    }

    #[must_use]
    pub(crate) fn take_contained(&self, name: &str) -> Option<IndexSet<String>> {
        self.contained.lock().shift_remove(name)
    }

    /// Removes `name` from every dependents set and drops its own dependencies entry.
    pub(crate) fn prune(&self, name: &str) {
        self.dependents.lock().retain(|_, dependents| {
            dependents.shift_remove(name);
            !dependents.is_empty()
        });
        self.dependencies.lock().shift_remove(name);
    }

    pub(crate) fn clear(&self) {
        self.contained.lock().clear();
        self.dependents.lock().clear();
        self.dependencies.lock().clear();
    }
}
