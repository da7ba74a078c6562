//! Capability lookup: live action registry and metadata-only catalog

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::{Action, ActionMeta};

/// What the validator needs to know about available actions.
pub trait CapabilityCatalog: Send + Sync {
    /// Names of every available action
    fn capabilities(&self) -> BTreeSet<String>;

    /// Contract of one action, if it exists
    fn meta(&self, name: &str) -> Option<ActionMeta>;

    fn contains(&self, name: &str) -> bool {
        self.meta(name).is_some()
    }
}

/// Action registry for looking up executors by name
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register an action, replacing any previous action of the same name
    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    /// Builder-style `register`
    pub fn with_action(mut self, action: Arc<dyn Action>) -> Self {
        self.register(action);
        self
    }

    /// Resolve an action name to its executor
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// Sorted action names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityCatalog for ActionRegistry {
    fn capabilities(&self) -> BTreeSet<String> {
        self.actions.keys().cloned().collect()
    }

    fn meta(&self, name: &str) -> Option<ActionMeta> {
        self.actions.get(name).map(|action| action.metadata())
    }

    fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }
}

/// Metadata-only catalog, used where no executors exist (offline plan checks).
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: BTreeMap<String, ActionMeta>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, meta: ActionMeta) {
        self.entries.insert(meta.name.clone(), meta);
    }

    pub fn with(mut self, meta: ActionMeta) -> Self {
        self.insert(meta);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<ActionMeta> for StaticCatalog {
    fn from_iter<I: IntoIterator<Item = ActionMeta>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for meta in iter {
            catalog.insert(meta);
        }
        catalog
    }
}

impl CapabilityCatalog for StaticCatalog {
    fn capabilities(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    fn meta(&self, name: &str) -> Option<ActionMeta> {
        self.entries.get(name).cloned()
    }
}
