//! Predicates selecting which containers a session looks at.

use crate::core::container::Container;

/// Composable container predicate. The zero value matches everything.
#[derive(Debug, Clone, Default)]
pub struct ContainerFilter {
    /// Explicit include list; empty means all names.
    names: Vec<String>,
    /// Explicit exclude list, applied before everything else.
    disabled: Vec<String>,
    /// When set, only containers labeled `enable=true` are selected.
    /// Otherwise `enable=false` merely opts a container out.
    label_enable: bool,
    /// `None` disables scope filtering. `Some("")` selects only unscoped
    /// containers; any other value selects that exact scope.
    scope: Option<String>,
    /// Restrict to updater-labeled containers (instance reconciliation).
    updater_only: bool,
}

impl ContainerFilter {
    pub fn matching_all() -> Self {
        Self::default()
    }

    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = names;
        self
    }

    pub fn with_disabled(mut self, names: Vec<String>) -> Self {
        self.disabled = names;
        self
    }

    pub fn with_label_enable(mut self, required: bool) -> Self {
        self.label_enable = required;
        self
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn updaters_only() -> Self {
        Self {
            updater_only: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, container: &Container) -> bool {
        let name = container.name();

        if self.disabled.iter().any(|d| d == name) {
            return false;
        }
        if !self.names.is_empty() && !self.names.iter().any(|n| n == name) {
            return false;
        }

        match container.enabled() {
            Some(false) => return false,
            Some(true) => {}
            None if self.label_enable => return false,
            None => {}
        }

        if let Some(scope) = &self.scope {
            if !scope_matches(scope, container.scope()) {
                return false;
            }
        }

        if self.updater_only && !container.is_updater() {
            return false;
        }

        true
    }
}

/// An empty wanted scope selects only unscoped containers; a non-empty value
/// selects that exact scope.
pub fn scope_matches(wanted: &str, actual: Option<&str>) -> bool {
    let actual = actual.unwrap_or("");
    if wanted.is_empty() {
        actual.is_empty()
    } else {
        wanted == actual
    }
}
