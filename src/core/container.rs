//! Container snapshots and the label contract.
//!
//! A `Container` is an immutable observation of one container on the host.
//! Session-scoped flags (stale, linked-to-restarting) never live here; they
//! are kept in the update engine's decision map.

use std::collections::HashMap;
use std::fmt;

use bollard::models::ContainerInspectResponse;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::core::params::UpdateParams;

/// Root of the label namespace recognized on containers. Kept bit-exact for
/// compatibility with existing deployments.
pub const LABEL_NAMESPACE: &str = "com.centurylinklabs.watchtower";

pub const LABEL_SCOPE: &str = "com.centurylinklabs.watchtower.scope";
pub const LABEL_ENABLE: &str = "com.centurylinklabs.watchtower.enable";
pub const LABEL_MONITOR_ONLY: &str = "com.centurylinklabs.watchtower.monitor-only";
pub const LABEL_NO_PULL: &str = "com.centurylinklabs.watchtower.no-pull";
pub const LABEL_DEPENDS_ON: &str = "com.centurylinklabs.watchtower.depends-on";
pub const LABEL_CONTAINER_CHAIN: &str = "com.centurylinklabs.watchtower.container-chain";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("container has no inspection data")]
    NoInspectData,
    #[error("container has no configuration snapshot")]
    NoConfig,
    #[error("container has no host configuration snapshot")]
    NoHostConfig,
    #[error("container has port bindings but no exposed ports")]
    PortsWithoutExposure,
}

/// Opaque container identity. The 12-character short form is what goes into
/// log lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn short(&self) -> String {
        self.0.chars().take(12).collect()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ContainerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Content-addressed image identity (usually `sha256:...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn short(&self) -> String {
        self.0.replace("sha256:", "").chars().take(12).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ImageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Strips the leading slash the Docker API puts on container names, plus
/// surrounding whitespace.
pub fn normalize_name(name: &str) -> String {
    name.trim().trim_start_matches('/').to_string()
}

#[derive(Debug, Clone)]
pub struct Container {
    id: ContainerId,
    name: String,
    image_name: String,
    image_id: ImageId,
    created_at: Option<DateTime<Utc>>,
    labels: HashMap<String, String>,
    runtime_links: Vec<String>,
    config_image: Option<String>,
    raw: Option<Box<ContainerInspectResponse>>,
}

impl Container {
    pub fn new(
        id: impl Into<ContainerId>,
        name: &str,
        image_name: impl Into<String>,
        image_id: impl Into<ImageId>,
    ) -> Self {
        Self {
            id: id.into(),
            name: normalize_name(name),
            image_name: image_name.into(),
            image_id: image_id.into(),
            created_at: None,
            labels: HashMap::new(),
            runtime_links: Vec::new(),
            config_image: None,
            raw: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<ContainerId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_runtime_links(mut self, links: Vec<String>) -> Self {
        self.runtime_links = links.into_iter().map(|l| normalize_name(&l)).collect();
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn with_config_image(mut self, image: impl Into<String>) -> Self {
        self.config_image = Some(image.into());
        self
    }

    pub fn with_raw(mut self, raw: ContainerInspectResponse) -> Self {
        self.raw = Some(Box::new(raw));
        self
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn image_id(&self) -> &ImageId {
        &self.image_id
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn config_image(&self) -> Option<&str> {
        self.config_image.as_deref()
    }

    pub fn raw(&self) -> Option<&ContainerInspectResponse> {
        self.raw.as_deref()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(|v| v.as_str())
    }

    fn label_bool(&self, key: &str) -> Option<bool> {
        match self.label(key)? {
            "true" => Some(true),
            "false" => Some(false),
            other => {
                tracing::warn!(
                    container = %self.name,
                    label = key,
                    value = other,
                    "ignoring label with non-boolean value"
                );
                None
            }
        }
    }

    /// Whether this container is an updater instance (bears the root label).
    pub fn is_updater(&self) -> bool {
        self.label_bool(LABEL_NAMESPACE).unwrap_or(false)
    }

    /// An updater instance that is not the one currently running this
    /// process. Only meaningful when the session knows its own container id.
    pub fn is_peer_updater(&self, params: &UpdateParams) -> bool {
        match &params.current_container_id {
            Some(current) => self.is_updater() && self.id != *current,
            None => false,
        }
    }

    pub fn scope(&self) -> Option<&str> {
        self.label(LABEL_SCOPE)
    }

    pub fn enabled(&self) -> Option<bool> {
        self.label_bool(LABEL_ENABLE)
    }

    /// Resolves the per-container monitor-only label against the global flag.
    /// The label wins only under label precedence; otherwise a global `true`
    /// cannot be overridden, and an absent label always defers to the global.
    pub fn is_monitor_only(&self, params: &UpdateParams) -> bool {
        resolve_label_precedence(
            self.label_bool(LABEL_MONITOR_ONLY),
            params.monitor_only,
            params.label_precedence,
        )
    }

    /// Same precedence table as monitor-only, for the no-pull label.
    pub fn is_no_pull(&self, params: &UpdateParams) -> bool {
        resolve_label_precedence(
            self.label_bool(LABEL_NO_PULL),
            params.no_pull,
            params.label_precedence,
        )
    }

    /// Names this container depends on, from the runtime link list plus the
    /// depends-on label. Order is preserved, duplicates dropped.
    pub fn links(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for l in &self.runtime_links {
            if !l.is_empty() && !out.contains(l) {
                out.push(l.clone());
            }
        }
        for dep in self.depends_on() {
            if !out.contains(&dep) {
                out.push(dep);
            }
        }
        out
    }

    fn depends_on(&self) -> Vec<String> {
        match self.label(LABEL_DEPENDS_ON) {
            Some(raw) => raw
                .split(',')
                .map(normalize_name)
                .filter(|s| !s.is_empty())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Container ids of prior generations of this updater, accumulated
    /// across self-updates.
    pub fn chain_ids(&self) -> Vec<ContainerId> {
        match self.label(LABEL_CONTAINER_CHAIN) {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ContainerId::from)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Clone of this container whose chain label has `id` appended. Applied
    /// to the start snapshot during a self-update so the successor knows its
    /// ancestry.
    pub fn with_appended_chain(&self, id: &ContainerId) -> Container {
        let mut chain: Vec<String> = self.chain_ids().into_iter().map(|c| c.0).collect();
        if !chain.contains(&id.0) {
            chain.push(id.0.clone());
        }
        let value = chain.join(",");

        let mut out = self.clone();
        out.labels
            .insert(LABEL_CONTAINER_CHAIN.to_string(), value.clone());
        if let Some(raw) = out.raw.as_mut() {
            if let Some(config) = raw.config.as_mut() {
                config
                    .labels
                    .get_or_insert_with(HashMap::new)
                    .insert(LABEL_CONTAINER_CHAIN.to_string(), value);
            }
        }
        out
    }

    /// Checks that the captured snapshot is complete enough to recreate the
    /// container from.
    pub fn verify_config(&self) -> Result<(), ConfigError> {
        let raw = self.raw.as_deref().ok_or(ConfigError::NoInspectData)?;
        let config = raw.config.as_ref().ok_or(ConfigError::NoConfig)?;
        let host_config = raw.host_config.as_ref().ok_or(ConfigError::NoHostConfig)?;

        let has_bindings = host_config
            .port_bindings
            .as_ref()
            .map(|b| !b.is_empty())
            .unwrap_or(false);
        if has_bindings && config.exposed_ports.is_none() {
            return Err(ConfigError::PortsWithoutExposure);
        }
        Ok(())
    }
}

fn resolve_label_precedence(label: Option<bool>, global: bool, label_precedence: bool) -> bool {
    match label {
        Some(value) if label_precedence => value,
        Some(value) => global || value,
        None => global,
    }
}
