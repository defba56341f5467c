//! Image reference parsing and digest-pin detection.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::core::container::Container;

lazy_static! {
    static ref REPOSITORY_RE: Regex =
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*(?:(?::[0-9]+)?/[A-Za-z0-9][A-Za-z0-9._\-]*)*$")
            .unwrap();
    static ref TAG_RE: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._\-]{0,127}$").unwrap();
    static ref DIGEST_RE: Regex = Regex::new(r"^[a-z][a-z0-9]*:[0-9a-fA-F]{32,}$").unwrap();
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefError {
    #[error("empty image reference")]
    Empty,
    #[error("invalid image reference '{0}'")]
    Invalid(String),
    #[error("no parsable image reference for container '{0}'")]
    NoneParsable(String),
}

/// Parsed form of an image reference string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self, RefError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(RefError::Empty);
        }

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                if !DIGEST_RE.is_match(digest) {
                    return Err(RefError::Invalid(reference.to_string()));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A colon after the last slash separates the tag; a colon before it
        // belongs to a registry port.
        let tag_split = match name.rfind(':') {
            Some(idx) if idx > name.rfind('/').unwrap_or(0) => Some(idx),
            Some(idx) if !name.contains('/') => Some(idx),
            _ => None,
        };
        let (repository, tag) = match tag_split {
            Some(idx) => (&name[..idx], Some(name[idx + 1..].to_string())),
            None => (name, None),
        };

        if repository.is_empty() || !REPOSITORY_RE.is_match(repository) {
            return Err(RefError::Invalid(reference.to_string()));
        }
        if let Some(tag) = &tag {
            if !TAG_RE.is_match(tag) {
                return Err(RefError::Invalid(reference.to_string()));
            }
        }

        Ok(Self {
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Digest-pinned references are immutable: the container is scanned but
    /// never updated.
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }
}

/// Resolves the reference a container was started from, trying the observed
/// image name, then the configured image, then `<name>:latest`.
pub fn resolve_reference(container: &Container) -> Result<ImageRef, RefError> {
    if let Ok(r) = ImageRef::parse(container.image_name()) {
        return Ok(r);
    }
    if let Some(config_image) = container.config_image() {
        if let Ok(r) = ImageRef::parse(config_image) {
            return Ok(r);
        }
    }
    if let Ok(r) = ImageRef::parse(&format!("{}:latest", container.name())) {
        return Ok(r);
    }
    Err(RefError::NoneParsable(container.name().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_tagged_references() {
        let r = ImageRef::parse("nginx").unwrap();
        assert_eq!(r.repository(), "nginx");
        assert_eq!(r.tag(), "latest");
        assert!(!r.is_pinned());

        let r = ImageRef::parse("library/nginx:1.25").unwrap();
        assert_eq!(r.repository(), "library/nginx");
        assert_eq!(r.tag(), "1.25");
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let r = ImageRef::parse("localhost:5000/app").unwrap();
        assert_eq!(r.repository(), "localhost:5000/app");
        assert_eq!(r.tag(), "latest");

        let r = ImageRef::parse("localhost:5000/app:v2").unwrap();
        assert_eq!(r.tag(), "v2");
    }

    #[test]
    fn digest_reference_is_pinned() {
        let r = ImageRef::parse(
            "app@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
        )
        .unwrap();
        assert!(r.is_pinned());
        assert_eq!(r.repository(), "app");
    }

    #[test]
    fn rejects_malformed_references() {
        assert_eq!(ImageRef::parse(""), Err(RefError::Empty));
        assert!(ImageRef::parse("app@sha256:short").is_err());
        assert!(ImageRef::parse("has space:tag").is_err());
        assert!(ImageRef::parse(":tagonly").is_err());
    }

    #[test]
    fn fallback_chain_tries_config_then_name() {
        let c = Container::new("1", "app", "!!bad!!", "sha256:aaa").with_config_image("app:v3");
        let r = resolve_reference(&c).unwrap();
        assert_eq!(r.tag(), "v3");

        let c = Container::new("2", "app", "!!bad!!", "sha256:aaa");
        let r = resolve_reference(&c).unwrap();
        assert_eq!(r.repository(), "app");
        assert_eq!(r.tag(), "latest");
    }

    #[test]
    fn fallback_chain_can_exhaust() {
        let c = Container::new("3", "!!", "", "sha256:aaa");
        assert!(matches!(resolve_reference(&c), Err(RefError::NoneParsable(_))));
    }
}
