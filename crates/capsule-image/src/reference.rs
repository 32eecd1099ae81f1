//! Image reference parsing: `[registry/]name[:tag]` (`spec.md` §4.3).

/// The well-known default registry used when a reference omits one and
/// its leading path segment doesn't look like a registry host.
pub const DEFAULT_REGISTRY: &str = "registry.capsule.local";
pub const DEFAULT_TAG: &str = "latest";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub name: String,
    pub tag: String,
}

impl ImageReference {
    /// Parse `[registry/]name[:tag]`. Tag defaults to `latest`.
    /// Registry defaults to [`DEFAULT_REGISTRY`] *unless* the first
    /// path segment looks like a host (contains a `.` or a `:`, or is
    /// literally `localhost`) — the same disambiguation rule real
    /// image-reference parsers use to tell `library/nginx` from
    /// `myregistry.example.com/nginx`.
    pub fn parse(reference: &str) -> Self {
        let (path, tag) = match reference.rsplit_once(':') {
            // A ':' after the last '/' is a tag; a ':' before it (e.g.
            // `host:5000/name`) is part of a registry host:port.
            Some((path, tag)) if !tag.contains('/') => (path, tag),
            _ => (reference, DEFAULT_TAG),
        };

        let (registry, name) = match path.split_once('/') {
            Some((first, rest)) if looks_like_registry_host(first) => {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), path.to_string()),
        };

        Self {
            registry,
            name,
            tag: tag.to_string(),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.name, self.tag)
    }
}

fn looks_like_registry_host(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_registry_and_tag() {
        let r = ImageReference::parse("nginx");
        assert_eq!(r.registry, DEFAULT_REGISTRY);
        assert_eq!(r.name, "nginx");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn parses_explicit_tag() {
        let r = ImageReference::parse("nginx:1.27");
        assert_eq!(r.name, "nginx");
        assert_eq!(r.tag, "1.27");
    }

    #[test]
    fn treats_dotted_first_segment_as_registry() {
        let r = ImageReference::parse("ghcr.io/acme/widget:v2");
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.name, "acme/widget");
        assert_eq!(r.tag, "v2");
    }

    #[test]
    fn treats_undotted_first_segment_as_name_component() {
        let r = ImageReference::parse("library/nginx");
        assert_eq!(r.registry, DEFAULT_REGISTRY);
        assert_eq!(r.name, "library/nginx");
    }

    #[test]
    fn handles_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/widget:latest");
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.name, "widget");
        assert_eq!(r.tag, "latest");
    }
}
