//! Validation of topic, service, node and namespace names.
//!
//! The rules are the ROS 2 naming rules restricted to what the adapter
//! needs: expansion input validation at entity-creation time. Violations
//! surface as `InvalidArgument`.

use crate::error::{Error, Result};

/// Validate a topic or service name as given by the caller.
///
/// Accepts absolute (`/a/b`), relative (`a/b`) and private (`~/a`) forms.
pub fn validate_topic_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_argument("topic name must not be empty"));
    }
    let rest = name.strip_prefix('~').unwrap_or(name);
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    if rest.is_empty() && name.starts_with('~') {
        // "~" alone expands to the node's private namespace root.
        return Ok(());
    }
    if name.ends_with('/') {
        return Err(Error::invalid_argument(format!(
            "topic name '{name}' must not end with a slash"
        )));
    }
    for segment in rest.split('/') {
        validate_segment(segment, name, "topic name")?;
    }
    Ok(())
}

/// Validate a node name: one non-empty segment, no slashes.
pub fn validate_node_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_argument("node name must not be empty"));
    }
    if name.contains('/') || name.contains('~') {
        return Err(Error::invalid_argument(format!(
            "node name '{name}' must not contain '/' or '~'"
        )));
    }
    validate_segment(name, name, "node name")
}

/// Validate a namespace: absolute, slash-separated segments.
///
/// The empty string and `/` both denote the root namespace.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() || namespace == "/" {
        return Ok(());
    }
    if !namespace.starts_with('/') {
        return Err(Error::invalid_argument(format!(
            "namespace '{namespace}' must be absolute"
        )));
    }
    if namespace.ends_with('/') {
        return Err(Error::invalid_argument(format!(
            "namespace '{namespace}' must not end with a slash"
        )));
    }
    for segment in namespace[1..].split('/') {
        validate_segment(segment, namespace, "namespace")?;
    }
    Ok(())
}

fn validate_segment(segment: &str, whole: &str, what: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::invalid_argument(format!(
            "{what} '{whole}' contains an empty segment"
        )));
    }
    if segment.as_bytes()[0].is_ascii_digit() {
        return Err(Error::invalid_argument(format!(
            "{what} '{whole}' has a segment starting with a digit"
        )));
    }
    if let Some(bad) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(Error::invalid_argument(format!(
            "{what} '{whole}' contains invalid character '{bad}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_topic_names() {
        for name in ["/chatter", "chatter", "/robot1/cmd_vel", "~/status", "~"] {
            assert!(validate_topic_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn invalid_topic_names() {
        for name in ["", "/", "//a", "/a/", "/1abc", "/a b", "/a-b"] {
            assert!(validate_topic_name(name).is_err(), "{name}");
        }
    }

    #[test]
    fn valid_node_names() {
        for name in ["talker", "my_node_2"] {
            assert!(validate_node_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn invalid_node_names() {
        for name in ["", "a/b", "~n", "2fast", "bad name"] {
            assert!(validate_node_name(name).is_err(), "{name}");
        }
    }

    #[test]
    fn valid_namespaces() {
        for ns in ["", "/", "/robot1", "/robot1/arm"] {
            assert!(validate_namespace(ns).is_ok(), "{ns}");
        }
    }

    #[test]
    fn invalid_namespaces() {
        for ns in ["robot1", "/robot1/", "/robot1//arm", "/9lives"] {
            assert!(validate_namespace(ns).is_err(), "{ns}");
        }
    }
}
