//! # Resolver
//!
//! Expands `{Placeholder}` tokens in log group / log stream names from resource attributes

use super::batch::Attributes;
use super::error::ResolutionError;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern"));

/// Placeholder name to the resource attributes consulted for it, in order
const PLACEHOLDER_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("ClusterName", &["aws.ecs.cluster.name", "k8s.cluster.name"]),
    ("TaskId", &["aws.ecs.task.id"]),
    ("TaskDefinitionFamily", &["aws.ecs.task.family"]),
    ("ContainerInstanceId", &["aws.ecs.container.instance.id"]),
    ("NodeName", &["k8s.node.name"]),
    ("InstanceId", &["host.id"]),
    ("ServiceName", &["service.name"]),
    ("ServiceNamespace", &["service.namespace"]),
];

/// The resolved log group / log stream pair a log event is shipped to
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DestinationKey {
    pub log_group_name: String,
    pub log_stream_name: String,
}

impl DestinationKey {
    pub fn new(log_group_name: impl Into<String>, log_stream_name: impl Into<String>) -> Self {
        Self {
            log_group_name: log_group_name.into(),
            log_stream_name: log_stream_name.into(),
        }
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.log_group_name, self.log_stream_name)
    }
}

fn attributes_for(placeholder: &str) -> Option<&'static [&'static str]> {
    PLACEHOLDER_ATTRIBUTES
        .iter()
        .find(|(name, _)| *name == placeholder)
        .map(|(_, attributes)| *attributes)
}

/// Placeholders in `template` that no resource attribute maps to
pub fn unknown_placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|captures| captures[1].to_string())
        .filter(|name| attributes_for(name).is_none())
        .collect()
}

/// Substitute every placeholder of a single template
///
/// Fails on the first placeholder that is unknown or whose attribute is absent, a partially
/// substituted name is never returned
pub fn resolve_template(template: &str, attributes: &Attributes) -> Result<String, ResolutionError> {
    let mut resolved = String::with_capacity(template.len());
    let mut last = 0;

    for captures in PLACEHOLDER.captures_iter(template) {
        let (Some(token), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let candidates =
            attributes_for(name.as_str()).ok_or_else(|| ResolutionError::UnknownPlaceholder(name.as_str().to_string()))?;
        let value = candidates
            .iter()
            .find_map(|key| attributes.get(*key))
            .ok_or_else(|| ResolutionError::MissingAttribute {
                placeholder: name.as_str().to_string(),
                attribute: candidates[0].to_string(),
            })?;

        resolved.push_str(&template[last..token.start()]);
        resolved.push_str(value);
        last = token.end();
    }

    resolved.push_str(&template[last..]);
    Ok(resolved)
}

/// Resolve the destination for a batch with the given resource attributes
pub fn resolve(
    log_group_template: &str,
    log_stream_template: &str,
    attributes: &Attributes,
) -> Result<DestinationKey, ResolutionError> {
    Ok(DestinationKey {
        log_group_name: resolve_template(log_group_template, attributes)?,
        log_stream_name: resolve_template(log_stream_template, attributes)?,
    })
}
