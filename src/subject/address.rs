//! Serving address generation for subjects.

use super::GroupIdentity;

/// Maps a subject to the network address it serves on.
pub trait ServingAddressGenerator: Send + Sync {
    /// Address of subject `index` in `group`.
    fn address(&self, group: &GroupIdentity, index: usize) -> String;
}

/// Address generator that expands `{index}`, `{group}`, `{user}` and
/// `{cluster}` placeholders in a template.
///
/// # Example
///
/// ```rust
/// use livetune::subject::{GroupIdentity, ServingAddressGenerator, TemplateAddressGenerator};
///
/// let generator = TemplateAddressGenerator::new("{index}.{group}.{cluster}:8080");
/// let group = GroupIdentity {
///     cluster_name: "xx".to_string(),
///     name: "frontend".to_string(),
///     user_name: "tuner".to_string(),
/// };
/// assert_eq!(generator.address(&group, 3), "3.frontend.xx:8080");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateAddressGenerator {
    template: String,
}

impl TemplateAddressGenerator {
    /// Default template: `{index}.{group}.{user}.{cluster}`.
    pub const DEFAULT_TEMPLATE: &'static str = "{index}.{group}.{user}.{cluster}";

    /// Create a generator for `template`.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl Default for TemplateAddressGenerator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TEMPLATE)
    }
}

impl ServingAddressGenerator for TemplateAddressGenerator {
    fn address(&self, group: &GroupIdentity, index: usize) -> String {
        self.template
            .replace("{index}", &index.to_string())
            .replace("{group}", &group.name)
            .replace("{user}", &group.user_name)
            .replace("{cluster}", &group.cluster_name)
    }
}
