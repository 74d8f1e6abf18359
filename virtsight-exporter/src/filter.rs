//! Domain filtering.

use crate::config::FilterConfig;
use crate::source::EntityHandle;

/// Include/exclude filter over domain UUIDs.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
}

impl DomainFilter {
    /// Create a new filter from configuration. Invalid patterns are ignored;
    /// [`ExporterConfig::validate`](crate::config::ExporterConfig::validate)
    /// rejects them up front.
    pub fn new(config: &FilterConfig) -> Self {
        let include = config
            .include_domains
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();

        let exclude = config
            .exclude_domains
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();

        Self { include, exclude }
    }

    /// Check whether a domain should be collected.
    pub fn should_include(&self, entity: &EntityHandle) -> bool {
        let uuid = entity.uuid();

        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(uuid)) {
            return false;
        }

        !self.exclude.iter().any(|p| p.matches(uuid))
    }
}
