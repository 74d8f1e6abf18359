//! Error types for statistics retrieval and metric collection.

use thiserror::Error;

/// Errors raised by a [`StatsSource`](crate::source::StatsSource) or one of
/// its connections.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The hypervisor session could not be established.
    #[error("Failed to connect to {uri}: {message}")]
    Connect { uri: String, message: String },

    /// A management command exited with an error.
    #[error("Command `{command}` failed: {message}")]
    Command { command: String, message: String },

    /// A management command did not finish in time.
    #[error("Command `{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// A management command produced output we could not interpret.
    #[error("Unexpected output from `{command}`: {message}")]
    Parse { command: String, message: String },

    /// The domain is not known to the source.
    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    /// The domain description could not be parsed.
    #[error("Invalid domain XML: {0}")]
    Topology(String),
}

/// Errors raised while turning raw statistics into registered metrics.
#[derive(Debug, Error)]
pub enum CollectError {
    /// The stats session could not be opened or lost while listing domains.
    #[error("Connection error: {0}")]
    Connection(#[source] SourceError),

    /// A requested metric is absent from the raw statistics.
    #[error("Metric '{metric}' is missing from the raw statistics")]
    MissingMetric { metric: String },

    /// A sample's label keys differ from the keys the metric was registered with.
    #[error("Label schema mismatch for '{metric}': registered {expected:?}, got {found:?}")]
    LabelSchemaMismatch {
        metric: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Statistics for a single device target could not be retrieved.
    #[error("Query for device '{target}' failed: {source}")]
    DeviceQuery {
        target: String,
        #[source]
        source: SourceError,
    },

    /// Any other per-domain retrieval failure.
    #[error("Stats retrieval failed: {0}")]
    Source(#[from] SourceError),
}

impl CollectError {
    /// Whether this error is a metric contract violation rather than a
    /// retrieval failure.
    ///
    /// Contract violations only skip the offending stat family; retrieval
    /// failures skip the whole domain for the cycle.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            CollectError::MissingMetric { .. } | CollectError::LabelSchemaMismatch { .. }
        )
    }
}
