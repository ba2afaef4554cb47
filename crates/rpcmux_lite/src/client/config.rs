use crate::metadata::Metadata;

/// Configuration for the RPC client.
#[derive(Debug, Clone, Default)]
pub struct RpcClientConfig {
    /// Metadata attached to every call. Per-call metadata overrides it key by key.
    pub default_metadata: Metadata,

    /// Maximum number of calls outstanding at once. `None` means unlimited.
    pub max_outstanding_calls: Option<usize>,
}

impl RpcClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default metadata.
    pub fn with_default_metadata(mut self, metadata: Metadata) -> Self {
        self.default_metadata = metadata;
        self
    }

    /// Add one default metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_metadata.insert(key.into(), value.into());
        self
    }

    /// Limit the number of outstanding calls.
    pub fn with_max_outstanding_calls(mut self, limit: usize) -> Self {
        self.max_outstanding_calls = Some(limit);
        self
    }
}
