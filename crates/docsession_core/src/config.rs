//! Session configuration.

/// Configuration for a document session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Whether writes carry the etag observed at load time.
    pub use_optimistic_concurrency: bool,

    /// Maximum number of backend round-trips one session may make.
    pub max_requests_per_session: u32,

    /// Keys starting with this prefix are placeholders replaced on save.
    pub temporary_key_prefix: String,

    /// Separator between a collection name and the rest of a key.
    ///
    /// A key ending with the separator (e.g. `"orders/"`) is a prefix that
    /// asks the backend to generate the remainder.
    pub key_separator: char,

    /// Document field holding the entity's type tag.
    pub type_discriminator_field: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            use_optimistic_concurrency: false,
            max_requests_per_session: 30,
            temporary_key_prefix: "temp/".to_string(),
            key_separator: '/',
            type_discriminator_field: "type".to_string(),
        }
    }
}

impl SessionConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether writes are checked against etags.
    #[must_use]
    pub fn use_optimistic_concurrency(mut self, value: bool) -> Self {
        self.use_optimistic_concurrency = value;
        self
    }

    /// Sets the request budget.
    #[must_use]
    pub fn max_requests_per_session(mut self, limit: u32) -> Self {
        self.max_requests_per_session = limit;
        self
    }

    /// Sets the temporary key prefix.
    #[must_use]
    pub fn temporary_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temporary_key_prefix = prefix.into();
        self
    }

    /// Sets the key separator.
    #[must_use]
    pub fn key_separator(mut self, separator: char) -> Self {
        self.key_separator = separator;
        self
    }

    /// Sets the type discriminator field name.
    #[must_use]
    pub fn type_discriminator_field(mut self, field: impl Into<String>) -> Self {
        self.type_discriminator_field = field.into();
        self
    }

    /// Returns true for placeholder keys that must be replaced on save.
    pub fn is_temporary_key(&self, key: &str) -> bool {
        !self.temporary_key_prefix.is_empty() && key.starts_with(&self.temporary_key_prefix)
    }

    /// Returns true for collection prefixes such as `"orders/"`.
    pub fn is_prefix_key(&self, key: &str) -> bool {
        key.ends_with(self.key_separator)
    }

    /// Returns true if the key names a concrete document.
    pub fn is_assigned_key(&self, key: &str) -> bool {
        !key.is_empty() && !self.is_prefix_key(key) && !self.is_temporary_key(key)
    }
}
