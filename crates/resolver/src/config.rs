//! Engine configuration
//!
//! Every key is optional; a missing key takes its default. Strategies are
//! selected by name:
//!
//! ```toml
//! db_name = "contacts"
//! remote_url = "https://replica.example.com/contacts"
//! put_strategy = "refresh-revision-and-retry"
//! post_strategy = "retry-with-new-identity"
//! eventual_strategy = "merge-by-field-concatenating"
//! serialize_per_document = true
//!
//! [changes]
//! since = "now"
//! live = true
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::conflict::{
    AcceptWinner, EventualResolver, ImmediateResolver, MergeByField, NoRetry,
    RefreshRevisionAndRetry, RejectOnConflict, RetryWithNewIdentity,
};
use crate::store::{ChangesOptions, DocumentStore};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Named immediate resolution strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImmediateStrategy {
    RetryWithNewIdentity,
    NoRetry,
    RefreshRevisionAndRetry,
    RejectOnConflict,
}

impl ImmediateStrategy {
    pub fn resolver<S: DocumentStore>(&self) -> Arc<dyn ImmediateResolver<S>> {
        match self {
            ImmediateStrategy::RetryWithNewIdentity => Arc::new(RetryWithNewIdentity),
            ImmediateStrategy::NoRetry => Arc::new(NoRetry),
            ImmediateStrategy::RefreshRevisionAndRetry => Arc::new(RefreshRevisionAndRetry),
            ImmediateStrategy::RejectOnConflict => Arc::new(RejectOnConflict),
        }
    }
}

/// Named eventual resolution strategies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventualStrategy {
    #[default]
    AcceptWinner,
    MergeByField,
    MergeByFieldConcatenating,
}

impl EventualStrategy {
    pub fn resolver<S: DocumentStore>(&self) -> Arc<dyn EventualResolver<S>> {
        match self {
            EventualStrategy::AcceptWinner => Arc::new(AcceptWinner),
            EventualStrategy::MergeByField => Arc::new(MergeByField::new()),
            EventualStrategy::MergeByFieldConcatenating => Arc::new(MergeByField::concatenating()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the local database
    pub db_name: String,
    /// Replication peer; syncing is refused without one
    pub remote_url: Option<Url>,
    /// How the change feed is opened
    pub changes: ChangesOptions,
    pub put_strategy: ImmediateStrategy,
    pub post_strategy: ImmediateStrategy,
    pub eventual_strategy: EventualStrategy,
    /// Allow one resolution and one write in flight per document id
    pub serialize_per_document: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_name: "default".to_string(),
            remote_url: None,
            changes: ChangesOptions::default(),
            put_strategy: ImmediateStrategy::RefreshRevisionAndRetry,
            post_strategy: ImmediateStrategy::RetryWithNewIdentity,
            eventual_strategy: EventualStrategy::default(),
            serialize_per_document: true,
        }
    }
}

impl EngineConfig {
    /// Read and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!("loading engine config from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "db_name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_remote(mut self, url: Url) -> Self {
        self.remote_url = Some(url);
        self
    }
}
