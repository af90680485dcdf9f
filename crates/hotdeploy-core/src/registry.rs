//! Static lookup from repository name to its deploy configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{RepositoryConfig, ServerConfig};

/// Immutable after construction; shared between the dispatcher and the jobs
/// it creates.
#[derive(Debug, Clone, Default)]
pub struct RepositoryRegistry {
    repos: HashMap<String, Arc<RepositoryConfig>>,
}

impl RepositoryRegistry {
    pub fn new(repos: impl IntoIterator<Item = (String, RepositoryConfig)>) -> Self {
        Self {
            repos: repos
                .into_iter()
                .map(|(name, repo)| (name, Arc::new(repo)))
                .collect(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.repositories.clone())
    }

    /// Returns `None` for repositories that are not deployable here.
    pub fn get(&self, name: &str) -> Option<Arc<RepositoryConfig>> {
        self.repos.get(name).cloned()
    }

    pub fn count(&self) -> usize {
        self.repos.len()
    }
}
