//! The unit of work placed on a repository worker's queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::RepositoryConfig;
use crate::domain::event::WebhookEvent;

/// A webhook event paired with the configuration it resolved to.
#[derive(Debug, Clone)]
pub struct DeployJob {
    pub id: Uuid,
    pub accepted_at: DateTime<Utc>,
    pub event: WebhookEvent,
    pub repo: Arc<RepositoryConfig>,
}

impl DeployJob {
    pub fn new(event: WebhookEvent, repo: Arc<RepositoryConfig>) -> Self {
        Self {
            id: Uuid::new_v4(),
            accepted_at: Utc::now(),
            event,
            repo,
        }
    }

    pub fn repository_name(&self) -> &str {
        self.event.repository_name()
    }

    pub fn repository_url(&self) -> &str {
        self.event.repository_url()
    }
}
