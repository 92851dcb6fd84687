use std::sync::Arc;

use async_trait::async_trait;

use super::command::{CommandError, CommandExecutor, SiteCommand};
use super::domain::{BusinessProfile, SiteName};

/// First-run business setup inside a freshly created site: company, fiscal
/// defaults, starting users. Treated as an opaque remote procedure that either
/// succeeds or fails; implementations must be safely re-runnable because the
/// pipeline may repeat the bootstrap phase after a crash.
#[async_trait]
pub trait TenantInitializer: Send + Sync {
    async fn bootstrap(
        &self,
        site: &SiteName,
        business: &BusinessProfile,
    ) -> Result<(), BootstrapError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("tenant bootstrap failed: {0}")]
    Failed(String),
    #[error("business payload could not be serialized: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Production initializer executing the in-site bootstrap procedure through
/// the site-management CLI, forwarding the business payload verbatim.
pub struct BenchTenantInitializer {
    executor: Arc<dyn CommandExecutor>,
}

impl BenchTenantInitializer {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl TenantInitializer for BenchTenantInitializer {
    async fn bootstrap(
        &self,
        site: &SiteName,
        business: &BusinessProfile,
    ) -> Result<(), BootstrapError> {
        let payload = serde_json::to_value(business)?;
        let output = self
            .executor
            .execute(&SiteCommand::RunTenantBootstrap {
                site: site.clone(),
                payload,
            })
            .await?;
        if !output.success() {
            return Err(BootstrapError::Failed(output.combined()));
        }
        Ok(())
    }
}
