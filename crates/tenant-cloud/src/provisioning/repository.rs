use super::domain::{Subscription, SubscriptionId};

/// Storage abstraction over the external document store holding subscription
/// records. The orchestrator and the SSL task are the only writers.
pub trait SubscriptionRepository: Send + Sync {
    fn insert(&self, subscription: Subscription) -> Result<Subscription, RepositoryError>;
    fn load(&self, id: &SubscriptionId) -> Result<Option<Subscription>, RepositoryError>;
    /// Persist the record. Callers rely on this being durable on return:
    /// every pipeline checkpoint is flushed through here before the next
    /// phase starts, and retry jobs are only scheduled after it returns.
    fn save(&self, subscription: &Subscription) -> Result<(), RepositoryError>;
    /// Subscriptions the periodic sweep should re-enqueue for certificate
    /// issuance: provisioned, with ssl still pending or failed.
    fn ssl_retry_candidates(&self) -> Result<Vec<Subscription>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Unit of background work handed to the task scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningJob {
    RunPipeline(SubscriptionId),
    IssueCertificate(SubscriptionId),
}

/// Outbound hand-off to the background execution mechanism. Delivery is
/// at-least-once; the idempotency guards inside the pipeline and the SSL task
/// are what make duplicate delivery safe.
pub trait TaskScheduler: Send + Sync {
    fn schedule(&self, job: ProvisioningJob) -> Result<(), ScheduleError>;
}

/// Scheduler hand-off error.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("task scheduler unavailable: {0}")]
    Unavailable(String),
}
