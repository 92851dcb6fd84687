//! The provisioning pipeline: a resumable, idempotent state machine taking a
//! subscription from `Requested` to `Active`, plus the retry-aware certificate
//! task that secures the site afterwards.

pub mod bootstrap;
pub mod certificate;
pub mod classify;
pub mod command;
pub mod dns;
pub mod domain;
pub mod redact;
pub mod repository;
pub mod router;
pub mod service;

pub use bootstrap::{BenchTenantInitializer, BootstrapError, TenantInitializer};
pub use certificate::{
    is_ssl_retry_candidate, CertbotIssuer, CertificateIssuer, IssuanceError, PropagationWait,
    SslCoordinator, SslSettings, SslTaskError, MAX_SSL_ATTEMPTS,
};
pub use classify::{classify_failure, FaultCode, FaultSeverity, ProvisioningFault};
pub use command::{
    BenchCommandRunner, CommandError, CommandExecutor, CommandOutput, SiteCommand,
};
pub use dns::{CloudflareDns, DnsError, DnsProvider, DnsResolver, SystemResolver};
pub use domain::{
    AppPackage, BusinessProfile, ProvisioningLogEntry, ProvisioningStep, SiteName, SslStatus,
    Subscription, SubscriptionId, SubscriptionRequest, SubscriptionStatus, SubscriptionStatusView,
};
pub use redact::SecretRedactor;
pub use repository::{
    ProvisioningJob, RepositoryError, ScheduleError, SubscriptionRepository, TaskScheduler,
};
pub use router::provisioning_router;
pub use service::{ProvisioningError, ProvisioningService, ProvisioningSettings};
