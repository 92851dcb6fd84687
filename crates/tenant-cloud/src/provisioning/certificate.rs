use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::SslConfig;

use super::classify::classify_failure;
use super::dns::DnsResolver;
use super::domain::{SslStatus, Subscription, SubscriptionId};
use super::redact::SecretRedactor;
use super::repository::{
    ProvisioningJob, RepositoryError, ScheduleError, SubscriptionRepository, TaskScheduler,
};

/// Automatic retries stop after this many failed issuance attempts; beyond it
/// only the periodic sweep re-enqueues the subscription.
pub const MAX_SSL_ATTEMPTS: u8 = 3;

/// Issues TLS certificates for tenant hostnames. `is_issued` doubles as the
/// idempotency guard: issuance is a no-op when a valid certificate is present.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    async fn is_issued(&self, hostname: &str) -> bool;
    async fn issue(&self, hostname: &str) -> Result<(), IssuanceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    #[error("certificate issuance failed: {0}")]
    Rejected(String),
    #[error("failed to run certificate client: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("certificate issuance timed out after {0:?}")]
    TimedOut(Duration),
}

/// Production issuer shelling out to certbot. A certificate counts as issued
/// when its live directory carries a full chain.
pub struct CertbotIssuer {
    live_dir: PathBuf,
    email: String,
    issue_timeout: Duration,
}

impl CertbotIssuer {
    pub fn new(config: &SslConfig, site_suffix: &str) -> Self {
        Self {
            live_dir: config.live_dir.clone(),
            email: config
                .email
                .clone()
                .unwrap_or_else(|| format!("admin@{site_suffix}")),
            issue_timeout: config.issue_timeout,
        }
    }
}

#[async_trait]
impl CertificateIssuer for CertbotIssuer {
    async fn is_issued(&self, hostname: &str) -> bool {
        let chain = self.live_dir.join(hostname).join("fullchain.pem");
        tokio::fs::metadata(chain).await.is_ok()
    }

    async fn issue(&self, hostname: &str) -> Result<(), IssuanceError> {
        let run = Command::new("certbot")
            .args([
                "--nginx",
                "-d",
                hostname,
                "--non-interactive",
                "--agree-tos",
                "-m",
                self.email.as_str(),
                "--redirect",
            ])
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.issue_timeout, run).await {
            Err(_) => return Err(IssuanceError::TimedOut(self.issue_timeout)),
            Ok(result) => result?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(IssuanceError::Rejected(stderr));
        }
        Ok(())
    }
}

/// Bounds for the best-effort DNS propagation poll preceding issuance.
#[derive(Debug, Clone, Copy)]
pub struct PropagationWait {
    pub ceiling: Duration,
    pub interval: Duration,
}

impl Default for PropagationWait {
    fn default() -> Self {
        Self {
            ceiling: Duration::from_secs(120),
            interval: Duration::from_secs(5),
        }
    }
}

/// Poll until the hostname resolves to the expected address or the ceiling is
/// reached. Returns whether propagation was confirmed; issuance proceeds
/// either way, so the caller only uses the result for logging.
pub async fn wait_for_propagation(
    resolver: &dyn DnsResolver,
    hostname: &str,
    expected: IpAddr,
    wait: &PropagationWait,
) -> bool {
    let deadline = tokio::time::Instant::now() + wait.ceiling;
    loop {
        if resolver.resolve(hostname).await == Some(expected) {
            return true;
        }
        if tokio::time::Instant::now() + wait.interval > deadline {
            return false;
        }
        tokio::time::sleep(wait.interval).await;
    }
}

/// Settings distilled for the certificate task.
#[derive(Debug, Clone)]
pub struct SslSettings {
    pub enabled: bool,
    pub expected_address: IpAddr,
    pub wait: PropagationWait,
}

/// Errors surfaced to the background worker; issuance failures themselves are
/// bookkept on the record, not raised.
#[derive(Debug, thiserror::Error)]
pub enum SslTaskError {
    #[error("subscription {0} not found")]
    NotFound(SubscriptionId),
    #[error("subscription {0} has no site name assigned")]
    SiteNotAssigned(SubscriptionId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Drives certificate issuance for one subscription at a time, independent of
/// the main pipeline: DNS propagation has unpredictable latency, so issuance
/// runs as its own bounded-retry background task.
pub struct SslCoordinator<R, S> {
    repository: Arc<R>,
    scheduler: Arc<S>,
    issuer: Arc<dyn CertificateIssuer>,
    resolver: Arc<dyn DnsResolver>,
    redactor: SecretRedactor,
    settings: SslSettings,
}

impl<R, S> SslCoordinator<R, S>
where
    R: SubscriptionRepository + 'static,
    S: TaskScheduler + 'static,
{
    pub fn new(
        repository: Arc<R>,
        scheduler: Arc<S>,
        issuer: Arc<dyn CertificateIssuer>,
        resolver: Arc<dyn DnsResolver>,
        settings: SslSettings,
    ) -> Self {
        Self {
            repository,
            scheduler,
            issuer,
            resolver,
            redactor: SecretRedactor::new(),
            settings,
        }
    }

    /// One issuance attempt. Attempt accounting is persisted before the
    /// attempt itself so it survives a crash mid-issuance, and a retry is
    /// handed to the scheduler only after the failed state has been saved.
    pub async fn issue(&self, id: &SubscriptionId) -> Result<SslStatus, SslTaskError> {
        if !self.settings.enabled {
            return Ok(SslStatus::Pending);
        }

        let mut subscription = self
            .repository
            .load(id)?
            .ok_or_else(|| SslTaskError::NotFound(id.clone()))?;
        let site = subscription
            .site_name
            .clone()
            .ok_or_else(|| SslTaskError::SiteNotAssigned(id.clone()))?;

        if self.issuer.is_issued(site.as_str()).await {
            subscription.ssl_status = SslStatus::Issued;
            subscription.ssl_last_error = None;
            self.repository.save(&subscription)?;
            return Ok(SslStatus::Issued);
        }

        subscription.ssl_attempts = subscription.ssl_attempts.saturating_add(1);
        self.repository.save(&subscription)?;

        let propagated = wait_for_propagation(
            self.resolver.as_ref(),
            site.as_str(),
            self.settings.expected_address,
            &self.settings.wait,
        )
        .await;
        if !propagated {
            info!(
                target: "provisioning",
                site = %site,
                "dns propagation unconfirmed within the wait window, attempting issuance anyway"
            );
        }

        match self.issuer.issue(site.as_str()).await {
            Ok(()) => {
                subscription.ssl_status = SslStatus::Issued;
                subscription.ssl_last_error = None;
                subscription.push_log(format!("certificate issued for {site}"));
                self.repository.save(&subscription)?;
                info!(target: "provisioning", site = %site, "certificate issued");
                Ok(SslStatus::Issued)
            }
            Err(err) => {
                let raw = err.to_string();
                let sanitized = self.redactor.redact(&raw);
                let fault = classify_failure(&raw);
                subscription.ssl_status = SslStatus::Failed;
                subscription.ssl_last_error = Some(sanitized.clone());
                subscription.push_log(fault.log_line());
                self.repository.save(&subscription)?;
                error!(
                    target: "provisioning",
                    subscription = %subscription.id,
                    site = %site,
                    attempt = subscription.ssl_attempts,
                    error = %sanitized,
                    "certificate issuance failed"
                );

                if subscription.ssl_attempts < MAX_SSL_ATTEMPTS {
                    // The failed state is durable at this point; a racing retry
                    // will observe the attempt it is retrying.
                    self.scheduler
                        .schedule(ProvisioningJob::IssueCertificate(subscription.id.clone()))?;
                } else {
                    warn!(
                        target: "provisioning",
                        subscription = %subscription.id,
                        "ssl attempts exhausted, leaving retries to the periodic sweep"
                    );
                }
                Ok(SslStatus::Failed)
            }
        }
    }

    /// Re-enqueue issuance for every provisioned subscription whose
    /// certificate is still pending or failed. Invoked from a scheduled job.
    pub fn sweep(&self) -> Result<usize, SslTaskError> {
        if !self.settings.enabled {
            return Ok(0);
        }

        let candidates = self.repository.ssl_retry_candidates()?;
        let mut enqueued = 0;
        for subscription in candidates {
            if subscription.site_name.is_none() {
                continue;
            }
            self.scheduler
                .schedule(ProvisioningJob::IssueCertificate(subscription.id.clone()))?;
            enqueued += 1;
        }
        Ok(enqueued)
    }
}

/// Matches the sweep filter used by repository implementations.
pub fn is_ssl_retry_candidate(subscription: &Subscription) -> bool {
    subscription.provisioned
        && matches!(
            subscription.ssl_status,
            SslStatus::Pending | SslStatus::Failed
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedResolver {
        answer_after: usize,
        calls: AtomicUsize,
        address: IpAddr,
    }

    #[async_trait]
    impl DnsResolver for ScriptedResolver {
        async fn resolve(&self, _hostname: &str) -> Option<IpAddr> {
            let seen = self.calls.fetch_add(1, Ordering::SeqCst);
            (seen >= self.answer_after).then_some(self.address)
        }
    }

    fn quick_wait() -> PropagationWait {
        PropagationWait {
            ceiling: Duration::from_millis(80),
            interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn propagation_poll_confirms_once_resolution_matches() {
        let resolver = ScriptedResolver {
            answer_after: 2,
            calls: AtomicUsize::new(0),
            address: "203.0.113.7".parse().expect("valid address"),
        };
        let confirmed = wait_for_propagation(
            &resolver,
            "acme.tenant.cloud",
            "203.0.113.7".parse().expect("valid address"),
            &quick_wait(),
        )
        .await;
        assert!(confirmed);
        assert!(resolver.calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn propagation_poll_gives_up_at_the_ceiling() {
        let resolver = ScriptedResolver {
            answer_after: usize::MAX,
            calls: AtomicUsize::new(0),
            address: "203.0.113.7".parse().expect("valid address"),
        };
        let confirmed = wait_for_propagation(
            &resolver,
            "acme.tenant.cloud",
            "203.0.113.7".parse().expect("valid address"),
            &quick_wait(),
        )
        .await;
        assert!(!confirmed);
    }
}
