use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::config::{AppConfig, Secret};

use super::bootstrap::{BootstrapError, TenantInitializer};
use super::classify::{classify_failure, FaultCode, ProvisioningFault};
use super::command::{
    parse_installed_apps, CommandError, CommandExecutor, CommandOutput, SiteCommand,
};
use super::dns::{DnsError, DnsProvider};
use super::domain::{
    ProvisioningStep, SiteName, Subscription, SubscriptionId, SubscriptionRequest,
    SubscriptionStatus, SubscriptionStatusView,
};
use super::redact::SecretRedactor;
use super::repository::{
    ProvisioningJob, RepositoryError, ScheduleError, SubscriptionRepository, TaskScheduler,
};

static SUBSCRIPTION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_subscription_id() -> SubscriptionId {
    let id = SUBSCRIPTION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    SubscriptionId(format!("sub-{id:06}"))
}

/// Pipeline knobs distilled from the application configuration so tests can
/// construct them directly.
#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    pub site_suffix: String,
    pub server_address: IpAddr,
    pub admin_password: Secret,
    pub db_root_password: Secret,
    pub trial_days: i64,
    pub dns_enabled: bool,
    pub ssl_enabled: bool,
}

impl ProvisioningSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            site_suffix: config.provisioning.site_suffix.clone(),
            server_address: config.provisioning.server_address,
            admin_password: config.provisioning.admin_password.clone(),
            db_root_password: config.provisioning.db_root_password.clone(),
            trial_days: config.provisioning.trial_days,
            dns_enabled: config.dns.enabled,
            ssl_enabled: config.ssl.enabled,
        }
    }
}

/// Error raised by the provisioning service.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("subscription {0} not found")]
    NotFound(SubscriptionId),
    #[error("instance provisioning is already in progress")]
    AlreadyInProgress,
    #[error("instance already provisioned")]
    AlreadyProvisioned,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("{step} phase failed: {fault}")]
    Phase {
        step: ProvisioningStep,
        fault: ProvisioningFault,
    },
}

/// Raw failure bubbling out of a phase. May contain credential fragments, so
/// it is classified and redacted exactly once at the pipeline boundary and
/// never persisted as-is.
struct PhaseFailure(String);

impl PhaseFailure {
    fn from_output(output: &CommandOutput) -> Self {
        Self(output.combined())
    }
}

impl From<CommandError> for PhaseFailure {
    fn from(value: CommandError) -> Self {
        Self(value.to_string())
    }
}

impl From<DnsError> for PhaseFailure {
    fn from(value: DnsError) -> Self {
        Self(value.to_string())
    }
}

impl From<BootstrapError> for PhaseFailure {
    fn from(value: BootstrapError) -> Self {
        Self(value.to_string())
    }
}

impl From<RepositoryError> for PhaseFailure {
    fn from(value: RepositoryError) -> Self {
        Self(value.to_string())
    }
}

/// The provisioning state machine. Sequences site creation, app installation,
/// tenant bootstrap, migration, and DNS registration for one subscription,
/// persisting a checkpoint after every phase so a crashed or failed run can be
/// re-invoked and resume exactly where it stopped.
pub struct ProvisioningService<R, S> {
    repository: Arc<R>,
    scheduler: Arc<S>,
    executor: Arc<dyn CommandExecutor>,
    dns: Arc<dyn DnsProvider>,
    initializer: Arc<dyn TenantInitializer>,
    redactor: SecretRedactor,
    settings: ProvisioningSettings,
}

impl<R, S> ProvisioningService<R, S>
where
    R: SubscriptionRepository + 'static,
    S: TaskScheduler + 'static,
{
    pub fn new(
        repository: Arc<R>,
        scheduler: Arc<S>,
        executor: Arc<dyn CommandExecutor>,
        dns: Arc<dyn DnsProvider>,
        initializer: Arc<dyn TenantInitializer>,
        settings: ProvisioningSettings,
    ) -> Self {
        Self {
            repository,
            scheduler,
            executor,
            dns,
            initializer,
            redactor: SecretRedactor::new(),
            settings,
        }
    }

    /// Register a new subscription in the Requested state.
    pub fn create(&self, request: SubscriptionRequest) -> Result<Subscription, ProvisioningError> {
        let subscription = Subscription::new(
            next_subscription_id(),
            request.instance_name,
            request.selected_package,
            request.business,
        );
        Ok(self.repository.insert(subscription)?)
    }

    /// Validate preconditions and enqueue the pipeline. The Provisioning
    /// status doubles as the single-flight gate: while it is set, no second
    /// trigger is accepted for the same subscription. The job is handed to
    /// the scheduler only after the gate has been durably saved.
    pub fn trigger(&self, id: &SubscriptionId) -> Result<(), ProvisioningError> {
        let mut subscription = self.load(id)?;

        if subscription.status == SubscriptionStatus::Provisioning {
            return Err(ProvisioningError::AlreadyInProgress);
        }
        if subscription.provisioned {
            return Err(ProvisioningError::AlreadyProvisioned);
        }

        subscription.clear_logs();
        subscription.status = SubscriptionStatus::Provisioning;
        subscription.push_log("provisioning requested");
        self.repository.save(&subscription)?;
        self.scheduler
            .schedule(ProvisioningJob::RunPipeline(id.clone()))?;
        Ok(())
    }

    /// Execute the pipeline from the persisted checkpoint. Idempotent: every
    /// phase re-checks whether its work is outstanding before acting, and the
    /// checkpoint is flushed before the next phase starts, so re-invocation
    /// after a crash or failure never repeats completed work.
    pub async fn run(&self, id: &SubscriptionId) -> Result<(), ProvisioningError> {
        let mut subscription = self.load(id)?;

        if subscription.status == SubscriptionStatus::Active {
            return Ok(());
        }
        if subscription.status != SubscriptionStatus::Provisioning {
            subscription.status = SubscriptionStatus::Provisioning;
            subscription.push_log("provisioning resumed");
            self.repository.save(&subscription)?;
        }

        loop {
            let step = subscription.provisioning_step;
            let outcome = match step {
                ProvisioningStep::Init => self.create_site(&mut subscription).await,
                ProvisioningStep::SiteCreated => self.install_apps(&mut subscription).await,
                ProvisioningStep::AppsInstalled => self.bootstrap_tenant(&mut subscription).await,
                ProvisioningStep::Bootstrapped => self.finalize(&mut subscription).await,
                ProvisioningStep::Completed => break,
            };
            if let Err(failure) = outcome {
                return Err(self.fail(subscription, step, failure));
            }
        }

        info!(
            target: "provisioning",
            subscription = %subscription.id,
            site = subscription.site_name.as_ref().map(SiteName::as_str).unwrap_or_default(),
            "provisioning completed"
        );
        Ok(())
    }

    pub fn view(&self, id: &SubscriptionId) -> Result<SubscriptionStatusView, ProvisioningError> {
        Ok(self.load(id)?.status_view())
    }

    fn load(&self, id: &SubscriptionId) -> Result<Subscription, ProvisioningError> {
        self.repository
            .load(id)?
            .ok_or_else(|| ProvisioningError::NotFound(id.clone()))
    }

    /// Init -> SiteCreated: create the site unless it already exists. An
    /// existing site is reusable, so both the pre-flight probe and a
    /// site-exists failure from the tool count as success.
    async fn create_site(&self, subscription: &mut Subscription) -> Result<(), PhaseFailure> {
        let site = subscription.assign_site_name(&self.settings.site_suffix);

        if self.executor.site_exists(&site).await {
            subscription.push_log(format!("site {site} already present, reusing it"));
        } else {
            let command = SiteCommand::CreateSite {
                site: site.clone(),
                admin_password: self.settings.admin_password.clone(),
                db_root_password: self.settings.db_root_password.clone(),
            };
            let output = self.executor.execute(&command).await?;
            if !output.success() {
                let fault = classify_failure(&output.combined());
                if fault.code != FaultCode::SiteExists {
                    return Err(PhaseFailure::from_output(&output));
                }
                subscription.push_log(format!("site {site} already present, reusing it"));
            } else {
                subscription.push_log(format!("site {site} created"));
            }
        }

        subscription.advance_to(ProvisioningStep::SiteCreated);
        self.repository.save(subscription)?;
        Ok(())
    }

    /// SiteCreated -> AppsInstalled: install every app of the selected
    /// package that the site does not already report.
    async fn install_apps(&self, subscription: &mut Subscription) -> Result<(), PhaseFailure> {
        let site = subscription.assign_site_name(&self.settings.site_suffix);

        let listing = self
            .executor
            .execute(&SiteCommand::ListInstalledApps { site: site.clone() })
            .await?;
        let installed = if listing.success() {
            parse_installed_apps(&listing.stdout)
        } else {
            // An unreadable listing is not fatal; installs are re-runnable.
            Default::default()
        };

        let mut newly_installed = 0usize;
        for app in subscription.selected_package.apps() {
            if installed.contains(*app) {
                continue;
            }
            let output = self
                .executor
                .execute(&SiteCommand::InstallApp {
                    site: site.clone(),
                    app,
                })
                .await?;
            if !output.success() {
                return Err(PhaseFailure::from_output(&output));
            }
            newly_installed += 1;
        }

        subscription.push_log(format!(
            "{} package apps installed ({newly_installed} new)",
            subscription.selected_package.label()
        ));
        subscription.advance_to(ProvisioningStep::AppsInstalled);
        self.repository.save(subscription)?;
        Ok(())
    }

    /// AppsInstalled -> Bootstrapped: suppress the in-site first-run wizard,
    /// stamp the trial expiry, and hand the business payload to the tenant
    /// initializer.
    async fn bootstrap_tenant(&self, subscription: &mut Subscription) -> Result<(), PhaseFailure> {
        let site = subscription.assign_site_name(&self.settings.site_suffix);

        let trial_expiry = (Utc::now() + chrono::Duration::days(self.settings.trial_days))
            .format("%Y-%m-%d")
            .to_string();
        for (key, value) in [
            ("setup_complete", "1".to_string()),
            ("trial_expiry", trial_expiry),
        ] {
            let output = self
                .executor
                .execute(&SiteCommand::ApplyConfig {
                    site: site.clone(),
                    key: key.to_string(),
                    value,
                })
                .await?;
            if !output.success() {
                return Err(PhaseFailure::from_output(&output));
            }
        }

        self.initializer
            .bootstrap(&site, &subscription.business)
            .await?;

        subscription.push_log("tenant bootstrap completed");
        subscription.advance_to(ProvisioningStep::Bootstrapped);
        self.repository.save(subscription)?;
        Ok(())
    }

    /// Bootstrapped -> Completed: run the schema migration, register the DNS
    /// record if absent, activate the subscription, and only then enqueue
    /// certificate issuance. The activation save must be acknowledged before
    /// the job is handed off, so the issuance task always observes an Active
    /// record.
    async fn finalize(&self, subscription: &mut Subscription) -> Result<(), PhaseFailure> {
        let site = subscription.assign_site_name(&self.settings.site_suffix);

        let output = self
            .executor
            .execute(&SiteCommand::RunMigration { site: site.clone() })
            .await?;
        if !output.success() {
            return Err(PhaseFailure::from_output(&output));
        }

        if self.settings.dns_enabled {
            if self.dns.exists(site.as_str()).await? {
                subscription.push_log(format!("dns record for {site} already present"));
            } else {
                self.dns
                    .create(site.as_str(), self.settings.server_address)
                    .await?;
                subscription.push_log(format!("dns record for {site} created"));
            }
        }

        subscription.activate();
        subscription.push_log("provisioning completed");
        self.repository.save(subscription)?;

        if self.settings.ssl_enabled {
            if let Err(err) = self
                .scheduler
                .schedule(ProvisioningJob::IssueCertificate(subscription.id.clone()))
            {
                // The record is already Active with ssl pending; the periodic
                // sweep will pick it up, so a scheduler hiccup is not a
                // pipeline failure.
                error!(
                    target: "provisioning",
                    subscription = %subscription.id,
                    error = %err,
                    "failed to enqueue certificate issuance, deferring to sweep"
                );
            }
        }
        Ok(())
    }

    /// Single catch point for phase failures: classify the raw error, persist
    /// only the sanitized message, freeze the step where it stopped, and emit
    /// the redacted raw text to the operational log alone.
    fn fail(
        &self,
        mut subscription: Subscription,
        step: ProvisioningStep,
        failure: PhaseFailure,
    ) -> ProvisioningError {
        let fault = classify_failure(&failure.0);
        let sanitized = self.redactor.redact(&failure.0);

        subscription.status = SubscriptionStatus::Failed;
        subscription.push_log(fault.log_line());
        if let Err(save_err) = self.repository.save(&subscription) {
            error!(
                target: "provisioning",
                subscription = %subscription.id,
                error = %save_err,
                "failed to persist failure state"
            );
            return save_err.into();
        }

        error!(
            target: "provisioning",
            subscription = %subscription.id,
            step = step.label(),
            code = fault.code.label(),
            severity = fault.severity.label(),
            error = %sanitized,
            "provisioning phase failed"
        );
        ProvisioningError::Phase { step, fault }
    }
}
