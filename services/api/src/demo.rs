use crate::infra::InMemorySubscriptionRepository;
use async_trait::async_trait;
use clap::Args;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tenant_cloud::config::Secret;
use tenant_cloud::error::AppError;
use tenant_cloud::provisioning::{
    AppPackage, BenchTenantInitializer, BusinessProfile, CertificateIssuer, CommandError,
    CommandExecutor, CommandOutput, DnsError, DnsProvider, DnsResolver, IssuanceError,
    PropagationWait, ProvisioningJob, ProvisioningService, ProvisioningSettings, ScheduleError,
    SiteCommand, SiteName, SslCoordinator, SslSettings, SubscriptionRequest, TaskScheduler,
};

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Tenant short name used to derive the site hostname
    #[arg(long, default_value = "acme")]
    pub(crate) instance_name: String,
    /// Application package to install (starter, retail_pos, complete_sme)
    #[arg(long, default_value = "starter", value_parser = parse_package)]
    pub(crate) package: AppPackage,
    /// Company registered during tenant bootstrap
    #[arg(long, default_value = "Acme Trading")]
    pub(crate) company_name: String,
    /// Company abbreviation
    #[arg(long, default_value = "AT")]
    pub(crate) abbr: String,
    /// Contact e-mail forwarded to the tenant initializer
    #[arg(long, default_value = "owner@acme.example")]
    pub(crate) contact_email: String,
}

fn parse_package(raw: &str) -> Result<AppPackage, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "starter" => Ok(AppPackage::Starter),
        "retail_pos" | "retail-pos" => Ok(AppPackage::RetailPos),
        "complete_sme" | "complete-sme" => Ok(AppPackage::CompleteSme),
        other => Err(format!(
            "unknown package '{other}' (expected starter, retail_pos, or complete_sme)"
        )),
    }
}

const DEMO_SUFFIX: &str = "tenant.cloud";
const DEMO_ADDRESS: &str = "203.0.113.7";

/// Run the full pipeline plus certificate task against scripted in-memory
/// adapters, narrating every external side effect that production would
/// perform.
pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let repository = Arc::new(InMemorySubscriptionRepository::default());
    let scheduler = Arc::new(QueueScheduler::default());
    let executor: Arc<dyn CommandExecutor> = Arc::new(ScriptedExecutor::default());
    let dns = Arc::new(ScriptedDns::default());
    let initializer = Arc::new(BenchTenantInitializer::new(executor.clone()));

    let expected_address: IpAddr = DEMO_ADDRESS.parse().expect("demo address parses");
    let settings = ProvisioningSettings {
        site_suffix: DEMO_SUFFIX.to_string(),
        server_address: expected_address,
        admin_password: Secret::new("admin"),
        db_root_password: Secret::new("demo-root-password"),
        trial_days: 14,
        dns_enabled: true,
        ssl_enabled: true,
    };

    let service = ProvisioningService::new(
        repository.clone(),
        scheduler.clone(),
        executor,
        dns,
        initializer,
        settings,
    );
    let coordinator = SslCoordinator::new(
        repository,
        scheduler.clone(),
        Arc::new(ScriptedIssuer::default()),
        Arc::new(ScriptedResolver(expected_address)),
        SslSettings {
            enabled: true,
            expected_address,
            wait: PropagationWait::default(),
        },
    );

    println!("=== tenant provisioning demo ===");
    let subscription = service.create(SubscriptionRequest {
        instance_name: args.instance_name.clone(),
        selected_package: args.package,
        business: BusinessProfile {
            company_name: args.company_name,
            abbr: args.abbr,
            country: "Saudi Arabia".to_string(),
            currency: "SAR".to_string(),
            timezone: "Asia/Riyadh".to_string(),
            contact_email: args.contact_email,
            branding_asset: None,
        },
    })?;
    let id = subscription.id.clone();
    println!(
        "registered subscription {} for instance '{}' ({} package)",
        id,
        args.instance_name,
        args.package.label()
    );

    service.trigger(&id)?;
    while let Some(job) = scheduler.pop() {
        match job {
            ProvisioningJob::RunPipeline(job_id) => {
                println!("\n-- provisioning pipeline --");
                service.run(&job_id).await?;
            }
            ProvisioningJob::IssueCertificate(job_id) => {
                println!("\n-- certificate task --");
                coordinator.issue(&job_id).await?;
            }
        }
    }

    let view = service.view(&id)?;
    println!("\n-- final subscription state --");
    println!(
        "{}",
        serde_json::to_string_pretty(&view).expect("status view serializes")
    );
    Ok(())
}

/// Scheduler that queues jobs for the demo driver to drain inline.
#[derive(Default)]
pub(crate) struct QueueScheduler {
    jobs: Mutex<VecDeque<ProvisioningJob>>,
}

impl QueueScheduler {
    fn pop(&self) -> Option<ProvisioningJob> {
        self.jobs.lock().expect("scheduler mutex poisoned").pop_front()
    }
}

impl TaskScheduler for QueueScheduler {
    fn schedule(&self, job: ProvisioningJob) -> Result<(), ScheduleError> {
        self.jobs
            .lock()
            .expect("scheduler mutex poisoned")
            .push_back(job);
        Ok(())
    }
}

/// Bench stand-in: narrates every command and tracks sites and installed apps
/// so the pipeline's guards behave like production.
#[derive(Default)]
struct ScriptedExecutor {
    sites: Mutex<HashSet<String>>,
    installed: Mutex<HashMap<String, HashSet<String>>>,
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, command: &SiteCommand) -> Result<CommandOutput, CommandError> {
        println!("  $ {}", command.redacted_display());
        let stdout = match command {
            SiteCommand::CreateSite { site, .. } => {
                self.sites
                    .lock()
                    .expect("executor mutex poisoned")
                    .insert(site.as_str().to_string());
                String::new()
            }
            SiteCommand::InstallApp { site, app } => {
                self.installed
                    .lock()
                    .expect("executor mutex poisoned")
                    .entry(site.as_str().to_string())
                    .or_default()
                    .insert((*app).to_string());
                String::new()
            }
            SiteCommand::ListInstalledApps { site } => self
                .installed
                .lock()
                .expect("executor mutex poisoned")
                .get(site.as_str())
                .map(|apps| apps.iter().cloned().collect::<Vec<_>>().join("\n"))
                .unwrap_or_default(),
            _ => String::new(),
        };
        Ok(CommandOutput {
            status: 0,
            stdout,
            stderr: String::new(),
        })
    }

    async fn site_exists(&self, site: &SiteName) -> bool {
        self.sites
            .lock()
            .expect("executor mutex poisoned")
            .contains(site.as_str())
    }
}

#[derive(Default)]
struct ScriptedDns {
    records: Mutex<HashSet<String>>,
}

#[async_trait]
impl DnsProvider for ScriptedDns {
    async fn exists(&self, hostname: &str) -> Result<bool, DnsError> {
        Ok(self
            .records
            .lock()
            .expect("dns mutex poisoned")
            .contains(hostname))
    }

    async fn create(&self, hostname: &str, address: IpAddr) -> Result<(), DnsError> {
        println!("  > dns A record {hostname} -> {address}");
        self.records
            .lock()
            .expect("dns mutex poisoned")
            .insert(hostname.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedIssuer {
    issued: Mutex<HashSet<String>>,
}

#[async_trait]
impl CertificateIssuer for ScriptedIssuer {
    async fn is_issued(&self, hostname: &str) -> bool {
        self.issued
            .lock()
            .expect("issuer mutex poisoned")
            .contains(hostname)
    }

    async fn issue(&self, hostname: &str) -> Result<(), IssuanceError> {
        println!("  > certificate issued for {hostname}");
        self.issued
            .lock()
            .expect("issuer mutex poisoned")
            .insert(hostname.to_string());
        Ok(())
    }
}

struct ScriptedResolver(IpAddr);

#[async_trait]
impl DnsResolver for ScriptedResolver {
    async fn resolve(&self, _hostname: &str) -> Option<IpAddr> {
        Some(self.0)
    }
}
