use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier wrapper for subscription records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully qualified hostname of a tenant site, assigned once and immutable after.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteName(String);

impl SiteName {
    pub fn from_parts(instance_name: &str, suffix: &str) -> Self {
        Self(format!("{instance_name}.{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// High level lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Requested,
    Provisioning,
    Active,
    Failed,
}

impl SubscriptionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            SubscriptionStatus::Requested => "requested",
            SubscriptionStatus::Provisioning => "provisioning",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Failed => "failed",
        }
    }
}

/// Ordered checkpoints of the provisioning pipeline. The persisted step is the
/// resume point after a crash: a step is re-executed only while the record still
/// shows its work outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProvisioningStep {
    Init,
    SiteCreated,
    AppsInstalled,
    Bootstrapped,
    Completed,
}

impl ProvisioningStep {
    pub const fn label(self) -> &'static str {
        match self {
            ProvisioningStep::Init => "init",
            ProvisioningStep::SiteCreated => "site_created",
            ProvisioningStep::AppsInstalled => "apps_installed",
            ProvisioningStep::Bootstrapped => "bootstrapped",
            ProvisioningStep::Completed => "completed",
        }
    }
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Certificate issuance status, managed by the SSL retry task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SslStatus {
    Pending,
    Issued,
    Failed,
}

impl SslStatus {
    pub const fn label(self) -> &'static str {
        match self {
            SslStatus::Pending => "pending",
            SslStatus::Issued => "issued",
            SslStatus::Failed => "failed",
        }
    }
}

/// Closed catalog of application bundles installable into a tenant site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppPackage {
    Starter,
    RetailPos,
    CompleteSme,
}

impl AppPackage {
    /// Fixed, ordered list of apps the package installs. Order matters: the ERP
    /// core must land before the apps that extend it.
    pub const fn apps(self) -> &'static [&'static str] {
        match self {
            AppPackage::Starter => &[
                "erpnext",
                "zatca",
                "tenant_cloud",
                "subscription_manager",
                "ksa_print_formats",
            ],
            AppPackage::RetailPos | AppPackage::CompleteSme => &[
                "erpnext",
                "zatca",
                "tenant_cloud",
                "subscription_manager",
                "ksa_print_formats",
                "posawesome",
            ],
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            AppPackage::Starter => "starter",
            AppPackage::RetailPos => "retail_pos",
            AppPackage::CompleteSme => "complete_sme",
        }
    }
}

fn default_country() -> String {
    "Saudi Arabia".to_string()
}

fn default_currency() -> String {
    "SAR".to_string()
}

fn default_timezone() -> String {
    "Asia/Riyadh".to_string()
}

/// Business parameters forwarded verbatim to the tenant initializer. The
/// orchestrator never interprets these beyond serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessProfile {
    pub company_name: String,
    pub abbr: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub contact_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branding_asset: Option<String>,
}

/// Payload accepted when registering a new subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionRequest {
    pub instance_name: String,
    pub selected_package: AppPackage,
    pub business: BusinessProfile,
}

/// One append-only, already-redacted line of provisioning history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningLogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Durable record tracking one tenant's provisioning lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub instance_name: String,
    pub site_name: Option<SiteName>,
    pub status: SubscriptionStatus,
    pub provisioning_step: ProvisioningStep,
    pub provisioned: bool,
    pub provisioning_logs: Vec<ProvisioningLogEntry>,
    pub selected_package: AppPackage,
    pub ssl_status: SslStatus,
    pub ssl_attempts: u8,
    pub ssl_last_error: Option<String>,
    pub business: BusinessProfile,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        instance_name: impl Into<String>,
        selected_package: AppPackage,
        business: BusinessProfile,
    ) -> Self {
        Self {
            id,
            instance_name: instance_name.into(),
            site_name: None,
            status: SubscriptionStatus::Requested,
            provisioning_step: ProvisioningStep::Init,
            provisioned: false,
            provisioning_logs: Vec::new(),
            selected_package,
            ssl_status: SslStatus::Pending,
            ssl_attempts: 0,
            ssl_last_error: None,
            business,
        }
    }

    /// Assign the site hostname on first use; subsequent calls return the
    /// already-assigned name unchanged.
    pub fn assign_site_name(&mut self, suffix: &str) -> SiteName {
        match &self.site_name {
            Some(site) => site.clone(),
            None => {
                let site = SiteName::from_parts(&self.instance_name, suffix);
                self.site_name = Some(site.clone());
                site
            }
        }
    }

    /// Advance the persisted checkpoint. Steps only move forward; a stale value
    /// never overwrites later progress.
    pub fn advance_to(&mut self, step: ProvisioningStep) {
        if step > self.provisioning_step {
            self.provisioning_step = step;
        }
    }

    /// The single transition that may mark a subscription live. Keeping status,
    /// step, and the `provisioned` flag in one place is what upholds the
    /// invariant that `provisioned` implies both.
    pub fn activate(&mut self) {
        self.status = SubscriptionStatus::Active;
        self.provisioning_step = ProvisioningStep::Completed;
        self.provisioned = true;
    }

    pub fn push_log(&mut self, message: impl Into<String>) {
        self.provisioning_logs.push(ProvisioningLogEntry {
            at: Utc::now(),
            message: message.into(),
        });
    }

    pub fn clear_logs(&mut self) {
        self.provisioning_logs.clear();
    }

    /// `provisioned` is true exactly when the terminal state has been reached.
    pub fn invariant_holds(&self) -> bool {
        self.provisioned
            == (self.status == SubscriptionStatus::Active
                && self.provisioning_step == ProvisioningStep::Completed)
    }

    pub fn status_view(&self) -> SubscriptionStatusView {
        SubscriptionStatusView {
            subscription_id: self.id.clone(),
            instance_name: self.instance_name.clone(),
            site_name: self.site_name.as_ref().map(|site| site.as_str().to_string()),
            status: self.status.label(),
            provisioning_step: self.provisioning_step.label(),
            provisioned: self.provisioned,
            selected_package: self.selected_package.label(),
            ssl_status: self.ssl_status.label(),
            ssl_attempts: self.ssl_attempts,
            logs: self
                .provisioning_logs
                .iter()
                .map(|entry| entry.message.clone())
                .collect(),
        }
    }
}

/// Sanitized representation of a subscription for API responses. Carries no
/// raw errors and no credentials, only already-redacted log lines.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatusView {
    pub subscription_id: SubscriptionId,
    pub instance_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    pub status: &'static str,
    pub provisioning_step: &'static str,
    pub provisioned: bool,
    pub selected_package: &'static str,
    pub ssl_status: &'static str,
    pub ssl_attempts: u8,
    pub logs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn business() -> BusinessProfile {
        BusinessProfile {
            company_name: "Acme Trading".to_string(),
            abbr: "AT".to_string(),
            country: default_country(),
            currency: default_currency(),
            timezone: default_timezone(),
            contact_email: "owner@acme.example".to_string(),
            branding_asset: None,
        }
    }

    #[test]
    fn steps_are_totally_ordered() {
        use ProvisioningStep::*;
        assert!(Init < SiteCreated);
        assert!(SiteCreated < AppsInstalled);
        assert!(AppsInstalled < Bootstrapped);
        assert!(Bootstrapped < Completed);
    }

    #[test]
    fn advance_never_regresses() {
        let mut subscription = Subscription::new(
            SubscriptionId("sub-000001".to_string()),
            "acme",
            AppPackage::Starter,
            business(),
        );
        subscription.advance_to(ProvisioningStep::AppsInstalled);
        subscription.advance_to(ProvisioningStep::SiteCreated);
        assert_eq!(subscription.provisioning_step, ProvisioningStep::AppsInstalled);
    }

    #[test]
    fn site_name_is_assigned_once() {
        let mut subscription = Subscription::new(
            SubscriptionId("sub-000002".to_string()),
            "acme",
            AppPackage::Starter,
            business(),
        );
        let first = subscription.assign_site_name("tenant.cloud");
        assert_eq!(first.as_str(), "acme.tenant.cloud");
        let second = subscription.assign_site_name("other.suffix");
        assert_eq!(second, first);
    }

    #[test]
    fn activation_upholds_provisioned_invariant() {
        let mut subscription = Subscription::new(
            SubscriptionId("sub-000003".to_string()),
            "acme",
            AppPackage::Starter,
            business(),
        );
        assert!(subscription.invariant_holds());
        assert!(!subscription.provisioned);

        subscription.activate();
        assert!(subscription.invariant_holds());
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(subscription.provisioning_step, ProvisioningStep::Completed);
    }

    #[test]
    fn retail_packages_extend_the_starter_set() {
        let starter = AppPackage::Starter.apps();
        let retail = AppPackage::RetailPos.apps();
        assert!(starter.iter().all(|app| retail.contains(app)));
        assert!(retail.contains(&"posawesome"));
        assert_eq!(AppPackage::RetailPos.apps(), AppPackage::CompleteSme.apps());
    }

    #[test]
    fn business_profile_defaults_fill_locale_fields() {
        let profile: BusinessProfile = serde_json::from_value(serde_json::json!({
            "company_name": "Acme Trading",
            "abbr": "AT",
            "contact_email": "owner@acme.example"
        }))
        .expect("profile deserializes");
        assert_eq!(profile.country, "Saudi Arabia");
        assert_eq!(profile.currency, "SAR");
        assert_eq!(profile.timezone, "Asia/Riyadh");
    }
}
