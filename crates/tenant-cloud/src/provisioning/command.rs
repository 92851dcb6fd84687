use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{ProvisioningConfig, Secret};

use super::domain::SiteName;

/// Closed set of site-management operations the pipeline may run. Each variant
/// expands to a discrete argument vector; nothing is ever spliced into a shell
/// string, so redaction works by argument position instead of text scanning.
#[derive(Debug, Clone)]
pub enum SiteCommand {
    CreateSite {
        site: SiteName,
        admin_password: Secret,
        db_root_password: Secret,
    },
    InstallApp {
        site: SiteName,
        app: &'static str,
    },
    ListInstalledApps {
        site: SiteName,
    },
    RunMigration {
        site: SiteName,
    },
    ApplyConfig {
        site: SiteName,
        key: String,
        value: String,
    },
    RunTenantBootstrap {
        site: SiteName,
        payload: serde_json::Value,
    },
}

impl SiteCommand {
    pub fn operation(&self) -> &'static str {
        match self {
            SiteCommand::CreateSite { .. } => "new-site",
            SiteCommand::InstallApp { .. } => "install-app",
            SiteCommand::ListInstalledApps { .. } => "list-apps",
            SiteCommand::RunMigration { .. } => "migrate",
            SiteCommand::ApplyConfig { .. } => "set-config",
            SiteCommand::RunTenantBootstrap { .. } => "execute",
        }
    }

    /// Argument vector with live secret values, for the executor only.
    pub fn argv(&self) -> Vec<String> {
        match self {
            SiteCommand::CreateSite {
                site,
                admin_password,
                db_root_password,
            } => vec![
                "new-site".to_string(),
                site.as_str().to_string(),
                "--admin-password".to_string(),
                admin_password.expose().to_string(),
                "--db-root-password".to_string(),
                db_root_password.expose().to_string(),
            ],
            SiteCommand::InstallApp { site, app } => vec![
                "--site".to_string(),
                site.as_str().to_string(),
                "install-app".to_string(),
                (*app).to_string(),
            ],
            SiteCommand::ListInstalledApps { site } => vec![
                "--site".to_string(),
                site.as_str().to_string(),
                "list-apps".to_string(),
            ],
            SiteCommand::RunMigration { site } => vec![
                "--site".to_string(),
                site.as_str().to_string(),
                "migrate".to_string(),
            ],
            SiteCommand::ApplyConfig { site, key, value } => vec![
                "--site".to_string(),
                site.as_str().to_string(),
                "set-config".to_string(),
                key.clone(),
                value.clone(),
            ],
            SiteCommand::RunTenantBootstrap { site, payload } => vec![
                "--site".to_string(),
                site.as_str().to_string(),
                "execute".to_string(),
                "tenant_cloud.bootstrap.bootstrap_site".to_string(),
                "--kwargs".to_string(),
                payload.to_string(),
            ],
        }
    }

    /// Loggable argument vector: values following a credential flag are masked.
    pub fn redacted_argv(&self) -> Vec<String> {
        let argv = self.argv();
        let mut redacted = Vec::with_capacity(argv.len());
        let mut mask_next = false;
        for arg in argv {
            if mask_next {
                redacted.push("******".to_string());
                mask_next = false;
                continue;
            }
            mask_next = matches!(
                arg.as_str(),
                "--admin-password" | "--db-root-password" | "--password"
            );
            redacted.push(arg);
        }
        redacted
    }

    pub fn redacted_display(&self) -> String {
        format!("bench {}", self.redacted_argv().join(" "))
    }
}

/// Captured result of one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Stderr-first combined text for classification of a failed invocation.
    pub fn combined(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.clone()
        } else if self.stdout.trim().is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stderr, self.stdout)
        }
    }
}

/// Transport-level command failure. A non-zero exit is not an error at this
/// layer; callers inspect [`CommandOutput::success`].
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn {operation}: {source}")]
    Spawn {
        operation: &'static str,
        source: std::io::Error,
    },
    #[error("{operation} timed out after {timeout:?}")]
    TimedOut {
        operation: &'static str,
        timeout: Duration,
    },
}

/// Executes site-management commands against the hosting bench. Implementations
/// must be safe to call concurrently for different sites; all per-tenant state
/// lives under the site directory selected by the `--site` argument.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &SiteCommand) -> Result<CommandOutput, CommandError>;
    /// Probe used as the idempotency guard for site creation.
    async fn site_exists(&self, site: &SiteName) -> bool;
}

/// Production executor invoking the `bench` CLI under the configured bench root.
pub struct BenchCommandRunner {
    bench_path: PathBuf,
    command_timeout: Duration,
}

impl BenchCommandRunner {
    pub fn new(config: &ProvisioningConfig) -> Self {
        Self {
            bench_path: config.bench_path.clone(),
            command_timeout: config.command_timeout,
        }
    }
}

#[async_trait]
impl CommandExecutor for BenchCommandRunner {
    async fn execute(&self, command: &SiteCommand) -> Result<CommandOutput, CommandError> {
        let operation = command.operation();
        debug!(
            target: "provisioning",
            command = %command.redacted_display(),
            "running bench command"
        );

        let run = Command::new("bench")
            .args(command.argv())
            .current_dir(&self.bench_path)
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.command_timeout, run).await {
            Err(_) => {
                return Err(CommandError::TimedOut {
                    operation,
                    timeout: self.command_timeout,
                })
            }
            Ok(Err(source)) => return Err(CommandError::Spawn { operation, source }),
            Ok(Ok(output)) => output,
        };

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn site_exists(&self, site: &SiteName) -> bool {
        let site_path = self.bench_path.join("sites").join(site.as_str());
        tokio::fs::metadata(site_path).await.is_ok()
    }
}

/// Parse the app listing emitted by `list-apps`: one app per line.
pub(crate) fn parse_installed_apps(stdout: &str) -> HashSet<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            // Newer bench versions append version columns; the app name is first.
            line.split_whitespace().next().unwrap_or(line).to_string()
        })
        .collect()
}
