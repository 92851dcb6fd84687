use std::fmt;

/// Stable error code attached to a classified provisioning failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    DbAuthFailed,
    SiteExists,
    PermissionDenied,
    Unknown,
}

impl FaultCode {
    pub const fn label(self) -> &'static str {
        match self {
            FaultCode::DbAuthFailed => "DB_AUTH_FAILED",
            FaultCode::SiteExists => "SITE_EXISTS",
            FaultCode::PermissionDenied => "PERMISSION_DENIED",
            FaultCode::Unknown => "UNKNOWN_ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSeverity {
    Info,
    Error,
}

impl FaultSeverity {
    pub const fn label(self) -> &'static str {
        match self {
            FaultSeverity::Info => "info",
            FaultSeverity::Error => "error",
        }
    }
}

/// Classified, user-safe rendering of a raw failure. `title` and `message`
/// are the only parts that may reach a user or a persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningFault {
    pub code: FaultCode,
    pub title: &'static str,
    pub message: &'static str,
    pub severity: FaultSeverity,
}

impl ProvisioningFault {
    /// Recoverable faults describe state that already matches the goal (an
    /// existing site can be reused) rather than a broken pipeline.
    pub fn is_recoverable(&self) -> bool {
        self.severity == FaultSeverity::Info
    }

    pub fn log_line(&self) -> String {
        format!("{}: {}", self.title, self.message)
    }
}

impl fmt::Display for ProvisioningFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

/// Map a raw failure into a stable code and a message safe to show users.
/// Matching is case-insensitive over the raw text; the raw text itself never
/// travels further than the caller's redacted operational log.
pub fn classify_failure(raw: &str) -> ProvisioningFault {
    let error = raw.to_lowercase();

    if error.contains("access denied for user") || error.contains("1045") {
        return ProvisioningFault {
            code: FaultCode::DbAuthFailed,
            title: "Database Authentication Failed",
            message: "Unable to connect to the database with the configured credentials. \
                      Verify that the database user exists, the password is correct, and the \
                      user has sufficient privileges.",
            severity: FaultSeverity::Error,
        };
    }

    if error.contains("already exists") {
        return ProvisioningFault {
            code: FaultCode::SiteExists,
            title: "Site Already Exists",
            message: "The site already exists on the server and cannot be created again. \
                      The existing site can be reused.",
            severity: FaultSeverity::Info,
        };
    }

    if error.contains("permission denied") {
        return ProvisioningFault {
            code: FaultCode::PermissionDenied,
            title: "Permission Denied",
            message: "The system does not have sufficient permissions to complete \
                      provisioning. Check file system and database permissions.",
            severity: FaultSeverity::Error,
        };
    }

    ProvisioningFault {
        code: FaultCode::Unknown,
        title: "Provisioning Failed",
        message: "An unexpected error occurred during provisioning. Contact support or \
                  check the server logs.",
        severity: FaultSeverity::Error,
    }
}
