use regex::Regex;

/// Strips credential-shaped substrings from arbitrary text before it reaches a
/// log line or a persisted record. The flag itself is kept so operators can
/// still see which argument was involved; only the value is masked.
#[derive(Debug, Clone)]
pub struct SecretRedactor {
    flag_values: Regex,
    prefixed_values: Regex,
}

impl SecretRedactor {
    pub fn new() -> Self {
        Self {
            // Longest alternative first so --db-root-password is not split.
            flag_values: Regex::new(r"(--db-root-password|--admin-password|--password)\s+\S+")
                .expect("flag pattern compiles"),
            prefixed_values: Regex::new(r"(password:)\s*\S+").expect("prefix pattern compiles"),
        }
    }

    pub fn redact(&self, text: &str) -> String {
        let masked = self.flag_values.replace_all(text, "$1 ******");
        self.prefixed_values
            .replace_all(&masked, "$1 ******")
            .into_owned()
    }
}

impl Default for SecretRedactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_root_password_value_is_masked() {
        let redactor = SecretRedactor::new();
        let out = redactor.redact("bench new-site acme --admin-password admin --db-root-password hunter2");
        assert!(!out.contains("hunter2"));
        assert!(out.contains("--db-root-password ******"));
        assert!(out.contains("--admin-password ******"));
    }

    #[test]
    fn bare_password_flag_is_masked() {
        let redactor = SecretRedactor::new();
        let out = redactor.redact("mysql --password sw0rdf1sh --host db");
        assert!(!out.contains("sw0rdf1sh"));
        assert!(out.contains("--password ******"));
        assert!(out.contains("--host db"));
    }

    #[test]
    fn prefixed_password_is_masked() {
        let redactor = SecretRedactor::new();
        let out = redactor.redact("connection failed, password: t0ps3cret (access denied)");
        assert!(!out.contains("t0ps3cret"));
        assert!(out.contains("password: ******"));
    }

    #[test]
    fn text_without_credentials_is_unchanged() {
        let redactor = SecretRedactor::new();
        let input = "site acme.tenant.cloud already exists";
        assert_eq!(redactor.redact(input), input);
    }

    #[test]
    fn every_occurrence_is_masked() {
        let redactor = SecretRedactor::new();
        let out = redactor.redact("--password one then --password two");
        assert!(!out.contains("one"));
        assert!(!out.contains("two"));
    }
}
