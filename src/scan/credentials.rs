use std::path::Path;

use super::{Finding, FindingKind, Severity};

const WEAK_PASSWORDS: &[&str] = &["", "root", "admin", "1234", "password"];
const DEFAULT_ADMIN_PASSWORDS: &[(&str, &str)] = &[
    ("admin", "Default admin:admin credentials"),
    ("1234", "Default TP-Link credentials (admin/1234)"),
];

/// True when the file name looks like a passwd/shadow database or a backup of one.
pub fn is_password_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .is_some_and(|name| name.contains("passwd") || name.contains("shadow"))
}

/// Parses colon-delimited credential records and reports at most one weakness per record.
pub fn check_password_records(source_file: &str, content: &str) -> Vec<Finding> {
    let mut findings = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split(':');
        let (Some(user), Some(password)) = (fields.next(), fields.next()) else {
            continue;
        };

        if let Some(description) = classify(user, password) {
            findings.push(
                Finding::new(
                    FindingKind::DefaultCredentials,
                    source_file,
                    (idx + 1) as u64,
                    format!("{} - Found '{}:{}'", description, user, password),
                )
                .with_severity(Severity::High),
            );
        }
    }

    findings
}

fn classify(user: &str, password: &str) -> Option<String> {
    if user == "root" && password.is_empty() {
        return Some("Empty root password".to_string());
    }

    if user == "admin" {
        if let Some((_, description)) = DEFAULT_ADMIN_PASSWORDS
            .iter()
            .find(|(default, _)| *default == password)
        {
            return Some(description.to_string());
        }
        if password.starts_with("$1$") {
            return Some("MD5 hashed admin password".to_string());
        }
    }

    if WEAK_PASSWORDS.contains(&password) {
        return Some(format!("Weak password for user '{}'", user));
    }

    None
}
