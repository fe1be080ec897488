use regex::Regex;
use std::sync::OnceLock;

static SECRET_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

/// Longer text is not scanned for secrets
const MAX_SCAN_LEN: usize = 10_000;

fn secret_patterns() -> &'static Vec<Regex> {
    SECRET_PATTERNS.get_or_init(|| {
        [
            // GitHub Personal Access Token
            r"ghp_[a-zA-Z0-9]{36}",
            // Stripe Live Key
            r"sk_live_[a-zA-Z0-9]{24}",
            // Slack Token
            r"xox[baprs]-[a-zA-Z0-9]{10,48}",
            // AWS Access Key ID
            r"AKIA[0-9A-Z]{16}",
            // Google API Key
            r"AIza[0-9A-Za-z\-_]{35}",
            // Private key block
            r"-----BEGIN (RSA|DSA|EC|PGP|OPENSSH) PRIVATE KEY-----",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// True when `source_app` contains any excluded name, case-insensitively.
pub fn is_excluded_app(source_app: Option<&str>, excluded: &[String]) -> bool {
    let Some(app) = source_app else {
        return false;
    };
    let lower_app = app.to_lowercase();
    excluded
        .iter()
        .filter(|name| !name.is_empty())
        .any(|name| lower_app.contains(&name.to_lowercase()))
}

/// True when text looks like a credential.
pub fn is_sensitive(content: &str) -> bool {
    if content.len() > MAX_SCAN_LEN {
        return false;
    }
    secret_patterns().iter().any(|pattern| pattern.is_match(content))
}
