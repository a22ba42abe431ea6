//! Container label sanitization.
//!
//! Compose and Docker Desktop stamp host filesystem paths into container
//! labels (project directories, bind mount sources). Those values, and any
//! other value that is an absolute host path, are replaced with a fixed
//! marker before labels leave the service.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Replacement for redacted label values.
pub const REDACTED: &str = "[REDACTED]";

/// Label keys whose values are always host paths.
const SENSITIVE_LABEL_KEYS: &[&str] = &[
    "com.docker.compose.project.config_files",
    "com.docker.compose.project.working_dir",
    "com.docker.compose.project.environment_file",
];

/// Docker Desktop mount source labels, e.g. `desktop.docker.io/binds/0/Source`.
static SENSITIVE_KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^desktop\.docker\.io/(?:binds|mounts)/\d+/Source$")
        .expect("invalid sensitive label key pattern")
});

/// Absolute Unix paths, Windows drive paths, and UNC paths.
static HOST_PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:/|[A-Za-z]:[\\/]|\\\\)").expect("invalid host path pattern")
});

/// Whether a label key is known to carry host filesystem information.
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_LABEL_KEYS.contains(&key) || SENSITIVE_KEY_PATTERN.is_match(key)
}

/// Whether a value looks like an absolute host path.
pub fn looks_like_host_path(value: &str) -> bool {
    HOST_PATH_PATTERN.is_match(value.trim_start())
}

/// Sanitize a single label value, borrowing when nothing changes.
///
/// Sensitive keys are redacted whatever their value; any other key is
/// redacted only when its value is a host path.
pub fn sanitize_label_value<'a>(key: &str, value: &'a str) -> Cow<'a, str> {
    if is_sensitive_key(key) || looks_like_host_path(value) {
        Cow::Borrowed(REDACTED)
    } else {
        Cow::Borrowed(value)
    }
}

/// Return a copy of `labels` with host paths redacted.
///
/// Every input key is present in the output.
pub fn sanitize_labels(labels: &HashMap<String, String>) -> HashMap<String, String> {
    let mut redacted = 0usize;
    let sanitized = labels
        .iter()
        .map(|(key, value)| {
            let clean = sanitize_label_value(key, value);
            if clean != value.as_str() {
                redacted += 1;
            }
            (key.clone(), clean.into_owned())
        })
        .collect();

    if redacted > 0 {
        tracing::debug!(redacted, total = labels.len(), "Redacted host paths from labels");
    }
    sanitized
}
