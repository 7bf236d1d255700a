//! Session-layer configuration and limits

use static_assertions::const_assert;

/// Capacity of session and upgrade argument buffers, in bytes
pub const MAX_ARGS_LEN: usize = 160;

/// Longest accepted service name
pub const MAX_SERVICE_NAME_LEN: usize = 64;

/// Default separator between client label and session label
pub const DEFAULT_LABEL_SEPARATOR: &str = " -> ";

// An upgrade request ("ram_quota=<u64>, cap_quota=<u64>") must always fit
const_assert!(MAX_ARGS_LEN >= 2 * 20 + "ram_quota=, cap_quota=".len());
const_assert!(MAX_SERVICE_NAME_LEN <= MAX_ARGS_LEN);

/// Broker configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Prefix session labels with the requesting domain's label
    pub prefix_labels: bool,

    /// Separator placed between the domain label and the session label
    pub label_separator: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefix_labels: true,
            label_separator: String::from(DEFAULT_LABEL_SEPARATOR),
        }
    }
}

impl SessionConfig {
    /// Label the server sees for a request from `client_label`
    pub fn session_label(&self, client_label: &str, label: &str) -> String {
        if !self.prefix_labels {
            return String::from(label);
        }
        if label.is_empty() {
            return String::from(client_label);
        }
        format!("{}{}{}", client_label, self.label_separator, label)
    }
}
