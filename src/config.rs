//! Runtime configuration.
//!
//! Read once from the environment at startup (`.env`-aware via dotenv).
//! A missing scite key does not prevent startup; adjudication degrades to
//! `context_dependent` verdicts until one is configured.

use std::env;

/// Configuration for the compliance service
#[derive(Debug, Clone)]
pub struct Settings {
    /// scite.ai API key (empty = adjudication runs degraded)
    pub scite_api_key: String,
    /// scite.ai API base URL
    pub scite_base_url: String,
    /// Zero-shot entailment scoring endpoint
    pub entailment_url: String,
    /// Directory holding SOP graph definitions ({id}.json)
    pub sop_dir: String,
    /// HTTP bind address
    pub bind_addr: String,
    /// Max concurrent adjudication tasks per run
    pub adjudication_workers: usize,
    /// Per-deviation deadline for external evidence calls, in seconds
    pub adjudication_timeout_secs: u64,
}

impl Settings {
    /// Build settings from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scite_api_key: env::var("SCITE_API_KEY").unwrap_or(defaults.scite_api_key),
            scite_base_url: env::var("SCITE_BASE_URL").unwrap_or(defaults.scite_base_url),
            entailment_url: env::var("ENTAILMENT_URL").unwrap_or(defaults.entailment_url),
            sop_dir: env::var("SOP_DIR").unwrap_or(defaults.sop_dir),
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            adjudication_workers: env::var("ADJUDICATION_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.adjudication_workers),
            adjudication_timeout_secs: env::var("ADJUDICATION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.adjudication_timeout_secs),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scite_api_key: String::new(),
            scite_base_url: "https://api.scite.ai".to_string(),
            entailment_url: "http://localhost:8090/score".to_string(),
            sop_dir: "sop".to_string(),
            bind_addr: "0.0.0.0:8000".to_string(),
            adjudication_workers: 4,
            adjudication_timeout_secs: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.scite_base_url, "https://api.scite.ai");
        assert_eq!(s.adjudication_workers, 4);
        assert!(s.scite_api_key.is_empty());
    }
}
