// Runtime settings: optional JSON file, then environment overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::closure::ClosurePolicyKind;
use crate::error::Result;

pub const ENV_DB_PATH: &str = "FINANCE_DB_PATH";
pub const ENV_BIND_ADDR: &str = "FINANCE_BIND_ADDR";
pub const ENV_CLOSURE_POLICY: &str = "FINANCE_CLOSURE_POLICY";
pub const ENV_LOG: &str = "FINANCE_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_closure_policy")]
    pub closure_policy: ClosurePolicyKind,
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` still wins.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("finance.db")
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_closure_policy() -> ClosurePolicyKind {
    ClosurePolicyKind::Markers
}

fn default_log_filter() -> String {
    "finance_tracker=info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            bind_addr: default_bind_addr(),
            closure_policy: default_closure_policy(),
            log_filter: default_log_filter(),
        }
    }
}

impl Settings {
    /// Defaults, overlaid by `file` when given, overlaid by the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut settings = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.db_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            self.bind_addr = addr;
        }
        if let Some(policy) = lookup(ENV_CLOSURE_POLICY) {
            self.closure_policy = ClosurePolicyKind::from_str(&policy)?;
        }
        if let Some(filter) = lookup(ENV_LOG) {
            self.log_filter = filter;
        }
        Ok(())
    }
}
