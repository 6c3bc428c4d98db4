//! Policy enforcement: locking settings at System/Team level so lower
//! levels (Project/User) cannot loosen them, with append-only audit logging
//! of every attempted change.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::loader::{ConfigLevel, NoeticConfig};

pub type PolicyResult<T> = Result<T, String>;

/// One audit-logged attempt to change a setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAction {
    pub timestamp: String,
    pub user: String,
    pub action: String,
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub level: ConfigLevel,
    pub allowed: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    /// Keys that cannot be modified below the level that locked them.
    pub locked_settings: HashSet<String>,
    /// Keys that must hold a specific value for `validate()` to pass.
    pub required_settings: HashMap<String, String>,
    /// Keys that may never be set to a truthy/enabled value.
    pub forbidden_settings: HashSet<String>,
    pub audit_enabled: bool,
    pub audit_log_path: Option<PathBuf>,
}

/// Enforces a `PolicyConfig` loaded from the System or Team level against
/// changes attempted at any level.
pub struct PolicyEnforcer {
    policy: PolicyConfig,
    config_level: ConfigLevel,
}

impl PolicyEnforcer {
    pub fn new(config_level: ConfigLevel) -> PolicyResult<Self> {
        let policy = Self::load_policy(config_level)?;
        Ok(Self { policy, config_level })
    }

    /// Only System and Team levels may define a policy; Project/User
    /// levels always get the empty default (no restrictions imposed).
    fn load_policy(level: ConfigLevel) -> PolicyResult<PolicyConfig> {
        let policy_path = match level {
            ConfigLevel::System => {
                #[cfg(target_os = "windows")]
                {
                    let program_data = std::env::var("PROGRAMDATA").unwrap_or_else(|_| "C:\\ProgramData".to_string());
                    PathBuf::from(program_data).join("Noetic").join("policy.toml")
                }
                #[cfg(not(target_os = "windows"))]
                {
                    PathBuf::from("/etc/noetic/policy.toml")
                }
            }
            ConfigLevel::Team => {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                #[cfg(target_os = "windows")]
                {
                    PathBuf::from(std::env::var("APPDATA").unwrap_or(home)).join("Noetic").join("team").join("policy.toml")
                }
                #[cfg(not(target_os = "windows"))]
                {
                    let config_home = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| format!("{home}/.config"));
                    PathBuf::from(config_home).join("noetic").join("team").join("policy.toml")
                }
            }
            ConfigLevel::Project | ConfigLevel::User => return Ok(PolicyConfig::default()),
        };

        if !policy_path.exists() {
            return Ok(PolicyConfig::default());
        }

        let content = fs::read_to_string(&policy_path).map_err(|e| format!("failed to read policy file: {e}"))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse policy: {e}"))
    }

    /// A setting locked at a given level can only be changed at that level
    /// or below it in the hierarchy, never at a higher (more local) level.
    pub fn can_modify(&self, key: &str, target_level: ConfigLevel) -> PolicyResult<()> {
        if self.policy.locked_settings.contains(key) && target_level > self.config_level {
            return Err(format!("setting '{key}' is locked at {:?} level and cannot be modified", self.config_level));
        }
        if self.policy.forbidden_settings.contains(key) {
            return Err(format!("setting '{key}' is forbidden by policy and cannot be enabled"));
        }
        Ok(())
    }

    pub fn validate(&self, config: &NoeticConfig) -> PolicyResult<()> {
        let mut errors = Vec::new();

        for (key, required_value) in &self.policy.required_settings {
            let actual_value = Self::get_config_value(config, key);
            if actual_value != *required_value {
                errors.push(format!("required setting '{key}' must be '{required_value}', but is '{actual_value}'"));
            }
        }

        if self.policy.forbidden_settings.contains("watchdog.allowed_tools") && config.watchdog.allowed_tools.is_none() {
            errors.push("setting 'watchdog.allowed_tools' is forbidden from being unset by policy".to_string());
        }

        if !errors.is_empty() {
            return Err(format!("policy validation failed:\n{}", errors.join("\n")));
        }
        Ok(())
    }

    fn get_config_value(config: &NoeticConfig, key: &str) -> String {
        match key {
            "prar.theta_perceive" => config.prar.theta_perceive.to_string(),
            "prar.theta_reason" => config.prar.theta_reason.to_string(),
            "watchdog.abort_on_consecutive_failures" => config.watchdog.abort_on_consecutive_failures.to_string(),
            "theta_consensus" => config.theta_consensus.to_string(),
            _ => "unknown".to_string(),
        }
    }

    /// Append one JSON Lines record per action; a no-op when audit logging
    /// is disabled in the loaded policy.
    pub fn log_action(&self, action: PolicyAction) -> PolicyResult<()> {
        if !self.policy.audit_enabled {
            return Ok(());
        }

        let log_path = self
            .policy
            .audit_log_path
            .as_ref()
            .ok_or_else(|| "audit log enabled but no path specified".to_string())?;

        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("failed to create audit log directory: {e}"))?;
        }

        let json = serde_json::to_string(&action).map_err(|e| format!("failed to serialize audit action: {e}"))?;

        use std::fs::OpenOptions;
        use std::io::Write;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| format!("failed to open audit log: {e}"))?;
        writeln!(file, "{json}").map_err(|e| format!("failed to write audit log: {e}"))?;
        Ok(())
    }

    pub fn get_policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn is_audit_enabled(&self) -> bool {
        self.policy.audit_enabled
    }
}

/// Builder for constructing a `PolicyConfig` in code (as opposed to reading
/// one from disk), mainly for tests and `save_to_system`.
pub struct PolicyBuilder {
    policy: PolicyConfig,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self { policy: PolicyConfig::default() }
    }

    pub fn lock(mut self, key: &str) -> Self {
        self.policy.locked_settings.insert(key.to_string());
        self
    }

    pub fn require(mut self, key: &str, value: &str) -> Self {
        self.policy.required_settings.insert(key.to_string(), value.to_string());
        self
    }

    pub fn forbid(mut self, key: &str) -> Self {
        self.policy.forbidden_settings.insert(key.to_string());
        self
    }

    pub fn enable_audit(mut self, log_path: &str) -> Self {
        self.policy.audit_enabled = true;
        self.policy.audit_log_path = Some(PathBuf::from(log_path));
        self
    }

    pub fn build(self) -> PolicyConfig {
        self.policy
    }

    pub fn save_to_system(self) -> PolicyResult<()> {
        #[cfg(target_os = "windows")]
        let policy_path = {
            let program_data = std::env::var("PROGRAMDATA").unwrap_or_else(|_| "C:\\ProgramData".to_string());
            PathBuf::from(program_data).join("Noetic").join("policy.toml")
        };
        #[cfg(not(target_os = "windows"))]
        let policy_path = PathBuf::from("/etc/noetic/policy.toml");

        if let Some(parent) = policy_path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("failed to create policy directory: {e}"))?;
        }

        let toml = toml::to_string_pretty(&self.policy).map_err(|e| format!("failed to serialize policy: {e}"))?;
        fs::write(&policy_path, toml).map_err(|e| format!("failed to write policy file: {e}"))?;
        Ok(())
    }
}

impl Default for PolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
