//! Hierarchical configuration loader.
//!
//! Four levels are merged lowest to highest: System (`/etc/noetic/config.toml`
//! or the Windows equivalent), Team (`~/.config/noetic/team/config.toml`),
//! Project (`<project>/.noetic/config.toml`), User
//! (`~/.config/noetic/user.toml`). Each level is optional; a missing file is
//! skipped, not an error.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embeddings::ReflectWeights;
use crate::evolution_controller::ArchiveUtilityWeights;
use crate::persona::{default_roster, HeuristicPersona, Persona};
use crate::prar_engine::PrarConfig;
use crate::watchdog::WatchdogConfig;

/// Configuration hierarchy level, highest value wins on merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLevel {
    System = 0,
    Team = 1,
    Project = 2,
    User = 3,
}

impl Default for ConfigLevel {
    fn default() -> Self {
        ConfigLevel::System
    }
}

impl ConfigLevel {
    pub fn all_levels() -> Vec<ConfigLevel> {
        vec![ConfigLevel::System, ConfigLevel::Team, ConfigLevel::Project, ConfigLevel::User]
    }

    pub fn name(&self) -> &str {
        match self {
            ConfigLevel::System => "system",
            ConfigLevel::Team => "team",
            ConfigLevel::Project => "project",
            ConfigLevel::User => "user",
        }
    }
}

/// Phase-gating and refinement thresholds for `PRAREngine`. Mirrors
/// `PrarConfig` field-for-field so it round-trips through TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrarSettings {
    pub theta_perceive: f64,
    pub theta_reason: f64,
    pub theta_plan: f64,
    pub theta_retrieve: f64,
    pub k_perceive: usize,
    pub k_reason: usize,
    pub lambda: f64,
    pub branch_count: usize,
    pub subtask_retry_cap: usize,
    pub act_concurrency_cap: usize,
    /// Weights combining the Perceive/Reason/Act phase embeddings into
    /// Reflect's `holistic` vector.
    pub reflect_weights: ReflectWeights,
    /// Licenses a retrieved `IngestionEvent` must carry to be embedded and
    /// stored as a raw-content vector entry.
    pub license_allowlist: Vec<String>,
    pub retrieval_top_k: usize,
    pub retrieval_min_similarity: f64,
}

impl Default for PrarSettings {
    fn default() -> Self {
        let d = PrarConfig::default();
        Self {
            theta_perceive: d.theta_perceive,
            theta_reason: d.theta_reason,
            theta_plan: d.theta_plan,
            theta_retrieve: d.theta_retrieve,
            k_perceive: d.k_perceive,
            k_reason: d.k_reason,
            lambda: d.lambda,
            branch_count: d.branch_count,
            subtask_retry_cap: d.subtask_retry_cap,
            act_concurrency_cap: d.act_concurrency_cap,
            reflect_weights: d.reflect_weights,
            license_allowlist: d.license_allowlist,
            retrieval_top_k: d.retrieval_top_k,
            retrieval_min_similarity: d.retrieval_min_similarity,
        }
    }
}

impl From<PrarSettings> for PrarConfig {
    fn from(settings: PrarSettings) -> Self {
        PrarConfig {
            theta_perceive: settings.theta_perceive,
            theta_reason: settings.theta_reason,
            theta_plan: settings.theta_plan,
            theta_retrieve: settings.theta_retrieve,
            k_perceive: settings.k_perceive,
            k_reason: settings.k_reason,
            lambda: settings.lambda,
            branch_count: settings.branch_count,
            subtask_retry_cap: settings.subtask_retry_cap,
            act_concurrency_cap: settings.act_concurrency_cap,
            reflect_weights: settings.reflect_weights,
            license_allowlist: settings.license_allowlist,
            retrieval_top_k: settings.retrieval_top_k,
            retrieval_min_similarity: settings.retrieval_min_similarity,
        }
    }
}

/// Watchdog allow-/deny-list, budgets, and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WatchdogSettings {
    pub denied_tools: Vec<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub per_phase_budget: std::collections::HashMap<String, usize>,
    pub immutable_path_globs: Vec<String>,
    pub quarantine_window_secs: u64,
    pub abort_on_consecutive_failures: usize,
}

impl From<WatchdogSettings> for WatchdogConfig {
    fn from(settings: WatchdogSettings) -> Self {
        WatchdogConfig {
            denied_tools: settings.denied_tools.into_iter().collect(),
            allowed_tools: settings.allowed_tools.map(|tools| tools.into_iter().collect()),
            per_phase_budget: settings.per_phase_budget,
            immutable_path_globs: settings.immutable_path_globs,
            quarantine_window: Duration::from_secs(settings.quarantine_window_secs),
            abort_on_consecutive_failures: settings.abort_on_consecutive_failures,
        }
    }
}

/// Backing store locations and embedding width.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub graph_db_path: String,
    pub vector_db_path: String,
    pub kv_db_path: String,
    pub embedding_dimension: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            graph_db_path: "noetic-graph.sqlite3".to_string(),
            vector_db_path: "noetic-vectors.sqlite3".to_string(),
            kv_db_path: "noetic-kv.sqlite3".to_string(),
            embedding_dimension: crate::embeddings::EMBEDDING_DIM,
        }
    }
}

/// One persona entry in a configured roster. Mirrors the constructor
/// arguments of `HeuristicPersona` so a deployment can replace the default
/// seven-persona roster without recompiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaSettings {
    pub name: String,
    pub role_prompt: String,
    pub risk_aversion: f64,
    pub cost_aversion: f64,
}

/// Weights applied to `ArchivedIteration::utility`. Mirrors
/// `ArchiveUtilityWeights` field-for-field so it round-trips through TOML.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveUtilityWeightsSettings {
    pub alpha_score: f64,
    pub alpha_cost: f64,
    pub alpha_time: f64,
}

impl Default for ArchiveUtilityWeightsSettings {
    fn default() -> Self {
        let d = ArchiveUtilityWeights::default();
        Self {
            alpha_score: d.alpha_score,
            alpha_cost: d.alpha_cost,
            alpha_time: d.alpha_time,
        }
    }
}

impl From<ArchiveUtilityWeightsSettings> for ArchiveUtilityWeights {
    fn from(settings: ArchiveUtilityWeightsSettings) -> Self {
        ArchiveUtilityWeights {
            alpha_score: settings.alpha_score,
            alpha_cost: settings.alpha_cost,
            alpha_time: settings.alpha_time,
        }
    }
}

/// Builds the roster `PersonaOrchestrator` is constructed with: the
/// configured roster if non-empty, otherwise `default_roster()`.
pub fn build_roster(settings: &[PersonaSettings]) -> Vec<Box<dyn Persona>> {
    if settings.is_empty() {
        return default_roster();
    }
    settings
        .iter()
        .map(|p| -> Box<dyn Persona> {
            Box::new(HeuristicPersona::new(
                p.name.clone(),
                p.role_prompt.clone(),
                p.risk_aversion,
                p.cost_aversion,
            ))
        })
        .collect()
}

/// Root configuration object, merged across the four hierarchy levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoeticConfig {
    pub prar: PrarSettings,
    pub watchdog: WatchdogSettings,
    pub stores: StoreSettings,
    pub theta_consensus: f64,
    /// Wall-clock budget allotted to a single task's full Perceive-Reason-
    /// Act-Reflect run, in seconds.
    pub task_deadline_secs: u64,
    /// Per-dispatch budget for a single `ToolRegistry::call`, in seconds.
    pub tool_call_timeout_secs: u64,
    /// Deliberation roster for `PersonaOrchestrator`. Empty means
    /// `default_roster()`.
    pub personas: Vec<PersonaSettings>,
    pub archive_utility_weights: ArchiveUtilityWeightsSettings,

    #[serde(skip)]
    pub level: ConfigLevel,
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for NoeticConfig {
    fn default() -> Self {
        Self {
            prar: PrarSettings::default(),
            watchdog: WatchdogSettings::default(),
            stores: StoreSettings::default(),
            theta_consensus: 0.5,
            task_deadline_secs: 300,
            tool_call_timeout_secs: 30,
            personas: Vec::new(),
            archive_utility_weights: ArchiveUtilityWeightsSettings::default(),
            level: ConfigLevel::System,
            source_path: None,
        }
    }
}

impl NoeticConfig {
    /// Merge another configuration into this one; the other's level must be
    /// at or above this one's for its values to take effect, and full
    /// sections are replaced rather than field-merged.
    pub fn merge(&mut self, other: &NoeticConfig) {
        if other.level >= self.level {
            self.prar = other.prar.clone();
            self.watchdog = other.watchdog.clone();
            self.stores = other.stores.clone();
            self.theta_consensus = other.theta_consensus;
            self.task_deadline_secs = other.task_deadline_secs;
            self.tool_call_timeout_secs = other.tool_call_timeout_secs;
            self.personas = other.personas.clone();
            self.archive_utility_weights = other.archive_utility_weights;
            self.level = other.level;
            self.source_path.clone_from(&other.source_path);
        }
    }

    /// Wall-clock budget allotted to a single task's full run.
    pub fn task_deadline(&self) -> Duration {
        Duration::from_secs(self.task_deadline_secs)
    }

    /// Per-dispatch budget for a single tool call.
    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_call_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.theta_consensus) {
            return Err(format!("theta_consensus must be in [0, 1], got {}", self.theta_consensus));
        }
        if self.stores.embedding_dimension == 0 {
            return Err("embedding_dimension must be non-zero".to_string());
        }
        if self.task_deadline_secs == 0 {
            return Err("task_deadline_secs must be non-zero".to_string());
        }
        if self.tool_call_timeout_secs == 0 {
            return Err("tool_call_timeout_secs must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Loads and merges `NoeticConfig` across the four hierarchy levels.
pub struct ConfigLoader {
    config_dir: PathBuf,
    project_dir: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Result<Self, String> {
        Ok(Self {
            config_dir: Self::get_config_dir()?,
            project_dir: None,
        })
    }

    pub fn with_project_dir(mut self, project_dir: PathBuf) -> Self {
        self.project_dir = Some(project_dir);
        self
    }

    pub fn load(&self) -> Result<NoeticConfig, String> {
        let mut config = NoeticConfig::default();
        for level in ConfigLevel::all_levels() {
            if let Some(level_config) = self.load_level(level)? {
                config.merge(&level_config);
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn load_level(&self, level: ConfigLevel) -> Result<Option<NoeticConfig>, String> {
        let path = self.get_config_path(level)?;
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| format!("failed to read config at {path:?}: {e}"))?;
        let mut config: NoeticConfig =
            toml::from_str(&content).map_err(|e| format!("failed to parse config at {path:?}: {e}"))?;
        config.level = level;
        config.source_path = Some(path);
        Ok(Some(config))
    }

    fn get_config_path(&self, level: ConfigLevel) -> Result<PathBuf, String> {
        match level {
            ConfigLevel::System => {
                #[cfg(target_os = "windows")]
                {
                    let program_data = std::env::var("PROGRAMDATA").unwrap_or_else(|_| "C:\\ProgramData".to_string());
                    Ok(PathBuf::from(program_data).join("Noetic").join("config.toml"))
                }
                #[cfg(not(target_os = "windows"))]
                {
                    Ok(PathBuf::from("/etc/noetic/config.toml"))
                }
            }
            ConfigLevel::Team => Ok(self.config_dir.join("team").join("config.toml")),
            ConfigLevel::Project => {
                let project_dir = self.project_dir.as_ref().ok_or_else(|| "no project directory set".to_string())?;
                Ok(project_dir.join(".noetic").join("config.toml"))
            }
            ConfigLevel::User => Ok(self.config_dir.join("user.toml")),
        }
    }

    fn get_config_dir() -> Result<PathBuf, String> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").map_err(|_| "APPDATA environment variable not set".to_string())?;
            Ok(PathBuf::from(appdata).join("Noetic"))
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").map_err(|_| "HOME environment variable not set".to_string())?;
            Ok(PathBuf::from(home).join("Library").join("Application Support").join("Noetic"))
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let home = std::env::var("HOME").map_err(|_| "HOME environment variable not set".to_string())?;
            let config_home = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| format!("{home}/.config"));
            Ok(PathBuf::from(config_home).join("noetic"))
        }
    }

    pub fn save(&self, config: &NoeticConfig, level: ConfigLevel) -> Result<(), String> {
        let path = self.get_config_path(level)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("failed to create config directory: {e}"))?;
        }
        let content = toml::to_string_pretty(config).map_err(|e| format!("failed to serialize config: {e}"))?;
        fs::write(&path, content).map_err(|e| format!("failed to write config to {path:?}: {e}"))?;
        Ok(())
    }

    pub fn get_all_paths(&self) -> Vec<(ConfigLevel, PathBuf)> {
        ConfigLevel::all_levels()
            .into_iter()
            .filter_map(|level| self.get_config_path(level).ok().map(|path| (level, path)))
            .collect()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().expect("failed to create default ConfigLoader")
    }
}
