//! Configuration for the engine.
//!
//! Loaded from YAML, then overridden from `LEARN_EARN_*` environment
//! variables (a `.env` file is read first when present).

use chain_ledger::{ChainConfig, ChainId, RpcConfig};
use learn_agent::{OpenAiConfig, ServiceConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Env var the original deployment used for the Gnosis RPC endpoint.
pub const GNOSIS_RPC_ENV: &str = "CONNECTION_CONFIGS_CONFIG_GNOSIS_LEDGER_RPC";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chains: ChainsConfig,
    pub rewards: RewardsConfig,
    pub verification: VerificationConfig,
    pub tasks: TasksConfig,
    pub agent: AgentConfig,
    pub general: GeneralConfig,
}

impl EngineConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Load from an optional YAML file plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // a missing .env is fine
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => {
                let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_yaml(&yaml)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup("LEARN_EARN_LOG_LEVEL") {
            self.general.log_level = level;
        }
        if let Some(json) = lookup("LEARN_EARN_LOG_JSON") {
            self.general.json_logs = matches!(json.as_str(), "1" | "true" | "yes");
        }
        if let Some(chain) = lookup("LEARN_EARN_DEFAULT_CHAIN") {
            self.chains.default_chain = ChainId::new(chain);
        }
        if let Some(key) = lookup("LEARN_EARN_API_KEY") {
            self.agent.backend.api_key = Some(key);
        }
        if let Some(model) = lookup("LEARN_EARN_MODEL") {
            self.agent.backend.model = model;
        }
        if let Some(url) = lookup("LEARN_EARN_MODEL_BASE_URL") {
            self.agent.backend.base_url = url;
        }
        if let Some(rpc) = lookup(GNOSIS_RPC_ENV) {
            let gnosis = ChainId::new("gnosis");
            if let Some(chain) = self.chains.networks.iter_mut().find(|c| c.id == gnosis) {
                chain.rpc_url = rpc;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.networks.is_empty() {
            return Err(ConfigError::Invalid("no chains configured".into()));
        }
        if !self
            .chains
            .networks
            .iter()
            .any(|c| c.id == self.chains.default_chain)
        {
            return Err(ConfigError::Invalid(format!(
                "default chain {} is not configured",
                self.chains.default_chain
            )));
        }
        if self.verification.quiz_pass_percent == 0 || self.verification.quiz_pass_percent > 100 {
            return Err(ConfigError::Invalid(
                "quiz_pass_percent must be in 1..=100".into(),
            ));
        }
        if self.verification.submission_pass_score > 10 {
            return Err(ConfigError::Invalid(
                "submission_pass_score must be at most 10".into(),
            ));
        }
        if self.rewards.badge_level_threshold == 0 {
            return Err(ConfigError::Invalid(
                "badge_level_threshold must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Chain registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainsConfig {
    /// Chain used when a request names none
    pub default_chain: ChainId,
    pub networks: Vec<ChainConfig>,
    pub rpc: RpcConfig,
}

impl Default for ChainsConfig {
    fn default() -> Self {
        Self {
            default_chain: ChainId::new("gnosis"),
            networks: vec![ChainConfig::gnosis("https://rpc.gnosischain.com")],
            rpc: RpcConfig::default(),
        }
    }
}

/// Reward dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    /// Minimum level for a badge
    pub badge_level_threshold: u32,
    /// Metadata URIs are `{prefix}/level_{L}_badge`
    pub badge_uri_prefix: String,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            badge_level_threshold: 3,
            badge_uri_prefix: "ipfs://badge".to_string(),
        }
    }
}

/// Verification strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Quiz passes when correct answers reach this share of the key
    pub quiz_pass_percent: u32,
    /// Submission passes at this score out of 10
    pub submission_pass_score: u32,
    /// Leading tokens of a judgment reply searched for YES
    pub verdict_scan_tokens: usize,
    /// Bound on one transaction verification (ms)
    pub chain_timeout_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            quiz_pass_percent: 70,
            submission_pass_score: 7,
            verdict_scan_tokens: 3,
            chain_timeout_ms: 30_000,
        }
    }
}

/// Task generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub quest_default_xp: u64,
    pub quest_default_tokens: u64,
    pub quest_default_min_level: u32,
    /// Quests returned by `find_relevant_quests`
    pub relevant_quest_count: usize,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            quest_default_xp: 50,
            quest_default_tokens: 25,
            quest_default_min_level: 1,
            relevant_quest_count: 3,
        }
    }
}

/// Language model configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub backend: OpenAiConfig,
    pub service: ServiceConfig,
}

/// General configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level
    pub log_level: String,
    /// Emit JSON log lines
    pub json_logs: bool,
    /// Bound on one notification delivery (ms)
    pub notification_timeout_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            notification_timeout_ms: 5_000,
        }
    }
}
