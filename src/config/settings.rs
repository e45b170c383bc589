//! Configuration settings for coalesce.

use crate::cluster::{
    AlgorithmParams, ClusteringAlgorithm, DbscanParams, HierarchicalParams, KMeansParams, Linkage,
};
use crate::error::{ConfigError, Result};
use crate::session::SessionConfig;
use crate::synthesis::SynthesisGuidance;
use crate::vector::{DistanceMetric, FragmentScope};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted when `synthesis.api.api_key` is unset.
pub const API_KEY_ENV: &str = "COALESCE_SYNTHESIS_API_KEY";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub clustering: ClusteringConfig,
    pub search: SearchConfig,
    pub synthesis: SynthesisConfig,
    pub workers: WorkerConfig,
    pub notifications: NotificationConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations or use defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("coalesce.toml"),
            dirs::config_dir()
                .map(|p| p.join("coalesce/config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".coalesce/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Validate the configuration.
    ///
    /// Linkage/metric compatibility is checked per session, not here.
    pub fn validate(&self) -> Result<()> {
        let clustering = &self.clustering;
        if let Some(threshold) = clustering.distance_threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(ConfigError::Invalid(
                    "clustering.distance_threshold must be >= 0".to_string(),
                )
                .into());
            }
        }
        if clustering.target_clusters == Some(0) {
            return Err(
                ConfigError::Invalid("clustering.target_clusters must be > 0".to_string()).into(),
            );
        }
        if clustering.max_fragments == Some(0) {
            return Err(
                ConfigError::Invalid("clustering.max_fragments must be > 0".to_string()).into(),
            );
        }
        clustering.kmeans_params().validate()?;
        clustering.dbscan_params().validate()?;

        if let Some(s) = self.search.min_similarity {
            if !(0.0..=1.0).contains(&s) {
                return Err(ConfigError::Invalid(
                    "search.min_similarity must be within [0, 1]".to_string(),
                )
                .into());
            }
        }

        if self.synthesis.provider == SynthesisProvider::Api {
            if self.synthesis.api.base_url.is_empty() {
                return Err(ConfigError::MissingField("synthesis.api.base_url".to_string()).into());
            }
            if self.synthesis.api.model.is_empty() {
                return Err(ConfigError::MissingField("synthesis.api.model".to_string()).into());
            }
        }
        if self.synthesis.api.timeout_secs == 0 {
            return Err(
                ConfigError::Invalid("synthesis.api.timeout_secs must be > 0".to_string()).into(),
            );
        }
        if self.synthesis.max_content_chars == 0 {
            return Err(
                ConfigError::Invalid("synthesis.max_content_chars must be > 0".to_string()).into(),
            );
        }

        if self.notifications.timeout_secs == 0 {
            return Err(
                ConfigError::Invalid("notifications.timeout_secs must be > 0".to_string()).into(),
            );
        }
        if self.notifications.max_retries > crate::notify::MAX_WEBHOOK_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "notifications.max_retries must be <= {}",
                crate::notify::MAX_WEBHOOK_RETRIES
            ))
            .into());
        }
        for url in &self.notifications.webhooks {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "notifications.webhooks entry is not an http(s) URL: {}",
                    url
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Expand the fragments file path, if one is configured.
    pub fn fragments_file(&self) -> Result<Option<PathBuf>> {
        Ok(self.storage.fragments_file.as_deref().map(|path| {
            let expanded = shellexpand::tilde(path);
            PathBuf::from(expanded.as_ref())
        }))
    }
}

/// Defaults for new clustering sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Default clustering algorithm
    pub algorithm: ClusteringAlgorithm,
    /// Linkage for hierarchical clustering
    pub linkage: Linkage,
    /// Distance metric
    pub metric: DistanceMetric,
    /// Hierarchical merge cost cutoff
    pub distance_threshold: Option<f64>,
    /// Hierarchical cluster count target
    pub target_clusters: Option<usize>,
    /// K-Means cluster count (0 = auto-detect)
    pub kmeans_k: usize,
    /// K-Means iteration cap
    pub kmeans_max_iterations: usize,
    /// K-Means centroid movement tolerance
    pub kmeans_tolerance: f64,
    /// DBSCAN neighbourhood radius
    pub dbscan_eps: f64,
    /// DBSCAN core point threshold
    pub dbscan_min_points: usize,
    /// Cap on fragments claimed per session
    pub max_fragments: Option<usize>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        let hierarchical = HierarchicalParams::default();
        let kmeans = KMeansParams::default();
        let dbscan = DbscanParams::default();
        Self {
            algorithm: ClusteringAlgorithm::HierarchicalAgglomerative,
            linkage: hierarchical.linkage,
            metric: DistanceMetric::Cosine,
            distance_threshold: hierarchical.distance_threshold,
            target_clusters: hierarchical.target_clusters,
            kmeans_k: kmeans.k,
            kmeans_max_iterations: kmeans.max_iterations,
            kmeans_tolerance: kmeans.tolerance,
            dbscan_eps: dbscan.eps,
            dbscan_min_points: dbscan.min_points,
            max_fragments: None,
        }
    }
}

impl ClusteringConfig {
    pub fn kmeans_params(&self) -> KMeansParams {
        KMeansParams {
            k: self.kmeans_k,
            max_iterations: self.kmeans_max_iterations,
            tolerance: self.kmeans_tolerance,
        }
    }

    pub fn dbscan_params(&self) -> DbscanParams {
        DbscanParams {
            eps: self.dbscan_eps,
            min_points: self.dbscan_min_points,
        }
    }

    /// Session configuration for the configured algorithm over `scope`.
    pub fn session_config(&self, scope: FragmentScope) -> SessionConfig {
        let algorithm = match self.algorithm {
            ClusteringAlgorithm::HierarchicalAgglomerative => {
                AlgorithmParams::HierarchicalAgglomerative(HierarchicalParams {
                    linkage: self.linkage,
                    distance_threshold: self.distance_threshold,
                    target_clusters: self.target_clusters,
                })
            }
            ClusteringAlgorithm::KMeans => AlgorithmParams::KMeans(self.kmeans_params()),
            ClusteringAlgorithm::Dbscan => AlgorithmParams::Dbscan(self.dbscan_params()),
        };
        SessionConfig {
            algorithm,
            metric: self.metric,
            scope,
            max_fragments: self.max_fragments,
        }
    }
}

/// Ad hoc similarity search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default result limit
    pub default_limit: usize,
    /// Default minimum similarity
    pub min_similarity: Option<f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            min_similarity: None,
        }
    }
}

/// Synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Provider type: "local" or "api"
    pub provider: SynthesisProvider,
    /// API configuration
    pub api: ApiSynthesisConfig,
    /// Bound on consolidated unit content, in characters
    pub max_content_chars: usize,
    /// Keywords used for titles by the local synthesizer
    pub max_keywords: usize,
    /// Instructions and category definitions sent with every request
    pub guidance: SynthesisGuidance,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            provider: SynthesisProvider::Local,
            api: ApiSynthesisConfig::default(),
            max_content_chars: crate::synthesis::DEFAULT_MAX_CONTENT_CHARS,
            max_keywords: 5,
            guidance: SynthesisGuidance::default(),
        }
    }
}

/// Synthesis provider enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisProvider {
    Local,
    Api,
}

/// Chat completion API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSynthesisConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Model name
    pub model: String,
    /// API key (loaded from environment if not set)
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for ApiSynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 60,
            temperature: 0.2,
        }
    }
}

/// CPU worker pool configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker threads (0 = available cores)
    pub threads: usize,
}

impl WorkerConfig {
    /// Resolved thread count.
    pub fn thread_count(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

/// Session event webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Webhook URLs receiving session events
    pub webhooks: Vec<String>,
    /// HMAC secret for the signature header
    pub secret: Option<String>,
    /// Delivery attempts after the first failure
    pub max_retries: u32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhooks: Vec::new(),
            secret: None,
            max_retries: 3,
            timeout_secs: 10,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON Lines file loaded at startup
    pub fragments_file: Option<String>,
}
