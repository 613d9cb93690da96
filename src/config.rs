use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default refresh cadence for the settings document.
const REFRESH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One monitored repository. Only `enabled` entries are polled.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RepoConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RepoConfig {
    /// Split `owner/repo` into its two halves. Validated at load time.
    pub fn split(&self) -> (&str, &str) {
        let mut parts = self.name.splitn(2, '/');
        let owner = parts.next().unwrap_or_default();
        let repo = parts.next().unwrap_or_default();
        (owner, repo)
    }
}

fn default_true() -> bool {
    true
}

/// Raw shape of the JSON settings document. Unknown fields are ignored;
/// missing fields fall back to process-environment defaults at validation.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    repos_to_monitor: Vec<RepoConfig>,
    #[serde(default)]
    settings: DocumentSettings,
    pr_label: Option<String>,
    #[serde(default)]
    primary_processing_labels: Vec<String>,
    /// Deprecated scalar predecessor of `primary_processing_labels`. Read into
    /// a singleton list when the list is absent; never written back.
    ai_primary_tag: Option<String>,
    #[serde(default)]
    followup_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DocumentSettings {
    worker_concurrency: Option<usize>,
    #[serde(default)]
    github_user_whitelist: Vec<String>,
    bot_username: Option<String>,
}

/// Validated, immutable snapshot of the operator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub worker_concurrency: usize,
    pub user_whitelist: Vec<String>,
    pub primary_labels: Vec<String>,
    pub done_label_suffix: String,
    pub processing_label_suffix: String,
    pub pr_label: String,
    pub followup_keywords: Vec<String>,
    pub bot_username: String,
}

impl Settings {
    pub fn processing_label(&self, primary: &str) -> String {
        format!("{primary}{}", self.processing_label_suffix)
    }

    pub fn done_label(&self, primary: &str) -> String {
        format!("{primary}{}", self.done_label_suffix)
    }

    pub fn failed_claude_label(&self, primary: &str) -> String {
        format!("{primary}-failed-claude")
    }

    pub fn failed_post_processing_label(&self, primary: &str) -> String {
        format!("{primary}-failed-post-processing")
    }
}

/// Full validated snapshot: settings plus the monitored repository list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitfixConfig {
    pub repos: Vec<RepoConfig>,
    pub settings: Settings,
}

impl GitfixConfig {
    pub fn enabled_repos(&self) -> impl Iterator<Item = &RepoConfig> {
        self.repos.iter().filter(|r| r.enabled)
    }
}

fn repo_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+/[A-Za-z0-9._-]+$").unwrap())
}

fn validate(doc: ConfigDocument) -> Result<GitfixConfig, ConfigError> {
    let mut primary_labels = doc.primary_processing_labels;
    if primary_labels.is_empty() {
        if let Some(scalar) = doc.ai_primary_tag {
            primary_labels = vec![scalar];
        }
    }
    if primary_labels.is_empty() {
        return Err(ConfigError::Invalid(
            "primary_processing_labels must contain at least one label".to_string(),
        ));
    }

    let worker_concurrency = doc
        .settings
        .worker_concurrency
        .or_else(|| env_parse("WORKER_CONCURRENCY"))
        .unwrap_or(1);
    if worker_concurrency < 1 {
        return Err(ConfigError::Invalid(
            "worker_concurrency must be >= 1".to_string(),
        ));
    }

    for repo in &doc.repos_to_monitor {
        if !repo_name_pattern().is_match(&repo.name) {
            return Err(ConfigError::Invalid(format!(
                "repository name '{}' is not of the form owner/repo",
                repo.name
            )));
        }
    }

    let pr_label = doc
        .pr_label
        .or_else(|| std::env::var("GITFIX_PR_LABEL").ok())
        .unwrap_or_else(|| "gitfix".to_string());
    if pr_label.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "pr_label must be nonempty".to_string(),
        ));
    }

    let bot_username = doc
        .settings
        .bot_username
        .or_else(|| std::env::var("GITFIX_BOT_USERNAME").ok())
        .unwrap_or_else(|| "gitfix-bot".to_string());

    Ok(GitfixConfig {
        repos: doc.repos_to_monitor,
        settings: Settings {
            worker_concurrency,
            user_whitelist: doc.settings.github_user_whitelist,
            primary_labels,
            done_label_suffix: "-done".to_string(),
            processing_label_suffix: "-processing".to_string(),
            pr_label,
            followup_keywords: doc.followup_keywords,
            bot_username,
        },
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Loads the settings document and hands out atomic snapshots. A background
/// refresh re-reads the document every five minutes; when a reload fails
/// validation the last valid snapshot stays in effect.
pub struct ConfigLoader {
    path: PathBuf,
    snapshot: RwLock<Arc<GitfixConfig>>,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let snapshot = Arc::new(Self::read(&path)?);
        Ok(Self {
            path,
            snapshot: RwLock::new(snapshot),
        })
    }

    /// Resolve the document path from `GITFIX_CONFIG_PATH`, defaulting to
    /// `gitfix.config.json` in the working directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path =
            std::env::var("GITFIX_CONFIG_PATH").unwrap_or_else(|_| "gitfix.config.json".into());
        Self::new(path)
    }

    fn read(path: &PathBuf) -> Result<GitfixConfig, ConfigError> {
        let raw = Config::builder()
            .add_source(File::new(&path.to_string_lossy(), FileFormat::Json).required(false))
            .add_source(Environment::with_prefix("GITFIX").separator("__"))
            .build()?;
        let doc: ConfigDocument = raw.try_deserialize()?;
        validate(doc)
    }

    /// Atomic snapshot of the current configuration.
    pub fn load_all(&self) -> Arc<GitfixConfig> {
        self.snapshot.read().expect("config lock poisoned").clone()
    }

    /// Re-read the document, swapping the snapshot only when it validates.
    pub fn refresh(&self) -> Result<(), ConfigError> {
        match Self::read(&self.path) {
            Ok(next) => {
                let mut guard = self.snapshot.write().expect("config lock poisoned");
                if **guard != next {
                    info!(repos = next.repos.len(), "configuration reloaded");
                }
                *guard = Arc::new(next);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "configuration reload rejected, keeping last valid snapshot");
                Err(e)
            }
        }
    }

    /// Background refresh loop, cancelled by the shutdown signal.
    pub fn spawn_refresh(self: &Arc<Self>, mut shutdown: crate::shutdown::ShutdownSignal) {
        let loader = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFRESH_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let _ = loader.refresh();
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }
}

/// Process-environment settings for paths, timers and external endpoints.
/// These back the fields the settings document does not carry.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub polling_interval: Duration,
    pub clones_base: PathBuf,
    pub worktrees_base: PathBuf,
    pub shallow_clone_depth: Option<u32>,
    pub retention_strategy: RetentionStrategy,
    pub retention_hours: u64,
    pub worktree_max_age_hours: u64,
    pub redis_url: String,
    pub agent_command: String,
    pub agent_timeout: Duration,
    pub agent_idle_timeout: Duration,
    pub agent_output_cap_bytes: usize,
    pub default_branch_overrides: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionStrategy {
    AlwaysDelete,
    KeepOnFailure,
    KeepForHours,
}

impl std::str::FromStr for RetentionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always_delete" => Ok(Self::AlwaysDelete),
            "keep_on_failure" => Ok(Self::KeepOnFailure),
            "keep_for_hours" => Ok(Self::KeepForHours),
            other => Err(ConfigError::Invalid(format!(
                "unknown retention strategy '{other}'"
            ))),
        }
    }
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let polling_ms: u64 = env_parse("POLLING_INTERVAL_MS").unwrap_or(60_000);
        let redis_host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".into());
        let redis_port = std::env::var("REDIS_PORT").unwrap_or_else(|_| "6379".into());

        // GIT_DEFAULT_BRANCH_<OWNER>_<REPO> overrides, keyed by "owner/repo".
        let default_branch_overrides = std::env::vars()
            .filter_map(|(k, v)| {
                let rest = k.strip_prefix("GIT_DEFAULT_BRANCH_")?;
                let (owner, repo) = rest.split_once('_')?;
                Some((
                    format!("{}/{}", owner.to_lowercase(), repo.to_lowercase()),
                    v,
                ))
            })
            .collect();

        Self {
            polling_interval: Duration::from_millis(polling_ms),
            clones_base: std::env::var("GIT_CLONES_BASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/gitfix/clones")),
            worktrees_base: std::env::var("GIT_WORKTREES_BASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/gitfix/worktrees")),
            shallow_clone_depth: env_parse("GIT_SHALLOW_CLONE_DEPTH"),
            retention_strategy: std::env::var("WORKTREE_RETENTION_STRATEGY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(RetentionStrategy::AlwaysDelete),
            retention_hours: env_parse("WORKTREE_RETENTION_HOURS").unwrap_or(24),
            worktree_max_age_hours: env_parse("WORKTREE_MAX_AGE_HOURS").unwrap_or(72),
            redis_url: format!("redis://{redis_host}:{redis_port}"),
            agent_command: std::env::var("AGENT_COMMAND").unwrap_or_else(|_| "claude-code".into()),
            agent_timeout: Duration::from_secs(env_parse("AGENT_TIMEOUT_SECS").unwrap_or(1800)),
            agent_idle_timeout: Duration::from_secs(
                env_parse("AGENT_IDLE_TIMEOUT_SECS").unwrap_or(300),
            ),
            agent_output_cap_bytes: env_parse("AGENT_OUTPUT_BUFFER_CAP_BYTES")
                .unwrap_or(4 * 1024 * 1024),
            default_branch_overrides,
        }
    }

    pub fn default_branch_override(&self, owner: &str, repo: &str) -> Option<&str> {
        self.default_branch_overrides
            .get(&format!("{}/{}", owner.to_lowercase(), repo.to_lowercase()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> ConfigDocument {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn validates_complete_document() {
        let cfg = validate(doc(
            r#"{
                "repos_to_monitor": [{"name": "acme/web", "enabled": true}],
                "settings": {"worker_concurrency": 4, "github_user_whitelist": ["alice"]},
                "pr_label": "gitfix",
                "primary_processing_labels": ["AI"],
                "followup_keywords": ["GITFIX"]
            }"#,
        ))
        .unwrap();

        assert_eq!(cfg.settings.worker_concurrency, 4);
        assert_eq!(cfg.settings.primary_labels, vec!["AI"]);
        assert_eq!(cfg.settings.processing_label("AI"), "AI-processing");
        assert_eq!(cfg.settings.done_label("AI"), "AI-done");
        assert_eq!(cfg.settings.failed_claude_label("AI"), "AI-failed-claude");
        assert_eq!(
            cfg.settings.failed_post_processing_label("AI"),
            "AI-failed-post-processing"
        );
    }

    #[test]
    fn empty_primary_labels_is_invalid() {
        let err = validate(doc(r#"{"primary_processing_labels": []}"#)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn deprecated_scalar_tag_becomes_singleton_list() {
        let cfg = validate(doc(r#"{"ai_primary_tag": "AI"}"#)).unwrap();
        assert_eq!(cfg.settings.primary_labels, vec!["AI"]);
    }

    #[test]
    fn scalar_tag_ignored_when_list_present() {
        let cfg = validate(doc(
            r#"{"ai_primary_tag": "OLD", "primary_processing_labels": ["AI", "ML"]}"#,
        ))
        .unwrap();
        assert_eq!(cfg.settings.primary_labels, vec!["AI", "ML"]);
    }

    #[test]
    fn rejects_malformed_repo_name() {
        let err = validate(doc(
            r#"{
                "repos_to_monitor": [{"name": "not a repo"}],
                "primary_processing_labels": ["AI"]
            }"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn disabled_repos_are_not_polled() {
        let cfg = validate(doc(
            r#"{
                "repos_to_monitor": [
                    {"name": "acme/web", "enabled": true},
                    {"name": "acme/old", "enabled": false}
                ],
                "primary_processing_labels": ["AI"]
            }"#,
        ))
        .unwrap();
        let enabled: Vec<_> = cfg.enabled_repos().map(|r| r.name.as_str()).collect();
        assert_eq!(enabled, vec!["acme/web"]);
    }

    #[test]
    fn retention_strategy_parses() {
        assert_eq!(
            "keep_on_failure".parse::<RetentionStrategy>().unwrap(),
            RetentionStrategy::KeepOnFailure
        );
        assert!("delete_sometimes".parse::<RetentionStrategy>().is_err());
    }
}
