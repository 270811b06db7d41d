//! Configuration management for repo-pilot.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_core::provider::LlmProvider;
use agent_core::providers::{AnthropicProvider, OpenAiProvider};
use serde::{Deserialize, Serialize};

use crate::core::agent::{Agent, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_TOKENS, LandingMode};
use crate::core::keychain;
use crate::core::repo::{DEFAULT_API_URL, RepositoryCoordinates, RepositoryDirectory};

/// Keychain account used when no repository-specific token exists.
pub const DEFAULT_TOKEN_ACCOUNT: &str = "default";

/// Provider API type.
///
/// Determines which API format to use for communication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderApiType {
    /// Anthropic Messages API
    #[default]
    Anthropic,
    /// `OpenAI` Chat Completions API (also used by compatible providers)
    OpenAi,
}

/// Individual provider configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type", default)]
    pub api_type: ProviderApiType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API configuration.
    pub api: ApiConfig,

    /// Agent configuration.
    pub agent: AgentConfig,

    /// GitHub access.
    pub github: GithubConfig,

    /// Repositories addressable by key.
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// Loads global config first, then merges project-local config if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let global_path = Self::config_path()?;
        let mut config = if global_path.exists() {
            Self::load_from(&global_path)?
        } else {
            Self::default()
        };

        if let Ok(project_path) = Self::project_config_path() {
            if project_path.exists() {
                config.merge(Self::load_from(&project_path)?);
            }
        }

        Ok(config)
    }

    /// Load a single configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))
    }

    /// Get the project-local configuration file path.
    ///
    /// Looks for `.repo-pilot/config.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn project_config_path() -> anyhow::Result<PathBuf> {
        let cwd = std::env::current_dir()?;
        Ok(cwd.join(".repo-pilot").join("config.toml"))
    }

    /// Merge another config into this one (project overrides global).
    fn merge(&mut self, other: Self) {
        let agent_defaults = AgentConfig::default();
        if other.agent.provider != agent_defaults.provider {
            self.agent.provider = other.agent.provider;
        }
        if other.agent.model != agent_defaults.model {
            self.agent.model = other.agent.model;
        }
        if other.agent.max_tokens != agent_defaults.max_tokens {
            self.agent.max_tokens = other.agent.max_tokens;
        }
        if other.agent.max_iterations != agent_defaults.max_iterations {
            self.agent.max_iterations = other.agent.max_iterations;
        }
        if other.agent.landing != agent_defaults.landing {
            self.agent.landing = other.agent.landing;
        }
        for (name, provider) in other.agent.providers {
            self.agent.providers.insert(name, provider);
        }

        let api_defaults = ApiConfig::default();
        if other.api.port != api_defaults.port {
            self.api.port = other.api.port;
        }
        if other.api.host != api_defaults.host {
            self.api.host = other.api.host;
        }
        if other.api.token.is_some() {
            self.api.token = other.api.token;
        }

        let github_defaults = GithubConfig::default();
        if other.github.api_url != github_defaults.api_url {
            self.github.api_url = other.github.api_url;
        }
        if other.github.token_env != github_defaults.token_env {
            self.github.token_env = other.github.token_env;
        }

        self.repositories.extend(other.repositories);
    }

    /// Get the configuration file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Get the config directory path (`~/.config/repo-pilot/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config_home).join("repo-pilot"));
        }

        if cfg!(target_os = "macos") {
            if let Ok(home) = std::env::var("HOME") {
                return Ok(PathBuf::from(home).join(".config").join("repo-pilot"));
            }
        }

        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

        Ok(base.config_dir().join("repo-pilot"))
    }

    /// Get the data directory path (`~/.local/share/repo-pilot/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn data_dir() -> anyhow::Result<PathBuf> {
        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("could not determine data directory"))?;

        Ok(base.data_dir().join("repo-pilot"))
    }

    /// Repository lookup backed by this configuration.
    #[must_use]
    pub fn directory(&self) -> ConfigDirectory {
        ConfigDirectory::new(self.github.clone(), self.repositories.clone())
    }

    /// Save a repository entry to the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_repository(key: &str, repository: &RepositoryConfig) -> anyhow::Result<()> {
        Self::save_repository_to_path(key, repository, &Self::config_path()?)
    }

    /// Save a repository entry, keeping everything else in the file intact.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or written.
    pub fn save_repository_to_path(
        key: &str,
        repository: &RepositoryConfig,
        path: &Path,
    ) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut config_value = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<toml::Value>(&contents)?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };

        let config_table = config_value
            .as_table_mut()
            .ok_or_else(|| anyhow::anyhow!("config root must be a table"))?;

        let repositories = config_table
            .entry("repositories")
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()))
            .as_table_mut()
            .ok_or_else(|| anyhow::anyhow!("repositories section must be a table"))?;

        repositories.insert(key.to_string(), toml::Value::try_from(repository)?);

        std::fs::write(path, toml::to_string_pretty(&config_value)?)?;
        Ok(())
    }
}

/// API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Host to bind to.
    pub host: String,

    /// Port to bind to.
    pub port: u16,

    /// API token for authentication (optional, but required for remote access).
    /// Can also be set via `REPO_PILOT_API_TOKEN` environment variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7890,
            token: None,
        }
    }
}

impl ApiConfig {
    /// Get the API token, preferring env var over config file.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        std::env::var("REPO_PILOT_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.token.clone())
    }

    /// Generate a new random API token.
    #[must_use]
    pub fn generate_token() -> String {
        use rand::Rng;
        let mut rng = rand::rng();
        let bytes: [u8; 32] = rng.random();
        format!("rp_{}", hex::encode(bytes))
    }
}

/// GitHub access configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// REST API base URL (change for GitHub Enterprise).
    pub api_url: String,

    /// Environment variable holding the default token.
    pub token_env: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

/// A repository the agent may work on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub owner: String,
    pub repo: String,

    /// Environment variable holding a token for this repository only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Active provider name (key in providers table).
    pub provider: String,

    /// Model to use.
    pub model: String,

    /// Maximum tokens in response.
    pub max_tokens: u32,

    /// Bound on tool-using iterations per run.
    pub max_iterations: usize,

    /// Default landing mode for runs.
    pub landing: LandingMode,

    /// Provider definitions.
    #[serde(default = "AgentConfig::default_providers")]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            landing: LandingMode::default(),
            providers: Self::default_providers(),
        }
    }
}

impl AgentConfig {
    /// Get the default provider configurations.
    fn default_providers() -> HashMap<String, ProviderConfig> {
        let mut providers = HashMap::new();

        providers.insert(
            "anthropic".to_string(),
            ProviderConfig {
                api_type: ProviderApiType::Anthropic,
                base_url: None,
                api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
            },
        );

        providers.insert(
            "openai".to_string(),
            ProviderConfig {
                api_type: ProviderApiType::OpenAi,
                base_url: None,
                api_key_env: Some("OPENAI_API_KEY".to_string()),
            },
        );

        providers.insert(
            "ollama".to_string(),
            ProviderConfig {
                api_type: ProviderApiType::OpenAi,
                base_url: Some("http://localhost:11434/v1".to_string()),
                api_key_env: None,
            },
        );

        providers.insert(
            "openrouter".to_string(),
            ProviderConfig {
                api_type: ProviderApiType::OpenAi,
                base_url: Some("https://openrouter.ai/api/v1".to_string()),
                api_key_env: Some("OPENROUTER_API_KEY".to_string()),
            },
        );

        providers
    }

    pub(crate) fn resolve_api_key(provider_name: &str, config: &ProviderConfig) -> Option<String> {
        if let Some(env_name) = &config.api_key_env {
            if let Ok(key) = std::env::var(env_name) {
                if !key.is_empty() {
                    return Some(key);
                }
            }
        }

        keychain::get_secret(&keychain::provider_account(provider_name))
    }

    /// Create the configured LLM provider.
    ///
    /// # Errors
    ///
    /// Returns error if the provider is unknown or required API key is missing.
    pub fn create_provider(&self) -> anyhow::Result<Arc<dyn LlmProvider>> {
        let name = &self.provider;
        let config = self.providers.get(name).ok_or_else(|| {
            anyhow::anyhow!("unknown provider '{name}', check [agent.providers] config")
        })?;

        match config.api_type {
            ProviderApiType::Anthropic => {
                let key = Self::resolve_api_key(name, config).ok_or_else(|| {
                    anyhow::anyhow!(
                        "No API key configured for provider '{name}'.\n\n\
                         Run `repo-pilot auth login --provider {name}` to configure it."
                    )
                })?;
                let provider = AnthropicProvider::with_base_url(key, config.base_url.clone())?;
                Ok(Arc::new(provider))
            }
            ProviderApiType::OpenAi => {
                let api_key = Self::resolve_api_key(name, config);
                let provider = OpenAiProvider::with_config(api_key, config.base_url.clone())?;
                Ok(Arc::new(provider))
            }
        }
    }

    /// Build an agent from this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the provider cannot be created.
    pub fn agent(&self) -> anyhow::Result<Agent> {
        let provider = self.create_provider()?;
        Ok(Agent::new(provider, self.model.clone(), self.max_tokens)
            .with_max_iterations(self.max_iterations)
            .with_mode(self.landing))
    }
}

type SecretLookup = fn(&str) -> Option<String>;

/// Resolves repository keys against `[repositories]`.
///
/// Keys not in the table are accepted in `owner/repo` form. Tokens come from
/// the repository's `token_env`, then the keychain entry `github:<key>`, then
/// the default token.
#[derive(Debug, Clone)]
pub struct ConfigDirectory {
    github: GithubConfig,
    repositories: BTreeMap<String, RepositoryConfig>,
    secrets: SecretLookup,
}

impl ConfigDirectory {
    #[must_use]
    pub fn new(github: GithubConfig, repositories: BTreeMap<String, RepositoryConfig>) -> Self {
        Self {
            github,
            repositories,
            secrets: keychain::get_secret,
        }
    }

    /// Replace the keychain lookup.
    #[must_use]
    pub fn with_secret_lookup(mut self, secrets: SecretLookup) -> Self {
        self.secrets = secrets;
        self
    }

    fn token(&self, key: &str, token_env: Option<&str>) -> Option<String> {
        let env = |name: &str| std::env::var(name).ok().filter(|t| !t.is_empty());

        token_env
            .and_then(env)
            .or_else(|| (self.secrets)(&keychain::github_account(key)))
            .or_else(|| env(&self.github.token_env))
            .or_else(|| (self.secrets)(&keychain::github_account(DEFAULT_TOKEN_ACCOUNT)))
    }
}

impl RepositoryDirectory for ConfigDirectory {
    fn resolve(&self, key: &str) -> crate::core::Result<RepositoryCoordinates> {
        let (owner, repo, token_env) = if let Some(entry) = self.repositories.get(key) {
            (
                entry.owner.clone(),
                entry.repo.clone(),
                entry.token_env.as_deref(),
            )
        } else {
            match key.split_once('/') {
                Some((owner, repo))
                    if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
                {
                    (owner.to_string(), repo.to_string(), None)
                }
                _ => return Err(crate::core::Error::UnknownRepository(key.to_string())),
            }
        };

        let token = self
            .token(key, token_env)
            .ok_or_else(|| crate::core::Error::MissingCredential(key.to_string()))?;

        tracing::debug!(key = %key, owner = %owner, repo = %repo, "resolved repository");
        Ok(RepositoryCoordinates::new(owner, repo, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_secrets(_: &str) -> Option<String> {
        None
    }

    fn keychain_default(account: &str) -> Option<String> {
        (account == "github:default").then(|| "from-keychain".to_string())
    }

    fn github_without_env() -> GithubConfig {
        GithubConfig {
            token_env: "REPO_PILOT_TEST_UNSET_TOKEN".to_string(),
            ..GithubConfig::default()
        }
    }

    #[test]
    fn default_providers_exist() {
        let config = AgentConfig::default();
        assert!(config.providers.contains_key("anthropic"));
        assert!(config.providers.contains_key("openai"));
        assert!(config.providers.contains_key("ollama"));
    }

    #[test]
    fn defaults_match_agent_constants() {
        let config = AgentConfig::default();
        assert_eq!(config.provider, "anthropic");
        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.max_iterations, 25);
        assert_eq!(config.landing, LandingMode::PullRequest);
        assert_eq!(GithubConfig::default().api_url, "https://api.github.com");
    }

    #[test]
    fn unknown_provider_returns_error() {
        let config = AgentConfig {
            provider: "nonexistent".to_string(),
            ..Default::default()
        };
        let err = config.create_provider().err().unwrap();
        assert!(err.to_string().contains("unknown provider"));
    }

    #[test]
    fn keyless_openai_compatible_provider_builds() {
        let config = AgentConfig {
            provider: "ollama".to_string(),
            model: "qwen2.5-coder".to_string(),
            landing: LandingMode::DirectPush,
            ..Default::default()
        };
        let agent = config.agent().unwrap();
        assert_eq!(agent.model(), "qwen2.5-coder");
        assert_eq!(agent.mode(), LandingMode::DirectPush);
    }

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(
            r#"
[agent]
model = "gpt-4o"
provider = "openai"
landing = "direct_push"
max_iterations = 10

[github]
api_url = "https://github.example.com/api/v3"

[repositories.api]
owner = "omnidotdev"
repo = "api"
token_env = "API_REPO_TOKEN"
"#,
        )
        .unwrap();

        assert_eq!(config.agent.landing, LandingMode::DirectPush);
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.max_tokens, 8192);
        assert!(config.agent.providers.contains_key("anthropic"));
        assert_eq!(config.github.token_env, "GITHUB_TOKEN");
        assert_eq!(
            config.repositories["api"].token_env.as_deref(),
            Some("API_REPO_TOKEN")
        );
    }

    #[test]
    fn project_config_overrides_global() {
        let mut global: Config = toml::from_str(
            r#"
[agent]
model = "claude-opus-4-20250514"

[repositories.web]
owner = "o"
repo = "web"
"#,
        )
        .unwrap();
        let project: Config = toml::from_str(
            r#"
[agent]
landing = "direct_push"

[repositories.api]
owner = "o"
repo = "api"
"#,
        )
        .unwrap();

        global.merge(project);

        assert_eq!(global.agent.model, "claude-opus-4-20250514");
        assert_eq!(global.agent.landing, LandingMode::DirectPush);
        assert!(global.repositories.contains_key("web"));
        assert!(global.repositories.contains_key("api"));
    }

    #[test]
    fn repository_token_env_wins() {
        let mut repositories = BTreeMap::new();
        repositories.insert(
            "api".to_string(),
            RepositoryConfig {
                owner: "omnidotdev".to_string(),
                repo: "api".to_string(),
                token_env: Some("HOME".to_string()),
            },
        );
        let directory = ConfigDirectory::new(github_without_env(), repositories)
            .with_secret_lookup(keychain_default);

        let coordinates = directory.resolve("api").unwrap();
        assert_eq!(coordinates.full_name(), "omnidotdev/api");
        assert_eq!(Some(coordinates.token), std::env::var("HOME").ok());
    }

    #[test]
    fn owner_repo_keys_fall_back_to_default_token() {
        let directory = ConfigDirectory::new(github_without_env(), BTreeMap::new())
            .with_secret_lookup(keychain_default);

        let coordinates = directory.resolve("rust-lang/cargo").unwrap();
        assert_eq!(coordinates.owner, "rust-lang");
        assert_eq!(coordinates.repo, "cargo");
        assert_eq!(coordinates.token, "from-keychain");
    }

    #[test]
    fn unknown_keys_and_missing_tokens_are_errors() {
        let directory = ConfigDirectory::new(github_without_env(), BTreeMap::new())
            .with_secret_lookup(no_secrets);

        assert!(matches!(
            directory.resolve("api"),
            Err(crate::core::Error::UnknownRepository(_))
        ));
        assert!(matches!(
            directory.resolve("a/b/c"),
            Err(crate::core::Error::UnknownRepository(_))
        ));
        assert!(matches!(
            directory.resolve("o/r"),
            Err(crate::core::Error::MissingCredential(_))
        ));
    }

    #[test]
    fn save_repository_preserves_existing() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[agent]\nmodel = \"gpt-4o\"\n\n[repositories.web]\nowner = \"o\"\nrepo = \"web\"\n",
        )
        .unwrap();

        Config::save_repository_to_path(
            "api",
            &RepositoryConfig {
                owner: "o".to_string(),
                repo: "api".to_string(),
                token_env: None,
            },
            &config_path,
        )
        .unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.agent.model, "gpt-4o");
        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.repositories["api"].repo, "api");
    }

    #[test]
    fn generated_tokens_are_prefixed_and_random() {
        let a = ApiConfig::generate_token();
        let b = ApiConfig::generate_token();
        assert!(a.starts_with("rp_"));
        assert_eq!(a.len(), 3 + 64);
        assert_ne!(a, b);
    }
}
