use crate::flags::OPENAI_DEFAULT_MODEL;
use crate::flags::SHELLPILOT_MAX_ATTEMPTS;
use crate::flags::SHELLPILOT_RETRY_BASE_DELAY_MS;
use crate::model_provider_info::ModelProviderInfo;
use crate::model_provider_info::built_in_model_providers;
use crate::protocol::ApprovalPolicyMode;
use dirs::home_dir;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_TOML_FILE: &str = "config.toml";
const INSTRUCTIONS_FILE: &str = "instructions.md";
const DEFAULT_MODEL_PROVIDER: &str = "openai";

/// Application configuration loaded from disk and merged with overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Optional override of model selection.
    pub model: String,

    /// Key into `model_providers` of the provider in use.
    pub model_provider_id: String,

    /// Info needed to make an API request to the model.
    pub model_provider: ModelProviderInfo,

    /// How liberally commands are auto-approved.
    pub approval_policy: ApprovalPolicyMode,

    /// Directories sandboxed commands may write to. Empty means sandboxed
    /// commands run fully read-only.
    pub writable_roots: Vec<PathBuf>,

    /// Disable server-side response storage (sends the full conversation
    /// context with every request). Currently necessary for OpenAI customers
    /// who have opted into Zero Data Retention (ZDR).
    pub disable_response_storage: bool,

    /// Replacement for the built-in system instructions, if the user provided
    /// any.
    pub instructions: Option<String>,

    /// Total backend invocations a single request may use on transient
    /// failures.
    pub max_attempts: u64,

    /// First backoff delay; doubles with every retry.
    pub retry_base_delay: Duration,

    /// Directory commands run in unless the model asks for another one.
    pub cwd: PathBuf,

    /// Directory containing all of the tool's state (`~/.shellpilot` by
    /// default). Always writable inside the sandbox when any root is.
    pub shellpilot_home: PathBuf,
}

/// Base config deserialized from `~/.shellpilot/config.toml`.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfigToml {
    pub model: Option<String>,

    /// Provider to use from the model_providers map.
    pub model_provider: Option<String>,

    /// User-defined provider entries that extend/override the built-in list.
    #[serde(default)]
    pub model_providers: HashMap<String, ModelProviderInfo>,

    pub approval_policy: Option<ApprovalPolicyMode>,

    #[serde(default)]
    pub writable_roots: Vec<PathBuf>,

    pub disable_response_storage: Option<bool>,

    pub instructions: Option<String>,

    pub max_attempts: Option<u64>,

    pub retry_base_delay_ms: Option<u64>,
}

/// Optional overrides for user configuration (e.g., from CLI flags).
#[derive(Default, Debug, Clone)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub model_provider: Option<String>,
    pub approval_policy: Option<ApprovalPolicyMode>,
    /// Appended to the roots from `config.toml`.
    pub writable_roots: Vec<PathBuf>,
    pub disable_response_storage: Option<bool>,
    pub cwd: Option<PathBuf>,
}

impl Config {
    /// Load configuration, optionally applying overrides (CLI flags). Merges
    /// ~/.shellpilot/config.toml, ~/.shellpilot/instructions.md, embedded
    /// defaults, and any values provided in `overrides` (highest precedence).
    pub fn load_with_overrides(overrides: ConfigOverrides) -> std::io::Result<Self> {
        let shellpilot_home = find_shellpilot_home()?;
        let cfg = load_config_as_toml(&shellpilot_home)?;
        tracing::debug!("Config parsed from config.toml: {cfg:?}");
        Self::load_from_base_config_with_overrides(cfg, overrides, shellpilot_home)
    }

    /// Meant to be used exclusively for tests: `load_with_overrides()` should
    /// be used in all other cases.
    pub fn load_from_base_config_with_overrides(
        cfg: ConfigToml,
        overrides: ConfigOverrides,
        shellpilot_home: PathBuf,
    ) -> std::io::Result<Self> {
        // Destructure ConfigOverrides fully to ensure all overrides are applied.
        let ConfigOverrides {
            model,
            model_provider,
            approval_policy,
            writable_roots,
            disable_response_storage,
            cwd,
        } = overrides;

        let mut model_providers = built_in_model_providers();
        // Merge user-defined providers into the built-in list.
        for (key, provider) in cfg.model_providers.into_iter() {
            model_providers.insert(key, provider);
        }

        let model_provider_id = model_provider
            .or(cfg.model_provider)
            .unwrap_or_else(|| DEFAULT_MODEL_PROVIDER.to_string());
        let model_provider = model_providers
            .get(&model_provider_id)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Model provider `{model_provider_id}` not found"),
                )
            })?
            .clone();

        let cwd = match cwd {
            Some(cwd) if cwd.is_absolute() => cwd,
            Some(relative) => std::env::current_dir()?.join(relative),
            None => std::env::current_dir()?,
        };

        let writable_roots = cfg
            .writable_roots
            .into_iter()
            .chain(writable_roots)
            .map(|root| if root.is_absolute() { root } else { cwd.join(root) })
            .fold(Vec::new(), |mut roots, root| {
                if !roots.contains(&root) {
                    roots.push(root);
                }
                roots
            });

        // Instructions: instructions.md > config.toml > embedded default.
        let instructions = load_instructions(&shellpilot_home).or(cfg.instructions);

        Ok(Self {
            model: model
                .or(cfg.model)
                .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            model_provider_id,
            model_provider,
            approval_policy: approval_policy
                .or(cfg.approval_policy)
                .unwrap_or_default(),
            writable_roots,
            disable_response_storage: disable_response_storage
                .or(cfg.disable_response_storage)
                .unwrap_or(false),
            instructions,
            max_attempts: cfg.max_attempts.unwrap_or(*SHELLPILOT_MAX_ATTEMPTS).max(1),
            retry_base_delay: Duration::from_millis(
                cfg.retry_base_delay_ms
                    .unwrap_or(*SHELLPILOT_RETRY_BASE_DELAY_MS),
            ),
            cwd,
            shellpilot_home,
        })
    }

    /// Returns the path to the folder where logs are stored. Does not verify
    /// that the directory exists.
    pub fn log_dir(&self) -> PathBuf {
        self.shellpilot_home.join("log")
    }
}

/// Attempt to parse the file at `<home>/config.toml`. A missing file yields
/// the defaults.
pub fn load_config_as_toml(shellpilot_home: &Path) -> std::io::Result<ConfigToml> {
    let config_toml_path = shellpilot_home.join(CONFIG_TOML_FILE);
    match std::fs::read_to_string(&config_toml_path) {
        Ok(contents) => toml::from_str::<ConfigToml>(&contents).map_err(|e| {
            tracing::error!("Failed to parse config.toml: {e}");
            std::io::Error::new(std::io::ErrorKind::InvalidData, e)
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("config.toml not found, using defaults");
            Ok(ConfigToml::default())
        }
        Err(e) => {
            tracing::error!("Failed to read config.toml: {e}");
            Err(e)
        }
    }
}

fn load_instructions(shellpilot_home: &Path) -> Option<String> {
    let p = shellpilot_home.join(INSTRUCTIONS_FILE);
    let contents = std::fs::read_to_string(&p).ok()?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Returns the path to the configuration directory, which can be specified by
/// the `SHELLPILOT_HOME` environment variable. If not set, defaults to
/// `~/.shellpilot`.
///
/// - If `SHELLPILOT_HOME` is set, the value will be canonicalized and this
///   function will Err if the path does not exist.
/// - If `SHELLPILOT_HOME` is not set, this function does not verify that the
///   directory exists.
pub fn find_shellpilot_home() -> std::io::Result<PathBuf> {
    // Honor the `SHELLPILOT_HOME` environment variable when it is set to allow
    // users (and tests) to override the default location.
    if let Ok(val) = std::env::var("SHELLPILOT_HOME") {
        if !val.is_empty() {
            return PathBuf::from(val).canonicalize();
        }
    }

    let mut p = home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not find home directory",
        )
    })?;
    p.push(".shellpilot");
    Ok(p)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn load(toml: &str, overrides: ConfigOverrides, home: &TempDir) -> Config {
        let cfg: ConfigToml = toml::from_str(toml).unwrap();
        Config::load_from_base_config_with_overrides(cfg, overrides, home.path().to_path_buf())
            .unwrap()
    }

    #[test]
    fn defaults_apply_without_config_file() {
        let home = TempDir::new().unwrap();
        let cfg = load_config_as_toml(home.path()).unwrap();
        assert_eq!(cfg, ConfigToml::default());

        let config = load("", ConfigOverrides::default(), &home);
        assert_eq!(config.model, *OPENAI_DEFAULT_MODEL);
        assert_eq!(config.model_provider_id, "openai");
        assert_eq!(config.approval_policy, ApprovalPolicyMode::Manual);
        assert!(config.writable_roots.is_empty());
        assert!(!config.disable_response_storage);
        assert_eq!(config.instructions, None);
        assert_eq!(config.max_attempts, *SHELLPILOT_MAX_ATTEMPTS);
        assert_eq!(config.log_dir(), home.path().join("log"));
    }

    #[test]
    fn overrides_take_precedence_over_toml() {
        let home = TempDir::new().unwrap();
        let toml = r#"
model = "o3"
approval_policy = "auto-approve-safe"
disable_response_storage = false
writable_roots = ["/from/toml"]
max_attempts = 3
retry_base_delay_ms = 10
"#;
        let overrides = ConfigOverrides {
            model: Some("gpt-4.1".to_string()),
            approval_policy: Some(ApprovalPolicyMode::AutoApproveAll),
            writable_roots: vec![PathBuf::from("/from/cli")],
            disable_response_storage: Some(true),
            cwd: Some(PathBuf::from("/work")),
            ..Default::default()
        };
        let config = load(toml, overrides, &home);

        assert_eq!(config.model, "gpt-4.1");
        assert_eq!(config.approval_policy, ApprovalPolicyMode::AutoApproveAll);
        assert!(config.disable_response_storage);
        assert_eq!(
            config.writable_roots,
            vec![PathBuf::from("/from/toml"), PathBuf::from("/from/cli")]
        );
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_base_delay, Duration::from_millis(10));
        assert_eq!(config.cwd, PathBuf::from("/work"));
    }

    #[test]
    fn relative_writable_roots_resolve_against_cwd() {
        let home = TempDir::new().unwrap();
        let overrides = ConfigOverrides {
            writable_roots: vec![PathBuf::from("build")],
            cwd: Some(PathBuf::from("/work")),
            ..Default::default()
        };
        let config = load("", overrides, &home);
        assert_eq!(config.writable_roots, vec![PathBuf::from("/work/build")]);
    }

    #[test]
    fn instructions_file_wins_over_toml() {
        let home = TempDir::new().unwrap();
        let config = load(
            r#"instructions = "from toml""#,
            ConfigOverrides::default(),
            &home,
        );
        assert_eq!(config.instructions.as_deref(), Some("from toml"));

        std::fs::write(home.path().join(INSTRUCTIONS_FILE), "from file\n").unwrap();
        let config = load(
            r#"instructions = "from toml""#,
            ConfigOverrides::default(),
            &home,
        );
        assert_eq!(config.instructions.as_deref(), Some("from file"));
    }

    #[test]
    fn user_defined_provider_can_be_selected() {
        let home = TempDir::new().unwrap();
        let toml = r#"
model_provider = "local"

[model_providers.local]
name = "Local"
base_url = "http://localhost:8080/v1"
"#;
        let config = load(toml, ConfigOverrides::default(), &home);
        assert_eq!(config.model_provider_id, "local");
        assert_eq!(config.model_provider.base_url, "http://localhost:8080/v1");
        assert_eq!(config.model_provider.env_key, None);
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let home = TempDir::new().unwrap();
        let cfg: ConfigToml = toml::from_str(r#"model_provider = "nope""#).unwrap();
        let err = Config::load_from_base_config_with_overrides(
            cfg,
            ConfigOverrides::default(),
            home.path().to_path_buf(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn malformed_toml_is_invalid_data() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join(CONFIG_TOML_FILE), "model = [").unwrap();
        let err = load_config_as_toml(home.path()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
