#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::CodeforgeError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub workspace: WorkspaceConfig,
    pub git: GitConfig,
    /// target service name -> clone URL.
    pub repositories: BTreeMap<String, String>,
    pub runner: RunnerConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    #[serde(alias = "basedir")]
    pub base_dir: String,
    pub max_concurrent_tasks: usize,
    pub cleanup_on_completion: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: "~/.cache/codeforge/workspaces".to_owned(),
            max_concurrent_tasks: 5,
            cleanup_on_completion: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitConfig {
    pub executable: String,
    pub user_name: String,
    pub user_email: String,
    /// Environment variable holding the hosting API token.
    pub token_env: String,
    pub api_base: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            executable: "git".to_owned(),
            user_name: "codeforge".to_owned(),
            user_email: "codeforge@localhost".to_owned(),
            token_env: "GITHUB_TOKEN".to_owned(),
            api_base: "https://api.github.com".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    pub executable: String,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            executable: "claude".to_owned(),
            args: vec!["-p".to_owned()],
            timeout_seconds: 1200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    pub docker_executable: String,
    pub image: String,
    pub network_mode: String,
    pub command_timeout_seconds: u64,
    pub test_timeout_seconds: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_executable: "docker".to_owned(),
            image: "python:3.11-slim".to_owned(),
            network_mode: "bridge".to_owned(),
            command_timeout_seconds: 300,
            test_timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_file: PathBuf,
}

pub fn default_paths() -> anyhow::Result<ConfigPaths> {
    let unix = home_config_path_unix();
    if !cfg!(windows) {
        return Ok(ConfigPaths { config_file: unix });
    }

    // Windows: prefer the Unix-style path if present for portability.
    if unix.exists() {
        return Ok(ConfigPaths { config_file: unix });
    }

    let proj = ProjectDirs::from("com", "codeforge", "codeforge")
        .context("failed to determine platform config directory")?;
    Ok(ConfigPaths {
        config_file: proj.config_dir().join("config.toml"),
    })
}

fn home_config_path_unix() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".config").join("codeforge").join("config.toml")
}

fn home_dir() -> Option<PathBuf> {
    if let Some(v) = std::env::var_os("HOME") {
        return Some(PathBuf::from(v));
    }
    if let Some(v) = std::env::var_os("USERPROFILE") {
        return Some(PathBuf::from(v));
    }
    let drive = std::env::var_os("HOMEDRIVE");
    let path = std::env::var_os("HOMEPATH");
    match (drive, path) {
        (Some(d), Some(p)) => Some(PathBuf::from(d).join(PathBuf::from(p))),
        _ => None,
    }
}

#[must_use]
pub fn expand_tilde(input: &str) -> String {
    if let Some(rest) = input.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest).to_string_lossy().to_string();
    }
    input.to_owned()
}

pub fn expand_path(input: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_env_vars(&expand_tilde(input));
    let p = PathBuf::from(expanded);
    if p.is_absolute() {
        return Ok(p);
    }
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(cwd.join(p))
}

fn expand_env_vars(input: &str) -> String {
    // Expand $VAR and ${VAR}. Leave unknown vars untouched.
    let Ok(re) = regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?") else {
        return input.to_owned();
    };
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        std::env::var(key).unwrap_or_else(|_| caps[0].to_owned())
    })
    .to_string()
}

pub fn load() -> anyhow::Result<(Config, toml_edit::DocumentMut, ConfigPaths)> {
    let paths = default_paths()?;
    let (doc, cfg) = load_from_file(&paths.config_file)?;
    cfg.validate()?;
    Ok((cfg, doc, paths))
}

pub fn list_resolved_toml() -> anyhow::Result<String> {
    let (cfg, _doc, _paths) = load()?;
    Ok(toml::to_string_pretty(&cfg)?)
}

pub fn get_value_string(key: &str) -> anyhow::Result<Option<String>> {
    let paths = default_paths()?;
    get_value_string_at_path(&paths.config_file, key)
}

pub fn set_value_string(key: &str, value: &str) -> anyhow::Result<()> {
    let paths = default_paths()?;
    set_value_string_at_path(&paths.config_file, key, value)
}

fn load_from_file(path: &Path) -> anyhow::Result<(toml_edit::DocumentMut, Config)> {
    if !path.exists() {
        return Ok((toml_edit::DocumentMut::new(), Config::default()));
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let doc = raw
        .parse::<toml_edit::DocumentMut>()
        .with_context(|| format!("failed to parse TOML in {}", path.display()))?;

    let cfg: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to deserialize TOML in {}", path.display()))?;
    Ok((doc, cfg))
}

pub fn get_value_string_at_path(path: &Path, key: &str) -> anyhow::Result<Option<String>> {
    let (_doc, cfg) = load_from_file(path)?;
    cfg.validate()?;

    let value = lookup_value(&cfg, key);
    Ok(value.map(format_value_for_stdout))
}

pub fn set_value_string_at_path(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let (mut doc, cfg) = load_from_file(path)?;
    cfg.validate()?;

    let value_item = parse_value_for_key(key, value, &cfg)?;
    apply_set(&mut doc, key, value_item)?;

    // Validate by re-parsing the updated doc into a Config.
    let new_raw = doc.to_string();
    let new_cfg: Config = toml::from_str(&new_raw)
        .with_context(|| format!("config update produced invalid TOML for {}", path.display()))?;
    new_cfg.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, new_raw.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<(), CodeforgeError> {
        if self.workspace.base_dir.trim().is_empty() {
            return Err(CodeforgeError::Config(
                "workspace.base_dir must not be empty".to_owned(),
            ));
        }
        if self.workspace.max_concurrent_tasks == 0 {
            return Err(CodeforgeError::Config(
                "workspace.max_concurrent_tasks must be >= 1".to_owned(),
            ));
        }
        if self.runner.timeout_seconds == 0 {
            return Err(CodeforgeError::Config(
                "runner.timeout_seconds must be >= 1".to_owned(),
            ));
        }
        if self.sandbox.command_timeout_seconds == 0 || self.sandbox.test_timeout_seconds == 0 {
            return Err(CodeforgeError::Config(
                "sandbox timeouts must be >= 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// Hosting API token from the configured environment variable.
    #[must_use]
    pub fn github_token(&self) -> Option<String> {
        std::env::var(&self.git.token_env)
            .ok()
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    Bool,
    Int,
    String,
}

fn parse_value_for_key(
    key: &str,
    value: &str,
    cfg: &Config,
) -> anyhow::Result<toml_edit::Item> {
    if key == "runner.args" {
        return Err(CodeforgeError::InvalidConfigValue {
            key: key.to_owned(),
            msg: "edit the config file directly for list values".to_owned(),
        }
        .into());
    }
    let key_type =
        key_type(key, cfg).ok_or_else(|| CodeforgeError::InvalidConfigKey(key.to_owned()))?;
    let item = match key_type {
        KeyType::Bool => {
            toml_edit::value(parse_bool(value).map_err(|msg| {
                CodeforgeError::InvalidConfigValue {
                    key: key.to_owned(),
                    msg,
                }
            })?)
        }
        KeyType::Int => {
            toml_edit::value(parse_int(value).map_err(|msg| {
                CodeforgeError::InvalidConfigValue {
                    key: key.to_owned(),
                    msg,
                }
            })?)
        }
        KeyType::String => toml_edit::value(value),
    };
    Ok(item)
}

fn key_type(key: &str, _cfg: &Config) -> Option<KeyType> {
    // Dynamic keys (service -> repository URL map)
    if key.starts_with("repositories.") {
        return Some(KeyType::String);
    }

    Some(match key {
        "workspace.base_dir"
        | "git.executable"
        | "git.user_name"
        | "git.user_email"
        | "git.token_env"
        | "git.api_base"
        | "runner.executable"
        | "sandbox.docker_executable"
        | "sandbox.image"
        | "sandbox.network_mode" => KeyType::String,

        "workspace.cleanup_on_completion" => KeyType::Bool,

        "workspace.max_concurrent_tasks"
        | "runner.timeout_seconds"
        | "sandbox.command_timeout_seconds"
        | "sandbox.test_timeout_seconds" => KeyType::Int,

        _ => return None,
    })
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected true|false, got '{other}'")),
    }
}

fn parse_int(s: &str) -> Result<i64, String> {
    s.trim()
        .parse::<i64>()
        .map_err(|e| format!("expected integer, got '{s}': {e}"))
}

fn apply_set(
    doc: &mut toml_edit::DocumentMut,
    key: &str,
    value: toml_edit::Item,
) -> anyhow::Result<()> {
    let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Err(CodeforgeError::InvalidConfigKey(key.to_owned()).into());
    }

    let mut cur = doc.as_table_mut();
    for seg in &parts[..parts.len().saturating_sub(1)] {
        if !cur.contains_key(seg) {
            let mut t = toml_edit::Table::new();
            t.set_implicit(true);
            cur.insert(seg, toml_edit::Item::Table(t));
        }
        cur = cur[seg].as_table_mut().ok_or_else(|| {
            CodeforgeError::Config(format!("cannot set {key}: '{seg}' is not a table"))
        })?;
    }

    let leaf = parts[parts.len() - 1];
    cur.insert(leaf, value);
    Ok(())
}

fn lookup_value(cfg: &Config, key: &str) -> Option<serde_json::Value> {
    let mut v = serde_json::to_value(cfg).ok()?;
    for seg in key.split('.').filter(|s| !s.is_empty()) {
        match v {
            serde_json::Value::Object(mut map) => {
                v = map.remove(seg)?;
            }
            _ => return None,
        }
    }
    Some(v)
}

fn format_value_for_stdout(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_owned(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn config_validation_catches_invalid_values() {
        let mut cfg = Config::default();
        cfg.workspace.max_concurrent_tasks = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_set_and_get_dot_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        set_value_string_at_path(&path, "workspace.cleanup_on_completion", "false").unwrap();
        assert_eq!(
            get_value_string_at_path(&path, "workspace.cleanup_on_completion")
                .unwrap()
                .as_deref(),
            Some("false")
        );

        set_value_string_at_path(&path, "workspace.base_dir", "~/ws").unwrap();
        assert_eq!(
            get_value_string_at_path(&path, "workspace.base_dir")
                .unwrap()
                .as_deref(),
            Some("~/ws")
        );

        set_value_string_at_path(
            &path,
            "repositories.market-predictor",
            "https://github.com/acme/market-predictor.git",
        )
        .unwrap();

        let (doc, cfg) = load_from_file(&path).unwrap();
        let _ = doc;
        cfg.validate().unwrap();
        assert!(!cfg.workspace.cleanup_on_completion);
        assert_eq!(cfg.workspace.base_dir, "~/ws");
        assert_eq!(
            cfg.repositories.get("market-predictor").map(String::as_str),
            Some("https://github.com/acme/market-predictor.git")
        );
    }

    #[test]
    fn env_var_expansion_resolves_known_and_keeps_unknown() {
        let path = std::env::var("PATH").expect("PATH is set");
        assert_eq!(expand_env_vars("$PATH"), path);
        assert_eq!(expand_env_vars("${PATH}"), path);
        assert_eq!(
            expand_env_vars("$CODEFORGE_TEST_UNSET/tasks"),
            "$CODEFORGE_TEST_UNSET/tasks"
        );
        assert_eq!(expand_env_vars("no variables here"), "no variables here");
    }

    #[test]
    fn rejects_unknown_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        assert!(set_value_string_at_path(&path, "nope.nothing", "x").is_err());
    }
}
