//! Operator configuration: the precedence chain from compiled defaults
//! through operator YAML, a preferred-model file, and environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ReflectionError, ReflectionResult};
use crate::host_client::ModelSpec;

const BLOCKED_JUDGE_PATTERN_SOURCES: &[&str] = &[
    "haiku",
    "mini",
    "nano",
    "flash",
    "gpt-3.5",
    "llama-3.1-8b",
    "mixtral-8x7b",
];

/// Whether `spec` matches one of the "blocked judge" patterns: models too
/// weak to trust with self-assessment.
pub fn is_blocked_judge_model(spec: &ModelSpec) -> bool {
    let haystack = spec.as_spec_string().to_lowercase();
    BLOCKED_JUDGE_PATTERN_SOURCES
        .iter()
        .any(|pattern| haystack.contains(pattern))
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OperatorYaml {
    #[serde(default)]
    models: Vec<String>,
    #[serde(default)]
    routing: Option<RoutingYaml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RoutingYaml {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    models: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PreferredModelFile {
    model: Option<String>,
}

/// Optional routing configuration.
#[derive(Debug, Clone, Default)]
pub struct RoutingConfig {
    pub enabled: bool,
    pub models: HashMap<String, String>,
}

impl RoutingConfig {
    /// `getRoutingModel(category)`: resolve a category (falling back to
    /// `default`) to a parsed [`ModelSpec`], honoring `enabled`.
    pub fn model_for(&self, category: &str) -> Option<ModelSpec> {
        if !self.enabled {
            return None;
        }
        let spec_str = self
            .models
            .get(category)
            .or_else(|| self.models.get("default"))?;
        ModelSpec::parse(spec_str)
    }
}

/// Process-wide configuration resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub models: Vec<ModelSpec>,
    pub preferred_model: Option<ModelSpec>,
    pub routing: RoutingConfig,
    pub debug: bool,
    pub max_attempts: usize,
    pub poll_interval_ms: u64,
    pub judge_response_timeout_secs: u64,
    pub abort_cooldown_secs: u64,
    pub abort_race_delay_ms: u64,
    pub custom_prompt: Option<String>,
    pub project_instructions: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            preferred_model: None,
            routing: RoutingConfig::default(),
            debug: false,
            max_attempts: 3,
            poll_interval_ms: 2_000,
            judge_response_timeout_secs: 120,
            abort_cooldown_secs: 10,
            abort_race_delay_ms: 1_500,
            custom_prompt: None,
            project_instructions: None,
        }
    }
}

const PROJECT_INSTRUCTIONS_LIMIT: usize = 800;
const PREFERRED_MODEL_CANDIDATES: &[&str] = &[
    ".opencode/preferred-model.json",
    ".opencode/preferred-model.jsonc",
    "preferred-model.json",
    "preferred-model.jsonc",
];
const PROJECT_INSTRUCTIONS_CANDIDATES: &[&str] =
    &["AGENTS.md", ".opencode/AGENTS.md", "agents.md"];

impl Config {
    /// Resolve configuration for `workspace_dir`, applying every layer of
    /// the precedence chain in order.
    pub fn load(workspace_dir: &Path) -> ReflectionResult<Config> {
        let mut config = Config::default();

        Self::apply_operator_yaml(workspace_dir, &mut config)?;
        Self::apply_preferred_model(workspace_dir, &mut config)?;
        Self::apply_env(&mut config);
        config.custom_prompt = Self::load_custom_prompt(workspace_dir)?;
        config.project_instructions = Self::load_project_instructions(workspace_dir)?;

        Ok(config)
    }

    fn apply_operator_yaml(workspace_dir: &Path, config: &mut Config) -> ReflectionResult<()> {
        for name in ["reflection.yaml", "reflection.yml"] {
            let path = workspace_dir.join(name);
            if !path.is_file() {
                continue;
            }
            let contents = std::fs::read_to_string(&path).map_err(|source| ReflectionError::ConfigIo {
                path: path.clone(),
                source,
            })?;
            let parsed: OperatorYaml =
                serde_yaml::from_str(&contents).map_err(|source| ReflectionError::ConfigYaml {
                    path: path.clone(),
                    source,
                })?;

            config.models = parsed
                .models
                .iter()
                .filter_map(|s| ModelSpec::parse(s))
                .filter(|spec| !is_blocked_judge_model(spec))
                .collect();

            if let Some(routing) = parsed.routing {
                config.routing = RoutingConfig {
                    enabled: routing.enabled,
                    models: routing.models,
                };
            }
            debug!(path = %path.display(), "loaded operator config");
            break;
        }
        Ok(())
    }

    fn apply_preferred_model(workspace_dir: &Path, config: &mut Config) -> ReflectionResult<()> {
        if !config.models.is_empty() {
            return Ok(());
        }
        for candidate in PREFERRED_MODEL_CANDIDATES {
            let path = workspace_dir.join(candidate);
            if !path.is_file() {
                continue;
            }
            let contents = std::fs::read_to_string(&path).map_err(|source| ReflectionError::ConfigIo {
                path: path.clone(),
                source,
            })?;
            let stripped = strip_jsonc_comments(&contents);
            let parsed: PreferredModelFile =
                serde_json::from_str(&stripped).map_err(|source| ReflectionError::ConfigJson {
                    path: path.clone(),
                    source,
                })?;
            if let Some(spec_str) = parsed.model {
                if let Some(spec) = ModelSpec::parse(&spec_str) {
                    if !is_blocked_judge_model(&spec) {
                        config.preferred_model = Some(spec);
                    }
                }
            }
            break;
        }
        Ok(())
    }

    fn apply_env(config: &mut Config) {
        if let Ok(val) = std::env::var("REFLECTION_DEBUG") {
            config.debug = val == "1" || val.to_lowercase() == "true";
        }
        apply_env_parsed("REFLECTION_MAX_ATTEMPTS", &mut config.max_attempts);
        apply_env_parsed("REFLECTION_POLL_INTERVAL_MS", &mut config.poll_interval_ms);
        apply_env_parsed(
            "REFLECTION_JUDGE_TIMEOUT_SECS",
            &mut config.judge_response_timeout_secs,
        );
        apply_env_parsed(
            "REFLECTION_ABORT_COOLDOWN_SECS",
            &mut config.abort_cooldown_secs,
        );
        apply_env_parsed(
            "REFLECTION_ABORT_RACE_DELAY_MS",
            &mut config.abort_race_delay_ms,
        );
    }

    fn load_custom_prompt(workspace_dir: &Path) -> ReflectionResult<Option<String>> {
        for name in ["reflection.md", "reflection.MD"] {
            let path = workspace_dir.join(name);
            if path.is_file() {
                let contents = std::fs::read_to_string(&path).map_err(|source| ReflectionError::ConfigIo {
                    path,
                    source,
                })?;
                return Ok(Some(contents.trim().to_string()));
            }
        }
        Ok(None)
    }

    fn load_project_instructions(workspace_dir: &Path) -> ReflectionResult<Option<String>> {
        for candidate in PROJECT_INSTRUCTIONS_CANDIDATES {
            let path = workspace_dir.join(candidate);
            if path.is_file() {
                let contents = std::fs::read_to_string(&path).map_err(|source| ReflectionError::ConfigIo {
                    path,
                    source,
                })?;
                let truncated: String = contents.chars().take(PROJECT_INSTRUCTIONS_LIMIT).collect();
                return Ok(Some(truncated));
            }
        }
        Ok(None)
    }
}

fn apply_env_parsed<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key, value = %val, "ignoring unparseable env override"),
        }
    }
}

/// Strips `//` line comments from a JSONC document. Good enough for the
/// preferred-model file's simple shape; not a general JSONC parser.
fn strip_jsonc_comments(input: &str) -> String {
    input
        .lines()
        .map(|line| match line.find("//") {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_when_workspace_has_no_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert!(config.models.is_empty());
        assert!(!config.routing.enabled);
    }

    #[test]
    fn operator_yaml_filters_blocked_judges() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("reflection.yaml"),
            "models:\n  - anthropic/claude-sonnet\n  - anthropic/claude-haiku\nrouting:\n  enabled: true\n  models:\n    backend: anthropic/claude-sonnet\n    default: anthropic/claude-sonnet\n",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].model, "claude-sonnet");
        assert!(config.routing.enabled);
    }

    #[test]
    fn preferred_model_used_only_without_operator_models() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("preferred-model.json"),
            r#"{ "model": "openai/gpt-5" }"#,
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(
            config.preferred_model,
            Some(ModelSpec {
                provider: "openai".into(),
                model: "gpt-5".into()
            })
        );
    }

    #[test]
    fn project_instructions_truncated_to_800_chars() {
        let dir = tempfile::tempdir().unwrap();
        let long = "x".repeat(2000);
        fs::write(dir.path().join("AGENTS.md"), &long).unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.project_instructions.unwrap().len(), 800);
    }

    #[test]
    fn env_overrides_max_attempts() {
        std::env::set_var("REFLECTION_MAX_ATTEMPTS", "5");
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.max_attempts, 5);
        std::env::remove_var("REFLECTION_MAX_ATTEMPTS");
    }
}
