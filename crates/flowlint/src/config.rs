//! Configuration file loading.
//!
//! ```yaml
//! config-variables: [DEPLOY_URL]
//! ignore-patterns:
//!   - "^timeout-minutes$"
//! rules:
//!   commit-sha:
//!     ignore: true
//! ```

use anyhow::Context as _;
use camino::Utf8Path;
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// Names of repository/organization configuration variables, used to
    /// type the `vars` context. Empty means `vars` is unchecked.
    pub config_variables: Vec<String>,
    /// Regular expressions over rule names; matching diagnostics are
    /// dropped.
    pub ignore_patterns: Vec<String>,
    /// Per-rule overrides.
    pub rules: IndexMap<String, RuleOverride>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleOverride {
    pub ignore: bool,
}

impl Config {
    /// Loads configuration; unknown keys are errors, surfaced by the
    /// driver rather than collected as diagnostics.
    pub fn load(contents: &str) -> anyhow::Result<Self> {
        let config: Config =
            serde_yaml::from_str(contents).context("malformed configuration file")?;
        // Validate the patterns eagerly so a typo fails the run instead
        // of silently ignoring nothing.
        for pattern in &config.ignore_patterns {
            Regex::new(pattern)
                .with_context(|| format!("invalid ignore pattern {pattern:?}"))?;
        }
        Ok(config)
    }

    pub fn load_file(path: &Utf8Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("could not read configuration at {path}"))?;
        Self::load(&contents)
    }

    /// Whether diagnostics from `rule` should be dropped.
    pub fn ignores_rule(&self, rule: &str) -> bool {
        if self
            .rules
            .get(rule)
            .is_some_and(|overrides| overrides.ignore)
        {
            return true;
        }
        self.ignore_patterns.iter().any(|pattern| {
            Regex::new(pattern)
                .map(|regex| regex.is_match(rule))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load() {
        let config = Config::load(
            "config-variables: [DEPLOY_URL]\nignore-patterns:\n  - \"^code-injection-\"\nrules:\n  commit-sha:\n    ignore: true\n",
        )
        .unwrap();
        assert_eq!(config.config_variables, vec!["DEPLOY_URL"]);
        assert!(config.ignores_rule("code-injection-critical"));
        assert!(config.ignores_rule("commit-sha"));
        assert!(!config.ignores_rule("cache-poisoning"));
    }

    #[test]
    fn test_unknown_keys_are_errors() {
        assert!(Config::load("config-variable: [oops]\n").is_err());
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(Config::load("ignore-patterns: [\"(\"]\n").is_err());
    }
}
