pub mod schema;

pub use schema::{
    Config, EngineSettings, ResetMatch, RuleConfig, RuleGroup, RuleSet,
};

use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::rules;

const CONFIG_ENV_VAR: &str = "AXSEL_CONFIG";

/// flag, then `AXSEL_CONFIG`, then `~/.axsel/config.json`
pub fn get_config_path(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = env::var(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }

    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow!("Could not find home directory"))?
        .join(".axsel")
        .join("config.json"))
}

/// parse JSON5 (plain JSON included)
pub fn parse(content: &str) -> Result<Config> {
    json5::from_str(content).map_err(|e| anyhow!("invalid config: {}", e))
}

/// a missing file at the default location is an empty config
pub fn load(flag: Option<&Path>) -> Result<Config> {
    let path = get_config_path(flag)?;

    if !path.exists() {
        if flag.is_some() {
            return Err(anyhow!("config file not found: {}", path.display()));
        }
        return Ok(Config::default());
    }

    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn save(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    Ok(())
}

/// Verify configuration file and return a list of errors
pub fn verify(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(anyhow!("config file not found: {}", path.display()));
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config = parse(&content)?;
    Ok(verify_config(&config))
}

/// every problem in an already parsed config
pub fn verify_config(config: &Config) -> Vec<String> {
    let mut errors = Vec::new();
    let s = &config.settings;

    for (field, value) in [
        ("cache_ttl_text_ms", s.cache_ttl_text_ms),
        ("cache_ttl_plain_ms", s.cache_ttl_plain_ms),
        ("node_stale_ms", s.node_stale_ms),
    ] {
        if value < 0 {
            errors.push(format!("settings.{}: must not be negative", field));
        }
    }
    if s.max_children == 0 {
        errors.push("settings.max_children: must be at least 1".to_string());
    }

    for (i, group) in config.rules.groups.iter().enumerate() {
        if group.app.is_some() && !(group.apps.is_empty() && group.exclude_apps.is_empty()) {
            errors.push(format!(
                "groups[{}]: apps/excludeApps only apply to global groups",
                i
            ));
        }
    }

    let loaded = rules::load(&config.rules, &config.settings, 0);
    errors.extend(loaded.errors.iter().map(|e| e.to_string()));

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_json5() {
        let config = parse(
            r#"{
                // comments and trailing commas are fine
                settings: { quick_find: true },
                rules: {
                    groups: [{
                        key: 1,
                        app: 'com.example',
                        rules: [{ key: 0, matches: ["[text=`Skip`]"], actionMaximum: 1, },],
                    }],
                },
            }"#,
        )
        .unwrap();
        assert!(config.settings.quick_find);
        assert_eq!(config.rules.groups[0].rules[0].action_maximum, Some(1));
    }

    #[test]
    fn test_parse_plain_json() {
        let config = parse(r#"{ "settings": { "max_children": 64 } }"#).unwrap();
        assert_eq!(config.settings.max_children, 64);
        assert!(config.rules.groups.is_empty());
    }

    #[test]
    fn test_flag_wins() {
        let path = get_config_path(Some(Path::new("/tmp/axsel.json"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/axsel.json"));
    }

    #[test]
    fn test_load_missing_flag_path_fails() {
        assert!(load(Some(Path::new("/nonexistent/axsel.json"))).is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.settings.follow_up_delay_ms = 50;
        save(&config, &path).unwrap();
        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.settings.follow_up_delay_ms, 50);
    }

    #[test]
    fn test_verify_valid_config() {
        let file = write_config(
            r#"{
                rules: { groups: [{ key: 1, app: "a", rules: [{ key: 0, matches: ["Button"] }] }] }
            }"#,
        );
        assert!(verify(file.path()).unwrap().is_empty());
    }

    #[test]
    fn test_verify_reports_rule_problems() {
        let file = write_config(
            r#"{
                settings: { max_children: 0 },
                rules: { groups: [{
                    key: 1, app: "a", apps: ["b"],
                    rules: [
                        { key: 0, matches: ["[text="] },
                        { key: 1, matches: ["Button"], preKeys: [5] },
                        { key: 2, matches: ["Button"], matchDelay: -1 },
                    ],
                }] }
            }"#,
        );
        let errors = verify(file.path()).unwrap();
        assert_eq!(errors.len(), 5, "{:?}", errors);
        assert!(errors[0].contains("max_children"));
        assert!(errors[1].contains("global groups"));
        assert!(errors.iter().any(|e| e.contains("unknown key 5")));
        assert!(errors.iter().any(|e| e.contains("matchDelay")));
    }

    #[test]
    fn test_verify_invalid_syntax() {
        let file = write_config("{ settings: ");
        assert!(verify(file.path()).is_err());
    }

    #[test]
    fn test_verify_file_not_found() {
        assert!(verify(Path::new("/nonexistent/config.json")).is_err());
    }
}
