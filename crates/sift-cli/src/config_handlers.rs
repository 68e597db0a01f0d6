//! Handlers for `sift config {path,get,set,init,export}` and the TOML
//! dotted-key helpers they share.

use std::path::PathBuf;

use sift_core::{Error, Result};

use crate::cli::ConfigAction;
use crate::config::SiftConfig;

// ============================================================================
// Command dispatch
// ============================================================================

/// Handle a config subcommand.
///
/// Takes the raw `--config` path rather than a loaded config: `path` and
/// `init` must work before any file exists.
pub fn handle_config_command(config_path: Option<&str>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => cmd_config_path(config_path),
        ConfigAction::Get { key } => cmd_config_get(config_path, &key),
        ConfigAction::Set { key, value } => cmd_config_set(config_path, &key, &value),
        ConfigAction::Init { file, force } => cmd_config_init(file.as_deref(), force),
        ConfigAction::Export { docker_env } => {
            let config = SiftConfig::load(config_path)?;
            for line in export_lines(&config, docker_env)? {
                println!("{line}");
            }
            Ok(())
        }
    }
}

// ============================================================================
// Command handlers
// ============================================================================

fn cmd_config_path(config_path: Option<&str>) -> Result<()> {
    let path = SiftConfig::resolve_config_path(config_path)
        .ok_or_else(|| Error::config("Could not determine config directory for this platform"))?;
    println!("{}", path.display());
    if !path.exists() {
        eprintln!("(file does not exist; run `sift config init` to create it)");
    }
    Ok(())
}

fn cmd_config_get(config_path: Option<&str>, key: &str) -> Result<()> {
    let config = SiftConfig::load(config_path)?;
    println!("{}", lookup(&config, key)?);
    Ok(())
}

fn cmd_config_set(config_path: Option<&str>, key: &str, value: &str) -> Result<()> {
    let path = SiftConfig::resolve_config_path(config_path)
        .ok_or_else(|| Error::config("Could not determine config directory"))?;
    if !path.exists() {
        return Err(Error::config(format!(
            "Config file does not exist at {}. Run `sift config init` first.",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(&path).map_err(|e| Error::io_with_path(e, &path))?;
    let mut doc: toml::Value = toml::from_str(&content)
        .map_err(|e| Error::config(format!("Failed to parse {}: {e}", path.display())))?;

    set_nested_value(&mut doc, key, parse_value(value))?;

    // Refuse edits that would leave a file the service cannot load.
    let _: SiftConfig = doc
        .clone()
        .try_into()
        .map_err(|e| Error::config(format!("{key} = {value} is not valid: {e}")))?;

    let toml_str = toml::to_string_pretty(&doc).map_err(|e| Error::config(e.to_string()))?;
    std::fs::write(&path, toml_str).map_err(|e| Error::io_with_path(e, &path))?;

    println!("Set {key} = {value} in {}", path.display());
    Ok(())
}

fn cmd_config_init(file: Option<&str>, force: bool) -> Result<()> {
    let path = match file {
        Some(p) => PathBuf::from(p),
        None => SiftConfig::default_config_path()
            .ok_or_else(|| Error::config("Could not determine config directory"))?,
    };

    if path.exists() && !force {
        return Err(Error::config(format!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        )));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io_with_path(e, parent))?;
    }

    let toml_str = SiftConfig::default().to_toml_string()?;
    std::fs::write(&path, &toml_str).map_err(|e| Error::io_with_path(e, &path))?;

    println!("Config file created at {}", path.display());
    Ok(())
}

fn export_lines(config: &SiftConfig, docker_env: bool) -> Result<Vec<String>> {
    Ok(config
        .to_env_vars()?
        .into_iter()
        .map(|(key, value)| {
            if docker_env {
                format!("--env {key}={value}")
            } else {
                format!("{key}={value}")
            }
        })
        .collect())
}

fn lookup(config: &SiftConfig, key: &str) -> Result<String> {
    let value = toml::Value::try_from(config).map_err(|e| Error::config(e.to_string()))?;
    get_nested_value(&value, key)
        .map(format_toml_value)
        .ok_or_else(|| Error::config(format!("Key '{key}' not found in configuration")))
}

// ============================================================================
// TOML dotted-key helpers
// ============================================================================

fn get_nested_value<'a>(value: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    key.split('.')
        .try_fold(value, |current, part| current.as_table()?.get(part))
}

/// Set a value at a dotted key path, creating intermediate tables.
fn set_nested_value(root: &mut toml::Value, key: &str, value: toml::Value) -> Result<()> {
    if key.is_empty() {
        return Err(Error::config("Empty key path"));
    }
    let (parents, leaf) = match key.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, key),
    };

    let mut current = root;
    for part in parents.into_iter().flat_map(|p| p.split('.')) {
        let table = current
            .as_table_mut()
            .ok_or_else(|| Error::config("Cannot navigate into a non-table value"))?;
        current = table
            .entry(part.to_string())
            .or_insert(toml::Value::Table(toml::map::Map::new()));
    }

    current
        .as_table_mut()
        .ok_or_else(|| Error::config("Cannot set key on a non-table value"))?
        .insert(leaf.to_string(), value);
    Ok(())
}

/// bool, then integer, then float, then string.
fn parse_value(s: &str) -> toml::Value {
    match s {
        "true" => toml::Value::Boolean(true),
        "false" => toml::Value::Boolean(false),
        _ => s
            .parse::<i64>()
            .map(toml::Value::Integer)
            .or_else(|_| s.parse::<f64>().map(toml::Value::Float))
            .unwrap_or_else(|_| toml::Value::String(s.to_string())),
    }
}

fn format_toml_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        toml::Value::Datetime(dt) => dt.to_string(),
        toml::Value::Array(_) | toml::Value::Table(_) => {
            toml::to_string_pretty(value).unwrap_or_else(|_| format!("{value:?}"))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_default(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SiftConfig::default().to_toml_string().unwrap()).unwrap();
        path
    }

    #[test]
    fn test_config_path_explicit() {
        assert!(cmd_config_path(Some("/explicit/config.toml")).is_ok());
    }

    #[test]
    fn test_lookup_nested() {
        let config = SiftConfig::default();
        assert_eq!(lookup(&config, "server.port").unwrap(), "9310");
        assert_eq!(lookup(&config, "search.default_page_size").unwrap(), "20");
        assert_eq!(lookup(&config, "service_name").unwrap(), "sift");
    }

    #[test]
    fn test_lookup_missing_key() {
        let err = lookup(&SiftConfig::default(), "server.nope").unwrap_err();
        assert!(err.to_string().contains("server.nope"));
    }

    #[test]
    fn test_config_get_from_file() {
        let dir = TempDir::new().unwrap();
        let path = write_default(&dir);
        assert!(cmd_config_get(Some(path.to_str().unwrap()), "server.host").is_ok());
    }

    #[test]
    fn test_config_set_writes_value() {
        let dir = TempDir::new().unwrap();
        let path = write_default(&dir);
        cmd_config_set(Some(path.to_str().unwrap()), "server.port", "9000").unwrap();

        let config: SiftConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_config_set_creates_tables() {
        let dir = TempDir::new().unwrap();
        let path = write_default(&dir);
        cmd_config_set(
            Some(path.to_str().unwrap()),
            "routes.archive",
            "http://10.0.0.7:9310",
        )
        .unwrap();

        let config: SiftConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.routes["archive"], "http://10.0.0.7:9310");
    }

    #[test]
    fn test_config_set_rejects_invalid_type() {
        let dir = TempDir::new().unwrap();
        let path = write_default(&dir);
        let before = std::fs::read_to_string(&path).unwrap();
        assert!(cmd_config_set(Some(path.to_str().unwrap()), "server.port", "high").is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_config_set_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(cmd_config_set(Some(path.to_str().unwrap()), "server.port", "1").is_err());
    }

    #[test]
    fn test_config_init_and_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let file = path.to_str().unwrap();

        cmd_config_init(Some(file), false).unwrap();
        assert!(path.exists());
        assert!(cmd_config_init(Some(file), false).is_err());
        assert!(cmd_config_init(Some(file), true).is_ok());
    }

    #[test]
    fn test_export_lines() {
        let config = SiftConfig::default();
        let plain = export_lines(&config, false).unwrap();
        assert!(plain.contains(&"SIFT_SERVER_PORT=9310".to_string()));
        let docker = export_lines(&config, true).unwrap();
        assert!(docker.contains(&"--env SIFT_SERVER_PORT=9310".to_string()));
    }

    #[test]
    fn test_set_nested_value_rejects_non_table() {
        let mut doc: toml::Value = toml::from_str("port = 1").unwrap();
        assert!(set_nested_value(&mut doc, "port.inner", parse_value("2")).is_err());
        assert!(set_nested_value(&mut doc, "", parse_value("2")).is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("true"), toml::Value::Boolean(true));
        assert_eq!(parse_value("42"), toml::Value::Integer(42));
        assert_eq!(parse_value("1.5"), toml::Value::Float(1.5));
        assert_eq!(parse_value("memory"), toml::Value::String("memory".into()));
    }
}
