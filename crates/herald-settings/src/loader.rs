//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HeraldSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority). Variables missing
//!    from the process environment are looked up in the dotenv file, if present
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{BrokerBackend, HeraldSettings, MAX_RELAY_MS};

/// Resolve the default settings file (`~/.herald/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".herald").join("settings.json")
}

/// Dotenv file read from the working directory unless another is given.
pub const DOTENV_FILE: &str = ".env";

/// Load settings from `path` with env var overrides, falling back to `dotenv`
/// for variables the process environment does not set.
///
/// A missing settings or dotenv file is skipped; a settings file with invalid
/// JSON is an error.
pub fn load_settings_from_path(path: &Path, dotenv: &Path) -> Result<HeraldSettings> {
    let mut settings = read_file_layer(path)?;
    let dotenv_vars = read_dotenv(dotenv)?;
    apply_env_overrides(&mut settings, &dotenv_vars);
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<HeraldSettings> {
    let defaults = serde_json::to_value(HeraldSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment, then `dotenv` for unset names.
pub fn apply_env_overrides(settings: &mut HeraldSettings, dotenv: &HashMap<String, String>) {
    apply_overrides_from(settings, env_then_dotenv(|name| std::env::var(name).ok(), dotenv));
}

fn env_then_dotenv<'a>(
    env: impl Fn(&str) -> Option<String> + 'a,
    dotenv: &'a HashMap<String, String>,
) -> impl Fn(&str) -> Option<String> + 'a {
    move |name| env(name).or_else(|| dotenv.get(name).cloned())
}

/// Read `KEY=VALUE` pairs from a dotenv file. A missing file yields no pairs.
pub fn read_dotenv(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    debug!(?path, "loading dotenv file");
    let content = std::fs::read_to_string(path)?;
    Ok(parse_dotenv(&content))
}

/// Parse dotenv content.
///
/// Blank lines and `#` comments are skipped, an `export ` prefix is allowed,
/// and one pair of matching single or double quotes around a value is removed.
/// Lines without `=` are ignored with a warning.
pub fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = index + 1, "dotenv line has no '=', ignoring");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let _ = vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    vars
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Apply overrides read through `lookup`.
///
/// Invalid numeric values are ignored with a warning and fall back to the
/// file/default value, except `REDIS_DB`, which falls back to database 0.
pub fn apply_overrides_from(settings: &mut HeraldSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("HERALD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = string("PORT").and_then(|v| parse_or_warn("PORT", &v, parse_port)) {
        settings.server.port = v;
    }
    let mut origins: Vec<String> = ["APP_1_ORIGIN", "APP_2_ORIGIN"]
        .iter()
        .filter_map(|name| string(*name))
        .collect();
    if let Some(v) = string("HERALD_ALLOWED_ORIGINS") {
        origins.extend(parse_list(&v));
    }
    if !origins.is_empty() {
        settings.server.allowed_origins = origins;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = string("JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }

    // ── Broker ──────────────────────────────────────────────────────
    if let Some(v) = string("HERALD_BROKER")
        .and_then(|v| parse_or_warn("HERALD_BROKER", &v, BrokerBackend::parse))
    {
        settings.broker.backend = v;
    }
    if let Some(v) = string("REDIS_HOST") {
        settings.broker.host = v;
    }
    if let Some(v) = string("REDIS_PORT").and_then(|v| parse_or_warn("REDIS_PORT", &v, parse_port)) {
        settings.broker.port = v;
    }
    if let Some(v) = string("REDIS_PASS") {
        settings.broker.password = Some(v);
    }
    if let Some(v) = lookup("REDIS_DB") {
        settings.broker.db = v.parse().unwrap_or(0);
    }

    // ── Relay ───────────────────────────────────────────────────────
    if let Some(v) = string("HERALD_WRITE_WAIT_MS")
        .and_then(|v| parse_or_warn("HERALD_WRITE_WAIT_MS", &v, parse_millis))
    {
        settings.relay.write_wait_ms = v;
    }
    if let Some(v) = string("HERALD_PONG_WAIT_MS")
        .and_then(|v| parse_or_warn("HERALD_PONG_WAIT_MS", &v, parse_millis))
    {
        settings.relay.pong_wait_ms = v;
    }
    if let Some(v) = string("HERALD_PING_PERIOD_MS")
        .and_then(|v| parse_or_warn("HERALD_PING_PERIOD_MS", &v, parse_millis))
    {
        settings.relay.ping_period_ms = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("HERALD_LOG_JSON").and_then(|v| parse_or_warn("HERALD_LOG_JSON", &v, parse_bool)) {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a TCP port (1–65535).
pub fn parse_port(val: &str) -> Option<u16> {
    val.parse().ok().filter(|p| *p > 0)
}

/// Parse a positive millisecond count, capped at one hour.
pub fn parse_millis(val: &str) -> Option<u64> {
    val.parse().ok().filter(|ms| (1..=MAX_RELAY_MS).contains(ms))
}

/// Split a comma-separated list, trimming blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_or_warn<T>(key: &str, val: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let result = parse(val);
    if result.is_none() {
        warn!(key, value = %val, "invalid env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::errors::SettingsError;

    fn apply(vars: &[(&str, &str)]) -> HeraldSettings {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = HeraldSettings::default();
        apply_overrides_from(&mut settings, |name| env.get(name).cloned());
        settings
    }

    #[test]
    fn deep_merge_nested_objects() {
        let merged = deep_merge(
            json!({"server": {"host": "0.0.0.0", "port": 5500}}),
            json!({"server": {"port": 9000}}),
        );
        assert_eq!(merged["server"]["host"], "0.0.0.0");
        assert_eq!(merged["server"]["port"], 9000);
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let merged = deep_merge(json!({"o": ["a", "b"]}), json!({"o": ["c"]}));
        assert_eq!(merged["o"], json!(["c"]));
    }

    #[test]
    fn deep_merge_skips_nulls() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null, "b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_file_layer(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.server.port, 5500);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"broker": {{"host": "redis.internal"}}, "relay": {{"pongWaitMs": 60000}}}}"#
        )
        .unwrap();
        let settings = read_file_layer(file.path()).unwrap();
        assert_eq!(settings.broker.host, "redis.internal");
        assert_eq!(settings.broker.port, 6379);
        assert_eq!(settings.relay.pong_wait_ms, 60_000);
        assert_eq!(settings.relay.write_wait_ms, 10_000);
    }

    #[test]
    fn invalid_json_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert_matches!(read_file_layer(file.path()), Err(SettingsError::Json(_)));
    }

    #[test]
    fn inconsistent_timing_in_file_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"relay": {{"pongWaitMs": 1000, "pingPeriodMs": 2000}}}}"#).unwrap();
        let settings = read_file_layer(file.path()).unwrap();
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn huge_timing_in_file_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"relay": {"pongWaitMs": 18446744073709551615}}"#).unwrap();
        assert_matches!(
            load_settings_from_path(&path, &dir.path().join(".env")),
            Err(SettingsError::InvalidValue(_))
        );
    }

    #[test]
    fn parse_dotenv_lines() {
        let vars = parse_dotenv(
            "# deployment\n\
             REDIS_HOST=cache\n\
             export JWT_SECRET=\"s3cret value\"\n\
             \n\
             APP_1_ORIGIN='https://app-one.example'\n\
             REDIS_PASS = pw=with=equals \n\
             garbage line\n\
             =orphan\n",
        );
        assert_eq!(vars.len(), 4);
        assert_eq!(vars["REDIS_HOST"], "cache");
        assert_eq!(vars["JWT_SECRET"], "s3cret value");
        assert_eq!(vars["APP_1_ORIGIN"], "https://app-one.example");
        assert_eq!(vars["REDIS_PASS"], "pw=with=equals");
    }

    #[test]
    fn unbalanced_quotes_are_kept() {
        let vars = parse_dotenv("A=\"open\nB='x\"\n");
        assert_eq!(vars["A"], "\"open");
        assert_eq!(vars["B"], "'x\"");
    }

    #[test]
    fn missing_dotenv_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_dotenv(&dir.path().join(".env")).unwrap().is_empty());
    }

    #[test]
    fn dotenv_values_reach_settings() {
        let dir = tempfile::tempdir().unwrap();
        let dotenv = dir.path().join(".env");
        std::fs::write(
            &dotenv,
            "APP_2_ORIGIN=https://dotenv.example\nHERALD_PONG_WAIT_MS=45000\n",
        )
        .unwrap();
        let settings =
            load_settings_from_path(&dir.path().join("absent.json"), &dotenv).unwrap();
        assert!(
            settings
                .server
                .allowed_origins
                .contains(&"https://dotenv.example".to_string())
        );
        assert_eq!(settings.relay.pong_wait_ms, 45_000);
    }

    #[test]
    fn process_env_wins_over_dotenv() {
        let dotenv = parse_dotenv("PORT=9090\nREDIS_HOST=dotenv-cache\n");
        let env = |name: &str| (name == "PORT").then(|| "8080".to_string());
        let mut settings = HeraldSettings::default();
        apply_overrides_from(&mut settings, env_then_dotenv(env, &dotenv));
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.broker.host, "dotenv-cache");
    }

    #[test]
    fn env_overrides_deployment_variables() {
        let s = apply(&[
            ("PORT", "8088"),
            ("REDIS_HOST", "cache"),
            ("REDIS_PORT", "6380"),
            ("REDIS_PASS", "pw"),
            ("REDIS_DB", "3"),
            ("JWT_SECRET", "topsecret"),
            ("APP_1_ORIGIN", "https://app-one.example"),
            ("APP_2_ORIGIN", "https://app-two.example"),
        ]);
        assert_eq!(s.server.port, 8088);
        assert_eq!(s.broker.host, "cache");
        assert_eq!(s.broker.port, 6380);
        assert_eq!(s.broker.password.as_deref(), Some("pw"));
        assert_eq!(s.broker.db, 3);
        assert_eq!(s.auth.jwt_secret, "topsecret");
        assert_eq!(
            s.server.allowed_origins,
            vec!["https://app-one.example", "https://app-two.example"]
        );
    }

    #[test]
    fn unparsable_redis_db_falls_back_to_zero() {
        let mut settings = HeraldSettings::default();
        settings.broker.db = 5;
        apply_overrides_from(&mut settings, |name| (name == "REDIS_DB").then(|| "abc".to_string()));
        assert_eq!(settings.broker.db, 0);
    }

    #[test]
    fn invalid_port_is_ignored() {
        let s = apply(&[("PORT", "not-a-port"), ("REDIS_PORT", "0")]);
        assert_eq!(s.server.port, 5500);
        assert_eq!(s.broker.port, 6379);
    }

    #[test]
    fn herald_overrides() {
        let s = apply(&[
            ("HERALD_HOST", "127.0.0.1"),
            ("HERALD_BROKER", "memory"),
            ("HERALD_WRITE_WAIT_MS", "500"),
            ("HERALD_PONG_WAIT_MS", "2000"),
            ("HERALD_PING_PERIOD_MS", "1500"),
            ("HERALD_LOG_JSON", "off"),
            ("HERALD_ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
        ]);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.broker.backend, BrokerBackend::Memory);
        assert_eq!(s.relay.write_wait_ms, 500);
        assert_eq!(s.relay.pong_wait_ms, 2000);
        assert_eq!(s.relay.ping_period_ms, Some(1500));
        assert!(!s.logging.json);
        assert_eq!(
            s.server.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn unknown_backend_is_ignored() {
        let s = apply(&[("HERALD_BROKER", "kafka")]);
        assert_eq!(s.broker.backend, BrokerBackend::Redis);
    }

    #[test]
    fn empty_values_are_ignored() {
        let s = apply(&[("JWT_SECRET", ""), ("REDIS_HOST", "")]);
        assert_eq!(s.auth.jwt_secret, "");
        assert_eq!(s.broker.host, "localhost");
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_port("65535"), Some(65535));
        assert_eq!(parse_port("65536"), None);
        assert_eq!(parse_millis("0"), None);
        assert_eq!(parse_millis("3600001"), None);
        assert_eq!(parse_millis("250"), Some(250));
        assert!(parse_list(" , ").is_empty());
    }
}
