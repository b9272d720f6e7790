//! Layered configuration readable by pooled objects.
//!
//! An [`Environment`] merges [`PropertySource`]s by descending priority. It is
//! a [`Component`](crate::Component): put it into the pool and inject it as
//! `Arc<Environment>` with `#[inject(provided)]`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use crate::component::Component;
use crate::error::{ApplicationError, ApplicationResult};

/// A configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<ConfigValue>),
    Object(HashMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Int(i) => Some(*i as f64),
            ConfigValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn to_toml(&self) -> toml::Value {
        match self {
            ConfigValue::String(s) => toml::Value::String(s.clone()),
            ConfigValue::Int(i) => toml::Value::Integer(*i),
            ConfigValue::Float(f) => toml::Value::Float(*f),
            ConfigValue::Bool(b) => toml::Value::Boolean(*b),
            ConfigValue::Array(items) => {
                toml::Value::Array(items.iter().map(ConfigValue::to_toml).collect())
            }
            ConfigValue::Object(map) => toml::Value::Table(
                map.iter().map(|(k, v)| (k.clone(), v.to_toml())).collect(),
            ),
        }
    }

    fn from_toml(value: &toml::Value) -> Self {
        match value {
            toml::Value::String(s) => ConfigValue::String(s.clone()),
            toml::Value::Integer(i) => ConfigValue::Int(*i),
            toml::Value::Float(f) => ConfigValue::Float(*f),
            toml::Value::Boolean(b) => ConfigValue::Bool(*b),
            toml::Value::Array(arr) => {
                ConfigValue::Array(arr.iter().map(ConfigValue::from_toml).collect())
            }
            toml::Value::Table(table) => ConfigValue::Object(
                table
                    .iter()
                    .map(|(k, v)| (k.clone(), ConfigValue::from_toml(v)))
                    .collect(),
            ),
            toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

/// A source of flat, dot-separated configuration keys.
pub trait PropertySource: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Option<ConfigValue>;

    fn keys(&self) -> Vec<String>;

    /// Higher wins.
    fn priority(&self) -> i32 {
        0
    }
}

/// Merged view over every registered property source.
pub struct Environment {
    sources: RwLock<Vec<Box<dyn PropertySource>>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sources: Vec<String> = self.sources.read().iter().map(|s| s.name().to_string()).collect();
        f.debug_struct("Environment").field("sources", &sources).finish()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
        }
    }

    pub fn with_source(self, source: impl PropertySource + 'static) -> Self {
        self.add_property_source(Box::new(source));
        self
    }

    /// Adds a source, keeping the list sorted by descending priority.
    /// Sources of equal priority are consulted in insertion order.
    pub fn add_property_source(&self, source: Box<dyn PropertySource>) {
        let mut sources = self.sources.write();
        tracing::debug!(
            "Adding property source '{}' (priority {})",
            source.name(),
            source.priority()
        );
        sources.push(source);
        sources.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        let sources = self.sources.read();
        for source in sources.iter() {
            if let Some(value) = source.get(key) {
                tracing::trace!("Config '{}' found in source '{}'", key, source.name());
                return Some(value);
            }
        }
        tracing::trace!("Config '{}' not found in any source", key);
        None
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(String::from))
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get_i64(key).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// Accepts a TOML array or a comma-separated string.
    pub fn get_string_array(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            ConfigValue::Array(arr) => Some(
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect(),
            ),
            ConfigValue::String(s) => Some(
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Deserializes every key under `prefix` into `T`.
    ///
    /// `server.port` and `server.host` bind to the fields `port` and `host` of
    /// the type bound at prefix `server`. Higher priority sources win per key.
    pub fn bind<T: DeserializeOwned>(&self, prefix: &str) -> ApplicationResult<T> {
        let mut flat: BTreeMap<String, ConfigValue> = BTreeMap::new();
        {
            let sources = self.sources.read();
            // Lowest priority first so later inserts override.
            for source in sources.iter().rev() {
                for key in source.keys() {
                    let Some(rest) = strip_key_prefix(&key, prefix) else {
                        continue;
                    };
                    if let Some(value) = source.get(&key) {
                        flat.insert(rest.to_string(), value);
                    }
                }
            }
        }

        let mut root = toml::map::Map::new();
        for (key, value) in flat {
            insert_nested(&mut root, &key, value.to_toml());
        }

        toml::Value::Table(root)
            .try_into()
            .map_err(|e: toml::de::Error| {
                ApplicationError::ConfigLoadFailed(format!(
                    "cannot bind '{}' to {}: {}",
                    prefix,
                    std::any::type_name::<T>(),
                    e
                ))
            })
    }
}

fn strip_key_prefix<'k>(key: &'k str, prefix: &str) -> Option<&'k str> {
    if prefix.is_empty() {
        return Some(key);
    }
    key.strip_prefix(prefix)?.strip_prefix('.')
}

fn insert_nested(table: &mut toml::map::Map<String, toml::Value>, key: &str, value: toml::Value) {
    match key.split_once('.') {
        None => {
            table.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = table
                .entry(head.to_string())
                .or_insert(toml::Value::Table(toml::map::Map::new()));
            if !entry.is_table() {
                *entry = toml::Value::Table(toml::map::Map::new());
            }
            if let toml::Value::Table(inner) = entry {
                insert_nested(inner, rest, value);
            }
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for Environment {}

/// Process environment variables under a prefix.
///
/// `APP_DATABASE_URL` is exposed as `database.url` for prefix `APP_`.
pub struct EnvironmentPropertySource {
    prefix: String,
    priority: i32,
}

impl EnvironmentPropertySource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            priority: 100,
        }
    }

    fn env_to_key(&self, env_key: &str) -> String {
        env_key
            .strip_prefix(&self.prefix)
            .unwrap_or(env_key)
            .to_lowercase()
            .replace('_', ".")
    }

    fn key_to_env(&self, key: &str) -> String {
        format!(
            "{}{}",
            self.prefix,
            key.replace(['.', '-'], "_").to_uppercase()
        )
    }
}

impl PropertySource for EnvironmentPropertySource {
    fn name(&self) -> &str {
        "environment"
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        std::env::var(self.key_to_env(key))
            .ok()
            .map(ConfigValue::String)
    }

    fn keys(&self) -> Vec<String> {
        std::env::vars()
            .filter(|(k, _)| k.starts_with(&self.prefix))
            .map(|(k, _)| self.env_to_key(&k))
            .collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// TOML document flattened into dotted keys.
pub struct TomlPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl TomlPropertySource {
    pub fn from_file(path: impl AsRef<Path>) -> ApplicationResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ApplicationError::ConfigLoadFailed(format!("cannot read {}: {}", path.display(), e))
        })?;

        Self::parse(&content, path.to_string_lossy())
    }

    pub fn parse(content: &str, name: impl Into<String>) -> ApplicationResult<Self> {
        let name = name.into();
        let value: toml::Value = toml::from_str(content).map_err(|e| {
            ApplicationError::ConfigLoadFailed(format!("invalid TOML in {}: {}", name, e))
        })?;

        let mut properties = HashMap::new();
        flatten_toml(&value, String::new(), &mut properties);

        Ok(Self {
            name,
            properties,
            priority: 0,
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// `{ database: { url: "x" } }` becomes `{ "database.url": "x" }`.
fn flatten_toml(value: &toml::Value, prefix: String, result: &mut HashMap<String, ConfigValue>) {
    match value {
        toml::Value::Table(table) => {
            for (key, val) in table {
                let next = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_toml(val, next, result);
            }
        }
        other => {
            result.insert(prefix, ConfigValue::from_toml(other));
        }
    }
}

impl PropertySource for TomlPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// In-memory source, mostly for tests and programmatic overrides.
pub struct MapPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl MapPropertySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
            priority: 50,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const APP_TOML: &str = r#"
        [web]
        url-prefix = "/api"

        [database]
        url = "postgres://localhost/app"
        pool-size = 4
        replicas = ["a", "b"]
    "#;

    #[test]
    fn test_toml_is_flattened() {
        let source = TomlPropertySource::parse(APP_TOML, "app.toml").unwrap();
        assert_eq!(
            source.get("web.url-prefix"),
            Some(ConfigValue::String("/api".into()))
        );
        assert_eq!(source.get("database.pool-size"), Some(ConfigValue::Int(4)));
        assert!(source.get("database").is_none());
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let result = TomlPropertySource::parse("[web", "broken.toml");
        assert!(matches!(result, Err(ApplicationError::ConfigLoadFailed(_))));
    }

    #[test]
    fn test_priority_order() {
        let env = Environment::new()
            .with_source(TomlPropertySource::parse(APP_TOML, "app.toml").unwrap())
            .with_source(MapPropertySource::new("overrides").with_property("database.pool-size", 16_i64));

        assert_eq!(env.get_i64("database.pool-size"), Some(16));
        assert_eq!(env.get_string("web.url-prefix").as_deref(), Some("/api"));
        assert_eq!(
            env.get_string_array("database.replicas"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(env.get_string_or("missing", "x"), "x");
    }

    #[test]
    fn test_string_coercions() {
        let env = Environment::new().with_source(
            MapPropertySource::new("m")
                .with_property("flag", "yes")
                .with_property("ratio", "0.5")
                .with_property("list", "a, b,,c"),
        );

        assert_eq!(env.get_bool("flag"), Some(true));
        assert_eq!(env.get_f64("ratio"), Some(0.5));
        assert_eq!(
            env.get_string_array("list"),
            Some(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct DatabaseSettings {
        url: String,
        #[serde(rename = "pool-size")]
        pool_size: i64,
        #[serde(default)]
        replicas: Vec<String>,
    }

    #[test]
    fn test_bind_prefix() {
        let env = Environment::new()
            .with_source(TomlPropertySource::parse(APP_TOML, "app.toml").unwrap())
            .with_source(MapPropertySource::new("overrides").with_property("database.pool-size", 8_i64));

        let settings: DatabaseSettings = env.bind("database").unwrap();
        assert_eq!(
            settings,
            DatabaseSettings {
                url: "postgres://localhost/app".into(),
                pool_size: 8,
                replicas: vec!["a".into(), "b".into()],
            }
        );

        let missing: ApplicationResult<DatabaseSettings> = env.bind("cache");
        assert!(missing.is_err());
    }

    #[test]
    fn test_env_key_mapping() {
        let source = EnvironmentPropertySource::new("KILN_TEST_");
        assert_eq!(source.key_to_env("web.url-prefix"), "KILN_TEST_WEB_URL_PREFIX");
        assert_eq!(source.env_to_key("KILN_TEST_DATABASE_URL"), "database.url");
    }
}
