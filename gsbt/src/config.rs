//! Configuration management for gsbt.
//!
//! Loads a YAML file, optionally pulls variables from a `.env` file, expands
//! `${VAR}`-style references in every string field and fills in defaults.

use crate::connector::{ConnectorConfig, RetryPolicy};
use crate::utils::envsubst::{expand, expand_all};
use crate::utils::errors::{GsbtError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CONFIG_ENV_VAR: &str = "GSBT_CONFIG";
pub const LOCAL_CONFIG_FILE: &str = ".gsbt-config.yml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub servers: Vec<Server>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Defaults {
    /// Root directory for archives
    #[serde(default)]
    pub backup_location: String,

    /// Staging root; `{backup_location}/.tmp` when empty
    #[serde(default)]
    pub temp_dir: String,

    /// Days an archive is kept by `prune`
    #[serde(default)]
    pub prune_age: u32,

    #[serde(default)]
    pub retry_attempts: u32,

    #[serde(default)]
    pub retry_delay: u64,

    #[serde(default)]
    pub retry_backoff: bool,

    /// Optional `.env` file loaded before variable expansion
    #[serde(default)]
    pub env_file: String,

    #[serde(default)]
    pub nitrado_api_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Server {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub backup_location: String,

    #[serde(default)]
    pub prune_age: u32,

    pub connection: Connection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Connection {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub key_file: String,

    /// FTP passive mode, on unless set to false
    #[serde(default)]
    pub passive: Option<bool>,

    #[serde(default)]
    pub tls: bool,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub service_id: String,

    #[serde(default)]
    pub api_base: String,

    #[serde(default)]
    pub remote_path: String,

    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Server {
    /// Archive directory for this server. Without an override, servers get
    /// their own subdirectory of the default location.
    pub fn backup_location(&self, defaults: &Defaults) -> PathBuf {
        if !self.backup_location.is_empty() {
            return PathBuf::from(&self.backup_location);
        }
        let root = if defaults.backup_location.is_empty() {
            "./backups"
        } else {
            defaults.backup_location.as_str()
        };
        Path::new(root).join(&self.name)
    }

    pub fn prune_age(&self, defaults: &Defaults) -> u32 {
        if self.prune_age > 0 {
            self.prune_age
        } else {
            defaults.prune_age
        }
    }
}

impl Connection {
    pub fn include(&self) -> Vec<String> {
        if self.include.is_empty() {
            vec!["*".to_string()]
        } else {
            self.include.clone()
        }
    }

    pub fn is_passive(&self) -> bool {
        self.passive.unwrap_or(true)
    }
}

impl Defaults {
    pub fn temp_dir(&self) -> Option<PathBuf> {
        Some(&self.temp_dir)
            .filter(|t| !t.is_empty())
            .map(PathBuf::from)
    }
}

impl Config {
    /// Find the server called `name`.
    pub fn server(&self, name: &str) -> Result<&Server> {
        self.servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| GsbtError::Config(format!("server {:?} not found in config", name)))
    }

    /// Servers selected by an optional name filter.
    pub fn select(&self, name: Option<&str>) -> Result<Vec<&Server>> {
        let servers: Vec<&Server> = match name {
            Some(name) => vec![self.server(name)?],
            None => self.servers.iter().collect(),
        };
        if servers.is_empty() {
            return Err(GsbtError::Config("no servers configured".into()));
        }
        Ok(servers)
    }

    fn expand_env(&mut self) {
        let d = &mut self.defaults;
        for field in [
            &mut d.backup_location,
            &mut d.temp_dir,
            &mut d.env_file,
            &mut d.nitrado_api_key,
        ] {
            *field = expand(field);
        }

        for server in &mut self.servers {
            server.name = expand(&server.name);
            server.description = expand(&server.description);
            server.backup_location = expand(&server.backup_location);

            let c = &mut server.connection;
            for field in [
                &mut c.kind,
                &mut c.host,
                &mut c.username,
                &mut c.password,
                &mut c.key_file,
                &mut c.api_key,
                &mut c.service_id,
                &mut c.api_base,
                &mut c.remote_path,
            ] {
                *field = expand(field);
            }
            expand_all(&mut c.include);
            expand_all(&mut c.exclude);
        }
    }

    fn apply_defaults(&mut self) {
        if self.defaults.retry_attempts == 0 {
            self.defaults.retry_attempts = 3;
        }
        if self.defaults.retry_delay == 0 {
            self.defaults.retry_delay = 5;
        }
        if self.defaults.prune_age == 0 {
            self.defaults.prune_age = 30;
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(GsbtError::Config("every server needs a name".into()));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(GsbtError::Config(format!(
                    "duplicate server name: {}",
                    server.name
                )));
            }
        }
        Ok(())
    }
}

/// Locate the config file: explicit path, then `$GSBT_CONFIG`, then
/// `./.gsbt-config.yml`, then `~/.config/gsbt/config.yml`.
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    let from_env = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    let user = dirs::home_dir().map(|h| h.join(".config").join("gsbt").join("config.yml"));
    discover(explicit, from_env, Path::new(LOCAL_CONFIG_FILE), user)
}

fn discover(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    local: &Path,
    user: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(GsbtError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        return Ok(path.to_path_buf());
    }

    let candidates = [
        from_env.filter(|p| !p.as_os_str().is_empty()),
        Some(local.to_path_buf()),
        user,
    ];
    for candidate in candidates.into_iter().flatten() {
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Using config file");
            return Ok(candidate);
        }
    }

    Err(GsbtError::Config(
        "no config file found (run `gsbt init` to create one)".into(),
    ))
}

/// Read, expand and default the config at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        GsbtError::Config(format!("failed to read config {}: {}", path.display(), e))
    })?;
    let mut config: Config = serde_yaml::from_str(&content)?;

    if !config.defaults.env_file.is_empty() {
        let env_file = resolve_relative(path, &expand(&config.defaults.env_file));
        match dotenvy::from_path(&env_file) {
            Ok(()) => debug!(path = %env_file.display(), "Loaded env file"),
            Err(e) => warn!(path = %env_file.display(), error = %e, "Env file not loaded"),
        }
    }

    config.expand_env();
    config.apply_defaults();
    config.validate()?;
    Ok(config)
}

/// Relative paths are taken from the config file's directory.
fn resolve_relative(config_path: &Path, value: &str) -> PathBuf {
    let value = Path::new(value);
    if value.is_absolute() {
        return value.to_path_buf();
    }
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(value),
        _ => value.to_path_buf(),
    }
}

/// Build the connector settings for one server.
pub fn to_connector_config(server: &Server, defaults: &Defaults) -> Result<ConnectorConfig> {
    let conn = &server.connection;

    if conn.remote_path.is_empty() {
        return Err(GsbtError::Config("connection.remote_path is required".into()));
    }

    let api_key = if conn.api_key.is_empty() {
        defaults.nitrado_api_key.clone()
    } else {
        conn.api_key.clone()
    };

    Ok(ConnectorConfig {
        kind: conn.kind.clone(),
        host: conn.host.clone(),
        port: conn.port,
        username: conn.username.clone(),
        password: conn.password.clone(),
        key_file: Some(conn.key_file.clone()).filter(|k| !k.is_empty()),
        api_key,
        service_id: conn.service_id.clone(),
        api_base: Some(conn.api_base.clone()).filter(|b| !b.is_empty()),
        remote_path: conn.remote_path.clone(),
        include: conn.include(),
        exclude: conn.exclude.clone(),
        tls: conn.tls,
        passive: conn.is_passive(),
        retry: RetryPolicy {
            attempts: defaults.retry_attempts,
            delay_secs: defaults.retry_delay,
            backoff: defaults.retry_backoff,
        },
    })
}

/// JSON Schema of the config file, for editor completion and validation.
pub fn config_schema() -> schemars::Schema {
    let mut schema = schemars::schema_for!(Config);
    schema.insert("title".to_string(), "GSBT Configuration".into());
    schema.insert(
        "description".to_string(),
        "Configuration schema for the game server backup tool (gsbt)".into(),
    );
    schema
}

/// Commented starter configuration written by `gsbt init`.
pub const SAMPLE_CONFIG: &str = r#"# gsbt configuration

defaults:
  backup_location: ./backups
  temp_dir: ./.tmp
  prune_age: 30
  retry_attempts: 3
  retry_delay: 5
  retry_backoff: true
  # env_file: .env
  # nitrado_api_key: ${NITRADO_API_KEY}

servers:
  - name: example-ftp-server
    description: "An example FTP server backup"
    connection:
      type: ftp
      host: ftp.example.com
      port: 21
      username: user
      password: ${FTP_PASSWORD}
      remote_path: /game/saves
      include: ["*"]
      exclude: ["*.log", "Logs/"]

  # - name: example-sftp-server
  #   connection:
  #     type: sftp
  #     host: sftp.example.com
  #     username: steam
  #     key_file: ~/.ssh/id_ed25519
  #     remote_path: /home/steam/saves

  # - name: example-nitrado-server
  #   connection:
  #     type: nitrado
  #     service_id: "1234567"
  #     remote_path: /games/ark/saves
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_schema_describes_yaml_keys() {
        let schema = serde_json::to_value(config_schema()).unwrap();
        assert_eq!(schema["title"], "GSBT Configuration");
        assert!(schema["properties"]["servers"].is_object());
        assert!(schema["properties"]["defaults"].is_object());

        let connection = &schema["$defs"]["Connection"];
        assert!(connection["properties"]["type"].is_object());
        assert!(connection["properties"]["kind"].is_null());
        assert_eq!(connection["required"], serde_json::json!(["type"]));

        let server = &schema["$defs"]["Server"];
        let required: Vec<_> = server["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(required.contains(&"name"));
        assert!(required.contains(&"connection"));
    }

    #[test]
    fn test_sample_config_parses() {
        let config: Config = serde_yaml::from_str(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].connection.kind, "ftp");
        assert_eq!(config.defaults.prune_age, 30);
    }

    #[test]
    fn test_load_applies_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "config.yml",
            r#"
defaults:
  backup_location: /srv/backups
servers:
  - name: ark
    connection:
      type: ftp
      host: ftp.example.com
      remote_path: /data
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.defaults.retry_attempts, 3);
        assert_eq!(config.defaults.retry_delay, 5);
        assert_eq!(config.defaults.prune_age, 30);

        let server = &config.servers[0];
        assert_eq!(server.prune_age(&config.defaults), 30);
        assert_eq!(
            server.backup_location(&config.defaults),
            PathBuf::from("/srv/backups/ark")
        );
        assert!(server.connection.is_passive());
        assert_eq!(server.connection.include(), vec!["*".to_string()]);
    }

    #[test]
    fn test_load_expands_env_and_env_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "test.env", "GSBT_TEST_FROM_FILE_PASSWORD=hunter2\n");
        let path = write(
            dir.path(),
            "config.yml",
            r#"
defaults:
  env_file: test.env
  nitrado_api_key: ${GSBT_TEST_MISSING_KEY:-fallback-key}
servers:
  - name: ark
    connection:
      type: nitrado
      service_id: "42"
      password: ${GSBT_TEST_FROM_FILE_PASSWORD}
      remote_path: /games/ark
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.defaults.nitrado_api_key, "fallback-key");
        assert_eq!(config.servers[0].connection.password, "hunter2");

        let conn = to_connector_config(&config.servers[0], &config.defaults).unwrap();
        assert_eq!(conn.api_key, "fallback-key");
    }

    #[test]
    fn test_missing_env_file_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "config.yml",
            "defaults:\n  env_file: nope.env\nservers: []\n",
        );
        let config = load_config(&path).unwrap();
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "config.yml", "servers: [unterminated");
        assert!(matches!(load_config(&path), Err(GsbtError::Yaml(_))));
    }

    #[test]
    fn test_duplicate_server_names_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "config.yml",
            r#"
servers:
  - name: ark
    connection: { type: ftp, remote_path: /a }
  - name: ark
    connection: { type: ftp, remote_path: /b }
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate server name"));
    }

    #[test]
    fn test_to_connector_config_requires_remote_path() {
        let server = Server {
            name: "ark".into(),
            connection: Connection {
                kind: "ftp".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = to_connector_config(&server, &Defaults::default()).unwrap_err();
        assert!(err.to_string().contains("connection.remote_path is required"));
    }

    #[test]
    fn test_to_connector_config_carries_fields() {
        let server = Server {
            name: "ark".into(),
            connection: Connection {
                kind: "sftp".into(),
                host: "h".into(),
                port: 2222,
                key_file: "/k".into(),
                passive: Some(false),
                api_key: "own-key".into(),
                remote_path: "/saves".into(),
                exclude: vec!["*.log".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let defaults = Defaults {
            nitrado_api_key: "default-key".into(),
            retry_attempts: 4,
            retry_delay: 9,
            retry_backoff: true,
            ..Default::default()
        };

        let conn = to_connector_config(&server, &defaults).unwrap();
        assert_eq!(conn.port, 2222);
        assert_eq!(conn.key_file.as_deref(), Some("/k"));
        assert!(!conn.passive);
        assert_eq!(conn.api_key, "own-key");
        assert_eq!(conn.include, vec!["*".to_string()]);
        assert_eq!(conn.exclude, vec!["*.log".to_string()]);
        assert_eq!(conn.api_base, None);
        assert_eq!(
            conn.retry,
            RetryPolicy {
                attempts: 4,
                delay_secs: 9,
                backoff: true
            }
        );
    }

    #[test]
    fn test_server_overrides() {
        let defaults = Defaults {
            backup_location: "/srv".into(),
            prune_age: 30,
            ..Default::default()
        };
        let server = Server {
            name: "ark".into(),
            backup_location: "/mnt/ark".into(),
            prune_age: 7,
            ..Default::default()
        };
        assert_eq!(server.backup_location(&defaults), PathBuf::from("/mnt/ark"));
        assert_eq!(server.prune_age(&defaults), 7);
    }

    #[test]
    fn test_select_servers() {
        let config = Config {
            servers: vec![
                Server { name: "a".into(), ..Default::default() },
                Server { name: "b".into(), ..Default::default() },
            ],
            ..Default::default()
        };
        assert_eq!(config.select(None).unwrap().len(), 2);
        assert_eq!(config.select(Some("b")).unwrap()[0].name, "b");
        assert!(config
            .select(Some("zzz"))
            .unwrap_err()
            .to_string()
            .contains("not found"));
        assert!(Config::default().select(None).is_err());
    }

    #[test]
    fn test_discovery_order() {
        let dir = TempDir::new().unwrap();
        let explicit = write(dir.path(), "explicit.yml", "");
        let env = write(dir.path(), "env.yml", "");
        let local = write(dir.path(), "local.yml", "");
        let user = write(dir.path(), "user.yml", "");
        let missing = dir.path().join("missing.yml");

        assert_eq!(
            discover(Some(&explicit), Some(env.clone()), &local, Some(user.clone())).unwrap(),
            explicit
        );
        assert!(discover(Some(&missing), Some(env.clone()), &local, None).is_err());
        assert_eq!(
            discover(None, Some(env.clone()), &local, Some(user.clone())).unwrap(),
            env
        );
        assert_eq!(
            discover(None, Some(missing.clone()), &local, Some(user.clone())).unwrap(),
            local
        );
        assert_eq!(
            discover(None, None, &missing, Some(user.clone())).unwrap(),
            user
        );
        assert!(discover(None, None, &missing, None).is_err());
    }
}
