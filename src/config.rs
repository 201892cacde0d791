use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/vodhot.toml";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_METADATA_DB: &str = "/var/lib/vodhot/metadata.db";
pub const DEFAULT_HOT_DB_FILE: &str = "hotness.db";
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 500;

/// Where hotness scores are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreBackend {
    /// Lost on restart.
    Memory,
    #[default]
    Sqlite,
}

/// Raw contents of the TOML file; every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub metadata_db: Option<PathBuf>,
    pub score_store: Option<ScoreBackend>,
    pub hot_db: Option<PathBuf>,
    pub store_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub metadata_db: PathBuf,
    pub score_store: ScoreBackend,
    pub hot_db: PathBuf,
    pub store_timeout: Duration,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("parsing listen host {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

pub fn read_file_config(path: &Path) -> Result<Option<FileConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let cfg = toml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))?;
    Ok(Some(cfg))
}

/// Resolves the server settings. A missing file means "all defaults"; a file
/// that exists but does not parse is an error.
pub fn load_server_config_from(path: impl AsRef<Path>) -> Result<ServerConfig> {
    let cfg = read_file_config(path.as_ref())?.unwrap_or_default();
    let metadata_db = cfg
        .metadata_db
        .unwrap_or_else(|| PathBuf::from(DEFAULT_METADATA_DB));
    let hot_db = cfg
        .hot_db
        .unwrap_or_else(|| metadata_db.with_file_name(DEFAULT_HOT_DB_FILE));
    Ok(ServerConfig {
        host: cfg.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: cfg.port.unwrap_or(DEFAULT_PORT),
        metadata_db,
        score_store: cfg.score_store.unwrap_or_default(),
        hot_db,
        store_timeout: Duration::from_millis(
            cfg.store_timeout_ms.unwrap_or(DEFAULT_STORE_TIMEOUT_MS),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn read_file_config_extracts_port() {
        let cfg = make_config("port = 4242\n");
        let parsed = read_file_config(cfg.path()).unwrap().unwrap();
        assert_eq!(parsed.port, Some(4242));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let runtime = load_server_config_from("/definitely/not/here.toml").unwrap();
        assert_eq!(runtime.port, DEFAULT_PORT);
        assert_eq!(runtime.host, DEFAULT_HOST);
        assert_eq!(runtime.score_store, ScoreBackend::Sqlite);
        assert_eq!(runtime.metadata_db, PathBuf::from(DEFAULT_METADATA_DB));
        assert_eq!(runtime.hot_db, PathBuf::from("/var/lib/vodhot/hotness.db"));
        assert_eq!(
            runtime.store_timeout,
            Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS)
        );
    }

    #[test]
    fn hot_db_follows_metadata_db() {
        let cfg = make_config("metadata_db = \"/srv/site/meta.db\"\nscore_store = \"memory\"\n");
        let runtime = load_server_config_from(cfg.path()).unwrap();
        assert_eq!(runtime.hot_db, PathBuf::from("/srv/site/hotness.db"));
        assert_eq!(runtime.score_store, ScoreBackend::Memory);
    }

    #[test]
    fn explicit_values_win() {
        let cfg = make_config(
            "host = \"0.0.0.0\"\nport = 9000\nhot_db = \"/tmp/hot.db\"\nstore_timeout_ms = 50\n",
        );
        let runtime = load_server_config_from(cfg.path()).unwrap();
        assert_eq!(runtime.bind_addr().unwrap(), "0.0.0.0:9000".parse().unwrap());
        assert_eq!(runtime.hot_db, PathBuf::from("/tmp/hot.db"));
        assert_eq!(runtime.store_timeout, Duration::from_millis(50));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let cfg = make_config("port = \"not a number\"\n");
        assert!(load_server_config_from(cfg.path()).is_err());
        let cfg = make_config("colour = \"blue\"\n");
        assert!(load_server_config_from(cfg.path()).is_err());
    }
}
