//! Connection and runtime configuration
//!
//! Loaded from a TOML file, then overridden by environment variables
//! (a `.env` file is honoured by the binary):
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `ELT_SOURCE_PASS` | `source.password` |
//! | `ELT_DEST_PASS` | `destination.password` |
//! | `MEILI_MASTER_KEY` | `search.api_key` |
//! | `ELT_MAX_OPEN_CONNS` | `destination.max_connections` |
//! | `ELT_MAX_PARALLELISM` | `runtime.max_parallelism` |
//! | `ELT_OPERATION_TIMEOUT` | `runtime.operation_timeout_secs` |
//!
//! Passwords are only required once a connection is built, so a config
//! without credentials is still enough to validate a pipeline. The source
//! password is only needed when the extract stage runs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::adapter::{
    meilisearch, Adapters, DetachedSource, MeiliIndex, PgDestination, PgSource, Source,
};
use crate::ast::PipelineDef;
use crate::error::{EltError, Result};
use crate::runtime::{ExecutionPolicy, RunContext, Stage};

pub const SOURCE_PASSWORD_ENV: &str = "ELT_SOURCE_PASS";
pub const DEST_PASSWORD_ENV: &str = "ELT_DEST_PASS";
pub const SEARCH_KEY_ENV: &str = "MEILI_MASTER_KEY";
pub const MAX_CONNECTIONS_ENV: &str = "ELT_MAX_OPEN_CONNS";
pub const MAX_PARALLELISM_ENV: &str = "ELT_MAX_PARALLELISM";
pub const TIMEOUT_ENV: &str = "ELT_OPERATION_TIMEOUT";

const DEFAULT_MAX_CONNECTIONS: usize = 10;
const DEFAULT_TIMEOUT_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EltConfig {
    /// Pipeline definition, relative to the config file
    pub pipeline: PathBuf,
    #[serde(default)]
    pub source: PgSettings,
    #[serde(default)]
    pub destination: PgSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

/// One PostgreSQL endpoint
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PgSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    /// Upper bound of open connections (destination only)
    pub max_connections: usize,
}

impl Default for PgSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl fmt::Debug for PgSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl PgSettings {
    /// Connection parameters; fails when no password is known
    pub fn pg_config(&self, target: &str, env_var: &str) -> Result<tokio_postgres::Config> {
        let password = self
            .password
            .as_deref()
            .ok_or_else(|| EltError::MissingPassword {
                target: target.to_string(),
                env_var: env_var.to_string(),
            })?;

        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .password(password)
            .application_name("recsis-elt")
            .connect_timeout(Duration::from_secs(30));
        Ok(config)
    }

    /// `user@host:port/dbname`
    pub fn describe(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub batch_size: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:7700".to_string(),
            api_key: None,
            batch_size: meilisearch::DEFAULT_BATCH_SIZE,
        }
    }
}

impl fmt::Debug for SearchSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchSettings")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeSettings {
    /// Defaults to `destination.max_connections`
    pub max_parallelism: Option<usize>,
    /// 0 disables the per-operation timeout
    pub operation_timeout_secs: u64,
    pub policy: ExecutionPolicy,
    /// Exit non-zero when any operation failed
    pub strict_exit: bool,
    /// Include the migrate stage in runs without `--stage`
    pub migrate: bool,
    pub trace_file: Option<PathBuf>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_parallelism: None,
            operation_timeout_secs: DEFAULT_TIMEOUT_SECS,
            policy: ExecutionPolicy::default(),
            strict_exit: false,
            migrate: false,
            trace_file: None,
        }
    }
}

impl EltConfig {
    /// Read `path`, resolve relative paths against its directory and apply
    /// environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EltError::ConfigNotFound {
                path: path.display().to_string(),
            },
            _ => EltError::Io(e),
        })?;

        let mut config = Self::from_toml(&text)?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        config.with_env()
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| EltError::Config {
            reason: e.message().to_string(),
        })
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.pipeline.is_relative() {
            self.pipeline = base.join(&self.pipeline);
        }
        if let Some(trace) = &self.runtime.trace_file {
            if trace.is_relative() {
                self.runtime.trace_file = Some(base.join(trace));
            }
        }
    }

    /// Apply environment overrides (environment wins over the file)
    pub fn with_env(mut self) -> Result<Self> {
        if let Some(pass) = env_string(SOURCE_PASSWORD_ENV) {
            self.source.password = Some(pass);
        }
        if let Some(pass) = env_string(DEST_PASSWORD_ENV) {
            self.destination.password = Some(pass);
        }
        if let Some(key) = env_string(SEARCH_KEY_ENV) {
            self.search.api_key = Some(key);
        }
        if let Some(max) = env_parse::<usize>(MAX_CONNECTIONS_ENV)? {
            self.destination.max_connections = max;
        }
        if let Some(max) = env_parse::<usize>(MAX_PARALLELISM_ENV)? {
            self.runtime.max_parallelism = Some(max);
        }
        if let Some(secs) = env_parse::<u64>(TIMEOUT_ENV)? {
            self.runtime.operation_timeout_secs = secs;
        }
        Ok(self)
    }

    /// Read and validate the pipeline definition
    pub fn pipeline_def(&self) -> Result<PipelineDef> {
        let yaml = std::fs::read_to_string(&self.pipeline).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EltError::ConfigNotFound {
                path: self.pipeline.display().to_string(),
            },
            _ => EltError::Io(e),
        })?;
        PipelineDef::from_yaml(&yaml)
    }

    pub fn max_parallelism(&self) -> usize {
        self.runtime
            .max_parallelism
            .unwrap_or(self.destination.max_connections)
            .max(1)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        match self.runtime.operation_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Stages of a run that names none explicitly
    pub fn default_stages(&self) -> Vec<Stage> {
        let mut stages = Stage::DEFAULT.to_vec();
        if self.runtime.migrate {
            stages.push(Stage::Migrate);
        }
        stages
    }

    /// Open the three adapters for a run of `stages` (lazily: no connection
    /// is made here). The source is only configured when extracting.
    pub fn adapters(&self, stages: &[Stage]) -> Result<Adapters> {
        let source: Arc<dyn Source> = if stages.contains(&Stage::Extract) {
            Arc::new(PgSource::new(
                self.source.pg_config("source", SOURCE_PASSWORD_ENV)?,
            ))
        } else {
            Arc::new(DetachedSource)
        };
        let destination = self.destination.pg_config("destination", DEST_PASSWORD_ENV)?;
        let index = MeiliIndex::new(
            &self.search.url,
            self.search.api_key.clone(),
            self.search.batch_size,
        )?;

        Ok(Adapters::new(
            source,
            Arc::new(PgDestination::new(
                destination,
                self.destination.max_connections.max(1),
            )),
            Arc::new(index),
        ))
    }

    /// Run context carrying the configured pool bound, timeout and policy
    pub fn run_context(&self, adapters: Adapters) -> RunContext {
        let parallelism = self.max_parallelism();
        if parallelism > self.destination.max_connections {
            warn!(
                max_parallelism = parallelism,
                max_connections = self.destination.max_connections,
                "parallelism exceeds the destination connection cap; operations will queue on connections"
            );
        }

        RunContext::new(adapters)
            .with_max_parallelism(parallelism)
            .with_timeout(self.operation_timeout())
            .with_policy(self.runtime.policy)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: fmt::Display,
{
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| EltError::Config {
                reason: format!("{name}='{raw}': {e}"),
            }),
    }
}
