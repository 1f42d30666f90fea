use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Kind};
use crate::session::{ParallelSet, Target};

// deployment manifest used by the CLI to describe the source tree and the
// parallel sets of target databases
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    deployment: Deployment,
    #[serde(rename = "set", default)]
    sets: Vec<SetConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Deployment {
    source: PathBuf,
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SetConfig {
    max_parallelism: Option<usize>,
    #[serde(rename = "database", default)]
    databases: Vec<DatabaseConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatabaseConfig {
    server: String,
    database: String,
    connection: Option<String>,
}

impl Config {
    /// Create a Config instance from a manifest file located on the file
    /// system.
    pub fn from_file_location<T: AsRef<Path>>(location: T) -> Result<Config, Error> {
        let file = std::fs::read_to_string(&location).map_err(|err| {
            Error::new(Kind::ConfigError(format!(
                "could not open config file, {err}"
            )))
        })?;

        let config: Config = toml::from_str(&file).map_err(|err| {
            Error::new(Kind::ConfigError(format!(
                "could not parse config file, {err}"
            )))
        })?;

        Ok(config)
    }

    /// Directory containing the `Migrations` tree.
    pub fn source(&self) -> &Path {
        &self.deployment.source
    }

    /// Directory receiving per-database deployment logs.
    pub fn log_dir(&self) -> PathBuf {
        self.deployment
            .log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("logs"))
    }

    /// The configured parallel sets with defaults applied: a missing
    /// `max_parallelism` falls back to the machine CPU count, a missing
    /// connection string is assembled from the server and database names.
    pub fn parallel_sets(&self) -> Vec<ParallelSet> {
        self.sets
            .iter()
            .map(|set| ParallelSet {
                max_parallelism: set.max_parallelism.unwrap_or_else(default_parallelism),
                targets: set
                    .databases
                    .iter()
                    .map(|db| Target {
                        server: db.server.clone(),
                        database: db.database.clone(),
                        connection: db.connection.clone().unwrap_or_else(|| {
                            format!(
                                "Server={};Database={};IntegratedSecurity=true;TrustServerCertificate=true",
                                db.server, db.database
                            )
                        }),
                    })
                    .collect(),
            })
            .collect()
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
