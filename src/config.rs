//! Configuration types used to bootstrap a [`RemoteInterface`](crate::remote::RemoteInterface).
//!
//! See the documentation of [`ClusterConfig`] for more details.

use std::env;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[cfg(feature = "cli")]
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::tag::Rank;

/// Environment variable set by the runner with the rank of this process. If
/// it's missing, the process runs everything on a single local rank.
pub const RANK_ENV_VAR: &str = "GEOSCHED_RANK";
/// Environment variable set by the runner with the content of the config
/// file so it's not required to ship the file to every host.
pub const CONFIG_ENV_VAR: &str = "GEOSCHED_CONFIG";
/// Environment variable set by the runner with the tag of this run, used to
/// group processes started for the same job.
pub const RUN_TAG_ENV_VAR: &str = "GEOSCHED_RUN_TAG";

/// The cluster topology a [`RemoteInterface`](crate::remote::RemoteInterface)
/// is bootstrapped against.
///
/// ## Local cluster
///
/// ```
/// # use geosched::config::ClusterConfig;
/// let config = ClusterConfig::local(4).unwrap();
/// ```
///
/// ## Remote cluster from a TOML file
///
/// ```no_run
/// # use geosched::config::ClusterConfig;
/// let config = ClusterConfig::remote("cluster.toml").expect("cannot read config file");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterConfig {
    /// Every rank is a local OS thread; no network topology is involved.
    Local(LocalConfig),
    /// Ranks are spread across remote hosts described by a TOML file.
    Remote(RemoteConfig),
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|q| q.get())
            .unwrap_or(4);
        ClusterConfig::local(parallelism as Rank).unwrap()
    }
}

/// A cluster made only of local worker threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    /// The number of ranks to bootstrap, one worker thread each.
    pub ranks: Rank,
}

/// A cluster whose ranks are spread across one or more remote hosts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// The rank of this process within the cluster.
    #[serde(skip)]
    rank: Option<Rank>,
    /// The hosts participating in this run, one entry per host.
    #[serde(rename = "host")]
    pub hosts: Vec<HostConfig>,
    /// Whether MPI-style collective transport should be requested. The
    /// actual transport is still decided by probing every worker for a
    /// bellwether environment variable; this only controls whether that
    /// probe is attempted at all.
    #[serde(default = "default_true")]
    pub mpi_requested: bool,
    /// Linear-algebra thread count applied to every worker at bootstrap.
    #[serde(default = "default_n_threads")]
    pub n_threads: usize,
}

fn default_true() -> bool {
    true
}

fn default_n_threads() -> usize {
    1
}

/// The configuration of a single remote host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConfig {
    /// The address or domain name used to reach this host.
    pub address: String,
    /// The base port used for inter-rank communication on this host.
    pub base_port: u16,
    /// How many ranks to place on this host.
    pub ranks: Rank,
    /// SSH connection details, used only when actually spawning remote
    /// worker processes.
    #[serde(default)]
    pub ssh: SshConfig,
}

/// The information used to connect to a remote host via SSH.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshConfig {
    /// The SSH port this host listens to.
    #[serde(default = "ssh_default_port")]
    pub port: u16,
    /// The username used for the connection. Defaults to the local user.
    pub username: Option<String>,
    /// The path to the private key used for authentication.
    pub key_file: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: ssh_default_port(),
            username: None,
            key_file: None,
        }
    }
}

fn ssh_default_port() -> u16 {
    22
}

/// The problem-level knobs the scheduler consults when building a System
/// Graph: chunk granularity and clear semantics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemConfig {
    /// How many compute chunks to carve per worker hosting a tag.
    #[serde(default = "default_chunks_per_worker")]
    pub chunks_per_worker: usize,
    /// Whether clears for a tag should wait on every compute job across
    /// every hosting worker (`true`) or fire right after each individual
    /// compute job on the same worker (`false`).
    #[serde(default)]
    pub ensemble_clear: bool,
}

fn default_chunks_per_worker() -> usize {
    1
}

impl Default for ProblemConfig {
    fn default() -> Self {
        Self {
            chunks_per_worker: default_chunks_per_worker(),
            ensemble_clear: false,
        }
    }
}

#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[clap(name = "geosched", about = "Distributed forward-model orchestrator")]
pub struct CommandLineOptions {
    /// Path to the cluster configuration file for a remote run.
    ///
    /// When specified the cluster is remote. Conflicts with `--local`.
    #[clap(short, long)]
    remote: Option<PathBuf>,

    /// Number of local ranks to bootstrap.
    ///
    /// When specified the cluster is local. Conflicts with `--remote`.
    #[clap(short, long)]
    local: Option<Rank>,
}

impl ClusterConfig {
    /// Build the configuration from `std::env::args()`.
    #[cfg(feature = "cli")]
    pub fn from_args() -> Result<ClusterConfig, ConfigError> {
        let opt = CommandLineOptions::parse();
        opt.validate()?;

        if let Some(ranks) = opt.local {
            Self::local(ranks)
        } else if let Some(remote) = opt.remote {
            Self::remote(remote)
        } else {
            unreachable!("validate() rejects any other combination")
        }
    }

    /// A local cluster with `ranks` worker threads.
    pub fn local(ranks: Rank) -> Result<ClusterConfig, ConfigError> {
        ConfigBuilder::new_local(ranks)
    }

    /// A remote cluster built from the given TOML configuration file.
    ///
    /// If [`CONFIG_ENV_VAR`] is set this reads from the environment
    /// instead of the file, matching how a spawned worker process that
    /// may not have the file on disk resolves its own configuration.
    pub fn remote<P: AsRef<Path>>(toml_path: P) -> Result<ClusterConfig, ConfigError> {
        let mut builder = ConfigBuilder::new_remote();

        if env::var(CONFIG_ENV_VAR).is_ok() {
            builder.parse_env()?;
            builder.rank_from_env()?;
        } else {
            builder.parse_file(toml_path)?;
        }

        builder.build()
    }

    /// The rank of this process, `Some(0)` for every local cluster.
    pub fn rank(&self) -> Option<Rank> {
        match self {
            ClusterConfig::Local(_) => Some(0),
            ClusterConfig::Remote(remote) => remote.rank,
        }
    }

    /// The total number of ranks this configuration bootstraps.
    pub fn rank_count(&self) -> Rank {
        match self {
            ClusterConfig::Local(local) => local.ranks,
            ClusterConfig::Remote(remote) => remote.hosts.iter().map(|h| h.ranks).sum(),
        }
    }
}

#[cfg(feature = "cli")]
impl CommandLineOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.is_some() == self.local.is_some() {
            return Err(ConfigError::Invalid(
                "exactly one of --remote or --local must be given".into(),
            ));
        }
        Ok(())
    }
}

impl Display for HostConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}+{}", self.address, self.base_port, self.ranks)
    }
}

/// Accumulates a [`RemoteConfig`] from one or more TOML sources before
/// resolving it into a [`ClusterConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    rank: Option<Rank>,
    hosts: Vec<HostConfig>,
    mpi_requested: bool,
    n_threads: usize,
}

impl ConfigBuilder {
    pub fn new_local(ranks: Rank) -> Result<ClusterConfig, ConfigError> {
        if ranks == 0 {
            Err(ConfigError::Invalid("rank count must be positive".into()))
        } else {
            Ok(ClusterConfig::Local(LocalConfig { ranks }))
        }
    }

    pub fn new_remote() -> Self {
        Self {
            rank: None,
            hosts: Vec::new(),
            mpi_requested: true,
            n_threads: 1,
        }
    }

    /// Parse a TOML document and merge it into the builder. Hosts are
    /// appended to the existing list.
    pub fn parse_toml_str(&mut self, config_str: &str) -> Result<&mut Self, ConfigError> {
        let RemoteConfig {
            rank: _,
            hosts,
            mpi_requested,
            n_threads,
        } = toml::from_str(config_str)?;

        self.hosts.extend(hosts);
        self.mpi_requested = mpi_requested;
        self.n_threads = n_threads;
        Ok(self)
    }

    pub fn parse_file(&mut self, toml_path: impl AsRef<Path>) -> Result<&mut Self, ConfigError> {
        let content = std::fs::read_to_string(toml_path)?;
        self.parse_toml_str(&content)
    }

    /// Read TOML from [`CONFIG_ENV_VAR`] and merge it into the builder.
    pub fn parse_env(&mut self) -> Result<&mut Self, ConfigError> {
        let config_str = env::var(CONFIG_ENV_VAR)
            .map_err(|e| ConfigError::Environment(CONFIG_ENV_VAR.to_string(), e))?;
        self.parse_toml_str(&config_str)
    }

    pub fn rank(&mut self, rank: Rank) -> &mut Self {
        self.rank = Some(rank);
        self
    }

    /// Read the rank from [`RANK_ENV_VAR`].
    pub fn rank_from_env(&mut self) -> Result<&mut Self, ConfigError> {
        let rank = env::var(RANK_ENV_VAR)
            .map_err(|e| ConfigError::Environment(RANK_ENV_VAR.to_string(), e))?;
        let rank = Rank::from_str(&rank)
            .map_err(|_| ConfigError::Invalid("rank must be an integer".into()))?;
        self.rank = Some(rank);
        Ok(self)
    }

    pub fn build(&mut self) -> Result<ClusterConfig, ConfigError> {
        let total_ranks: Rank = self.hosts.iter().map(|h| h.ranks).sum();
        if let Some(rank) = self.rank {
            if rank >= total_ranks {
                return Err(ConfigError::Invalid(format!(
                    "invalid rank {rank}, must be between 0 and {total_ranks} - 1"
                )));
            }
        }

        Ok(ClusterConfig::Remote(RemoteConfig {
            rank: self.rank,
            hosts: self.hosts.clone(),
            mpi_requested: self.mpi_requested,
            n_threads: self.n_threads,
        }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("serialization error: {0}")]
    Serialization(#[from] toml::de::Error),

    #[error("input-output error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing environment variable {0}: {1}")]
    Environment(String, env::VarError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_cluster_rejects_zero_ranks() {
        assert!(ClusterConfig::local(0).is_err());
    }

    #[test]
    fn local_cluster_rank_is_always_zero() {
        let cfg = ClusterConfig::local(4).unwrap();
        assert_eq!(cfg.rank(), Some(0));
        assert_eq!(cfg.rank_count(), 4);
    }

    #[test]
    fn remote_config_roundtrips_through_toml() {
        let toml_str = r#"
            mpi_requested = false
            n_threads = 2

            [[host]]
            address = "node1"
            base_port = 9000
            ranks = 2

            [[host]]
            address = "node2"
            base_port = 9000
            ranks = 3
        "#;

        let mut builder = ConfigBuilder::new_remote();
        builder.parse_toml_str(toml_str).unwrap();
        let cfg = builder.build().unwrap();

        assert_eq!(cfg.rank_count(), 5);
        match cfg {
            ClusterConfig::Remote(remote) => {
                assert!(!remote.mpi_requested);
                assert_eq!(remote.n_threads, 2);
                assert_eq!(remote.hosts.len(), 2);
            }
            ClusterConfig::Local(_) => panic!("expected a remote cluster"),
        }
    }

    #[test]
    fn build_rejects_rank_outside_host_total() {
        let mut builder = ConfigBuilder::new_remote();
        builder
            .parse_toml_str(
                r#"
                    [[host]]
                    address = "node1"
                    base_port = 9000
                    ranks = 1
                "#,
            )
            .unwrap();
        builder.rank(5);
        assert!(builder.build().is_err());
    }

    #[test]
    fn problem_config_defaults_match_scheduler_defaults() {
        let cfg = ProblemConfig::default();
        assert_eq!(cfg.chunks_per_worker, 1);
        assert!(!cfg.ensemble_clear);
    }
}
