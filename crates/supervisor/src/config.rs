//! Configuration for the supervisor
//!
//! The best way to configure the supervisor is by using [`Config::default_config`]
//! or by turning on the "cli" feature and using [`Config::new_from_flags`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "cli")]
use structopt::StructOpt;

use crate::connection::{ConnectionDescriptor, Role};

const SYSTEM_DATA_DIR: &str = "/var/lib/rancher/k3s";
const DEFAULT_CACHE_SYNC_CONCURRENCY: usize = 5;
const DEFAULT_SCHEMA_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SCHEMA_POLL_MILLIS: u64 = 1000;

/// The configuration needed for the supervisor to run properly.
///
/// Use [`Config::default_config`] to generate a config with all of the
/// default values set.
#[derive(Clone, Debug)]
pub struct Config {
    /// The directory holding server state and generated credentials
    pub data_dir: PathBuf,
    /// Kubeconfig used by the admin (unprivileged) role
    pub admin_kubeconfig: PathBuf,
    /// Kubeconfig used by the supervisor (privileged) role
    pub supervisor_kubeconfig: PathBuf,
    /// Which role this process connects as
    pub role: Role,
    /// Skip the helm controller and the schema extensions it needs
    pub disable_helm_controller: bool,
    /// Do not register the built-in cloud provider
    pub disable_cloud_controller: bool,
    /// Optional JSON configuration handed to the cloud provider
    pub cloud_config: Option<PathBuf>,
    /// Maximum number of controller groups syncing their caches at once
    pub cache_sync_concurrency: usize,
    /// How long to wait for schema extensions to become established
    pub schema_timeout: Duration,
    /// How often to check whether schema extensions are established
    pub schema_poll_interval: Duration,
}

impl Config {
    /// Returns a Config object set with all of the defaults.
    pub fn default_config() -> anyhow::Result<Self> {
        let data_dir = default_data_dir()?;
        Ok(Self::with_data_dir(data_dir))
    }

    /// Returns the defaults for a specific data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Config {
            admin_kubeconfig: admin_kubeconfig_path(&data_dir),
            supervisor_kubeconfig: supervisor_kubeconfig_path(&data_dir),
            data_dir,
            role: Role::Supervisor,
            disable_helm_controller: false,
            disable_cloud_controller: false,
            cloud_config: None,
            cache_sync_concurrency: DEFAULT_CACHE_SYNC_CONCURRENCY,
            schema_timeout: Duration::from_secs(DEFAULT_SCHEMA_TIMEOUT_SECS),
            schema_poll_interval: Duration::from_millis(DEFAULT_SCHEMA_POLL_MILLIS),
        }
    }

    /// The connection descriptor for the configured role.
    pub fn descriptor(&self) -> ConnectionDescriptor {
        let credentials_path = match self.role {
            Role::Admin => self.admin_kubeconfig.clone(),
            Role::Supervisor => self.supervisor_kubeconfig.clone(),
        };
        ConnectionDescriptor {
            credentials_path,
            role: self.role,
        }
    }

    /// Parses all command line flags and sets the proper defaults. The version
    /// of your application should be passed to set the proper version for the CLI
    #[cfg(any(feature = "cli", feature = "docs"))]
    #[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
    pub fn new_from_flags(version: &str) -> Self {
        let app = Opts::clap().version(version);
        let opts = Opts::from_clap(&app.get_matches());
        Self::from_opts(opts)
    }

    #[cfg(any(feature = "cli", feature = "docs"))]
    fn from_opts(opts: Opts) -> Self {
        let data_dir = opts
            .data_dir
            .unwrap_or_else(|| default_data_dir().expect("unable to get default data directory"));

        let admin_kubeconfig = opts
            .admin_kubeconfig
            .unwrap_or_else(|| admin_kubeconfig_path(&data_dir));
        let supervisor_kubeconfig = opts
            .supervisor_kubeconfig
            .unwrap_or_else(|| supervisor_kubeconfig_path(&data_dir));

        Config {
            data_dir,
            admin_kubeconfig,
            supervisor_kubeconfig,
            role: opts.role,
            disable_helm_controller: opts.disable_helm_controller,
            disable_cloud_controller: opts.disable_cloud_controller,
            cloud_config: opts.cloud_config,
            cache_sync_concurrency: opts.cache_sync_concurrency.max(1),
            schema_timeout: Duration::from_secs(opts.schema_timeout),
            schema_poll_interval: Duration::from_millis(DEFAULT_SCHEMA_POLL_MILLIS),
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "supervisor" | "server" => Ok(Role::Supervisor),
            other => Err(anyhow::anyhow!(
                "unknown role '{}', expected one of: admin, supervisor",
                other
            )),
        }
    }
}

/// CLI options that can be configured for the supervisor
///
/// These can be parsed from args using `Opts::from_args()`
#[derive(StructOpt, Clone, Debug)]
#[cfg(any(feature = "cli", feature = "docs"))]
#[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
#[structopt(
    name = "k3s-supervisor",
    about = "Starts the built-in controllers of a lightweight Kubernetes control plane"
)]
pub struct Opts {
    #[structopt(
        short = "d",
        long = "data-dir",
        env = "K3S_DATA_DIR",
        help = "Folder to hold state. Defaults to /var/lib/rancher/k3s or ${HOME}/.rancher/k3s if not root"
    )]
    data_dir: Option<PathBuf>,

    #[structopt(
        long = "admin-kubeconfig",
        env = "K3S_ADMIN_KUBECONFIG",
        help = "Kubeconfig for the admin role. Defaults to $K3S_DATA_DIR/server/cred/admin.kubeconfig"
    )]
    admin_kubeconfig: Option<PathBuf>,

    #[structopt(
        long = "supervisor-kubeconfig",
        env = "K3S_SUPERVISOR_KUBECONFIG",
        help = "Kubeconfig for the supervisor role. Defaults to $K3S_DATA_DIR/server/cred/supervisor.kubeconfig"
    )]
    supervisor_kubeconfig: Option<PathBuf>,

    #[structopt(
        long = "role",
        default_value = "supervisor",
        env = "K3S_ROLE",
        help = "Role to connect as (admin or supervisor)"
    )]
    role: Role,

    #[structopt(
        long = "disable-helm-controller",
        help = "Do not run the helm controller or install its schema extensions"
    )]
    disable_helm_controller: bool,

    #[structopt(
        long = "disable-cloud-controller",
        help = "Do not register the built-in cloud provider"
    )]
    disable_cloud_controller: bool,

    #[structopt(
        long = "cloud-config",
        env = "K3S_CLOUD_CONFIG",
        help = "Path to a JSON file configuring the built-in cloud provider"
    )]
    cloud_config: Option<PathBuf>,

    #[structopt(
        long = "cache-sync-concurrency",
        default_value = "5",
        env = "K3S_CACHE_SYNC_CONCURRENCY",
        help = "Maximum number of controller groups syncing their caches at the same time"
    )]
    cache_sync_concurrency: usize,

    #[structopt(
        long = "schema-timeout",
        default_value = "60",
        env = "K3S_SCHEMA_TIMEOUT",
        help = "Seconds to wait for schema extensions to become established"
    )]
    schema_timeout: u64,
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    if is_root() {
        return Ok(PathBuf::from(SYSTEM_DATA_DIR));
    }
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Unable to get home directory"))?
        .join(".rancher")
        .join("k3s"))
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

fn admin_kubeconfig_path(data_dir: &Path) -> PathBuf {
    data_dir.join("server/cred/admin.kubeconfig")
}

fn supervisor_kubeconfig_path(data_dir: &Path) -> PathBuf {
    data_dir.join("server/cred/supervisor.kubeconfig")
}

#[cfg(test)]
mod test {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_root_detection_uses_effective_uid() {
        let root = unsafe { libc::geteuid() } == 0;
        std::env::set_var("USER", if root { "nobody" } else { "root" });
        assert_eq!(is_root(), root);
        if root {
            assert_eq!(default_data_dir().unwrap(), PathBuf::from(SYSTEM_DATA_DIR));
        }
    }

    #[test]
    fn test_descriptor_selects_path_by_role() {
        let mut config = Config::with_data_dir(PathBuf::from("/data"));
        let descriptor = config.descriptor();
        assert_eq!(descriptor.role, Role::Supervisor);
        assert_eq!(
            descriptor.credentials_path,
            PathBuf::from("/data/server/cred/supervisor.kubeconfig")
        );

        config.role = Role::Admin;
        let descriptor = config.descriptor();
        assert_eq!(descriptor.role, Role::Admin);
        assert_eq!(
            descriptor.credentials_path,
            PathBuf::from("/data/server/cred/admin.kubeconfig")
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::with_data_dir(PathBuf::from("/data"));
        assert_eq!(config.cache_sync_concurrency, 5);
        assert_eq!(config.schema_timeout, Duration::from_secs(60));
        assert!(!config.disable_helm_controller);
        assert!(config.cloud_config.is_none());
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("Supervisor".parse::<Role>().unwrap(), Role::Supervisor);
        assert_eq!("server".parse::<Role>().unwrap(), Role::Supervisor);
        assert!("agent".parse::<Role>().is_err());
    }
}
