//! Process configuration.
//!
//! Both roles are configured from command-line flags with environment
//! variable fallbacks (`.env` is loaded first by `main`).

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::api::ApiServerConfig;
use crate::coordinator::CoordinatorConfig;
use crate::notification::DeliveryPolicy;
use crate::runner::{LogServerConfig, ReportPolicy};
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:clusterd.db?mode=rwc";
pub const DEFAULT_MEDIA_DIR: &str = "/mnt/media";

/// Logging flags shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct LogArgs {
    /// Directory for daily-rolling log files; console only when unset
    #[arg(long, env = "CLUSTERD_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Rolled log files to keep
    #[arg(long, env = "CLUSTERD_MAX_LOG_FILES", default_value_t = 7, global = true)]
    pub max_log_files: usize,
}

#[derive(Debug, Clone, Args)]
pub struct ManagerArgs {
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,

    #[arg(long, env = "CLUSTERD_BIND", default_value = "0.0.0.0")]
    pub bind_address: String,

    #[arg(short, long, env = "CLUSTERD_PORT", default_value_t = 8088)]
    pub port: u16,

    /// Base URL put into download links; defaults to `http://127.0.0.1:<port>`
    #[arg(long, env = "CLUSTERD_PUBLIC_URL")]
    pub public_url: Option<String>,

    #[arg(long, env = "CLUSTERD_MEDIA_DIR", default_value = DEFAULT_MEDIA_DIR)]
    pub media_dir: PathBuf,

    /// Notification target when neither the job nor a callback rule names one
    #[arg(long, env = "CLUSTERD_NOTIFY_URL")]
    pub notify_url: Option<String>,

    #[arg(long, env = "CLUSTERD_NOTIFY_ATTEMPTS", default_value_t = 12)]
    pub notify_attempts: u32,

    /// Seconds between notification attempts
    #[arg(long, env = "CLUSTERD_NOTIFY_DELAY", default_value_t = 60)]
    pub notify_delay_secs: u64,

    #[arg(long, env = "CLUSTERD_CORS", default_value_t = false)]
    pub enable_cors: bool,
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub database_url: String,
    pub server: ApiServerConfig,
    pub coordinator: CoordinatorConfig,
    pub delivery: DeliveryPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let server = ApiServerConfig::default();
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            coordinator: CoordinatorConfig {
                public_url: format!("http://127.0.0.1:{}", server.port),
                media_dir: PathBuf::from(DEFAULT_MEDIA_DIR),
                default_notify_url: None,
            },
            server,
            delivery: DeliveryPolicy::default(),
        }
    }
}

impl TryFrom<ManagerArgs> for ManagerConfig {
    type Error = Error;

    fn try_from(args: ManagerArgs) -> Result<Self> {
        if args.notify_attempts == 0 {
            return Err(Error::config("notify attempts must be at least 1"));
        }
        let public_url = args
            .public_url
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", args.port));

        Ok(Self {
            database_url: args.database_url,
            server: ApiServerConfig {
                bind_address: args.bind_address,
                port: args.port,
                enable_cors: args.enable_cors,
            },
            coordinator: CoordinatorConfig {
                public_url,
                media_dir: args.media_dir,
                default_notify_url: args.notify_url,
            },
            delivery: DeliveryPolicy {
                max_attempts: args.notify_attempts,
                retry_delay: Duration::from_secs(args.notify_delay_secs),
                ..DeliveryPolicy::default()
            },
        })
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunnerArgs {
    /// Coordinator base URL
    #[arg(long, env = "CLUSTERD_COORDINATOR", default_value = "http://127.0.0.1:8088")]
    pub coordinator_url: String,

    /// Runner name; defaults to the host name
    #[arg(long, env = "CLUSTERD_RUNNER_NAME")]
    pub name: Option<String>,

    #[arg(long, env = "CLUSTERD_WORK_DIR", default_value = DEFAULT_MEDIA_DIR)]
    pub work_dir: PathBuf,

    #[arg(long, env = "CLUSTERD_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg_path: PathBuf,

    /// Milliseconds between lease polls
    #[arg(long, env = "CLUSTERD_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Consecutive empty polls before an idle warning
    #[arg(long, env = "CLUSTERD_IDLE_WARN_POLLS", default_value_t = 300)]
    pub idle_warn_polls: u32,

    /// Seconds between cancellation checks of a running job
    #[arg(long, env = "CLUSTERD_WATCH_INTERVAL", default_value_t = 5)]
    pub watch_interval_secs: u64,

    /// Seconds the capture process gets to quit before it is killed
    #[arg(long, env = "CLUSTERD_STOP_GRACE", default_value_t = 10)]
    pub stop_grace_secs: u64,

    #[arg(long, env = "CLUSTERD_REPORT_ATTEMPTS", default_value_t = 3)]
    pub report_attempts: u32,

    /// Seconds between report attempts
    #[arg(long, env = "CLUSTERD_REPORT_DELAY", default_value_t = 2)]
    pub report_delay_secs: u64,

    /// Bytes of process output attached to failure reports
    #[arg(long, env = "CLUSTERD_LOG_TAIL_BYTES", default_value_t = 4096)]
    pub log_tail_bytes: u64,

    /// Address of the capture log endpoint
    #[arg(long, env = "CLUSTERD_RUNNER_BIND", default_value = "0.0.0.0")]
    pub bind_address: String,

    #[arg(short, long, env = "CLUSTERD_RUNNER_PORT", default_value_t = 8089)]
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub coordinator_url: String,
    pub name: String,
    pub work_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub poll_interval: Duration,
    pub idle_warn_polls: u32,
    pub watch_interval: Duration,
    pub stop_grace: Duration,
    pub request_timeout: Duration,
    pub report: ReportPolicy,
    pub log_tail_bytes: u64,
    pub log_server: LogServerConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://127.0.0.1:8088".to_string(),
            name: default_runner_name(),
            work_dir: PathBuf::from(DEFAULT_MEDIA_DIR),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            poll_interval: Duration::from_secs(1),
            idle_warn_polls: 300,
            watch_interval: Duration::from_secs(5),
            stop_grace: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            report: ReportPolicy::default(),
            log_tail_bytes: 4096,
            log_server: LogServerConfig::default(),
        }
    }
}

impl TryFrom<RunnerArgs> for RunnerConfig {
    type Error = Error;

    fn try_from(args: RunnerArgs) -> Result<Self> {
        if args.poll_interval_ms == 0 || args.watch_interval_secs == 0 {
            return Err(Error::config("poll and watch intervals must be positive"));
        }
        let name = match args.name {
            Some(name) if !name.trim().is_empty() => name,
            Some(_) => return Err(Error::config("runner name must not be empty")),
            None => default_runner_name(),
        };

        Ok(Self {
            coordinator_url: args.coordinator_url,
            name,
            work_dir: args.work_dir,
            ffmpeg_path: args.ffmpeg_path,
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            idle_warn_polls: args.idle_warn_polls,
            watch_interval: Duration::from_secs(args.watch_interval_secs),
            stop_grace: Duration::from_secs(args.stop_grace_secs),
            report: ReportPolicy {
                max_attempts: args.report_attempts.max(1),
                retry_delay: Duration::from_secs(args.report_delay_secs),
            },
            log_tail_bytes: args.log_tail_bytes,
            log_server: LogServerConfig {
                bind_address: args.bind_address,
                port: args.port,
                ..LogServerConfig::default()
            },
            ..Self::default()
        })
    }
}

/// Host name from `HOSTNAME` or `/etc/hostname`, else `runner-<pid>`.
pub fn default_runner_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("runner-{}", std::process::id()))
}
