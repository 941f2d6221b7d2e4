use directories::ProjectDirs;
use std::{path::PathBuf, time::Duration};

fn project_dirs() -> Result<ProjectDirs, anyhow::Error> {
    ProjectDirs::from("", ORGANIZATION, APPLICATION)
        .ok_or_else(|| anyhow::anyhow!("Could not open user's home directory"))
}

pub const ORGANIZATION: &str = "alertR";

pub const APPLICATION: &str = "sentrynode";

pub const CONFIG_FILE: &str = "sentrynode.toml";

pub fn config_path() -> Result<PathBuf, anyhow::Error> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE))
}

/// Length of time the idle receive loop waits per poll before releasing exclusivity.
pub const fn idle_recv_timeout() -> Duration {
    Duration::from_millis(500)
}

/// Length of time a handshake-time receive or a client-initiated response waits before giving up.
pub const fn response_timeout() -> Duration {
    Duration::from_secs(3)
}

/// How long the session may go without a received byte before the watchdog sends a keepalive.
pub const fn ping_interval() -> Duration {
    Duration::from_secs(60)
}
