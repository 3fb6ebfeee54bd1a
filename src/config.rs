//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;
use std::path::PathBuf;

use crate::build;
use crate::policy::PolicyRules;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_PORT: u16 = 8080;
pub const UPLOADS_SUBDIR: &str = "accio";
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;
pub const MAX_NAME_ATTEMPTS: u32 = 10_000;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 0;
pub const DEFAULT_LOGIN_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOGIN_WINDOW_SECS: u64 = 5 * 60;
pub const DEFAULT_LOGIN_LOCKOUT_SECS: u64 = 10 * 60;
pub const ATTEMPT_PRUNE_INTERVAL_SECS: u64 = 300;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "accio", version = VERSION_INFO, about = "Share a directory over HTTP")]
pub struct Args {
    #[arg(
        env = "ACCIO_PATH",
        default_value = ".",
        help = "Directory to expose"
    )]
    pub path: PathBuf,
    #[arg(
        short = 'u',
        long,
        env = "ACCIO_UPLOADS_DIR",
        help = "Directory receiving uploads [default: <downloads>/accio]"
    )]
    pub uploads_dir: Option<PathBuf>,
    #[arg(
        short = 'b',
        long = "bind",
        env = "ACCIO_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "ACCIO_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "ACCIO_PASSWORD",
        hide_env_values = true,
        help = "Require this password (HTTP Basic auth, any user name)"
    )]
    pub password: Option<String>,
    #[arg(long, env = "ACCIO_DISABLE_UPLOADS", help = "Reject POST /upload")]
    pub disable_uploads: bool,
    #[arg(
        long,
        env = "ACCIO_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload request size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long = "allow-ext",
        env = "ACCIO_ALLOW_EXT",
        value_delimiter = ',',
        help = "Only show files with these extensions"
    )]
    pub allow_ext: Vec<String>,
    #[arg(
        long = "deny-ext",
        env = "ACCIO_DENY_EXT",
        value_delimiter = ',',
        help = "Hide files with these extensions"
    )]
    pub deny_ext: Vec<String>,
    #[arg(
        long = "allow-file",
        env = "ACCIO_ALLOW_FILE",
        value_delimiter = ',',
        help = "Only show these files (paths relative to the shared directory or absolute)"
    )]
    pub allow_file: Vec<String>,
    #[arg(
        long = "deny-file",
        env = "ACCIO_DENY_FILE",
        value_delimiter = ',',
        help = "Hide these files"
    )]
    pub deny_file: Vec<String>,
    #[arg(
        long = "allow-dir",
        env = "ACCIO_ALLOW_DIR",
        value_delimiter = ',',
        help = "Only show these directory trees"
    )]
    pub allow_dir: Vec<String>,
    #[arg(
        long = "deny-dir",
        env = "ACCIO_DENY_DIR",
        value_delimiter = ',',
        help = "Hide these directory trees"
    )]
    pub deny_dir: Vec<String>,
    #[arg(
        long,
        env = "ACCIO_TRUST_PROXY",
        help = "Identify clients by X-Forwarded-For"
    )]
    pub trust_proxy: bool,
    #[arg(
        long,
        env = "ACCIO_LOGIN_MAX_ATTEMPTS",
        default_value_t = DEFAULT_LOGIN_MAX_ATTEMPTS,
        help = "Max password failures before lockout (0 to disable)"
    )]
    pub login_max_attempts: u32,
    #[arg(
        long,
        env = "ACCIO_LOGIN_WINDOW_SECS",
        default_value_t = DEFAULT_LOGIN_WINDOW_SECS,
        help = "Password failure window in seconds"
    )]
    pub login_window_secs: u64,
    #[arg(
        long,
        env = "ACCIO_LOGIN_LOCKOUT_SECS",
        default_value_t = DEFAULT_LOGIN_LOCKOUT_SECS,
        help = "Lockout time after max failures"
    )]
    pub login_lockout_secs: u64,
}

impl Args {
    pub fn policy_rules(&self) -> PolicyRules {
        PolicyRules {
            allowed_extensions: self.allow_ext.clone(),
            denied_extensions: self.deny_ext.clone(),
            allowed_files: self.allow_file.clone(),
            denied_files: self.deny_file.clone(),
            allowed_dirs: self.allow_dir.clone(),
            denied_dirs: self.deny_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn lists_split_on_commas() {
        let args = Args::try_parse_from([
            "accio",
            "/srv/share",
            "--deny-ext",
            "log,tmp",
            "--deny-ext",
            "bak",
            "--allow-dir",
            "public",
            "-p",
            "9000",
        ])
        .expect("parse");
        assert_eq!(args.path, PathBuf::from("/srv/share"));
        assert_eq!(args.port, 9000);
        let rules = args.policy_rules();
        assert_eq!(rules.denied_extensions, vec!["log", "tmp", "bak"]);
        assert_eq!(rules.allowed_dirs, vec!["public"]);
        assert!(rules.allowed_files.is_empty());
    }
}
