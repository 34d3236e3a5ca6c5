//! Configuration loading (§3 "Configuration", §6 "Config file").
//!
//! A single `[pgqd]` INI section is the entire configuration surface. Parsed
//! with the `ini` crate rather than `config`/`figment`: there is exactly one
//! section, no environment-variable layering, and no need for serde — a flat
//! struct with typed accessors is the idiomatic fit here, the way the
//! teacher's own config layer sticks to the tool that matches its surface
//! rather than reaching for the heaviest option by default.

mod error;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use error::ConfigError;

const SECTION: &str = "pgqd";

/// §3 "Configuration". Every field corresponds to one recognized INI key;
/// defaults match the values §3 lists.
#[derive(Debug, Clone)]
pub struct Config {
    pub pidfile: PathBuf,
    pub base_connstr: String,
    pub initial_database: String,
    pub database_list: Vec<String>,
    pub check_period: Duration,
    pub maint_period: Duration,
    pub retry_period: Duration,
    pub ticker_period: Duration,
    pub stats_period: Duration,
    pub connection_lifetime: Duration,
    pub syslog: bool,
    pub syslog_ident: Option<String>,
    pub logfile: Option<String>,
}

impl Config {
    /// Loads and validates a config file. A parse or I/O failure here is
    /// always fatal to the caller (§7 item 4, "initial load ... is fatal") —
    /// this function does not itself decide fatality, it just never returns
    /// a half-initialized `Config`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = ini::Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(io) => ConfigError::Read {
                path: path.to_path_buf(),
                source: io,
            },
            other => ConfigError::Parse {
                path: path.to_path_buf(),
                source: other,
            },
        })?;

        let section = ini
            .section(Some(SECTION))
            .ok_or_else(|| ConfigError::MissingSection {
                path: path.to_path_buf(),
            })?;

        let get = |key: &'static str| section.get(key).map(str::to_string);

        let pidfile = get("pidfile").ok_or(ConfigError::MissingKey("pidfile"))?;
        let base_connstr = get("base_connstr").unwrap_or_default();
        let initial_database = get("initial_database").unwrap_or_else(|| "template1".to_string());
        let database_list = parse_list(get("database_list").as_deref().unwrap_or(""));

        let check_period = parse_secs(section, "check_period", 60)?;
        let maint_period = parse_secs(section, "maint_period", 120)?;
        let retry_period = parse_secs(section, "retry_period", 30)?;
        let ticker_period = parse_secs(section, "ticker_period", 1)?;
        let stats_period = parse_secs(section, "stats_period", 30)?;
        let connection_lifetime = parse_secs(section, "connection_lifetime", 3600)?;

        let syslog = match get("syslog").as_deref() {
            None => false,
            Some(v) => parse_bool(v).ok_or_else(|| ConfigError::InvalidValue {
                key: "syslog",
                value: v.to_string(),
                expected: "a boolean (0/1/true/false/yes/no)",
            })?,
        };
        let syslog_ident = get("syslog_ident");
        let logfile = get("logfile");

        Ok(Config {
            pidfile: PathBuf::from(pidfile),
            base_connstr,
            initial_database,
            database_list,
            check_period,
            maint_period,
            retry_period,
            ticker_period,
            stats_period,
            connection_lifetime,
            syslog,
            syslog_ident,
            logfile,
        })
    }

    /// `"<base_connstr> dbname=<name> "` (§6, trailing space intentional —
    /// libpq connection strings tolerate a dangling space and this keeps
    /// `make_connstr` a single allocation-free format call).
    pub fn make_connstr(&self, dbname: &str) -> String {
        format!("{} dbname={dbname} ", self.base_connstr)
    }

    /// The `--ini` switch (§6): a commented sample config with every
    /// recognized key and its default, so an operator can redirect it
    /// straight into a starter file.
    pub fn sample() -> String {
        format!(
            "[{SECTION}]\n\
             ; path written on start, used by -s/-k/-r\n\
             pidfile = /var/run/pgqd.pid\n\
             ; prefix combined with dbname=<name> for every connection\n\
             base_connstr = host=127.0.0.1 user=postgres\n\
             ; fallback database used for auto-discovery\n\
             initial_database = template1\n\
             ; explicit comma/space-separated list; leave empty to auto-discover\n\
             database_list =\n\
             check_period = 60\n\
             maint_period = 120\n\
             retry_period = 30\n\
             ticker_period = 1\n\
             stats_period = 30\n\
             connection_lifetime = 3600\n\
             syslog = 0\n\
             ; syslog_ident =\n\
             ; logfile =\n"
        )
    }
}

fn parse_secs(section: &ini::Properties, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match section.get(key) {
        None => Ok(Duration::from_secs(default)),
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue {
                key,
                value: v.to_string(),
                expected: "a non-negative integer number of seconds",
            }),
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
