use chrono_tz::Tz;
use clap::Parser;
use std::fmt;
use std::path::PathBuf;

use crate::logger::{LogConfig, Severity};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Serve the current directory over HTTP", long_about = None)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: Option<String>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port used when none is given on the command line
    #[arg(long)]
    pub default_port: Option<u16>,

    /// Send headers forbidding any caching of responses
    #[arg(long)]
    pub no_cache: bool,

    /// Log panics escaping the serve loop at CRITICAL before exiting
    #[arg(long)]
    pub log_crashes: bool,

    /// Log file, cleared at startup
    #[arg(long, default_value = "server_output.log")]
    pub log_file: PathBuf,

    /// Minimum severity written to the log file
    #[arg(long, value_enum, default_value_t = Severity::Info)]
    pub log_level: Severity,

    /// Keep the previous log file contents
    #[arg(long)]
    pub append: bool,

    /// IANA timezone for log timestamps (local time if unset)
    #[arg(long, value_parser = parse_timezone)]
    pub timezone: Option<Tz>,

    /// How often the accept loop checks for an interrupt, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: None,
            host: "0.0.0.0".to_string(),
            default_port: None,
            no_cache: false,
            log_crashes: false,
            log_file: PathBuf::from("server_output.log"),
            log_level: Severity::Info,
            append: false,
            timezone: None,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingPort,
    InvalidPort(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPort => write!(f, "Server need a port to start"),
            Self::InvalidPort(value) => write!(
                f,
                "Invalid port number: '{}' Please provide a valid number",
                value
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_timezone(name: &str) -> Result<Tz, String> {
    name.parse::<Tz>().map_err(|e| e.to_string())
}

impl ServerConfig {
    /// The command-line port wins over `--default-port`.
    pub fn resolve_port(&self) -> Result<u16, ConfigError> {
        match (&self.port, self.default_port) {
            (Some(raw), _) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw.clone())),
            (None, Some(port)) => Ok(port),
            (None, None) => Err(ConfigError::MissingPort),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            path: self.log_file.clone(),
            truncate: !self.append,
            threshold: self.log_level,
            timezone: self.timezone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServerConfig {
        let mut argv = vec!["static-file-server"];
        argv.extend_from_slice(args);
        ServerConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn positional_port_is_used() {
        assert_eq!(parse(&["8000"]).resolve_port(), Ok(8000));
        assert_eq!(parse(&["0"]).resolve_port(), Ok(0));
    }

    #[test]
    fn non_numeric_port_is_rejected_verbatim() {
        let err = parse(&["http"]).resolve_port().unwrap_err();
        assert_eq!(err, ConfigError::InvalidPort("http".to_string()));
        assert_eq!(
            err.to_string(),
            "Invalid port number: 'http' Please provide a valid number"
        );
    }

    #[test]
    fn out_of_range_port_is_invalid() {
        assert!(matches!(
            parse(&["70000"]).resolve_port(),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            parse(&["--", "-1"]).resolve_port(),
            Err(ConfigError::InvalidPort(_))
        ));
    }

    #[test]
    fn missing_port_without_default() {
        let err = parse(&[]).resolve_port().unwrap_err();
        assert_eq!(err.to_string(), "Server need a port to start");
    }

    #[test]
    fn default_port_covers_missing_argument() {
        let config = parse(&["--default-port", "8080", "--host", "localhost"]);
        assert_eq!(config.resolve_port(), Ok(8080));
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn defaults_match_parsed_defaults() {
        let parsed = parse(&[]);
        let default = ServerConfig::default();
        assert_eq!(parsed.host, default.host);
        assert_eq!(parsed.log_file, default.log_file);
        assert_eq!(parsed.log_level, default.log_level);
        assert_eq!(parsed.poll_interval_ms, default.poll_interval_ms);
        assert!(parsed.log_config().truncate);
    }

    #[test]
    fn timezone_and_level_parse() {
        let config = parse(&["--timezone", "Europe/Moscow", "--log-level", "warning", "1"]);
        assert_eq!(config.timezone, Some(chrono_tz::Europe::Moscow));
        assert_eq!(config.log_level, Severity::Warning);
    }
}
