use ansi_term::Colour;
use chrono_tz::Tz;
use clap::ValueEnum;
use env_logger::{Builder, Target};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Severity of a log line, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    fn level_filter(&self) -> log::LevelFilter {
        match self {
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Warning => log::LevelFilter::Warn,
            Self::Error | Self::Critical => log::LevelFilter::Error,
        }
    }
}

impl From<log::Level> for Severity {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warning,
            log::Level::Info => Self::Info,
            log::Level::Debug | log::Level::Trace => Self::Debug,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub path: PathBuf,
    pub truncate: bool,
    pub threshold: Severity,
    /// `None` stamps lines in local time.
    pub timezone: Option<Tz>,
}

/// The single log destination of the process.
///
/// Opened once at startup (truncating by default) and appended to until
/// exit. Lines look like `2024-05-01 12:00:00,123 - INFO - message`.
pub struct LogSink {
    path: PathBuf,
    threshold: Severity,
    timezone: Option<Tz>,
    file: Mutex<File>,
}

impl LogSink {
    pub fn open(config: &LogConfig) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true);
        if config.truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(&config.path)?;

        Ok(Self {
            path: config.path.clone(),
            threshold: config.threshold,
            timezone: config.timezone,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    pub fn enabled(&self, severity: Severity) -> bool {
        severity >= self.threshold
    }

    /// Renders `time` in the sink's timezone (local time when none is set).
    pub fn format_time(&self, time: chrono::DateTime<chrono::Utc>, format: &str) -> String {
        match self.timezone {
            Some(tz) => time.with_timezone(&tz).format(format).to_string(),
            None => time.with_timezone(&chrono::Local).format(format).to_string(),
        }
    }

    fn timestamp(&self) -> String {
        self.format_time(chrono::Utc::now(), "%Y-%m-%d %H:%M:%S,%3f")
    }

    pub fn format_line(&self, severity: Severity, message: fmt::Arguments<'_>) -> String {
        format!("{} - {} - {}", self.timestamp(), severity.label(), message)
    }

    /// Appends one line. Write errors are dropped: logging never fails the caller.
    pub fn write(&self, severity: Severity, message: fmt::Arguments<'_>) {
        if !self.enabled(severity) {
            return;
        }
        let line = self.format_line(severity, message);
        self.write_raw(line.as_bytes());
    }

    fn write_raw(&self, bytes: &[u8]) {
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = file.write_all(bytes);
        if !bytes.ends_with(b"\n") {
            let _ = file.write_all(b"\n");
        }
        let _ = file.flush();
    }
}

struct SinkWriter(Arc<LogSink>);

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_raw(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Routes the `log` macros into `sink`, honouring `RUST_LOG` on top of the
/// sink's threshold. Only the first call in a process takes effect.
pub fn init(sink: Arc<LogSink>) {
    let format_sink = Arc::clone(&sink);
    let _ = Builder::new()
        .filter_level(sink.threshold().level_filter())
        .parse_default_env()
        .target(Target::Pipe(Box::new(SinkWriter(Arc::clone(&sink)))))
        .format(move |buf, record| {
            let severity = Severity::from(record.level());
            writeln!(buf, "{}", format_sink.format_line(severity, *record.args()))
        })
        .try_init();
}

/// Prints a fatal message to stderr, red when stderr is a terminal.
pub fn print_fatal(message: &str) {
    if io::stderr().is_terminal() {
        eprintln!("{}", Colour::Red.paint(message));
    } else {
        eprintln!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_log(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sfs-logger-{}-{}.log", name, std::process::id()))
    }

    fn config(path: &Path, truncate: bool) -> LogConfig {
        LogConfig {
            path: path.to_path_buf(),
            truncate,
            threshold: Severity::Info,
            timezone: Some(chrono_tz::UTC),
        }
    }

    #[test]
    fn line_has_timestamp_level_and_message() {
        let path = temp_log("format");
        let sink = LogSink::open(&config(&path, true)).unwrap();
        sink.write(Severity::Error, format_args!("code {}, message {}", 404, "File not found"));

        let contents = fs::read_to_string(&path).unwrap();
        let line = contents.lines().next().unwrap();
        let parts: Vec<&str> = line.splitn(3, " - ").collect();
        assert_eq!(parts.len(), 3);
        assert!(chrono::NaiveDateTime::parse_from_str(parts[0], "%Y-%m-%d %H:%M:%S,%3f").is_ok());
        assert_eq!(parts[1], "ERROR");
        assert_eq!(parts[2], "code 404, message File not found");
        fs::remove_file(path).ok();
    }

    #[test]
    fn time_is_rendered_in_configured_zone() {
        let path = temp_log("zone");
        let sink = LogSink::open(&LogConfig {
            timezone: Some(chrono_tz::Asia::Tokyo),
            ..config(&path, true)
        })
        .unwrap();
        let noon = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(sink.format_time(noon, "%H:%M %Z"), "21:00 JST");
        fs::remove_file(path).ok();
    }

    #[test]
    fn records_below_threshold_are_dropped() {
        let path = temp_log("threshold");
        let sink = LogSink::open(&config(&path, true)).unwrap();
        sink.write(Severity::Debug, format_args!("hidden"));
        sink.write(Severity::Critical, format_args!("shown"));

        let contents = fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("hidden"));
        assert!(contents.contains(" - CRITICAL - shown"));
        fs::remove_file(path).ok();
    }

    #[test]
    fn truncate_clears_previous_run() {
        let path = temp_log("truncate");
        fs::write(&path, "stale line from an earlier run\n").unwrap();

        let sink = LogSink::open(&config(&path, true)).unwrap();
        sink.write(Severity::Info, format_args!("fresh"));
        let contents = fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("stale"));
        assert_eq!(contents.lines().count(), 1);
        fs::remove_file(path).ok();
    }

    #[test]
    fn append_keeps_previous_run() {
        let path = temp_log("append");
        fs::write(&path, "earlier\n").unwrap();

        let sink = LogSink::open(&config(&path, false)).unwrap();
        sink.write(Severity::Info, format_args!("later"));
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("earlier\n"));
        assert!(contents.contains("later"));
        fs::remove_file(path).ok();
    }

    #[test]
    fn log_levels_map_to_severities() {
        assert_eq!(Severity::from(log::Level::Warn), Severity::Warning);
        assert_eq!(Severity::from(log::Level::Trace), Severity::Debug);
        assert!(Severity::Critical > Severity::Error);
    }
}
