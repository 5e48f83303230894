use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::logger::{LogSink, Severity};

/// One completed request.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub client: SocketAddr,
    pub timestamp: DateTime<Utc>,
    pub request_line: String,
    pub status: u16,
    /// Body bytes sent, `None` when no body was written.
    pub size: Option<u64>,
}

/// Format of the bracketed time in an access line.
pub const ACCESS_TIME_FORMAT: &str = "%d/%b/%Y %H:%M:%S";

impl AccessRecord {
    /// The access line, with `stamp` as the already rendered time.
    pub fn line(&self, stamp: &str) -> String {
        let size = match self.size {
            Some(size) => size.to_string(),
            None => "-".to_string(),
        };
        format!(
            "{} - - [{}] \"{}\" {} {}",
            self.client.ip(),
            stamp,
            self.request_line,
            self.status,
            size
        )
    }
}

/// A request that ended in an error status.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub client: SocketAddr,
    pub status: u16,
    pub message: String,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} code {}, message {}", self.client.ip(), self.status, self.message)
    }
}

/// Side channels of request handling. Implementations must not panic or
/// block for long: they run on the serving thread.
pub trait RequestObserver {
    fn on_access_log(&self, record: &AccessRecord);
    fn on_error_log(&self, record: &ErrorRecord);
}

impl<T: RequestObserver + ?Sized> RequestObserver for Arc<T> {
    fn on_access_log(&self, record: &AccessRecord) {
        (**self).on_access_log(record);
    }

    fn on_error_log(&self, record: &ErrorRecord) {
        (**self).on_error_log(record);
    }
}

/// Writes access records at INFO and error records at ERROR.
pub struct LogObserver {
    sink: Arc<LogSink>,
}

impl LogObserver {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }
}

impl RequestObserver for LogObserver {
    fn on_access_log(&self, record: &AccessRecord) {
        let stamp = self.sink.format_time(record.timestamp, ACCESS_TIME_FORMAT);
        self.sink.write(Severity::Info, format_args!("{}", record.line(&stamp)));
    }

    fn on_error_log(&self, record: &ErrorRecord) {
        self.sink.write(Severity::Error, format_args!("{}", record));
    }
}
