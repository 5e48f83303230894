use log::debug;
use std::io::{self, BufRead, Read};

use super::http_status::HttpStatus;

const MAX_LINE: usize = 65536;
const MAX_HEADERS: usize = 100;

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
    pub request_line: String,
    headers: Vec<(String, String)>,
}

impl Request {
    /// Case-insensitive header lookup; the first occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }
}

#[derive(Debug)]
pub enum ParseError {
    /// The peer closed or sent nothing; no response is owed.
    Closed,
    Io(io::Error),
    /// The request is answered with an error status.
    Rejected {
        status: HttpStatus,
        message: String,
        request_line: String,
    },
}

impl From<io::Error> for ParseError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

fn reject(status: HttpStatus, message: impl Into<String>, request_line: &str) -> ParseError {
    ParseError::Rejected {
        status,
        message: message.into(),
        request_line: request_line.to_string(),
    }
}

/// Reads one line including its terminator. `Ok(None)` means the line ran
/// past `MAX_LINE` bytes.
fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    reader
        .by_ref()
        .take(MAX_LINE as u64 + 1)
        .read_until(b'\n', &mut line)?;
    if line.len() > MAX_LINE {
        return Ok(None);
    }
    Ok(Some(line))
}

fn trim_eol(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    text.trim_end_matches(['\r', '\n']).to_string()
}

fn check_version(version: &str, request_line: &str) -> Result<(), ParseError> {
    let bad_version = || {
        reject(
            HttpStatus::BadRequest,
            format!("Bad request version ('{}')", version),
            request_line,
        )
    };

    let numbers = version.strip_prefix("HTTP/").ok_or_else(bad_version)?;
    let (major, minor) = numbers.split_once('.').ok_or_else(bad_version)?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(major) || !all_digits(minor) || major.len() > 10 || minor.len() > 10 {
        return Err(bad_version());
    }

    let major: u64 = major.parse().map_err(|_| bad_version())?;
    if major >= 2 {
        return Err(reject(
            HttpStatus::HttpVersionNotSupported,
            format!("Invalid HTTP version ({})", numbers),
            request_line,
        ));
    }
    Ok(())
}

/// Reads a request head (request line and headers) from `reader`.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<Request, ParseError> {
    let raw_line = match read_line(reader)? {
        Some(line) => line,
        None => return Err(reject(HttpStatus::RequestUriTooLong, "Request-URI Too Long", "")),
    };

    let request_line = trim_eol(&raw_line);
    if request_line.is_empty() {
        return Err(ParseError::Closed);
    }

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(reject(
            HttpStatus::BadRequest,
            format!("Bad request syntax ('{}')", request_line),
            &request_line,
        ));
    }
    let (method, target, version) = (parts[0], parts[1], parts[2]);
    check_version(version, &request_line)?;

    debug!("Parsing request: {} {}", method, target);

    let mut headers = Vec::new();
    loop {
        let line = match read_line(reader)? {
            Some(line) => line,
            None => {
                return Err(reject(
                    HttpStatus::RequestHeaderFieldsTooLarge,
                    "Line too long",
                    &request_line,
                ));
            }
        };

        // EOF before the blank line ends the head as well.
        let line = trim_eol(&line);
        if line.is_empty() {
            break;
        }

        if headers.len() >= MAX_HEADERS {
            return Err(reject(
                HttpStatus::RequestHeaderFieldsTooLarge,
                "Too many headers",
                &request_line,
            ));
        }

        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(Request {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        request_line,
        headers,
    })
}
