use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};

use super::directory_listing;
use super::http_status::HttpStatus;
use super::observer::{AccessRecord, ErrorRecord, RequestObserver};
use super::request_parser::{self, ParseError, Request};

static MIME_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("mjs", "text/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("csv", "text/csv"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/vnd.microsoft.icon"),
    ("webp", "image/webp"),
    ("pdf", "application/pdf"),
    ("wasm", "application/wasm"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
];

pub const NO_CACHE_HEADERS: [(&str, &str); 3] = [
    ("Cache-Control", "no-store, no-cache, must-revalidate, max-age=0"),
    ("Expires", "0"),
    ("Pragma", "no-cache"),
];

const INDEX_FILES: [&str; 2] = ["index.html", "index.htm"];

const SERVER_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

enum Body {
    Empty,
    Bytes(Vec<u8>),
    File(File, u64),
}

impl Body {
    fn len(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::File(_, len) => *len,
        }
    }
}

struct Response {
    status: HttpStatus,
    headers: Vec<(&'static str, String)>,
    body: Body,
}

impl Response {
    fn new(status: HttpStatus) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }
}

fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn content_type(file_path: &Path) -> &'static str {
    let ext = file_path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();

    MIME_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or("application/octet-stream")
}

/// Maps a decoded URL path to a path relative to the document root.
/// Empty and `.` segments are dropped and `..` pops the previous segment,
/// never climbing above the root. `None` when the path holds a NUL byte.
pub fn relative_path(decoded: &str) -> Option<PathBuf> {
    if decoded.contains('\0') {
        return None;
    }

    let mut relative = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                relative.pop();
            }
            s if s.contains(std::path::MAIN_SEPARATOR) => continue,
            s => relative.push(s),
        }
    }
    Some(relative)
}

/// Splits a request target into its path and optional query, dropping any fragment.
fn split_target(target: &str) -> (String, Option<&str>) {
    let without_fragment = target.split('#').next().unwrap_or("");
    let (path, query) = match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    };

    // "//host-looking" paths are collapsed so they cannot become redirects
    // to another host.
    let path = if path.starts_with("//") {
        format!("/{}", path.trim_start_matches('/'))
    } else {
        path.to_string()
    };
    (path, query)
}

/// Serves one request per connection from a document root.
pub struct RequestHandler<O> {
    document_root: PathBuf,
    no_cache: bool,
    observer: O,
}

impl<O: RequestObserver> RequestHandler<O> {
    pub fn new(document_root: &Path, no_cache: bool, observer: O) -> io::Result<Self> {
        Ok(Self {
            document_root: document_root.canonicalize()?,
            no_cache,
            observer,
        })
    }

    pub fn document_root(&self) -> &Path {
        &self.document_root
    }

    /// Reads one request from `stream`, answers it and reports it to the observer.
    pub fn handle_client(&self, stream: TcpStream, peer: SocketAddr) {
        debug!("Handling request from {}", peer);

        let mut reader = BufReader::new(&stream);
        let (request_line, head_only, response) = match request_parser::read_request(&mut reader) {
            Ok(request) => {
                debug!("{} speaks {}", peer, request.version);
                let response = self.respond(&request, peer);
                (request.request_line.clone(), request.is_head(), response)
            }
            Err(ParseError::Closed) => {
                debug!("Connection closed by client {}", peer);
                return;
            }
            Err(ParseError::Io(e)) => {
                error!("Error reading from {}: {}", peer, e);
                return;
            }
            Err(ParseError::Rejected {
                status,
                message,
                request_line,
            }) => (request_line, false, self.error_response(peer, status, &message)),
        };

        let status = response.status;
        let size = match self.send(&stream, response, head_only) {
            Ok(size) => size,
            Err(e) => {
                error!("Error sending response to {}: {}", peer, e);
                None
            }
        };

        self.observer.on_access_log(&AccessRecord {
            client: peer,
            timestamp: Utc::now(),
            request_line,
            status: status.code(),
            size,
        });
    }

    fn error_response(&self, peer: SocketAddr, status: HttpStatus, message: &str) -> Response {
        self.observer.on_error_log(&ErrorRecord {
            client: peer,
            status: status.code(),
            message: message.to_string(),
        });

        let body = format!(
            "<!DOCTYPE HTML>
<html lang=\"en\">
<head>
    <meta charset=\"utf-8\">
    <title>Error response</title>
</head>
<body>
    <h1>Error response</h1>
    <p>Error code: {}</p>
    <p>Message: {}.</p>
    <p>Error code explanation: {} - {}.</p>
</body>
</html>
",
            status.code(),
            directory_listing::escape_html(message),
            status.code(),
            status.explanation()
        );

        let response = Response::new(status);
        if status.allows_body() {
            response
                .header("Content-Type", "text/html;charset=utf-8")
                .body(Body::Bytes(body.into_bytes()))
        } else {
            response
        }
    }

    fn respond(&self, request: &Request, peer: SocketAddr) -> Response {
        if request.method != "GET" && request.method != "HEAD" {
            warn!("Unsupported method from {}: {}", peer, request.method);
            let message = format!("Unsupported method ('{}')", request.method);
            return self.error_response(peer, HttpStatus::NotImplemented, &message);
        }

        let (path, query) = split_target(&request.target);
        let decoded = match urlencoding::decode(&path) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => return self.error_response(peer, HttpStatus::BadRequest, "Bad request path"),
        };

        let relative = match relative_path(&decoded) {
            Some(relative) => relative,
            None => return self.error_response(peer, HttpStatus::BadRequest, "Bad request path"),
        };

        let file_path = self.document_root.join(relative);
        let resolved = match file_path.canonicalize() {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("File not found for {}: {:?} ({})", peer, file_path, e);
                return self.error_response(peer, HttpStatus::NotFound, "File not found");
            }
        };

        if !resolved.starts_with(&self.document_root) {
            warn!("Symlink escape attempt from {}: {:?} -> {:?}", peer, file_path, resolved);
            return self.error_response(peer, HttpStatus::Forbidden, "Path outside document root");
        }

        if resolved.is_dir() {
            return self.respond_directory(request, peer, &resolved, &path, query, &decoded);
        }

        if path.ends_with('/') {
            return self.error_response(peer, HttpStatus::NotFound, "File not found");
        }

        self.respond_file(request, peer, &resolved)
    }

    fn respond_directory(
        &self,
        request: &Request,
        peer: SocketAddr,
        dir: &Path,
        path: &str,
        query: Option<&str>,
        decoded: &str,
    ) -> Response {
        if !path.ends_with('/') {
            let location = match query {
                Some(query) => format!("{}/?{}", path, query),
                None => format!("{}/", path),
            };
            return Response::new(HttpStatus::MovedPermanently)
                .header("Location", location)
                .header("Content-Length", "0");
        }

        for index in INDEX_FILES {
            let index_path = dir.join(index);
            if index_path.is_file() {
                return self.respond_file(request, peer, &index_path);
            }
        }

        match directory_listing::render(dir, decoded) {
            Ok(html) => Response::new(HttpStatus::Ok)
                .header("Content-Type", "text/html; charset=utf-8")
                .body(Body::Bytes(html.into_bytes())),
            Err(e) => {
                debug!("Cannot list {:?} for {}: {}", dir, peer, e);
                self.error_response(peer, HttpStatus::NotFound, "No permission to list directory")
            }
        }
    }

    fn respond_file(&self, request: &Request, peer: SocketAddr, file_path: &Path) -> Response {
        let file = match File::open(file_path) {
            Ok(file) => file,
            Err(e) => {
                debug!("Cannot open {:?} for {}: {}", file_path, peer, e);
                return self.error_response(peer, HttpStatus::NotFound, "File not found");
            }
        };

        let metadata = match file.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                error!("Error getting metadata for {:?}: {}", file_path, e);
                return self.error_response(peer, HttpStatus::InternalServerError, "Cannot stat file");
            }
        };

        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        if let (Some(modified), None) = (modified, request.header("If-None-Match")) {
            if let Some(since) = request
                .header("If-Modified-Since")
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            {
                if modified.timestamp() <= since.timestamp() {
                    debug!("{:?} not modified for {}", file_path, peer);
                    return Response::new(HttpStatus::NotModified);
                }
            }
        }

        let mut response = Response::new(HttpStatus::Ok)
            .header("Content-Type", content_type(file_path))
            .header("Content-Length", metadata.len().to_string());
        if let Some(modified) = modified {
            response = response.header("Last-Modified", http_date(modified));
        }
        response.body(Body::File(file, metadata.len()))
    }

    /// Writes the response. Returns the number of body bytes sent, `None`
    /// when the response carries no body.
    fn send(&self, stream: &TcpStream, response: Response, head_only: bool) -> io::Result<Option<u64>> {
        let mut head = response.status.as_response_line();

        if self.no_cache {
            for (name, value) in NO_CACHE_HEADERS {
                head.push_str(&format!("{}: {}\r\n", name, value));
            }
        }

        head.push_str(&format!("Server: {}\r\n", SERVER_NAME));
        head.push_str(&format!("Date: {}\r\n", http_date(Utc::now())));
        let has_length = response.headers.iter().any(|(name, _)| *name == "Content-Length");
        for (name, value) in &response.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        if !has_length && response.status.allows_body() {
            head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut writer = BufWriter::new(stream);
        writer.write_all(head.as_bytes())?;

        let sent = if head_only {
            None
        } else {
            match response.body {
                Body::Empty => None,
                Body::Bytes(bytes) => {
                    writer.write_all(&bytes)?;
                    Some(bytes.len() as u64)
                }
                Body::File(file, len) => Some(io::copy(&mut file.take(len), &mut writer)?),
            }
        };

        writer.flush()?;
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type(Path::new("a/index.HTML")), "text/html");
        assert_eq!(content_type(Path::new("style.css")), "text/css");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
        assert_eq!(content_type(Path::new("x.unknown")), "application/octet-stream");
    }

    #[test]
    fn relative_path_drops_empty_and_dot_segments() {
        assert_eq!(relative_path("/a//b/./c.txt"), Some(PathBuf::from("a/b/c.txt")));
        assert_eq!(relative_path("/"), Some(PathBuf::new()));
    }

    #[test]
    fn relative_path_resolves_parent_segments_inside_root() {
        assert_eq!(relative_path("/docs/../hello.txt"), Some(PathBuf::from("hello.txt")));
        assert_eq!(relative_path("/a/b/../../c"), Some(PathBuf::from("c")));
        assert_eq!(relative_path("/../etc/passwd"), Some(PathBuf::from("etc/passwd")));
        assert_eq!(relative_path("/a/../../../b"), Some(PathBuf::from("b")));
        assert_eq!(relative_path("/a..b/c"), Some(PathBuf::from("a..b/c")));
        assert_eq!(relative_path("/a\0b"), None);
    }

    #[test]
    fn target_splitting() {
        assert_eq!(split_target("/a/b?x=1#frag"), ("/a/b".to_string(), Some("x=1")));
        assert_eq!(split_target("/a#f?x"), ("/a".to_string(), None));
        assert_eq!(split_target("//evil.example/x"), ("/evil.example/x".to_string(), None));
    }

    #[test]
    fn http_dates_are_gmt() {
        let time = DateTime::parse_from_rfc3339("2024-05-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(http_date(time), "Wed, 01 May 2024 12:30:00 GMT");
    }
}
