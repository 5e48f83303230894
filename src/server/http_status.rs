#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Ok,
    MovedPermanently,
    NotModified,
    BadRequest,
    Forbidden,
    NotFound,
    RequestUriTooLong,
    RequestHeaderFieldsTooLarge,
    InternalServerError,
    NotImplemented,
    HttpVersionNotSupported,
}

impl HttpStatus {
    pub fn code(&self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::MovedPermanently => 301,
            Self::NotModified => 304,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::RequestUriTooLong => 414,
            Self::RequestHeaderFieldsTooLarge => 431,
            Self::InternalServerError => 500,
            Self::NotImplemented => 501,
            Self::HttpVersionNotSupported => 505,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::MovedPermanently => "Moved Permanently",
            Self::NotModified => "Not Modified",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::RequestUriTooLong => "Request-URI Too Long",
            Self::RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// Longer description used in error pages.
    pub fn explanation(&self) -> &'static str {
        match self {
            Self::Ok => "Request fulfilled, document follows",
            Self::MovedPermanently => "Object moved permanently -- see URI list",
            Self::NotModified => "Document has not changed since given time",
            Self::BadRequest => "Bad request syntax or unsupported method",
            Self::Forbidden => "Request forbidden -- authorization will not help",
            Self::NotFound => "Nothing matches the given URI",
            Self::RequestUriTooLong => "URI is too long",
            Self::RequestHeaderFieldsTooLarge => {
                "The server is unwilling to process the request because its header fields are too large"
            }
            Self::InternalServerError => "Server got itself in trouble",
            Self::NotImplemented => "Server does not support this operation",
            Self::HttpVersionNotSupported => "Cannot fulfill request",
        }
    }

    /// Whether a response with this status may carry a body.
    pub fn allows_body(&self) -> bool {
        !matches!(self, Self::NotModified) && self.code() >= 200
    }

    pub fn as_response_line(&self) -> String {
        format!("HTTP/1.1 {} {}\r\n", self.code(), self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_line_is_crlf_terminated() {
        assert_eq!(HttpStatus::NotFound.as_response_line(), "HTTP/1.1 404 Not Found\r\n");
        assert_eq!(
            HttpStatus::NotImplemented.as_response_line(),
            "HTTP/1.1 501 Not Implemented\r\n"
        );
    }

    #[test]
    fn not_modified_has_no_body() {
        assert!(!HttpStatus::NotModified.allows_body());
        assert!(HttpStatus::NotFound.allows_body());
        assert!(HttpStatus::Ok.allows_body());
    }
}
