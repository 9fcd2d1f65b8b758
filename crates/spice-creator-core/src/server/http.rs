//! Minimal HTTP/1.1 framing: one request per connection, `Connection: close`.

use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, SpiceError};

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Headers attached to every response
pub const CORS_HEADERS: &[(&str, &str)] = &[
    ("Access-Control-Allow-Origin", "*"),
    (
        "Access-Control-Allow-Methods",
        "GET, POST, OPTIONS, PUT, PATCH, DELETE",
    ),
    (
        "Access-Control-Allow-Headers",
        "X-Requested-With, Content-Type, Authorization",
    ),
    ("Access-Control-Max-Age", "86400"),
];

const MIME_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("js", "text/javascript"),
    ("css", "text/css"),
    ("json", "application/json"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
];

const DEFAULT_MIME: &str = "application/octet-stream";

pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    MIME_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_MIME)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Request target as sent, including any query string
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Target without the query string
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(&self.target)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
            && self.header("sec-websocket-key").is_some()
    }
}

fn bad_request(message: impl Into<String>) -> SpiceError {
    SpiceError::Server {
        message: message.into(),
    }
}

fn parse_head(head: &str) -> Result<(String, String, Vec<(String, String)>)> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(bad_request(format!("malformed request line: {:?}", request_line)));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(bad_request(format!("unsupported protocol: {}", version)));
    }

    let headers = lines
        .filter(|l| !l.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    Ok((method.to_string(), target.to_string(), headers))
}

/// Read one request. `Ok(None)` when the peer closed without sending one.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Option<Request>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(bad_request("request head too large"));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(bad_request("connection closed mid-request"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let (method, target, headers) = parse_head(&head)?;

    let mut request = Request {
        method,
        target,
        headers,
        body: buf[head_end + 4..].to_vec(),
    };

    let length = request
        .header("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if length > MAX_BODY_BYTES {
        return Err(bad_request("request body too large"));
    }
    if request.body.len() < length {
        let mut rest = vec![0u8; length - request.body.len()];
        stream.read_exact(&mut rest).await?;
        request.body.extend_from_slice(&rest);
    }
    request.body.truncate(length);

    Ok(Some(request))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status)
            .header("Content-Type", content_type)
            .body(body)
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::with_body(status, "text/plain; charset=utf-8", body.into())
    }

    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self::with_body(status, "text/html; charset=utf-8", body.into())
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize with CORS, `Content-Length` and `Connection: close`.
    ///
    /// CORS headers replace any same-named header already present.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));

        let managed = |name: &str| {
            name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("connection")
                || name.eq_ignore_ascii_case("transfer-encoding")
                || CORS_HEADERS
                    .iter()
                    .any(|(cors, _)| cors.eq_ignore_ascii_case(name))
        };

        for (name, value) in self.headers.iter().filter(|(n, _)| !managed(n)) {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        for (name, value) in CORS_HEADERS {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "",
    }
}

/// Decode `%XX` escapes; invalid sequences are kept as-is
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2]));
            if let (Some(hi), Some(lo)) = hex {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_request_with_body() {
        let raw = b"POST /api?x=1 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
        let mut stream = &raw[..];
        let request = read_request(&mut stream).await.unwrap().unwrap();

        assert_eq!(request.method, "POST");
        assert_eq!(request.target, "/api?x=1");
        assert_eq!(request.path(), "/api");
        assert_eq!(request.header("HOST"), Some("localhost"));
        assert_eq!(request.body, b"hello");
    }

    #[tokio::test]
    async fn empty_stream_is_no_request() {
        let mut stream = &b""[..];
        assert!(read_request(&mut stream).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let mut stream = &b"hello\r\n\r\n"[..];
        assert!(read_request(&mut stream).await.is_err());
    }

    #[test]
    fn detects_websocket_upgrade() {
        let request = Request {
            method: "GET".to_string(),
            target: "/hot".to_string(),
            headers: vec![
                ("Upgrade".to_string(), "websocket".to_string()),
                ("Sec-WebSocket-Key".to_string(), "abc".to_string()),
            ],
            body: Vec::new(),
        };
        assert!(request.is_websocket_upgrade());
    }

    #[test]
    fn response_carries_cors_and_overrides_conflicts() {
        let bytes = Response::text(200, "ok")
            .header("Access-Control-Allow-Origin", "https://example.org")
            .to_bytes();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(!text.contains("example.org"));
        assert!(text.contains("Access-Control-Max-Age: 86400\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nok"));
    }

    #[test]
    fn mime_types_by_extension() {
        assert_eq!(mime_type(Path::new("a/b.JS")), "text/javascript");
        assert_eq!(mime_type(Path::new("user.css")), "text/css");
        assert_eq!(mime_type(Path::new("font.woff2")), DEFAULT_MIME);
        assert_eq!(mime_type(Path::new("noext")), DEFAULT_MIME);
    }

    #[test]
    fn percent_decoding() {
        assert_eq!(percent_decode("my%20app.js"), "my app.js");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
