use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::MAX_FRAME_LEN;

pub const RPC_PATH: &str = "/rpc";
pub const HEALTH_PATH: &str = "/healthz";

/// Largest request accepted from a peer, headers included.
pub const MAX_REQUEST_BYTES: usize = MAX_FRAME_LEN + 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Ok,
    BadRequest,
    NotFound,
    PayloadTooLarge,
    InternalServerError,
}

impl HttpStatus {
    fn status_line(self) -> &'static str {
        match self {
            Self::Ok => "HTTP/1.1 200 OK",
            Self::BadRequest => "HTTP/1.1 400 Bad Request",
            Self::NotFound => "HTTP/1.1 404 Not Found",
            Self::PayloadTooLarge => "HTTP/1.1 413 Payload Too Large",
            Self::InternalServerError => "HTTP/1.1 500 Internal Server Error",
        }
    }
}

/// Why a request could not be read or parsed.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error("request body is shorter than its content-length")]
    Incomplete,
    #[error("request too large")]
    TooLarge,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl HttpError {
    /// Status a server answers with. Transport failures get no answer at all.
    pub fn status(&self) -> HttpStatus {
        match self {
            Self::TooLarge => HttpStatus::PayloadTooLarge,
            Self::Malformed(_) | Self::Incomplete | Self::Io(_) => HttpStatus::BadRequest,
        }
    }
}

/// Request line plus the one header the server acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub content_length: Option<usize>,
}

/// One parsed request; `body` borrows from the raw buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct HttpRequest<'a> {
    pub method: String,
    pub path: String,
    pub body: &'a [u8],
}

/// Length of the head including its blank-line terminator, once it has fully arrived.
pub fn head_len(buffer: &[u8]) -> Option<usize> {
    buffer
        .iter()
        .enumerate()
        .skip(3)
        .find_map(|(at, &byte)| {
            (byte == b'\n' && &buffer[at - 3..at] == b"\r\n\r").then_some(at + 1)
        })
}

/// Parses a request head. A `Content-Length` above the frame limit is
/// rejected here, before any body is buffered.
pub fn parse_head(head: &[u8]) -> Result<RequestHead, HttpError> {
    let text =
        std::str::from_utf8(head).map_err(|_| HttpError::Malformed("request head is not UTF-8"))?;
    let request_line = text.split("\r\n").next().unwrap_or_default();
    let mut parts = request_line.split(' ').filter(|part| !part.is_empty());
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Err(HttpError::Malformed("invalid request line"));
    };
    let content_length = match header_value(text, "content-length") {
        Some(value) => {
            let length = value
                .parse::<usize>()
                .map_err(|_| HttpError::Malformed("invalid content-length"))?;
            if length > MAX_FRAME_LEN {
                return Err(HttpError::TooLarge);
            }
            Some(length)
        }
        None => None,
    };
    Ok(RequestHead { method: method.to_string(), path: path.to_string(), content_length })
}

pub fn parse_request(raw: &[u8]) -> Result<HttpRequest<'_>, HttpError> {
    let head_len = head_len(raw).ok_or(HttpError::Malformed("missing request head"))?;
    let head = parse_head(&raw[..head_len])?;
    let rest = &raw[head_len..];
    let body = match head.content_length {
        Some(length) => rest.get(..length).ok_or(HttpError::Incomplete)?,
        None if head.method == "POST" => {
            return Err(HttpError::Malformed("missing content-length"))
        }
        None => &[][..],
    };
    Ok(HttpRequest { method: head.method, path: head.path, body })
}

/// Reads until the head and its announced body are in, or the peer stops sending.
pub async fn read_request<S>(stream: &mut S, max_bytes: usize) -> Result<Vec<u8>, HttpError>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let mut expected_len = None;
    loop {
        if expected_len.is_some_and(|expected| buffer.len() >= expected) {
            break;
        }
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > max_bytes {
            return Err(HttpError::TooLarge);
        }
        if expected_len.is_none() {
            if let Some(head_len) = head_len(&buffer) {
                let head = parse_head(&buffer[..head_len])?;
                expected_len = Some(head_len + head.content_length.unwrap_or(0));
            }
        }
    }
    Ok(buffer)
}

fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.split("\r\n").skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

pub fn build_response(status: HttpStatus, body: &[u8], content_type: &str) -> Vec<u8> {
    let head = format!(
        "{}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status.status_line(),
        body.len()
    );
    [head.as_bytes(), body].concat()
}

pub fn build_frame_response(body: &[u8]) -> Vec<u8> {
    build_response(HttpStatus::Ok, body, "application/msgpack")
}

pub fn build_json_response(status: HttpStatus, body: &[u8]) -> Vec<u8> {
    build_response(status, body, "application/json")
}

pub fn build_error_response(status: HttpStatus, message: &str) -> Vec<u8> {
    build_response(status, message.as_bytes(), "text/plain")
}

/// Builds the `POST /rpc` request a client sends for one frame.
pub fn build_rpc_request(host: &str, frame: &[u8]) -> Vec<u8> {
    let head = format!(
        "POST {RPC_PATH} HTTP/1.1\r\nHost: {host}\r\nContent-Type: application/msgpack\r\n\
         Content-Length: {}\r\n\r\n",
        frame.len()
    );
    [head.as_bytes(), frame].concat()
}

pub fn parse_status_code(response: &[u8]) -> Option<u16> {
    let head = std::str::from_utf8(&response[..head_len(response)?]).ok()?;
    head.split(' ').nth(1)?.parse().ok()
}

/// Body of a full response, honouring `Content-Length` when present.
pub fn response_body(response: &[u8]) -> Option<&[u8]> {
    let head_len = head_len(response)?;
    let head = std::str::from_utf8(&response[..head_len]).ok()?;
    let body = &response[head_len..];
    match header_value(head, "content-length") {
        Some(value) => body.get(..value.parse::<usize>().ok()?),
        None => Some(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_post_with_body() {
        let raw = build_rpc_request("localhost", b"\x00\x00\x00\x01\xc0");
        let request = parse_request(&raw).expect("parse");
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/rpc");
        assert_eq!(request.body, b"\x00\x00\x00\x01\xc0");
    }

    #[test]
    fn get_without_content_length_has_empty_body() {
        let raw = b"GET /healthz HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let request = parse_request(raw).expect("parse");
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/healthz");
        assert!(request.body.is_empty());
    }

    #[test]
    fn post_requires_content_length_and_full_body() {
        let raw = b"POST /rpc HTTP/1.1\r\nHost: localhost\r\n\r\nabc";
        let err = parse_request(raw).expect_err("no content-length");
        assert!(matches!(err, HttpError::Malformed("missing content-length")), "{err}");

        let raw = b"POST /rpc HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        let err = parse_request(raw).expect_err("short body");
        assert!(matches!(err, HttpError::Incomplete), "{err}");

        let err = parse_request(b"garbage").expect_err("no head");
        assert_eq!(err.status(), HttpStatus::BadRequest);
    }

    #[test]
    fn content_length_header_name_is_case_insensitive() {
        let head = parse_head(b"POST /rpc HTTP/1.1\r\ncontent-LENGTH: 42\r\n\r\n").expect("head");
        assert_eq!(head.content_length, Some(42));
        let head = parse_head(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").expect("head");
        assert_eq!(head.content_length, None);
    }

    #[test]
    fn hostile_content_length_is_rejected_without_panicking() {
        let raw = b"POST /rpc HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\nabc";
        let err = parse_request(raw).expect_err("max usize");
        assert!(matches!(err, HttpError::TooLarge), "{err}");
        assert_eq!(err.status(), HttpStatus::PayloadTooLarge);

        let raw = b"POST /rpc HTTP/1.1\r\nContent-Length: 99999999999999999999999\r\n\r\n";
        let err = parse_request(raw).expect_err("beyond usize");
        assert_eq!(err.status(), HttpStatus::BadRequest);

        let raw = b"POST /rpc HTTP/1.1\r\nContent-Length: -1\r\n\r\n";
        assert!(matches!(parse_request(raw), Err(HttpError::Malformed(_))));
    }

    #[test]
    fn response_helpers_read_back_status_and_body() {
        let response = build_json_response(HttpStatus::Ok, br#"{"ok":true}"#);
        assert_eq!(parse_status_code(&response), Some(200));
        assert_eq!(response_body(&response), Some(&br#"{"ok":true}"#[..]));

        let response = build_error_response(HttpStatus::PayloadTooLarge, "too big");
        assert_eq!(parse_status_code(&response), Some(413));
        assert_eq!(response_body(&response), Some(&b"too big"[..]));
    }

    #[tokio::test]
    async fn read_request_body_is_bounded_by_content_length() {
        let mut raw = build_rpc_request("localhost", b"12345");
        raw.extend_from_slice(b"trailing");
        let mut input: &[u8] = &raw;
        let buffer = read_request(&mut input, MAX_REQUEST_BYTES).await.expect("read");
        let request = parse_request(&buffer).expect("parse");
        assert_eq!(request.body, b"12345");
    }

    #[tokio::test]
    async fn read_request_enforces_limit() {
        let raw = build_rpc_request("localhost", &[0_u8; 8192]);
        let mut input: &[u8] = &raw;
        let err = read_request(&mut input, 1024).await.expect_err("too large");
        assert!(matches!(err, HttpError::TooLarge), "{err}");
    }

    #[tokio::test]
    async fn read_request_stops_at_hostile_content_length() {
        let raw = b"POST /rpc HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\nabc";
        let mut input: &[u8] = raw;
        let err = read_request(&mut input, MAX_REQUEST_BYTES).await.expect_err("rejected");
        assert_eq!(err.status(), HttpStatus::PayloadTooLarge);
    }
}
