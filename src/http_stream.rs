use std;
use http;
use httparse;

use {RequestHead};
use errors::*;


/// Largest header section we're willing to buffer before giving up
pub(crate) const MAX_HEADERS_LENGTH: usize = 8 * 1024;

/// Largest body a request may declare via `Content-Length`
pub(crate) const MAX_BODY_LENGTH: usize = 1024 * 1024;


/// Http reader/parser for incrementally reading a request and
/// parsing its headers
pub(crate) struct HttpStreamReader {
    read_buf: Vec<u8>,
    header_lines: usize,
    headers_length: usize,
    headers_complete: bool,
    request: Option<RequestHead>,

    content_length: usize,
    body_bytes_read: usize,
    body_complete: bool,
    done: bool,
}
impl std::default::Default for HttpStreamReader {
    fn default() -> HttpStreamReader {
        HttpStreamReader {
            read_buf: Vec::new(),
            header_lines: 0, headers_length: 0, headers_complete: false, request: None,
            content_length: 0, body_bytes_read: 0, body_complete: false, done: false,
        }
    }
}
impl HttpStreamReader {
    pub fn new() -> Self {
        Self {
            read_buf: Vec::with_capacity(1024),
            ..Self::default()
        }
    }

    /// Save a new chunk of bytes
    pub fn receive_chunk(&mut self, chunk: &[u8]) -> usize {
        self.read_buf.extend_from_slice(chunk);
        self.read_buf.len()
    }

    /// The request's body, valid once a request has been returned
    pub fn body(&self) -> &[u8] {
        &self.read_buf[self.headers_length..self.headers_length + self.content_length]
    }

    /// Bytes received past the end of the returned request, the start
    /// of the next pipelined request on this connection
    pub fn leftover(&self) -> &[u8] {
        &self.read_buf[self.headers_length + self.content_length..]
    }

    /// Try parsing the current bytes into a request head.
    /// Returns `Ok(None)` until a complete request (headers plus any
    /// `Content-Length` body) has been received, then `Ok(Some)` once.
    /// TODO: Checking if headers are completely received
    ///       could be improved to avoid scanning the whole
    ///       thing everytime.
    pub fn try_build_request(&mut self) -> Result<Option<RequestHead>> {
        if self.done { return Ok(None) }
        if !self.headers_complete {
            // check if we've got enough data to successfully parse the request
            const R: u8 = b'\r';
            const N: u8 = b'\n';
            let mut header_lines = 0;
            let mut headers_length = 3;
            let mut headers_complete = false;
            for window in self.read_buf.windows(4) {
                headers_length += 1;
                if window[..2] == [R, N] {
                    header_lines += 1;
                }
                if window == [R, N, R, N] {
                    headers_complete = true;
                    break;
                }
            }
            self.header_lines = header_lines;
            self.headers_length = headers_length;
            self.headers_complete = headers_complete;

            if !self.headers_complete && self.read_buf.len() > MAX_HEADERS_LENGTH {
                bail!(ErrorKind::RequestHeadersTooLarge(
                        format!("no end of headers within {} bytes", MAX_HEADERS_LENGTH)));
            }
        }
        // if we don't have a complete headers section, continue waiting
        if !self.headers_complete { return Ok(None) }

        // if we haven't parsed our request yet, parse the header content into a request and save it
        if self.request.is_none() {
            let mut headers = vec![httparse::EMPTY_HEADER; self.header_lines];
            let mut req = httparse::Request::new(&mut headers);
            let header_bytes = &self.read_buf[..self.headers_length];
            let status = match req.parse(header_bytes) {
                Ok(status) => status,
                Err(e) => {
                    bail!(ErrorKind::MalformedHttpRequest(
                            format!("{:?}: {:?}", e, std::str::from_utf8(header_bytes))));
                }
            };
            if status.is_partial() {
                bail!(ErrorKind::IncompleteHttpRequest(
                        "parser found partial request after end of headers".to_string()));
            }
            debug_assert!(self.headers_length == status.unwrap());

            // HTTP parsing success. Build an `http::Request` head
            let mut request = http::Request::builder();
            request.method(req.method.unwrap());
            request.uri(req.path.unwrap());
            // TODO: http::Request expects consts and not strs. Defaults to HTTP/1.1 for now
            // request.version(req.version.unwrap());
            for header in req.headers {
                request.header(header.name, header.value);
            }
            // use an empty body as a placeholder while we continue to read the request body
            let request = request.body(())?;

            self.content_length = request.headers()
                .get(http::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            if self.content_length > MAX_BODY_LENGTH {
                bail!(ErrorKind::RequestBodyTooLarge(
                        format!("content-length {} over limit {}", self.content_length, MAX_BODY_LENGTH)));
            }
            self.request = Some(request);
        }

        if !self.body_complete {
            // bytes past the stated content-length are not ours,
            // they belong to the next pipelined request
            self.body_bytes_read = self.read_buf.len() - self.headers_length;
            self.body_complete = self.body_bytes_read >= self.content_length;
        }
        if !self.body_complete { return Ok(None) }
        self.done = true;
        Ok(self.request.take())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_request_from_chunked_headers() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk(b"GET /foo/bar?x=1 HTTP/1.1\r\nHo");
        assert!(reader.try_build_request().unwrap().is_none());
        reader.receive_chunk(b"st: localhost\r\n\r\n");
        let req = reader.try_build_request().unwrap().expect("complete request");
        assert_eq!(req.method(), &http::Method::GET);
        assert_eq!(req.uri().to_string(), "/foo/bar?x=1");
        assert_eq!(req.headers().get("host").unwrap().to_str().unwrap(), "localhost");
        assert!(reader.body().is_empty());
    }

    #[test]
    fn waits_for_declared_body() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk(b"POST /submit HTTP/1.1\r\ncontent-length: 4\r\n\r\nab");
        assert!(reader.try_build_request().unwrap().is_none());
        reader.receive_chunk(b"cd");
        let req = reader.try_build_request().unwrap().expect("complete request");
        assert_eq!(req.method(), &http::Method::POST);
        assert_eq!(reader.body(), b"abcd");
    }

    #[test]
    fn request_is_returned_only_once() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk(b"GET / HTTP/1.1\r\n\r\n");
        assert!(reader.try_build_request().unwrap().is_some());
        assert!(reader.try_build_request().unwrap().is_none());
    }

    #[test]
    fn rejects_garbage_request_line() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk(b"garbage\r\n\r\n");
        match reader.try_build_request() {
            Err(Error(ErrorKind::MalformedHttpRequest(_), _)) => (),
            other => panic!("expected MalformedHttpRequest, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_oversized_header_section() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk(b"GET / HTTP/1.1\r\n");
        let filler = vec![b'a'; MAX_HEADERS_LENGTH + 1];
        reader.receive_chunk(&filler);
        match reader.try_build_request() {
            Err(Error(ErrorKind::RequestHeadersTooLarge(_), _)) => (),
            other => panic!("expected RequestHeadersTooLarge, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn bytes_past_content_length_are_kept_for_the_next_request() {
        let mut reader = HttpStreamReader::new();
        reader.receive_chunk(b"POST / HTTP/1.1\r\ncontent-length: 2\r\n\r\nabGET /next HTTP/1.1\r\n\r\n");
        let req = reader.try_build_request().unwrap().expect("complete request");
        assert_eq!(req.method(), &http::Method::POST);
        assert_eq!(reader.body(), b"ab");
        assert_eq!(reader.leftover(), &b"GET /next HTTP/1.1\r\n\r\n"[..]);
    }

    #[test]
    fn rejects_excessive_declared_content_length() {
        let mut reader = HttpStreamReader::new();
        let raw = format!("POST / HTTP/1.1\r\ncontent-length: {}\r\n\r\n", MAX_BODY_LENGTH + 1);
        reader.receive_chunk(raw.as_bytes());
        match reader.try_build_request() {
            Err(Error(ErrorKind::RequestBodyTooLarge(_), _)) => (),
            other => panic!("expected RequestBodyTooLarge, got {:?}", other.map(|_| ())),
        }
    }
}
