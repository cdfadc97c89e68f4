use http;

use {Response};


/// Serialize a response into its wire format.
/// `Content-Length` is always derived from the actual body, never
/// taken from the handler's headers.
pub(crate) fn serialize(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::with_capacity(resp.body().len() + 256);
    buf.extend_from_slice(b"HTTP/1.1 ");
    buf.extend_from_slice(resp.status().as_str().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(resp.status().canonical_reason().unwrap_or("").as_bytes());
    buf.extend_from_slice(b"\r\nServer: path_echo\r\n");
    for (name, value) in resp.headers().iter() {
        if name == &http::header::CONTENT_LENGTH { continue }
        buf.extend_from_slice(name.as_str().as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(format!("Content-Length: {}\r\n\r\n", resp.body().len()).as_bytes());
    buf.extend_from_slice(resp.body());
    buf
}

/// Canned response for requests the parser refuses to touch
pub(crate) fn bad_request() -> Vec<u8> {
    b"HTTP/1.1 400 Bad Request\r\nServer: path_echo\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
        .to_vec()
}
