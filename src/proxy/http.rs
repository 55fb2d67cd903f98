//! HTTP proxy inbound: `CONNECT` tunnels and absolute-form requests.

use super::{invalid_data, Reply, Request, Target};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

pub(crate) const TUNNEL_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";
pub(crate) const BAD_GATEWAY: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

const MAX_HEAD_BYTES: usize = 16 * 1024;

pub(crate) async fn read_request<S>(stream: &mut S) -> io::Result<Request>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(invalid_data("request head too large"));
        }
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before request head",
            ));
        }
        buf.extend_from_slice(&chunk[..read]);
    };
    let body = buf.split_off(head_end);
    let head = std::str::from_utf8(&buf).map_err(|_| invalid_data("request head is not UTF-8"))?;
    parse_head(head, body)
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn parse_head(head: &str, body: Vec<u8>) -> io::Result<Request> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(uri), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid_data(format!("malformed request line: {request_line}")));
    };

    if method.eq_ignore_ascii_case("CONNECT") {
        let target = Target::parse(uri, 443)
            .ok_or_else(|| invalid_data(format!("invalid CONNECT target: {uri}")))?;
        return Ok(Request {
            target,
            reply: Reply::HttpTunnel,
            preface: body,
        });
    }

    let rest = uri
        .strip_prefix("http://")
        .ok_or_else(|| invalid_data(format!("unsupported request target: {uri}")))?;
    let (authority, path) = match rest.find(['/', '?']) {
        Some(index) => rest.split_at(index),
        None => (rest, "/"),
    };
    let target = Target::parse(authority, 80)
        .ok_or_else(|| invalid_data(format!("invalid request authority: {authority}")))?;

    // Rewrite to origin-form and drop hop-by-hop proxy headers.
    let path = if path.starts_with('?') {
        format!("/{path}")
    } else {
        path.to_string()
    };
    let mut preface = format!("{method} {path} {version}\r\n").into_bytes();
    for line in lines.filter(|line| !line.is_empty()) {
        if line.len() >= 6 && line.as_bytes()[..6].eq_ignore_ascii_case(b"proxy-") {
            continue;
        }
        preface.extend_from_slice(line.as_bytes());
        preface.extend_from_slice(b"\r\n");
    }
    preface.extend_from_slice(b"\r\n");
    preface.extend_from_slice(&body);

    Ok(Request {
        target,
        reply: Reply::HttpForward,
        preface,
    })
}
