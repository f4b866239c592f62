// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the container runtime's Unix socket API.
//!
//! Sends HTTP/1.1 requests over Unix domain sockets. Reads responses using
//! Content-Length framing or chunked transfer encoding (does not depend on
//! connection close for EOF). Streaming endpoints (image pull progress,
//! the events feed) surface each body line through a callback.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::adapters::RuntimeError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct DockerClient {
    socket: PathBuf,
}

pub struct Response {
    pub status: u16,
    pub body: String,
}

impl DockerClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self { socket: socket.into() }
    }

    pub async fn get(&self, path: &str) -> Result<Response, RuntimeError> {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Option<&str>) -> Result<Response, RuntimeError> {
        self.request("POST", path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response, RuntimeError> {
        self.request("DELETE", path, None).await
    }

    /// Bounded request: connect + write + read under one timeout. Prevents
    /// hangs when the daemon accepts the connection but never responds.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> Result<Response, RuntimeError> {
        tokio::time::timeout(REQUEST_TIMEOUT, self.send(method, path, body))
            .await
            .map_err(|_| RuntimeError::Request(format!("{method} {path} timed out")))?
    }

    async fn send(
        &self,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> Result<Response, RuntimeError> {
        let mut reader = self.open(method, path, body).await?;
        read_response(&mut reader).await
    }

    /// Issue the request and hand back a reader positioned at the response.
    async fn open(
        &self,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> Result<BufReader<UnixStream>, RuntimeError> {
        let request = match body {
            Some(body) => format!(
                "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            ),
            None => format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"),
        };
        let mut stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            RuntimeError::Request(format!("connect {} failed: {e}", self.socket.display()))
        })?;
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| RuntimeError::Request(format!("write failed: {e}")))?;
        Ok(BufReader::new(stream))
    }

    /// Send a request and feed every line of the (usually chunked) response
    /// body to `on_line` as it arrives. Used by endpoints that stream JSON
    /// objects. Runs until the stream ends or `on_line` returns `false`.
    pub async fn stream_lines<F>(
        &self,
        method: &str,
        path: &str,
        mut on_line: F,
    ) -> Result<u16, RuntimeError>
    where
        F: FnMut(&str) -> bool + Send,
    {
        let mut reader = self.open(method, path, None).await?;
        let head = read_head(&mut reader).await?;
        if head.status >= 400 {
            let body = read_body(&mut reader, &head).await?;
            return Err(RuntimeError::Response { status: head.status, body });
        }

        if head.chunked {
            loop {
                let Some(chunk) = read_chunk(&mut reader).await? else { break };
                for line in chunk.lines() {
                    let line = line.trim();
                    if !line.is_empty() && !on_line(line) {
                        return Ok(head.status);
                    }
                }
            }
        } else {
            let body = read_body(&mut reader, &head).await?;
            for line in body.lines() {
                let line = line.trim();
                if !line.is_empty() && !on_line(line) {
                    break;
                }
            }
        }
        Ok(head.status)
    }
}

struct Head {
    status: u16,
    content_length: usize,
    chunked: bool,
}

async fn read_head<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<Head, RuntimeError> {
    let mut status_line = String::new();
    reader
        .read_line(&mut status_line)
        .await
        .map_err(|e| RuntimeError::Request(format!("read status failed: {e}")))?;
    let status =
        status_line.split_whitespace().nth(1).and_then(|s| s.parse::<u16>().ok()).unwrap_or(0);

    let mut content_length = 0usize;
    let mut chunked = false;
    loop {
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| RuntimeError::Request(format!("read header failed: {e}")))?;
        if line == "\r\n" || line.is_empty() {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(val) = lower.strip_prefix("content-length:") {
            content_length = val.trim().parse().unwrap_or(0);
        }
        if let Some(val) = lower.strip_prefix("transfer-encoding:") {
            chunked = val.trim() == "chunked";
        }
    }
    Ok(Head { status, content_length, chunked })
}

async fn read_body<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    head: &Head,
) -> Result<String, RuntimeError> {
    if head.chunked {
        let mut body = String::new();
        while let Some(chunk) = read_chunk(reader).await? {
            body.push_str(&chunk);
        }
        return Ok(body);
    }
    if head.content_length == 0 {
        return Ok(String::new());
    }
    let mut buf = vec![0u8; head.content_length];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| RuntimeError::Request(format!("read body failed: {e}")))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read one transfer-encoding chunk; `None` at the terminating 0-chunk.
async fn read_chunk<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<Option<String>, RuntimeError> {
    let mut size_line = String::new();
    let n = reader
        .read_line(&mut size_line)
        .await
        .map_err(|e| RuntimeError::Request(format!("read chunk size failed: {e}")))?;
    if n == 0 {
        return Ok(None);
    }
    let size = usize::from_str_radix(size_line.trim(), 16)
        .map_err(|_| RuntimeError::Request(format!("bad chunk size: {size_line:?}")))?;
    if size == 0 {
        // Trailing CRLF after the last chunk
        let mut crlf = String::new();
        let _ = reader.read_line(&mut crlf).await;
        return Ok(None);
    }
    let mut buf = vec![0u8; size + 2]; // chunk + CRLF
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| RuntimeError::Request(format!("read chunk failed: {e}")))?;
    buf.truncate(size);
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

async fn read_response<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<Response, RuntimeError> {
    let head = read_head(reader).await?;
    let body = read_body(reader, &head).await?;
    if head.status >= 400 {
        return Err(RuntimeError::Response { status: head.status, body });
    }
    Ok(Response { status: head.status, body })
}

/// Percent-encode one query value (image references carry `/` and `:`).
pub fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
