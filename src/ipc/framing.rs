//! Message framing for JSON payloads over Unix sockets.
//!
//! A stream socket does not preserve write boundaries: one payload may show
//! up split across several reads, or several payloads in one read. Every
//! payload is therefore framed.
//!
//! # Wire Format
//!
//! [`Framing::ContentLength`] (default) uses HTTP-style headers, the same
//! protocol used by the Language Server Protocol (LSP):
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! The header parsing is case-insensitive and handles both CRLF and LF line
//! endings.
//!
//! [`Framing::Newline`] sends one compact JSON document per `\n`-terminated
//! line, for servers that read line by line.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::RpcError;

/// Maximum message size (100MB) to prevent OOM from malicious/buggy servers.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Longest header line accepted, terminator included.
const MAX_HEADER_LINE: usize = 8 * 1024;

/// How payloads are delimited on the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// `Content-Length` header block followed by the body.
    #[default]
    ContentLength,
    /// One payload per line.
    Newline,
}

/// Read one framed message from the stream.
///
/// # Errors
///
/// - [`RpcError::ConnectionClosed`] if the stream ends before a full message
/// - [`RpcError::Framing`] if the header is missing or invalid, or the body
///   exceeds `max_size`
/// - [`RpcError::Io`] for any other read failure
pub async fn read_message<R>(
    reader: &mut R,
    framing: Framing,
    max_size: usize,
) -> Result<Vec<u8>, RpcError>
where
    R: AsyncBufRead + Unpin,
{
    match framing {
        Framing::ContentLength => read_content_length(reader, max_size).await,
        Framing::Newline => read_line_delimited(reader, max_size).await,
    }
}

/// Write one framed message and flush it.
pub async fn write_message<W>(writer: &mut W, framing: Framing, body: &[u8]) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
{
    match framing {
        Framing::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(body).await?;
        }
        Framing::Newline => {
            if body.contains(&b'\n') {
                return Err(RpcError::Framing(
                    "Newline-framed body must not contain a line break".to_string(),
                ));
            }
            writer.write_all(body).await?;
            writer.write_all(b"\n").await?;
        }
    }

    writer.flush().await?;
    trace!(bytes = body.len(), ?framing, "Frame written");

    Ok(())
}

async fn read_content_length<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, RpcError>
where
    R: AsyncBufRead + Unpin,
{
    // Read headers until blank line
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = (&mut *reader)
            .take(MAX_HEADER_LINE as u64)
            .read_line(&mut line)
            .await?;

        // EOF - connection closed
        if bytes_read == 0 {
            return Err(RpcError::ConnectionClosed);
        }

        if !line.ends_with('\n') {
            if bytes_read >= MAX_HEADER_LINE {
                return Err(RpcError::Framing(format!(
                    "Header line exceeds maximum {} bytes",
                    MAX_HEADER_LINE
                )));
            }
            return Err(RpcError::ConnectionClosed);
        }

        let trimmed = line.trim();

        // Empty line signals end of headers
        if trimmed.is_empty() {
            break;
        }

        if let Some((key, value)) = trimmed.split_once(':') {
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(value.parse().map_err(|_| {
                    RpcError::Framing(format!("Invalid Content-Length value: {}", value))
                })?);
            }
            // Ignore other headers (e.g., Content-Type)
        }
    }

    let size = content_length
        .ok_or_else(|| RpcError::Framing("Missing Content-Length header".to_string()))?;

    if size > max_size {
        return Err(RpcError::Framing(format!(
            "Message size {} exceeds maximum {} bytes",
            size, max_size
        )));
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            RpcError::ConnectionClosed
        } else {
            RpcError::Io(e)
        }
    })?;

    trace!(bytes = size, "Frame read");
    Ok(body)
}

async fn read_line_delimited<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, RpcError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = Vec::new();
        // +2 leaves room for the CRLF terminator of a maximum-size body
        let limit = max_size.saturating_add(2) as u64;
        let bytes_read = (&mut *reader).take(limit).read_until(b'\n', &mut line).await?;

        if bytes_read == 0 {
            return Err(RpcError::ConnectionClosed);
        }

        if line.last() != Some(&b'\n') {
            if bytes_read as u64 >= limit {
                return Err(RpcError::Framing(format!(
                    "Message exceeds maximum {} bytes",
                    max_size
                )));
            }
            return Err(RpcError::ConnectionClosed);
        }

        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        // Skip keep-alive blank lines
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        if line.len() > max_size {
            return Err(RpcError::Framing(format!(
                "Message exceeds maximum {} bytes",
                max_size
            )));
        }

        trace!(bytes = line.len(), "Frame read");
        return Ok(line);
    }
}
