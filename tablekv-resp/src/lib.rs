//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode commands and parse replies for a Redis-protocol backend,
//! keeping allocations under control on the client hot path.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Callers provide line buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes end to end.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::future::Future;
use std::pin::Pin;

use bytes::BufMut;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Errors surfaced by the codec.
#[derive(Debug, thiserror::Error)]
pub enum RespError {
    /// Network or IO failure while reading.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
}

/// Result type for codec operations.
pub type RespResult<T> = Result<T, RespError>;

/// One parsed RESP reply.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// +OK or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays, with None for null arrays (e.g. timed-out BRPOP).
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// True for `-ERR` replies.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}

/// Encodes one command as a RESP2 array into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut impl BufMut) {
    out.put_u8(b'*');
    put_usize(out, args.len());
    out.put_slice(b"\r\n");
    for arg in args {
        out.put_u8(b'$');
        put_usize(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Reads one RESP reply from the buffered reader.
///
/// Arrays recurse through a boxed future; nesting depth in practice is the
/// two levels CLUSTER SLOTS produces.
pub fn read_reply<'a, R>(
    reader: &'a mut R,
    line_buf: &'a mut Vec<u8>,
) -> Pin<Box<dyn Future<Output = RespResult<RespValue>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        read_line(reader, line_buf).await?;
        if line_buf.is_empty() {
            return Err(RespError::Protocol);
        }

        match line_buf[0] {
            b'+' => Ok(RespValue::Simple(line_buf[1..].to_vec())),
            b'-' => Ok(RespValue::Error(line_buf[1..].to_vec())),
            b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
            b'$' => {
                let len = parse_i64(&line_buf[1..])?;
                read_bulk(reader, len, line_buf).await
            }
            b'*' => {
                let len = parse_i64(&line_buf[1..])?;
                if len < 0 {
                    return Ok(RespValue::Array(None));
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(read_reply(reader, line_buf).await?);
                }
                Ok(RespValue::Array(Some(items)))
            }
            _ => Err(RespError::Protocol),
        }
    })
}

async fn read_bulk<R>(reader: &mut R, len: i64, line_buf: &mut Vec<u8>) -> RespResult<RespValue>
where
    R: AsyncBufRead + Unpin,
{
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await?;
    if crlf != [b'\r', b'\n'] {
        return Err(RespError::Protocol);
    }

    line_buf.clear();
    Ok(RespValue::Bulk(Some(data)))
}

async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> RespResult<()>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let bytes = reader.read_until(b'\n', buf).await?;
    if bytes == 0 {
        return Err(RespError::Protocol);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(RespError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> RespResult<i64> {
    if data.is_empty() {
        return Err(RespError::Protocol);
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn put_usize(out: &mut impl BufMut, mut value: usize) {
    // Digits go through a small stack buffer to avoid heap work.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.put_u8(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    async fn parse(input: &[u8]) -> RespValue {
        let mut reader = BufReader::new(Cursor::new(input.to_vec()));
        let mut line = Vec::new();
        read_reply(&mut reader, &mut line).await.unwrap()
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[b"GET", b"orders:42"], &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$9\r\norders:42\r\n");
    }

    #[test]
    fn encodes_empty_value() {
        let mut buf = Vec::new();
        encode_command(&[b"SET", b"k", b""], &mut buf);
        assert_eq!(&buf, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n");
    }

    #[tokio::test]
    async fn parses_simple_string() {
        assert_eq!(parse(b"+OK\r\n").await, RespValue::Simple(b"OK".to_vec()));
    }

    #[tokio::test]
    async fn parses_error() {
        assert_eq!(
            parse(b"-ERR bad\r\n").await,
            RespValue::Error(b"ERR bad".to_vec())
        );
    }

    #[tokio::test]
    async fn parses_integer() {
        assert_eq!(parse(b":-42\r\n").await, RespValue::Integer(-42));
    }

    #[tokio::test]
    async fn parses_bulk_string() {
        assert_eq!(
            parse(b"$5\r\nhello\r\n").await,
            RespValue::Bulk(Some(b"hello".to_vec()))
        );
    }

    #[tokio::test]
    async fn parses_null_bulk_string() {
        assert_eq!(parse(b"$-1\r\n").await, RespValue::Bulk(None));
    }

    #[tokio::test]
    async fn parses_nested_array() {
        let value = parse(b"*2\r\n:1\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n").await;
        assert_eq!(
            value,
            RespValue::Array(Some(vec![
                RespValue::Integer(1),
                RespValue::Array(Some(vec![
                    RespValue::Bulk(Some(b"a".to_vec())),
                    RespValue::Bulk(Some(b"b".to_vec())),
                ])),
            ]))
        );
    }

    #[tokio::test]
    async fn parses_null_array() {
        assert_eq!(parse(b"*-1\r\n").await, RespValue::Array(None));
    }

    #[tokio::test]
    async fn rejects_missing_crlf() {
        let mut reader = BufReader::new(Cursor::new(b"+OK\n".to_vec()));
        let mut line = Vec::new();
        assert!(matches!(
            read_reply(&mut reader, &mut line).await,
            Err(RespError::Protocol)
        ));
    }
}
