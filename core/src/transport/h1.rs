//! HTTP/1.1 request writing and response reading.
//!
//! Response heads are parsed with httparse. Bodies are framed by
//! Content-Length, chunked transfer coding, or connection close
//! (RFC 9112 section 6.3).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, Result};
use crate::http::{HttpMethod, HttpRequest, ResponseMetadata};

/// Upper bound on the response head.
const MAX_HEAD_SIZE: usize = 64 * 1024;

const MAX_HEADERS: usize = 100;

const READ_CHUNK: usize = 8192;

/// Write the request head, then the body bytes.
pub async fn write_request<S>(stream: &mut S, request: &HttpRequest) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let head = request.encode_head();
    stream.write_all(&head).await?;
    if !request.body.is_empty() {
        stream.write_all(&request.body).await?;
    }
    stream.flush().await?;
    trace!(head = head.len(), body = request.body.len(), "request written");
    Ok(())
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

impl Framing {
    fn for_response(metadata: &ResponseMetadata, method: HttpMethod) -> Result<Self> {
        if method == HttpMethod::Head || matches!(metadata.status_code, 204 | 304) {
            return Ok(Framing::Empty);
        }
        if let Some(te) = metadata.header("transfer-encoding") {
            let chunked = te
                .rsplit(',')
                .next()
                .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"));
            return Ok(if chunked {
                Framing::Chunked
            } else {
                Framing::UntilClose
            });
        }
        match metadata.header("content-length") {
            Some(value) => parse_content_length(value).map(Framing::Length),
            None => Ok(Framing::UntilClose),
        }
    }
}

/// A final (non-1xx) response head.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub metadata: ResponseMetadata,
    pub framing: Framing,
}

/// Reads one response off a stream, keeping bytes that arrived early.
pub struct ResponseReader<S> {
    stream: S,
    buffer: Vec<u8>,
}

impl<S: AsyncRead + Unpin> ResponseReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Read the next chunk into the buffer. Returns 0 on end of stream.
    async fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.stream.read(&mut chunk).await?;
        self.buffer.extend_from_slice(&chunk[..n]);
        trace!(bytes = n, "received");
        Ok(n)
    }

    /// Read status and headers, skipping 1xx interim responses.
    pub async fn read_head(&mut self, method: HttpMethod) -> Result<ResponseHead> {
        loop {
            let (status, headers, consumed) = loop {
                if let Some(parsed) = parse_head(&self.buffer)? {
                    break parsed;
                }
                if self.buffer.len() >= MAX_HEAD_SIZE {
                    return Err(Error::protocol("response head too large"));
                }
                if self.fill().await? == 0 {
                    return Err(Error::protocol("connection closed before response head"));
                }
            };
            self.buffer.drain(..consumed);

            if (100..200).contains(&status) {
                trace!(status, "skipping interim response");
                continue;
            }

            let metadata = ResponseMetadata::new(status, headers);
            let framing = Framing::for_response(&metadata, method)?;
            return Ok(ResponseHead { metadata, framing });
        }
    }

    /// Accumulate the body in arrival order until its framing says it ended.
    pub async fn read_body(&mut self, framing: Framing) -> Result<Vec<u8>> {
        match framing {
            Framing::Empty => Ok(Vec::new()),
            Framing::Length(len) => {
                while self.buffer.len() < len {
                    if self.fill().await? == 0 {
                        return Err(Error::protocol(format!(
                            "connection closed after {} of {len} body bytes",
                            self.buffer.len()
                        )));
                    }
                }
                Ok(self.buffer.drain(..len).collect())
            }
            Framing::UntilClose => {
                while self.fill().await? > 0 {}
                Ok(std::mem::take(&mut self.buffer))
            }
            Framing::Chunked => self.read_chunked().await,
        }
    }

    async fn read_chunked(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        loop {
            let line = self.read_line().await?;
            let size = parse_chunk_size(&line)?;
            if size == 0 {
                // Trailer section ends with an empty line; a peer that closes
                // instead has still sent the complete body.
                loop {
                    match self.read_line().await {
                        Ok(line) if line.is_empty() => break,
                        Ok(_) => continue,
                        Err(Error::Protocol(_)) => break,
                        Err(e) => return Err(e),
                    }
                }
                return Ok(body);
            }
            let end = size
                .checked_add(2)
                .ok_or_else(|| Error::protocol("chunk size too large"))?;
            while self.buffer.len() < end {
                if self.fill().await? == 0 {
                    return Err(Error::protocol("connection closed inside a chunk"));
                }
            }
            if &self.buffer[size..end] != b"\r\n" {
                return Err(Error::protocol("chunk data not terminated by CRLF"));
            }
            body.extend_from_slice(&self.buffer[..size]);
            self.buffer.drain(..end);
        }
    }

    /// Take one CRLF-terminated line out of the buffer, without the CRLF.
    async fn read_line(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(pos) = self.buffer.windows(2).position(|w| w == b"\r\n") {
                let line = self.buffer[..pos].to_vec();
                self.buffer.drain(..pos + 2);
                return Ok(line);
            }
            if self.buffer.len() >= MAX_HEAD_SIZE {
                return Err(Error::protocol("chunk line too long"));
            }
            if self.fill().await? == 0 {
                return Err(Error::protocol("connection closed inside chunked body"));
            }
        }
    }
}

type ParsedHead = (u16, Vec<(String, String)>, usize);

fn parse_head(buffer: &[u8]) -> Result<Option<ParsedHead>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let consumed = match response
        .parse(buffer)
        .map_err(|e| Error::protocol(format!("invalid response head: {e}")))?
    {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };
    let status = response
        .code
        .ok_or_else(|| Error::protocol("missing status code"))?;
    let headers = response
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();
    Ok(Some((status, headers, consumed)))
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let line = std::str::from_utf8(line).map_err(|_| Error::protocol("non-ASCII chunk size"))?;
    let size = line.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(size, 16)
        .map_err(|_| Error::protocol(format!("invalid chunk size {size:?}")))
}

/// Content-Length may repeat, but every value must agree (RFC 9112 6.2).
fn parse_content_length(value: &str) -> Result<usize> {
    let mut lengths = value.split(',').map(|part| {
        part.trim()
            .parse::<usize>()
            .map_err(|_| Error::protocol(format!("invalid Content-Length {value:?}")))
    });
    let first = lengths
        .next()
        .ok_or_else(|| Error::protocol("empty Content-Length"))??;
    for other in lengths {
        if other? != first {
            return Err(Error::protocol(format!(
                "conflicting Content-Length values {value:?}"
            )));
        }
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use std::io;

    use tokio_test::io::Builder;

    use super::*;

    #[tokio::test]
    async fn writes_head_then_body() {
        let request = HttpRequest {
            method: HttpMethod::Put,
            host: "localhost".to_string(),
            port: 80,
            path: "/hello".to_string(),
            headers: vec![("Content-Length".to_string(), "2".to_string())],
            body: b"{}".to_vec(),
        };
        let mut wire: Vec<u8> = Vec::new();
        write_request(&mut wire, &request).await.unwrap();
        assert_eq!(
            wire,
            b"PUT /hello HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}".to_vec()
        );
    }

    #[tokio::test]
    async fn reads_content_length_body_split_across_reads() {
        let stream = Builder::new()
            .read(b"HTTP/1.1 201 Created\r\nContent-Type: application/json\r\n")
            .read(b"Content-Length: 17\r\n\r\n{\"world\":")
            .read(b"\"hello\"}")
            .build();
        let mut reader = ResponseReader::new(stream);
        let head = reader.read_head(HttpMethod::Put).await.unwrap();
        assert_eq!(head.metadata.status_code, 201);
        assert_eq!(head.metadata.content_type(), Some("application/json"));
        assert_eq!(head.framing, Framing::Length(17));
        let body = reader.read_body(head.framing).await.unwrap();
        assert_eq!(body, br#"{"world":"hello"}"#.to_vec());
    }

    #[tokio::test]
    async fn reads_chunked_body_with_trailers() {
        let stream = Builder::new()
            .read(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
            .read(b"5\r\nhello\r\n6;ext=1\r\n world\r\n")
            .read(b"0\r\nX-Trailer: yes\r\n\r\n")
            .build();
        let mut reader = ResponseReader::new(stream);
        let head = reader.read_head(HttpMethod::Get).await.unwrap();
        assert_eq!(head.framing, Framing::Chunked);
        let body = reader.read_body(head.framing).await.unwrap();
        assert_eq!(body, b"hello world".to_vec());
    }

    #[tokio::test]
    async fn oversized_chunk_is_a_protocol_error() {
        let stream = Builder::new()
            .read(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
            .read(b"ffffffffffffffff\r\nab\r\n")
            .build();
        let mut reader = ResponseReader::new(stream);
        let head = reader.read_head(HttpMethod::Get).await.unwrap();
        let err = reader.read_body(head.framing).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn reads_until_close_without_length() {
        let stream = Builder::new()
            .read(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\npart one, ")
            .read(b"part two")
            .build();
        let mut reader = ResponseReader::new(stream);
        let head = reader.read_head(HttpMethod::Get).await.unwrap();
        assert_eq!(head.framing, Framing::UntilClose);
        let body = reader.read_body(head.framing).await.unwrap();
        assert_eq!(body, b"part one, part two".to_vec());
    }

    #[tokio::test]
    async fn skips_interim_responses() {
        let stream = Builder::new()
            .read(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n")
            .build();
        let mut reader = ResponseReader::new(stream);
        let head = reader.read_head(HttpMethod::Post).await.unwrap();
        assert_eq!(head.metadata.status_code, 204);
        assert_eq!(head.framing, Framing::Empty);
    }

    #[tokio::test]
    async fn head_requests_have_no_body() {
        let stream = Builder::new()
            .read(b"HTTP/1.1 200 OK\r\nContent-Length: 42\r\n\r\n")
            .build();
        let mut reader = ResponseReader::new(stream);
        let head = reader.read_head(HttpMethod::Head).await.unwrap();
        assert_eq!(head.framing, Framing::Empty);
        assert!(reader.read_body(head.framing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn truncated_body_is_a_protocol_error() {
        let stream = Builder::new()
            .read(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort")
            .build();
        let mut reader = ResponseReader::new(stream);
        let head = reader.read_head(HttpMethod::Get).await.unwrap();
        let err = reader.read_body(head.framing).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn reset_mid_body_is_a_transport_error() {
        let stream = Builder::new()
            .read(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut reader = ResponseReader::new(stream);
        let head = reader.read_head(HttpMethod::Get).await.unwrap();
        let err = reader.read_body(head.framing).await.unwrap_err();
        match err {
            Error::Transport(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_before_head_is_a_protocol_error() {
        let stream = Builder::new().read(b"HTTP/1.1 200 OK\r\n").build();
        let mut reader = ResponseReader::new(stream);
        assert!(matches!(
            reader.read_head(HttpMethod::Get).await,
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn content_length_values_must_agree() {
        assert_eq!(parse_content_length("5").unwrap(), 5);
        assert_eq!(parse_content_length("5, 5").unwrap(), 5);
        assert!(parse_content_length("5, 6").is_err());
        assert!(parse_content_length("-1").is_err());
    }

    #[test]
    fn chunk_size_ignores_extensions() {
        assert_eq!(parse_chunk_size(b"1A").unwrap(), 26);
        assert_eq!(parse_chunk_size(b"ff;name=value").unwrap(), 255);
        assert!(parse_chunk_size(b"zz").is_err());
    }
}
