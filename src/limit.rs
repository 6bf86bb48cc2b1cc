use crate::chunked::ChunkedDecoder;
use crate::Error;
use http::{HeaderMap, Method, StatusCode, Version};
use std::fmt;

/// Limit reading response body data given configuration from response headers.
///
/// The connection uses this to know where one response ends and the next
/// pipelined response begins.
pub enum LimitRead {
    /// Read from a chunked decoder. The decoder will know when there is no more
    /// data to be read.
    ChunkedDecoder(ChunkedDecoder),
    /// Body data is limited by a `content-length` header.
    ContentLength(ContentLengthRead),
    /// Read until the connection closes (HTTP/1.0).
    ReadToEnd(ReadToEnd),
    /// No expected body.
    NoBody,
}

impl LimitRead {
    /// Create an instance for a response.
    ///
    /// 1. Responses to HEAD, and 1xx, 204, 304 responses never have a body.
    /// 2. If header `transfer-encoding: chunked` use chunked decoder regardless of other headers.
    /// 3. If header `content-length: <number>` use a reader limited by length.
    ///    A length that doesn't parse, or several that disagree, is an error.
    /// 4. Otherwise read until the server closes the connection.
    pub fn for_response(
        method: &Method,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Result<Self, Error> {
        // https://tools.ietf.org/html/rfc7230#section-3.3.3
        let ret = if *method == Method::HEAD
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            LimitRead::NoBody
        } else if is_chunked(headers) {
            // If a message is received with both a Transfer-Encoding and a
            // Content-Length header field, the Transfer-Encoding overrides the
            // Content-Length.
            LimitRead::ChunkedDecoder(ChunkedDecoder::new())
        } else if let Some(size) = content_length(headers)? {
            LimitRead::ContentLength(ContentLengthRead::new(size))
        } else {
            // https://tools.ietf.org/html/rfc1945#section-7.2.2
            // Otherwise, the body length is determined by the closing
            // of the connection by the server.
            LimitRead::ReadToEnd(ReadToEnd::new())
        };

        trace!("LimitRead for response: {:?}", ret);

        Ok(ret)
    }

    pub fn is_complete(&self) -> bool {
        match &self {
            LimitRead::ChunkedDecoder(v) => v.is_end(),
            LimitRead::ContentLength(v) => v.is_end(),
            LimitRead::ReadToEnd(v) => v.is_end(),
            LimitRead::NoBody => true,
        }
    }

    /// Whether the body ends with the connection, which can then not be reused.
    pub fn is_read_to_end(&self) -> bool {
        matches!(self, LimitRead::ReadToEnd(_))
    }

    /// Consume body bytes from `input`, appending the body data to `out`.
    ///
    /// Returns how much of `input` belongs to this body.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<usize, Error> {
        match self {
            LimitRead::ChunkedDecoder(v) => v.feed(input, out),
            LimitRead::ContentLength(v) => Ok(v.feed(input, out)),
            LimitRead::ReadToEnd(_) => {
                out.extend_from_slice(input);
                Ok(input.len())
            }
            LimitRead::NoBody => Ok(0),
        }
    }

    /// The connection reached EOF.
    ///
    /// Completes a close delimited body, and errors for a body that expected more.
    pub fn eof(&mut self) -> Result<(), Error> {
        match self {
            LimitRead::ReadToEnd(v) => {
                v.reached_end = true;
                Ok(())
            }
            LimitRead::ContentLength(v) if !v.is_end() => {
                // https://tools.ietf.org/html/rfc7230#page-32
                // If the sender closes the connection or the recipient times out
                // before the indicated number of octets are received, the
                // recipient MUST consider the message to be incomplete.
                let msg = format!(
                    "Partial body received {} bytes and expected {}",
                    v.total, v.limit
                );
                trace!("{}", msg);
                Err(Error::ConnectionLost(msg))
            }
            LimitRead::ChunkedDecoder(v) if !v.is_end() => {
                Err(Error::ConnectionLost("Partial body".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Reader limited by a set length.
#[derive(Debug)]
pub struct ContentLengthRead {
    limit: u64,
    total: u64,
}

impl ContentLengthRead {
    fn new(limit: u64) -> Self {
        ContentLengthRead { limit, total: 0 }
    }

    fn is_end(&self) -> bool {
        self.total == self.limit
    }

    fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> usize {
        let left = self.limit - self.total;
        let max = (input.len() as u64).min(left) as usize;
        out.extend_from_slice(&input[..max]);
        self.total += max as u64;
        max
    }
}

#[derive(Debug)]
pub struct ReadToEnd {
    reached_end: bool,
}

impl ReadToEnd {
    fn new() -> Self {
        ReadToEnd { reached_end: false }
    }

    fn is_end(&self) -> bool {
        self.reached_end
    }
}

impl fmt::Debug for LimitRead {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self {
            LimitRead::ChunkedDecoder(_) => write!(f, "ChunkedDecoder")?,
            LimitRead::ContentLength(l) => write!(f, "ContentLength({})", l.limit)?,
            LimitRead::ReadToEnd(_) => write!(f, "ReadToEnd")?,
            LimitRead::NoBody => write!(f, "NoBody")?,
        }
        Ok(())
    }
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get("transfer-encoding")
        .and_then(|h| h.to_str().ok())
        // https://tools.ietf.org/html/rfc2616#section-4.4
        //
        // If a Transfer-Encoding header field (section 14.41) is present and
        // has any value other than "identity", then the transfer-length is
        // defined by use of the "chunked" transfer-coding
        .map(|h| !h.contains("identity"))
        .unwrap_or(false)
}

/// Whether the response allows the connection to carry further requests.
pub fn allow_reuse(headers: &HeaderMap, version: Version) -> bool {
    if version == Version::HTTP_11 {
        is_keep_alive(headers, true)
    } else {
        is_keep_alive(headers, false)
    }
}

fn is_keep_alive(headers: &HeaderMap, default: bool) -> bool {
    headers
        .get("connection")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| {
            if h.eq_ignore_ascii_case("keep-alive") {
                Some(true)
            } else if h.eq_ignore_ascii_case("close") {
                Some(false)
            } else {
                None
            }
        })
        .unwrap_or(default)
}

// https://tools.ietf.org/html/rfc7230#section-3.3.3
// If a message is received without Transfer-Encoding and with either
// multiple Content-Length header fields having differing field-values or a
// single Content-Length header field having an invalid value, then the
// message framing is invalid.
fn content_length(headers: &HeaderMap) -> Result<Option<u64>, Error> {
    let mut length = None;

    for value in headers.get_all("content-length") {
        let parsed = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok());

        match (parsed, length) {
            (None, _) => {
                return Err(Error::Protocol(format!(
                    "Invalid content-length: {:?}",
                    value
                )))
            }
            (Some(n), Some(prev)) if n != prev => {
                return Err(Error::Protocol(format!(
                    "Conflicting content-length: {} and {}",
                    prev, n
                )))
            }
            (Some(n), _) => length = Some(n),
        }
    }

    Ok(length)
}
