use crate::chunked::ChunkedEncoder;
use crate::headers::HeaderSet;
use crate::Error;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Version};
use std::io::Write;

// Response headers today vary in size from ~200 bytes to over 2KB.
// We don't bound the head size here, the connection gives up on
// unreasonably large heads.
const MAX_HEADERS: usize = 128;

/// The status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// HTTP/1.0 or HTTP/1.1.
    pub version: Version,
    /// Status code.
    pub status: StatusCode,
    /// Reason phrase, possibly empty.
    pub reason: String,
    /// Headers in the order received.
    pub headers: HeaderMap,
}

/// Turns requests into bytes and response bytes into heads.
///
/// The connection owns body framing (see [`LimitRead`]), the codec only deals
/// with the parts that can vary between HTTP/1.x dialects.
///
/// [`LimitRead`]: limit/enum.LimitRead.html
pub trait WireCodec {
    /// Write the request line and headers, including the terminating empty line.
    fn encode_request_head(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderSet,
        out: &mut Vec<u8>,
    ) -> Result<(), Error>;

    /// Write a chunk of a payload of unknown size.
    fn encode_payload_chunk(&self, data: &[u8], out: &mut Vec<u8>);

    /// Write whatever ends a payload of unknown size.
    fn encode_payload_end(&self, out: &mut Vec<u8>);

    /// Attempt to parse a response head from the start of `buf`.
    ///
    /// `Ok(None)` means more bytes are needed. On success returns the head and
    /// the number of bytes it occupied.
    fn decode_response_head(&self, buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, Error>;
}

/// HTTP/1.1 wire codec backed by `httparse`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Http11Codec;

impl WireCodec for Http11Codec {
    #[allow(clippy::write_with_newline)]
    fn encode_request_head(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderSet,
        out: &mut Vec<u8>,
    ) -> Result<(), Error> {
        let start = out.len();

        let path = if path.is_empty() { "/" } else { path };

        if path.bytes().any(|c| c <= b' ' || c == 0x7f) {
            return Err(Error::User(format!("Invalid request path: {:?}", path)));
        }

        write!(out, "{} {} HTTP/1.1\r\n", method, path)
            .map_err(|e| Error::User(e.to_string()))?;

        headers.serialize_into(out);
        out.extend_from_slice(b"\r\n");

        debug!(
            "write_http11_req: {:?}",
            String::from_utf8_lossy(&out[start..])
        );

        Ok(())
    }

    fn encode_payload_chunk(&self, data: &[u8], out: &mut Vec<u8>) {
        ChunkedEncoder::write_chunk(data, out);
    }

    fn encode_payload_end(&self, out: &mut Vec<u8>) {
        ChunkedEncoder::write_finish(out);
    }

    fn decode_response_head(&self, buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, Error> {
        try_parse_res(buf)
    }
}

fn version_of(v: Option<u8>) -> Result<Version, Error> {
    match v {
        Some(0) => Ok(Version::HTTP_10),
        Some(1) => Ok(Version::HTTP_11),
        _ => Err(Error::Protocol(format!("Unhandled http version: {:?}", v))),
    }
}

/// Attempt to parse an http/1.1 response.
pub fn try_parse_res(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, Error> {
    trace!("try_parse_res: {:?}", String::from_utf8_lossy(buf));

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parser = httparse::Response::new(&mut headers);

    let status = parser.parse(buf)?;

    let len = match status {
        httparse::Status::Partial => return Ok(None),
        httparse::Status::Complete(len) => len,
    };

    let version = version_of(parser.version)?;

    let status = parser
        .code
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| Error::Protocol(format!("Bad status code: {:?}", parser.code)))?;

    let reason = parser.reason.unwrap_or("").to_string();

    let mut map = HeaderMap::with_capacity(parser.headers.len());

    for head in parser.headers.iter() {
        let name = HeaderName::from_bytes(head.name.as_bytes());
        let value = HeaderValue::from_bytes(head.value);
        match (name, value) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            (Err(e), _) => {
                debug!("Dropping bad header name: {}", e);
            }
            (Ok(name), Err(e)) => {
                debug!("Dropping bad header value ({}): {}", name, e);
            }
        }
    }

    let head = ResponseHead {
        version,
        status,
        reason,
        headers: map,
    };

    debug!("try_parse_http11 success: {:?}", head);

    Ok(Some((head, len)))
}
