//! Chunked transfer encoding.

use crate::Error;
use std::io::Write;

/// Incremental decoder of a `transfer-encoding: chunked` body.
///
/// Fed with whatever bytes arrived from the connection, it copies out the
/// chunk data and stops exactly after the terminating empty line, so the
/// bytes of the next pipelined response are left untouched.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: State,
    size: u64,
    digits: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    SizeExt,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    TrailerStart,
    Trailer,
    EndLf,
    End,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        ChunkedDecoder::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        ChunkedDecoder {
            state: State::Size,
            size: 0,
            digits: 0,
        }
    }

    /// Whether the last chunk and trailer have been read.
    pub fn is_end(&self) -> bool {
        self.state == State::End
    }

    /// Decode from `input`, appending body data to `out`.
    ///
    /// Returns the number of bytes of `input` that were used.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<usize, Error> {
        let mut i = 0;

        while i < input.len() && self.state != State::End {
            if self.state == State::Data {
                let left = input.len() - i;
                let max = (self.size.min(left as u64)) as usize;
                out.extend_from_slice(&input[i..(i + max)]);
                self.size -= max as u64;
                i += max;
                if self.size == 0 {
                    self.state = State::DataCr;
                }
                continue;
            }

            let c = input[i];
            i += 1;

            self.state = match self.state {
                State::Size => match c {
                    b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                        let v = (c as char).to_digit(16).unwrap_or(0) as u64;
                        self.size = self
                            .size
                            .checked_mul(16)
                            .and_then(|s| s.checked_add(v))
                            .ok_or_else(|| Error::Protocol("Chunk size overflow".into()))?;
                        self.digits += 1;
                        State::Size
                    }
                    b';' | b' ' | b'\t' if self.digits > 0 => State::SizeExt,
                    b'\r' if self.digits > 0 => State::SizeLf,
                    _ => return Err(unexpected("chunk size", c)),
                },
                State::SizeExt => {
                    if c == b'\r' {
                        State::SizeLf
                    } else {
                        State::SizeExt
                    }
                }
                State::SizeLf => {
                    if c != b'\n' {
                        return Err(unexpected("chunk size", c));
                    }
                    self.digits = 0;
                    if self.size == 0 {
                        State::TrailerStart
                    } else {
                        State::Data
                    }
                }
                State::DataCr => {
                    if c != b'\r' {
                        return Err(unexpected("chunk end", c));
                    }
                    State::DataLf
                }
                State::DataLf => {
                    if c != b'\n' {
                        return Err(unexpected("chunk end", c));
                    }
                    State::Size
                }
                State::TrailerStart => {
                    if c == b'\r' {
                        State::EndLf
                    } else {
                        State::Trailer
                    }
                }
                State::Trailer => {
                    if c == b'\n' {
                        State::TrailerStart
                    } else {
                        State::Trailer
                    }
                }
                State::EndLf => {
                    if c != b'\n' {
                        return Err(unexpected("chunked trailer", c));
                    }
                    State::End
                }
                State::Data | State::End => self.state,
            };
        }

        trace!("ChunkedDecoder used {} in state {:?}", i, self.state);

        Ok(i)
    }
}

fn unexpected(what: &str, c: u8) -> Error {
    Error::Protocol(format!("Unexpected char in {}: {:?}", what, c as char))
}

/// Encoder of chunks for request payloads of unknown size.
#[derive(Debug)]
pub struct ChunkedEncoder;

impl ChunkedEncoder {
    /// Write one chunk. Empty data writes nothing, since a 0 chunk ends the body.
    pub fn write_chunk(data: &[u8], out: &mut Vec<u8>) {
        if data.is_empty() {
            return;
        }
        // writing to a Vec can't fail
        let _ = write!(out, "{:x}\r\n", data.len());
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
    }

    /// Write the terminating chunk.
    pub fn write_finish(out: &mut Vec<u8>) {
        out.extend_from_slice(b"0\r\n\r\n");
    }
}
