use std::io::Write;

use http::{Method, StatusCode};

use crate::ext::{MethodExt, StatusExt};
use crate::util::Writer;
use crate::Error;

/// Longest chunk length line we accept before giving up on finding `\r\n`.
const MAX_CHUNK_LEN_LINE: usize = 1024;

/// Outgoing body framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyWriter {
    NoBody,
    /// Bytes left to send.
    LengthDelimited(u64),
    /// Whether the terminating zero chunk has been written.
    Chunked(bool),
}

impl Default for BodyWriter {
    fn default() -> Self {
        Self::NoBody
    }
}

impl BodyWriter {
    pub fn new_none() -> Self {
        BodyWriter::NoBody
    }

    pub fn new_chunked() -> Self {
        BodyWriter::Chunked(false)
    }

    pub fn new_sized(size: u64) -> Self {
        BodyWriter::LengthDelimited(size)
    }

    pub fn has_body(&self) -> bool {
        !matches!(self, BodyWriter::NoBody)
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, BodyWriter::Chunked(_))
    }

    pub fn is_ended(&self) -> bool {
        match self {
            BodyWriter::NoBody => true,
            BodyWriter::LengthDelimited(left) => *left == 0,
            BodyWriter::Chunked(ended) => *ended,
        }
    }

    pub fn left_to_send(&self) -> Option<u64> {
        match self {
            BodyWriter::LengthDelimited(v) => Some(*v),
            _ => None,
        }
    }

    /// Check that `input` is allowed to be written in the current state.
    pub fn check_input(&self, input: &[u8]) -> Result<(), Error> {
        if !input.is_empty() && self.is_ended() {
            return Err(Error::BodyContentAfterFinish);
        }

        if let Some(left) = self.left_to_send() {
            if input.len() as u64 > left {
                return Err(Error::BodyLargerThanContentLength);
            }
        }

        Ok(())
    }

    /// Write as much of `input` as fits in `w`. Returns the input consumed.
    ///
    /// For chunked bodies, an empty `input` writes the terminating `0\r\n\r\n`.
    pub fn write(&mut self, input: &[u8], w: &mut Writer) -> usize {
        match self {
            BodyWriter::NoBody => 0,
            BodyWriter::LengthDelimited(left) => {
                let max = (w.available() as u64).min(*left) as usize;
                let n = input.len().min(max);
                if n == 0 {
                    return 0;
                }
                w.write_bytes(&input[..n]);
                *left -= n as u64;
                n
            }
            BodyWriter::Chunked(ended) => {
                if *ended {
                    return 0;
                }

                if input.is_empty() {
                    if w.write_bytes(b"0\r\n\r\n") {
                        *ended = true;
                    }
                    return 0;
                }

                let n = input.len().min(calculate_max_input(w.available()));
                if n == 0 {
                    return 0;
                }

                let data = &input[..n];
                let success = w.try_write(|w| {
                    write!(w, "{:x}\r\n", n)?;
                    w.write_all(data)?;
                    write!(w, "\r\n")
                });

                if success {
                    n
                } else {
                    0
                }
            }
        }
    }

    /// Frame all of `input` and append it to `out`.
    pub fn write_to_vec(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<usize, Error> {
        self.check_input(input)?;

        let start = out.len();
        // Worst case chunk overhead is 16 hex digits and two \r\n.
        out.resize(start + input.len() + 20, 0);

        let (consumed, used) = {
            let mut w = Writer::new(&mut out[start..]);
            let consumed = self.write(input, &mut w);
            (consumed, w.len())
        };

        out.truncate(start + used);

        if consumed != input.len() {
            return Err(Error::OutputOverflow);
        }

        Ok(consumed)
    }

    /// The header announcing this body framing, if any.
    pub fn body_header(&self) -> Option<(&'static str, String)> {
        match self {
            BodyWriter::NoBody => None,
            BodyWriter::LengthDelimited(size) => Some(("content-length", size.to_string())),
            BodyWriter::Chunked(_) => Some(("transfer-encoding", "chunked".to_string())),
        }
    }
}

fn hex_len(mut n: usize) -> usize {
    let mut len = 1;
    while n >= 16 {
        n /= 16;
        len += 1;
    }
    len
}

/// Max amount of input that, once chunk framed, fits in `output_len`.
pub(crate) fn calculate_max_input(output_len: usize) -> usize {
    // Smallest useful chunk: "1\r\nX\r\n"
    if output_len < 6 {
        return 0;
    }

    let mut n = output_len - 4;
    while n > 0 && n + hex_len(n) + 4 > output_len {
        n -= 1;
    }
    n
}

/// Incoming response body decoding.
#[derive(Debug)]
pub(crate) enum BodyReader {
    NoBody,
    /// Bytes left to receive.
    LengthDelimited(u64),
    Chunked(Dechunker),
    /// Read until the server closes the connection.
    CloseDelimited,
}

impl BodyReader {
    pub fn for_response<'a>(
        method: &Method,
        status: StatusCode,
        header_lookup: &dyn Fn(&str) -> Option<&'a str>,
    ) -> Result<Self, Error> {
        if !method.allow_response_body() || status.body_not_allowed() {
            return Ok(BodyReader::NoBody);
        }

        if let Some(te) = header_lookup("transfer-encoding") {
            if te
                .split(',')
                .any(|v| v.trim().eq_ignore_ascii_case("chunked"))
            {
                return Ok(BodyReader::Chunked(Dechunker::default()));
            }
        }

        if let Some(cl) = header_lookup("content-length") {
            let len: u64 = cl
                .trim()
                .parse()
                .map_err(|_| Error::BadContentLengthHeader)?;
            return Ok(BodyReader::LengthDelimited(len));
        }

        Ok(BodyReader::CloseDelimited)
    }

    pub fn is_ended(&self) -> bool {
        match self {
            BodyReader::NoBody => true,
            BodyReader::LengthDelimited(left) => *left == 0,
            BodyReader::Chunked(d) => d.is_ended(),
            BodyReader::CloseDelimited => false,
        }
    }

    pub fn is_close_delimited(&self) -> bool {
        matches!(self, BodyReader::CloseDelimited)
    }

    /// Decode from `input` into `output`. Returns `(input used, output used)`.
    pub fn read(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize), Error> {
        match self {
            BodyReader::NoBody => Ok((0, 0)),
            BodyReader::LengthDelimited(left) => {
                let n = input.len().min(output.len()).min(*left as usize);
                output[..n].copy_from_slice(&input[..n]);
                *left -= n as u64;
                Ok((n, n))
            }
            BodyReader::Chunked(d) => d.read(input, output),
            BodyReader::CloseDelimited => {
                let n = input.len().min(output.len());
                output[..n].copy_from_slice(&input[..n]);
                Ok((n, n))
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    #[default]
    Len,
    Data(u64),
    DataCrLf,
    Trailers,
    Ended,
}

/// State for decoding `transfer-encoding: chunked`.
#[derive(Debug, Default)]
pub(crate) struct Dechunker {
    phase: ChunkPhase,
}

impl Dechunker {
    fn is_ended(&self) -> bool {
        self.phase == ChunkPhase::Ended
    }

    fn read(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize), Error> {
        let mut input_used = 0;
        let mut output_used = 0;

        loop {
            let rest = &input[input_used..];

            match self.phase {
                ChunkPhase::Len => {
                    let Some(line_end) = find_crlf(rest) else {
                        if rest.len() > MAX_CHUNK_LEN_LINE {
                            return Err(Error::ChunkLenNotANumber);
                        }
                        break;
                    };
                    let line = &rest[..line_end];
                    // Chunk extensions follow a ';' and are ignored.
                    let len = line.split(|b| *b == b';').next().unwrap_or(line);
                    let len = std::str::from_utf8(len).map_err(|_| Error::ChunkLenNotAscii)?;
                    if !len.is_ascii() {
                        return Err(Error::ChunkLenNotAscii);
                    }
                    let len = u64::from_str_radix(len.trim(), 16)
                        .map_err(|_| Error::ChunkLenNotANumber)?;

                    input_used += line_end + 2;
                    self.phase = if len == 0 {
                        ChunkPhase::Trailers
                    } else {
                        ChunkPhase::Data(len)
                    };
                }
                ChunkPhase::Data(left) => {
                    let out = &mut output[output_used..];
                    let n = rest.len().min(out.len()).min(left as usize);
                    if n == 0 {
                        break;
                    }
                    out[..n].copy_from_slice(&rest[..n]);
                    input_used += n;
                    output_used += n;

                    let left = left - n as u64;
                    self.phase = if left == 0 {
                        ChunkPhase::DataCrLf
                    } else {
                        ChunkPhase::Data(left)
                    };
                }
                ChunkPhase::DataCrLf => {
                    if rest.len() < 2 {
                        break;
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(Error::ChunkExpectedCrLf);
                    }
                    input_used += 2;
                    self.phase = ChunkPhase::Len;
                }
                ChunkPhase::Trailers => {
                    let Some(line_end) = find_crlf(rest) else {
                        break;
                    };
                    input_used += line_end + 2;
                    if line_end == 0 {
                        self.phase = ChunkPhase::Ended;
                    }
                }
                ChunkPhase::Ended => break,
            }
        }

        Ok((input_used, output_used))
    }
}

fn find_crlf(input: &[u8]) -> Option<usize> {
    input.windows(2).position(|w| w == b"\r\n")
}
