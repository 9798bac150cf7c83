use std::io::{self, Cursor};

/// Appends to a fixed output buffer, all-or-nothing per write.
///
/// A `try_write` either fits entirely in the remaining output, or leaves the
/// writer untouched so the caller can retry with a fresh buffer.
pub(crate) struct Writer<'a> {
    output: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(output: &'a mut [u8]) -> Writer<'a> {
        Writer { output, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn available(&self) -> usize {
        self.output.len() - self.pos
    }

    pub fn try_write<F>(&mut self, block: F) -> bool
    where
        F: FnOnce(&mut Cursor<&mut [u8]>) -> io::Result<()>,
    {
        let mut cursor = Cursor::new(&mut self.output[self.pos..]);

        if block(&mut cursor).is_err() {
            return false;
        }

        self.pos += cursor.position() as usize;
        true
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.available() {
            return false;
        }
        self.output[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        true
    }
}

pub(crate) fn log_data(data: &[u8]) {
    if !log_enabled!(log::Level::Trace) {
        return;
    }

    for line in data.split(|b| *b == b'\n') {
        trace!("{}", String::from_utf8_lossy(line).trim_end_matches('\r'));
    }
}
