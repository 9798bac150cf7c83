use std::io::{Read, Seek, SeekFrom};

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use md5::{Digest, Md5};

use super::read_full;
use crate::Error;

/// MD5 of a body, in the two encodings servers use.
///
/// `hex` is what a server echoes in its `ETag`, `base64` goes in a
/// `Content-MD5` request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHash {
    hex: String,
    base64: String,
    size: u64,
}

impl ContentHash {
    /// Hash everything `source` yields from position 0.
    ///
    /// The source is left at position 0 afterwards, ready for the upload.
    pub fn compute<R: Read + Seek>(source: &mut R, buffer_size: usize) -> Result<Self, Error> {
        source.seek(SeekFrom::Start(0))?;

        let mut hasher = Hasher::default();
        let mut buf = vec![0; buffer_size.max(1)];

        loop {
            let n = read_full(source, &mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        source.seek(SeekFrom::Start(0))?;

        Ok(hasher.finish())
    }

    /// Hash of an in-memory body.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Hasher::default();
        hasher.update(data);
        hasher.finish()
    }

    /// Lowercase hex digest.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Base64 digest, for `Content-MD5`.
    pub fn base64(&self) -> &str {
        &self.base64
    }

    /// Number of bytes hashed.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The `ETag` a server reports for a body with this hash.
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.hex)
    }

    /// Whether `etag` matches this hash.
    pub fn matches_etag(&self, etag: &str) -> bool {
        etag == self.etag()
    }
}

/// Running MD5 over a body fed in pieces.
#[derive(Default)]
pub(crate) struct Hasher {
    md5: Md5,
    size: u64,
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.size += data.len() as u64;
    }

    pub fn finish(self) -> ContentHash {
        let digest = self.md5.finalize();

        ContentHash {
            hex: hex::encode(digest),
            base64: BASE64_STANDARD.encode(digest),
            size: self.size,
        }
    }
}
