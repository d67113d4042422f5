use std::io::{self, Write};

use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;

use crate::{Codec, Transform};

/// Gzip compression codec. The algorithm tag stored with an object is
/// `"gzip"`; it is the on-disk contract and must not change.
pub struct GzipCodec {
    level: Compression,
}

pub const ALGORITHM: &str = "gzip";

impl GzipCodec {
    pub fn new(level: u32) -> Self {
        GzipCodec {
            level: Compression::new(level),
        }
    }
}

impl Default for GzipCodec {
    fn default() -> Self {
        GzipCodec {
            level: Compression::default(),
        }
    }
}

impl Codec for GzipCodec {
    fn algorithm(&self) -> &str {
        ALGORITHM
    }

    fn encoder(&self) -> Box<dyn Transform> {
        Box::new(Deflate {
            inner: Some(GzEncoder::new(Vec::new(), self.level)),
        })
    }

    fn decoder(&self) -> Box<dyn Transform> {
        Box::new(Inflate {
            inner: Some(GzDecoder::new(Vec::new())),
        })
    }
}

// The write-side flate2 codecs own a Vec sink, which doubles as the in-memory
// codec buffer: push writes input through, then drains whatever compressed or
// decompressed output the codec produced so far.

struct Deflate {
    inner: Option<GzEncoder<Vec<u8>>>,
}

impl Transform for Deflate {
    fn push(&mut self, input: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        let enc = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        enc.write_all(input)?;
        out.append(enc.get_mut());
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> io::Result<()> {
        let enc = self
            .inner
            .take()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        out.append(&mut enc.finish()?);
        Ok(())
    }
}

struct Inflate {
    inner: Option<GzDecoder<Vec<u8>>>,
}

impl Transform for Inflate {
    fn push(&mut self, input: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        let dec = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        dec.write_all(input)?;
        out.append(dec.get_mut());
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> io::Result<()> {
        let dec = self
            .inner
            .take()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        // finish() verifies the gzip trailer; truncated input errors here.
        out.append(&mut dec.finish()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Codec;

    #[test]
    fn test_push_codec_roundtrip() {
        let codec = GzipCodec::default();
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(500);

        let mut enc = codec.encoder();
        let mut compressed = Vec::new();
        for chunk in payload.chunks(1000) {
            enc.push(chunk, &mut compressed).unwrap();
        }
        enc.finish(&mut compressed).unwrap();
        assert!(compressed.len() < payload.len());

        let mut dec = codec.decoder();
        let mut decompressed = Vec::new();
        for chunk in compressed.chunks(7) {
            dec.push(chunk, &mut decompressed).unwrap();
        }
        dec.finish(&mut decompressed).unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn test_truncated_trailer_is_error() {
        let codec = GzipCodec::default();
        let mut enc = codec.encoder();
        let mut compressed = Vec::new();
        enc.push(b"payload", &mut compressed).unwrap();
        enc.finish(&mut compressed).unwrap();
        compressed.truncate(compressed.len() - 4);

        let mut dec = codec.decoder();
        let mut out = Vec::new();
        let result = dec
            .push(&compressed, &mut out)
            .and_then(|()| dec.finish(&mut out));
        assert!(result.is_err());
    }
}
