//! Streaming byte-transform pipeline.
//!
//! A [`Transform`] is a push-based codec: callers feed it input chunks and it
//! appends whatever output is ready to a caller-supplied buffer. The
//! [`TransformReader`] and [`TransformWriter`] adapters lift a transform over
//! asynchronous byte streams, 8 KiB at a time, so a payload is never resident
//! in full. Cancellation is the usual poll model: dropping an adapter between
//! polls drops the transform, tearing down any intermediate codec state.
//!
//! Composition is bottom-up. To store compressed-then-encrypted bytes, wrap
//! the source with the compressor's encoder and then the encryptor's encoder;
//! decoding applies the inverse transforms in the opposite order.

use std::io;

mod chacha;
mod gzip;
mod read;
mod write;

pub use chacha::XChaChaCodec;
pub use gzip::GzipCodec;
pub use read::TransformReader;
pub use write::TransformWriter;

/// Chunk granularity of the pipeline: upstream pulls, codec framing, and the
/// downstream flush unit are all sized to this.
pub const CHUNK_SIZE: usize = 8192;

/// A single-use, push-based byte codec.
///
/// `push` consumes an input chunk and appends any ready output to `out`;
/// a transform is free to buffer internally (an encryptor accumulating a full
/// frame, a compressor holding back a partial block). `finish` flushes the
/// tail exactly once; pushing after `finish` is a `BrokenPipe` error.
/// Dropping a transform before `finish` discards its intermediate state.
pub trait Transform: Send {
    fn push(&mut self, input: &[u8], out: &mut Vec<u8>) -> io::Result<()>;
    fn finish(&mut self, out: &mut Vec<u8>) -> io::Result<()>;
}

/// A codec value: the stable algorithm tag plus encoder/decoder factories.
///
/// Codec values are cheap to share (`Arc<dyn Codec>`) and safe for concurrent
/// use; every in-flight operation mints its own [`Transform`]. The algorithm
/// tag is the on-disk contract and must round-trip byte-for-byte.
pub trait Codec: Send + Sync {
    fn algorithm(&self) -> &str;
    fn encoder(&self) -> Box<dyn Transform>;
    fn decoder(&self) -> Box<dyn Transform>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;
    use futures::{AsyncReadExt, AsyncWriteExt};
    use rand::RngCore;

    fn codecs() -> Vec<Box<dyn Codec>> {
        vec![
            Box::new(GzipCodec::default()),
            Box::new(XChaChaCodec::new([7u8; 32])),
        ]
    }

    async fn encode_via_reader(codec: &dyn Codec, data: &[u8]) -> Vec<u8> {
        let mut reader = TransformReader::new(Cursor::new(data.to_vec()), codec.encoder());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    async fn decode_via_reader(codec: &dyn Codec, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut reader = TransformReader::new(Cursor::new(data.to_vec()), codec.decoder());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await?;
        Ok(out)
    }

    async fn encode_via_writer(codec: &dyn Codec, data: &[u8]) -> Vec<u8> {
        let mut writer = TransformWriter::new(Vec::new(), codec.encoder());
        // Uneven split exercises the pending-buffer flush path.
        for chunk in data.chunks(3000) {
            writer.write_all(chunk).await.unwrap();
        }
        writer.close().await.unwrap();
        writer.into_inner()
    }

    #[tokio::test]
    async fn test_roundtrip_both_adapters() {
        let mut payload = vec![0u8; 1 << 20];
        rand::thread_rng().fill_bytes(&mut payload);

        for codec in codecs() {
            let encoded_r = encode_via_reader(codec.as_ref(), &payload).await;
            let encoded_w = encode_via_writer(codec.as_ref(), &payload).await;
            assert_ne!(encoded_r, payload, "{} left bytes in the clear", codec.algorithm());

            for encoded in [encoded_r, encoded_w] {
                let decoded = decode_via_reader(codec.as_ref(), &encoded).await.unwrap();
                assert_eq!(decoded, payload, "{} roundtrip", codec.algorithm());
            }
        }
    }

    #[tokio::test]
    async fn test_roundtrip_boundary_sizes() {
        // Zero bytes, single byte, one exact frame, one frame plus one byte.
        for len in [0usize, 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE] {
            let payload = vec![0xA5u8; len];
            for codec in codecs() {
                let encoded = encode_via_reader(codec.as_ref(), &payload).await;
                let decoded = decode_via_reader(codec.as_ref(), &encoded).await.unwrap();
                assert_eq!(decoded, payload, "{} at len {}", codec.algorithm(), len);
            }
        }
    }

    #[tokio::test]
    async fn test_truncated_input_fails() {
        let payload = vec![1u8; 100_000];
        for codec in codecs() {
            let mut encoded = encode_via_reader(codec.as_ref(), &payload).await;
            encoded.truncate(encoded.len() / 2);
            let result = decode_via_reader(codec.as_ref(), &encoded).await;
            assert!(result.is_err(), "{} accepted truncated input", codec.algorithm());
        }
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_fails() {
        let codec = XChaChaCodec::new([9u8; 32]);
        let mut encoded = encode_via_reader(&codec, b"attested content").await;
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(decode_via_reader(&codec, &encoded).await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        let encoded = encode_via_reader(&XChaChaCodec::new([1u8; 32]), b"secret").await;
        let result = decode_via_reader(&XChaChaCodec::new([2u8; 32]), &encoded).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_push_after_finish_is_broken_pipe() {
        for codec in codecs() {
            let mut t = codec.encoder();
            let mut out = Vec::new();
            t.push(b"data", &mut out).unwrap();
            t.finish(&mut out).unwrap();
            let err = t.push(b"more", &mut out).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        }
    }

    #[tokio::test]
    async fn test_composed_layering() {
        // compress -> encrypt on encode; decrypt -> decompress on decode.
        let payload = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".repeat(1000);
        let gzip = GzipCodec::default();
        let chacha = XChaChaCodec::new([3u8; 32]);

        let compressed = TransformReader::new(Cursor::new(payload.clone()), gzip.encoder());
        let mut sealed = TransformReader::new(compressed, chacha.encoder());
        let mut stored = Vec::new();
        sealed.read_to_end(&mut stored).await.unwrap();

        let opened = TransformReader::new(Cursor::new(stored), chacha.decoder());
        let mut inflated = TransformReader::new(opened, gzip.decoder());
        let mut roundtrip = Vec::new();
        inflated.read_to_end(&mut roundtrip).await.unwrap();
        assert_eq!(roundtrip, payload);
    }
}
