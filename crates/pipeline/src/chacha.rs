use std::io;

use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::stream::{DecryptorBE32, EncryptorBE32};
use chacha20poly1305::{Key, XChaCha20Poly1305};
use rand::RngCore;

use crate::{Codec, Transform, CHUNK_SIZE};

pub const ALGORITHM: &str = "xchacha20poly1305";

// Stream nonce for the BE32 construction over XChaCha20-Poly1305: the 24-byte
// AEAD nonce minus a 4-byte counter and 1-byte last-block flag.
const NONCE_SIZE: usize = 19;
const TAG_SIZE: usize = 16;
// On-wire frame: one full plaintext chunk plus its authentication tag.
const FRAME_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

/// Chunked AEAD encryption codec over XChaCha20-Poly1305.
///
/// Ciphertext layout: a random 19-byte stream nonce, then one authenticated
/// frame per 8 KiB plaintext chunk, then a final (possibly empty) frame
/// sealed with the last-block flag. The key is supplied by the caller; key
/// wrapping and rotation live outside this crate.
pub struct XChaChaCodec {
    key: [u8; 32],
}

impl XChaChaCodec {
    pub fn new(key: [u8; 32]) -> Self {
        XChaChaCodec { key }
    }
}

impl Codec for XChaChaCodec {
    fn algorithm(&self) -> &str {
        ALGORITHM
    }

    fn encoder(&self) -> Box<dyn Transform> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let cipher = EncryptorBE32::new(
            Key::from_slice(&self.key),
            GenericArray::from_slice(&nonce),
        );
        Box::new(Seal {
            cipher: Some(cipher),
            nonce,
            nonce_sent: false,
            buf: Vec::new(),
        })
    }

    fn decoder(&self) -> Box<dyn Transform> {
        Box::new(Open {
            key: self.key,
            cipher: None,
            buf: Vec::new(),
            finished: false,
        })
    }
}

fn bad_seal() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "ciphertext authentication failed")
}

struct Seal {
    cipher: Option<EncryptorBE32<XChaCha20Poly1305>>,
    nonce: [u8; NONCE_SIZE],
    nonce_sent: bool,
    buf: Vec<u8>,
}

impl Transform for Seal {
    fn push(&mut self, input: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        let cipher = self
            .cipher
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        if !self.nonce_sent {
            out.extend_from_slice(&self.nonce);
            self.nonce_sent = true;
        }
        self.buf.extend_from_slice(input);
        while self.buf.len() >= CHUNK_SIZE {
            let frame = cipher
                .encrypt_next(&self.buf[..CHUNK_SIZE])
                .map_err(|_| bad_seal())?;
            out.extend_from_slice(&frame);
            self.buf.drain(..CHUNK_SIZE);
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> io::Result<()> {
        let cipher = self
            .cipher
            .take()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        if !self.nonce_sent {
            out.extend_from_slice(&self.nonce);
            self.nonce_sent = true;
        }
        let frame = cipher
            .encrypt_last(&self.buf[..])
            .map_err(|_| bad_seal())?;
        out.extend_from_slice(&frame);
        self.buf.clear();
        Ok(())
    }
}

struct Open {
    key: [u8; 32],
    cipher: Option<DecryptorBE32<XChaCha20Poly1305>>,
    buf: Vec<u8>,
    finished: bool,
}

impl Transform for Open {
    fn push(&mut self, input: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        if self.finished {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.buf.extend_from_slice(input);
        if self.cipher.is_none() && self.buf.len() >= NONCE_SIZE {
            self.cipher = Some(DecryptorBE32::new(
                Key::from_slice(&self.key),
                GenericArray::from_slice(&self.buf[..NONCE_SIZE]),
            ));
            self.buf.drain(..NONCE_SIZE);
        }
        if let Some(cipher) = self.cipher.as_mut() {
            // Frames beyond the first FRAME_SIZE bytes are necessarily
            // non-final; the final frame is held for decrypt_last at finish.
            while self.buf.len() > FRAME_SIZE {
                let plain = cipher
                    .decrypt_next(&self.buf[..FRAME_SIZE])
                    .map_err(|_| bad_seal())?;
                out.extend_from_slice(&plain);
                self.buf.drain(..FRAME_SIZE);
            }
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> io::Result<()> {
        if self.finished {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.finished = true;
        match self.cipher.take() {
            Some(cipher) => {
                let plain = cipher
                    .decrypt_last(&self.buf[..])
                    .map_err(|_| bad_seal())?;
                out.extend_from_slice(&plain);
                self.buf.clear();
                Ok(())
            }
            None if self.buf.is_empty() => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "ciphertext ends before the stream nonce",
            )),
        }
    }
}
