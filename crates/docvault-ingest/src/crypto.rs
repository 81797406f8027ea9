//! Per-user streaming encryption of stored files.
//!
//! AES-256-CTR keyed by SHA-256 of the owner's private key. Every encrypted
//! stream starts with a 16-byte random IV; the keystream is applied chunk by
//! chunk so memory use does not depend on file size.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use aes::Aes256;
use ctr::cipher::generic_array::GenericArray;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use sha2::{Digest, Sha256};

use docvault_core::{Error, Result};

type Aes256Ctr = Ctr128BE<Aes256>;

/// Length of the IV header written before the ciphertext.
pub const IV_LEN: usize = 16;

const KEY_SALT: &[u8] = b"docvault-file-key-v1";

/// Hands out the cipher for a given owner key.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncryptionProvider;

impl EncryptionProvider {
    pub fn cipher_for(&self, private_key: &str) -> Result<FileCipher> {
        if private_key.is_empty() {
            return Err(Error::Encryption("empty private key".into()));
        }
        let mut hasher = Sha256::new();
        hasher.update(KEY_SALT);
        hasher.update(private_key.as_bytes());
        Ok(FileCipher {
            key: hasher.finalize().into(),
        })
    }
}

/// Symmetric cipher bound to one owner key.
#[derive(Clone)]
pub struct FileCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for FileCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCipher").finish_non_exhaustive()
    }
}

impl FileCipher {
    fn keystream(&self, iv: &[u8; IV_LEN]) -> Aes256Ctr {
        Aes256Ctr::new(GenericArray::from_slice(&self.key), GenericArray::from_slice(iv))
    }

    /// Stream `reader` through the cipher into `writer`. Returns plaintext bytes copied.
    pub fn encrypt<R: Read, W: Write>(&self, reader: R, mut writer: W) -> Result<u64> {
        let iv: [u8; IV_LEN] = rand::random();
        writer
            .write_all(&iv)
            .map_err(|e| Error::Encryption(format!("write IV: {}", e)))?;
        let mut encrypting = CipherReader::new(reader, self.keystream(&iv));
        let copied = io::copy(&mut encrypting, &mut writer)
            .map_err(|e| Error::Encryption(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| Error::Encryption(e.to_string()))?;
        Ok(copied)
    }

    /// Encrypt the file at `source` into a new file at `dest`.
    pub fn encrypt_to_path(&self, source: &Path, dest: &Path) -> Result<u64> {
        let input = File::open(source)
            .map_err(|e| Error::Encryption(format!("open {}: {}", source.display(), e)))?;
        let output = File::create(dest)
            .map_err(|e| Error::Encryption(format!("create {}: {}", dest.display(), e)))?;
        self.encrypt(input, BufWriter::new(output))
    }

    /// Read the IV header from `reader` and return a decrypting reader over the rest.
    pub fn decrypt<R: Read>(&self, mut reader: R) -> Result<CipherReader<R>> {
        let mut iv = [0u8; IV_LEN];
        reader
            .read_exact(&mut iv)
            .map_err(|e| Error::Encryption(format!("read IV: {}", e)))?;
        Ok(CipherReader::new(reader, self.keystream(&iv)))
    }
}

/// Applies a CTR keystream to everything read through it.
pub struct CipherReader<R> {
    inner: R,
    cipher: Aes256Ctr,
}

impl<R: Read> CipherReader<R> {
    fn new(inner: R, cipher: Aes256Ctr) -> Self {
        Self { inner, cipher }
    }
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply_keystream(&mut buf[..n]);
        Ok(n)
    }
}
