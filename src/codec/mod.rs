//! The per-entry transform pipeline.
//!
//! A [`Codec`] chains the optional stages for one entry behind a single
//! `append`/`flush` pair:
//!
//! - decoding runs decrypt, then inflate, then accumulates CRC-32 over the plaintext
//! - encoding accumulates CRC-32 over the plaintext, then deflates, then encrypts

pub mod aes;
pub mod crc32;
pub mod deflate;
pub mod zipcrypto;

pub use self::aes::AesStrength;

use self::aes::{AesDecrypt, AesEncrypt};
use self::crc32::Crc32;
use self::deflate::{Compressor, Decompressor};
use self::zipcrypto::{ZipCryptoDecrypt, ZipCryptoEncrypt};
use crate::error::{ZipError, ZipResult};

/// Which cipher envelope wraps the entry data, with its key material.
#[derive(Clone, Default)]
pub enum Encryption {
    #[default]
    None,
    ZipCrypto {
        password: Vec<u8>,
        /// Check byte stored as the last byte of the 12-byte header
        verification: u8,
    },
    Aes {
        password: Vec<u8>,
        strength: AesStrength,
    },
}

impl Encryption {
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Encryption::None)
    }
}

impl std::fmt::Debug for Encryption {
    // Never print passwords
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encryption::None => write!(f, "None"),
            Encryption::ZipCrypto { .. } => write!(f, "ZipCrypto"),
            Encryption::Aes { strength, .. } => write!(f, "Aes({:?})", strength),
        }
    }
}

/// Settings for writing one entry
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    /// Deflate level, or `None` to store
    pub level: Option<u32>,
    pub encryption: Encryption,
    /// Compute the CRC-32 of the plaintext
    pub signed: bool,
}

/// Settings for reading one entry
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    pub compressed: bool,
    pub encryption: Encryption,
    /// CRC-32 the plaintext must match, if it should be checked
    pub signature: Option<u32>,
}

/// Tail bytes and the CRC-32 computed over the plaintext
#[derive(Debug, Default)]
pub struct CodecOutput {
    pub data: Vec<u8>,
    pub signature: Option<u32>,
}

enum Cipher {
    None,
    ZipCryptoEncrypt(ZipCryptoEncrypt),
    ZipCryptoDecrypt(ZipCryptoDecrypt),
    AesEncrypt(AesEncrypt),
    AesDecrypt(AesDecrypt),
}

impl Cipher {
    fn append(&mut self, data: Vec<u8>) -> ZipResult<Vec<u8>> {
        Ok(match self {
            Cipher::None => data,
            Cipher::ZipCryptoEncrypt(c) => c.append(&data),
            Cipher::ZipCryptoDecrypt(c) => c.append(&data)?,
            Cipher::AesEncrypt(c) => c.append(&data),
            Cipher::AesDecrypt(c) => c.append(&data)?,
        })
    }

    /// Trailing bytes on encode; password/tag verification on decode.
    fn flush(self) -> ZipResult<Vec<u8>> {
        match self {
            Cipher::None => Ok(Vec::new()),
            Cipher::ZipCryptoEncrypt(c) => Ok(c.flush()),
            Cipher::ZipCryptoDecrypt(c) => c.flush().map(|_| Vec::new()),
            Cipher::AesEncrypt(c) => Ok(c.flush()),
            Cipher::AesDecrypt(c) => c.flush().map(|_| Vec::new()),
        }
    }
}

enum Deflate {
    None,
    Compress(Compressor),
    Decompress(Decompressor),
}

impl Deflate {
    fn append(&mut self, data: Vec<u8>) -> ZipResult<Vec<u8>> {
        match self {
            Deflate::None => Ok(data),
            Deflate::Compress(c) => c.append(&data),
            Deflate::Decompress(d) => d.append(&data),
        }
    }

    fn flush(self) -> ZipResult<Vec<u8>> {
        match self {
            Deflate::None => Ok(Vec::new()),
            Deflate::Compress(c) => c.flush(),
            Deflate::Decompress(d) => d.flush(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Encode,
    Decode,
}

/// One entry's data transform: CRC-32, deflate and a cipher, in the order
/// the direction needs.
pub struct Codec {
    direction: Direction,
    cipher: Cipher,
    deflate: Deflate,
    crc: Option<Crc32>,
    expected: Option<u32>,
}

impl Codec {
    /// Build an encoder: CRC-32 over the plain data, then deflate, then the
    /// cipher.
    ///
    /// # Arguments
    ///
    /// * `options` - Level (`None` stores), encryption, and whether to
    ///   compute the CRC-32
    ///
    /// # Errors
    ///
    /// Returns an error if the AES keys can't be derived.
    pub fn encoder(options: EncodeOptions) -> ZipResult<Self> {
        let cipher = match options.encryption {
            Encryption::None => Cipher::None,
            Encryption::ZipCrypto {
                password,
                verification,
            } => Cipher::ZipCryptoEncrypt(ZipCryptoEncrypt::new(&password, verification)),
            Encryption::Aes { password, strength } => {
                Cipher::AesEncrypt(AesEncrypt::new(&password, strength)?)
            }
        };
        Ok(Self {
            direction: Direction::Encode,
            cipher,
            deflate: match options.level {
                Some(level) => Deflate::Compress(Compressor::new(level)),
                None => Deflate::None,
            },
            crc: options.signed.then(Crc32::new),
            expected: None,
        })
    }

    /// Build a decoder: cipher, then inflate, then the CRC-32 check against
    /// `options.signature` if one is given.
    pub fn decoder(options: DecodeOptions) -> Self {
        let cipher = match options.encryption {
            Encryption::None => Cipher::None,
            Encryption::ZipCrypto {
                password,
                verification,
            } => Cipher::ZipCryptoDecrypt(ZipCryptoDecrypt::new(&password, verification)),
            Encryption::Aes { password, strength } => {
                Cipher::AesDecrypt(AesDecrypt::new(&password, strength))
            }
        };
        Self {
            direction: Direction::Decode,
            cipher,
            deflate: if options.compressed {
                Deflate::Decompress(Decompressor::new())
            } else {
                Deflate::None
            },
            crc: options.signature.map(|_| Crc32::new()),
            expected: options.signature,
        }
    }

    /// True when the codec would hand every chunk back unchanged.
    pub fn is_passthrough(&self) -> bool {
        matches!(self.cipher, Cipher::None)
            && matches!(self.deflate, Deflate::None)
            && self.crc.is_none()
    }

    /// Push one chunk through every stage.
    pub fn append(&mut self, data: &[u8]) -> ZipResult<Vec<u8>> {
        match self.direction {
            Direction::Encode => {
                if let Some(crc) = &mut self.crc {
                    crc.append(data);
                }
                let compressed = self.deflate.append(data.to_vec())?;
                self.cipher.append(compressed)
            }
            Direction::Decode => {
                let decrypted = self.cipher.append(data.to_vec())?;
                let plain = self.deflate.append(decrypted)?;
                if let Some(crc) = &mut self.crc {
                    crc.append(&plain);
                }
                Ok(plain)
            }
        }
    }

    /// Finishes every stage and checks the result.
    ///
    /// On decode, a bad authentication code or a CRC-32 that differs from
    /// the expected one fails with [`ZipError::InvalidSignature`].
    pub fn flush(self) -> ZipResult<CodecOutput> {
        let Codec {
            direction,
            mut cipher,
            deflate,
            mut crc,
            expected,
        } = self;

        let data = match direction {
            Direction::Encode => {
                let tail = deflate.flush()?;
                let mut data = cipher.append(tail)?;
                data.extend(cipher.flush()?);
                data
            }
            Direction::Decode => {
                cipher.flush()?;
                let data = deflate.flush()?;
                if let Some(crc) = &mut crc {
                    crc.append(&data);
                }
                data
            }
        };

        let signature = crc.map(|crc| crc.get());
        if let (Some(expected), Some(actual)) = (expected, signature) {
            if expected != actual {
                log::debug!(
                    "CRC-32 mismatch: expected {:08x}, computed {:08x}",
                    expected,
                    actual
                );
                return Err(ZipError::InvalidSignature);
            }
        }
        Ok(CodecOutput { data, signature })
    }
}
