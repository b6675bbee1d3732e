//! WinZip AES encryption (AE-1 / AE-2).
//!
//! Layout of an encrypted entry: salt, 2-byte password verifier, AES-CTR
//! ciphertext, then the first 10 bytes of an HMAC-SHA1 over the ciphertext.
//! The counter is little-endian and starts at 1 with no nonce.

use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use log::trace;
use rand::RngCore;
use sha1::Sha1;

use crate::error::{ZipError, ZipResult};

type HmacSha1 = Hmac<Sha1>;

pub const PASSWORD_VERIFIER_LENGTH: usize = 2;
pub const AUTH_CODE_LENGTH: usize = 10;
const ITERATION_COUNT: u32 = 1000;
const COUNTER_START: [u8; 16] = [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// Key strength as stored in the AES extra field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesStrength {
    Aes128 = 1,
    Aes192 = 2,
    Aes256 = 3,
}

impl AesStrength {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AesStrength::Aes128),
            2 => Some(AesStrength::Aes192),
            3 => Some(AesStrength::Aes256),
            _ => None,
        }
    }

    pub fn salt_length(self) -> usize {
        match self {
            AesStrength::Aes128 => 8,
            AesStrength::Aes192 => 12,
            AesStrength::Aes256 => 16,
        }
    }

    pub fn key_length(self) -> usize {
        match self {
            AesStrength::Aes128 => 16,
            AesStrength::Aes192 => 24,
            AesStrength::Aes256 => 32,
        }
    }

    /// Bytes the envelope adds around the ciphertext
    pub fn overhead(self) -> usize {
        self.salt_length() + PASSWORD_VERIFIER_LENGTH + AUTH_CODE_LENGTH
    }
}

enum Keystream {
    Aes128(ctr::Ctr128LE<aes::Aes128>),
    Aes192(ctr::Ctr128LE<aes::Aes192>),
    Aes256(ctr::Ctr128LE<aes::Aes256>),
}

impl Keystream {
    fn new(strength: AesStrength, key: &[u8]) -> ZipResult<Self> {
        let bad_key = |_| ZipError::UnsupportedArchive("Invalid AES key length".into());
        Ok(match strength {
            AesStrength::Aes128 => Keystream::Aes128(
                ctr::Ctr128LE::new_from_slices(key, &COUNTER_START).map_err(bad_key)?,
            ),
            AesStrength::Aes192 => Keystream::Aes192(
                ctr::Ctr128LE::new_from_slices(key, &COUNTER_START).map_err(bad_key)?,
            ),
            AesStrength::Aes256 => Keystream::Aes256(
                ctr::Ctr128LE::new_from_slices(key, &COUNTER_START).map_err(bad_key)?,
            ),
        })
    }

    fn apply(&mut self, data: &mut [u8]) {
        match self {
            Keystream::Aes128(c) => c.apply_keystream(data),
            Keystream::Aes192(c) => c.apply_keystream(data),
            Keystream::Aes256(c) => c.apply_keystream(data),
        }
    }
}

struct Keys {
    keystream: Keystream,
    mac: HmacSha1,
    verifier: [u8; PASSWORD_VERIFIER_LENGTH],
}

fn derive_keys(password: &[u8], salt: &[u8], strength: AesStrength) -> ZipResult<Keys> {
    let key_length = strength.key_length();
    let mut derived = vec![0u8; 2 * key_length + PASSWORD_VERIFIER_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, ITERATION_COUNT, &mut derived);

    let keystream = Keystream::new(strength, &derived[..key_length])?;
    let mac = HmacSha1::new_from_slice(&derived[key_length..2 * key_length])
        .map_err(|_| ZipError::UnsupportedArchive("Invalid HMAC key length".into()))?;
    let mut verifier = [0u8; PASSWORD_VERIFIER_LENGTH];
    verifier.copy_from_slice(&derived[2 * key_length..]);
    Ok(Keys {
        keystream,
        mac,
        verifier,
    })
}

/// Decrypting side. The last 10 bytes seen are always held back, since
/// they may turn out to be the authentication code.
pub struct AesDecrypt {
    password: Vec<u8>,
    strength: AesStrength,
    preamble: Vec<u8>,
    keys: Option<Keys>,
    pending: Vec<u8>,
}

impl AesDecrypt {
    pub fn new(password: &[u8], strength: AesStrength) -> Self {
        Self {
            password: password.to_vec(),
            strength,
            preamble: Vec::new(),
            keys: None,
            pending: Vec::new(),
        }
    }

    pub fn append(&mut self, data: &[u8]) -> ZipResult<Vec<u8>> {
        let mut data = data;
        if self.keys.is_none() {
            let wanted = self.strength.salt_length() + PASSWORD_VERIFIER_LENGTH;
            let take = (wanted - self.preamble.len()).min(data.len());
            self.preamble.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.preamble.len() < wanted {
                return Ok(Vec::new());
            }
            let (salt, verifier) = self.preamble.split_at(self.strength.salt_length());
            let keys = derive_keys(&self.password, salt, self.strength)?;
            if keys.verifier != verifier {
                return Err(ZipError::InvalidPassword);
            }
            trace!("AES password verified ({:?})", self.strength);
            self.keys = Some(keys);
        }
        let keys = match self.keys.as_mut() {
            Some(keys) => keys,
            None => return Ok(Vec::new()),
        };

        self.pending.extend_from_slice(data);
        if self.pending.len() <= AUTH_CODE_LENGTH {
            return Ok(Vec::new());
        }
        let ready = self.pending.len() - AUTH_CODE_LENGTH;
        let mut output: Vec<u8> = self.pending.drain(..ready).collect();
        keys.mac.update(&output);
        keys.keystream.apply(&mut output);
        Ok(output)
    }

    /// Checks the authentication code against everything decrypted.
    pub fn flush(self) -> ZipResult<()> {
        let keys = self
            .keys
            .ok_or(ZipError::InvalidArchive("Truncated AES header"))?;
        if self.pending.len() != AUTH_CODE_LENGTH {
            return Err(ZipError::InvalidArchive("Truncated AES authentication code"));
        }
        keys.mac
            .verify_truncated_left(&self.pending)
            .map_err(|_| ZipError::InvalidSignature)
    }
}

/// Encrypting side with a fresh random salt per entry.
pub struct AesEncrypt {
    keys: Keys,
    preamble: Option<Vec<u8>>,
}

impl AesEncrypt {
    pub fn new(password: &[u8], strength: AesStrength) -> ZipResult<Self> {
        let mut salt = vec![0u8; strength.salt_length()];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(password, strength, salt)
    }

    fn with_salt(password: &[u8], strength: AesStrength, salt: Vec<u8>) -> ZipResult<Self> {
        let keys = derive_keys(password, &salt, strength)?;
        let mut preamble = salt;
        preamble.extend_from_slice(&keys.verifier);
        Ok(Self {
            keys,
            preamble: Some(preamble),
        })
    }

    pub fn append(&mut self, data: &[u8]) -> Vec<u8> {
        let mut output = self.preamble.take().unwrap_or_default();
        let start = output.len();
        output.extend_from_slice(data);
        self.keys.keystream.apply(&mut output[start..]);
        self.keys.mac.update(&output[start..]);
        output
    }

    /// Emits the preamble (if nothing was appended) and the authentication code.
    pub fn flush(mut self) -> Vec<u8> {
        let mut output = self.preamble.take().unwrap_or_default();
        let tag = self.keys.mac.finalize().into_bytes();
        output.extend_from_slice(&tag[..AUTH_CODE_LENGTH]);
        output
    }
}
