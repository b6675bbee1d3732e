//! Traditional PKWARE encryption ("ZipCrypto").
//!
//! Every encrypted entry starts with a 12-byte header. Its last byte is a
//! check value: the high byte of the entry's CRC-32, or the high byte of the
//! packed modification time when the sizes follow in a data descriptor.

use rand::RngCore;

use super::crc32::update_byte;
use crate::error::{ZipError, ZipResult};

pub const HEADER_LENGTH: usize = 12;

#[derive(Clone)]
struct Keys([u32; 3]);

impl Keys {
    fn new(password: &[u8]) -> Self {
        let mut keys = Keys([0x1234_5678, 0x2345_6789, 0x3456_7890]);
        for &byte in password {
            keys.update(byte);
        }
        keys
    }

    fn update(&mut self, byte: u8) {
        let [k0, k1, k2] = &mut self.0;
        *k0 = update_byte(*k0, byte);
        *k1 = k1
            .wrapping_add(*k0 & 0xff)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        *k2 = update_byte(*k2, (*k1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let temp = (self.0[2] | 2) & 0xffff;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte ^= self.stream_byte();
            self.update(*byte);
        }
    }

    fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data {
            let plain = *byte;
            *byte ^= self.stream_byte();
            self.update(plain);
        }
    }
}

pub struct ZipCryptoDecrypt {
    keys: Keys,
    verification: u8,
    header: Vec<u8>,
}

impl ZipCryptoDecrypt {
    pub fn new(password: &[u8], verification: u8) -> Self {
        Self {
            keys: Keys::new(password),
            verification,
            header: Vec::with_capacity(HEADER_LENGTH),
        }
    }

    /// Decrypts `data`, consuming the 12-byte header first.
    ///
    /// Fails with [`ZipError::InvalidPassword`] as soon as the header is
    /// complete and its check byte doesn't match.
    pub fn append(&mut self, data: &[u8]) -> ZipResult<Vec<u8>> {
        let mut data = data;
        if self.header.len() < HEADER_LENGTH {
            let take = (HEADER_LENGTH - self.header.len()).min(data.len());
            self.header.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.header.len() < HEADER_LENGTH {
                return Ok(Vec::new());
            }
            let mut header = std::mem::take(&mut self.header);
            self.keys.decrypt(&mut header);
            if header[HEADER_LENGTH - 1] != self.verification {
                return Err(ZipError::InvalidPassword);
            }
            self.header = header;
        }
        let mut output = data.to_vec();
        self.keys.decrypt(&mut output);
        Ok(output)
    }

    pub fn flush(self) -> ZipResult<()> {
        if self.header.len() < HEADER_LENGTH {
            return Err(ZipError::InvalidArchive("Truncated encryption header"));
        }
        Ok(())
    }
}

pub struct ZipCryptoEncrypt {
    keys: Keys,
    verification: u8,
    header_written: bool,
}

impl ZipCryptoEncrypt {
    pub fn new(password: &[u8], verification: u8) -> Self {
        Self {
            keys: Keys::new(password),
            verification,
            header_written: false,
        }
    }

    pub fn append(&mut self, data: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(data.len() + HEADER_LENGTH);
        if !self.header_written {
            let mut header = [0u8; HEADER_LENGTH];
            rand::thread_rng().fill_bytes(&mut header[..HEADER_LENGTH - 1]);
            header[HEADER_LENGTH - 1] = self.verification;
            self.keys.encrypt(&mut header);
            output.extend_from_slice(&header);
            self.header_written = true;
        }
        let start = output.len();
        output.extend_from_slice(data);
        self.keys.encrypt(&mut output[start..]);
        output
    }

    /// Emits the header if no data was ever appended.
    pub fn flush(mut self) -> Vec<u8> {
        if self.header_written {
            Vec::new()
        } else {
            self.append(&[])
        }
    }
}
