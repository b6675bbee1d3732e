//! CRC-32 accumulation for entry signatures and the ZipCrypto key schedule.

use crc32fast::Hasher;

/// Running CRC-32 over a byte stream.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn get(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

/// CRC-32 of a whole buffer.
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// One raw table step of the CRC-32 register, without the pre/post inversion.
///
/// `crc32fast` works on finalized values, so invert on the way in and out.
pub fn update_byte(register: u32, byte: u8) -> u32 {
    let mut hasher = Hasher::new_with_initial(!register);
    hasher.update(&[byte]);
    !hasher.finalize()
}
