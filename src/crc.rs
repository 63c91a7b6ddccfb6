//! File integrity checksum
//!
//! Non-reflected, MSB-first CRC-32 over polynomial `0x04C11DB7` with a zero
//! initial register and no final XOR. This is the variant the backup client
//! computes over the decrypted file, so any change here breaks every transfer.
//! It is NOT the reflected zlib CRC-32.

/// Generator polynomial
pub const POLYNOMIAL: u32 = 0x04C1_1DB7;

/// Lookup table, generated at compile time from [`POLYNOMIAL`]
static TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Compute the checksum of a complete buffer
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Incremental form of [`crc32`]
///
/// Feeding a buffer in any number of slices produces the same value as a
/// single call over the concatenation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32 {
    register: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Self { register: 0 }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = self.register;
        for &byte in bytes {
            let index = ((crc >> 24) ^ u32::from(byte)) & 0xFF;
            crc = (crc << 8) ^ TABLE[index as usize];
        }
        self.register = crc;
    }

    pub fn finalize(self) -> u32 {
        self.register
    }
}
