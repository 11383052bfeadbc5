//! # Header Checksum
//!
//! CRC-16/X-25: CCITT polynomial 0x1021 processed LSB first (0x8408),
//! initial value 0xFFFF, final XOR 0xFFFF. Table driven, table built at
//! compile time.

const POLY_REFLECTED: u16 = 0x8408;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLY_REFLECTED
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-16 of `data`.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let crc = data.iter().fold(0xFFFF_u16, |crc, byte| {
        (crc >> 8) ^ TABLE[usize::from((crc ^ u16::from(*byte)) & 0xFF)]
    });
    !crc
}
