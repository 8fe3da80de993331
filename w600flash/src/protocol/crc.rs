//! CRC16 checksums used on the wire.
//!
//! Both variants use the CCITT polynomial `0x1021`, MSB first, no reflection.
//! They differ only in the initial value:
//!
//! - XMODEM (init `0x0000`): trailing checksum of every 1024-byte block.
//! - CCITT-FALSE (init `0xFFFF`): checksum field of the baud-switch frames.

const POLY: u16 = 0x1021;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
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

fn crc16(init: u16, data: &[u8]) -> u16 {
    data.iter().fold(init, |crc, &b| {
        (crc << 8) ^ TABLE[usize::from((crc >> 8) as u8 ^ b)]
    })
}

/// CRC16-XMODEM of `data`.
#[must_use]
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    crc16(0x0000, data)
}

/// CRC16-CCITT-FALSE of `data`.
#[must_use]
pub fn crc16_ccitt_false(data: &[u8]) -> u16 {
    crc16(0xFFFF, data)
}
