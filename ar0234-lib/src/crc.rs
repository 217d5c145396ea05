//! Ar0234 checksum file
//!
//! CRC-16 used by the bootloader and the upgrader. Polynomial 0x1021 shifted
//! MSB first without reflection or final xor; with the 0xFFFF seed this is the
//! CRC-16/IBM-3740 (CCITT-FALSE) catalogue algorithm

use super::definitions::INITIAL_CRC;
use crc::{Crc, Digest, CRC_16_IBM_3740};

pub static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// CRC of `data` with the device seed
pub fn crc16(data: &[u8]) -> u16 {
    crc16_with_seed(INITIAL_CRC, data)
}

/// Continue a CRC computation from a previous value
pub fn crc16_with_seed(seed: u16, data: &[u8]) -> u16 {
    let mut digest = CRC16.digest_with_initial(seed);
    digest.update(data);
    digest.finalize()
}

/// Incremental CRC over data arriving in chunks
pub fn digest() -> Digest<'static, u16> {
    CRC16.digest()
}
