/*!
CRC-16/MODBUS checksum used by the frame trailer.
*/

/// Reflected polynomial for CRC-16/MODBUS
pub const POLYNOMIAL: u16 = 0xA001;

/// Initial register value
pub const INITIAL: u16 = 0xFFFF;

/// Compute the CRC-16/MODBUS checksum of `data`
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = INITIAL;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
