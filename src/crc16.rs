/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no final XOR.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &b in data {
        crc ^= u16::from(b) << 8;

        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

/// Checksum rendered the way the payload carries it: 4 uppercase hex digits.
pub fn crc16_hex(data: &[u8]) -> String {
    format!("{:04X}", crc16(data))
}
