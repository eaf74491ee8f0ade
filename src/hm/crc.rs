//! # Link Checksums
//!
//! The two checksums used on the inverter link.
//!
//! **CRC-16/MODBUS**: polynomial 0x8005 (reflected 0xA001), initial value 0xFFFF,
//! no final XOR. Seals command/request payloads and the reassembled response.
//!
//! **CRC-8 (link)**: polynomial 0x101, initial value 0x00, MSB first, no final
//! XOR. Seals every individual radio frame.

/// Reflected CRC-16/MODBUS feedback constant
const CRC16_MODBUS_POLY: u16 = 0xA001;

/// CRC-16/MODBUS initial value
const CRC16_MODBUS_INIT: u16 = 0xFFFF;

/// Link CRC-8 polynomial (low byte of 0x101)
const CRC8_POLY: u8 = 0x01;

/// Calculate CRC-16/MODBUS over `data`
///
/// # Examples
///
/// ```
/// use hm_link::hm::crc::crc16_modbus;
///
/// assert_eq!(crc16_modbus(b"123456789"), 0x4B37);
/// ```
pub const fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc = CRC16_MODBUS_INIT;
    let mut i = 0;

    while i < data.len() {
        crc ^= data[i] as u16;

        let mut bit = 0;
        while bit < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_MODBUS_POLY;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }

        i += 1;
    }

    crc
}

/// Calculate the link CRC-8 over `data`
///
/// # Examples
///
/// ```
/// use hm_link::hm::crc::crc8_hm;
///
/// assert_eq!(crc8_hm(b"123456789"), 0x31);
/// ```
pub const fn crc8_hm(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    let mut i = 0;

    while i < data.len() {
        crc ^= data[i];

        let mut bit = 0;
        while bit < 8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
            bit += 1;
        }

        i += 1;
    }

    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        // CRC-16/MODBUS catalogue check value
        assert_eq!(crc16_modbus(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_crc16_modbus_frames() {
        // Read exception status, slave 2: CRC bytes 41 12 on the wire
        assert_eq!(crc16_modbus(&[0x02, 0x07]), 0x1241);

        // Read 10 holding registers from slave 1: CRC bytes C5 CD on the wire
        assert_eq!(crc16_modbus(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
    }

    #[test]
    fn test_crc16_empty_is_seed() {
        assert_eq!(crc16_modbus(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc16_command_payloads() {
        assert_eq!(crc16_modbus(&[0x00, 0x00]), 0xB001);
        assert_eq!(crc16_modbus(&[0x01, 0x00]), 0x2000);
    }

    #[test]
    fn test_crc8_check_value() {
        assert_eq!(crc8_hm(b"123456789"), 0x31);
    }

    #[test]
    fn test_crc8_empty() {
        assert_eq!(crc8_hm(&[]), 0x00);
    }

    #[test]
    fn test_crc8_single_byte() {
        // Polynomial 0x101 rotates the register, so one byte maps to itself
        assert_eq!(crc8_hm(&[0x00]), 0x00);
        assert_eq!(crc8_hm(&[0xA5]), 0xA5);
    }

    #[test]
    fn test_crc8_changes_with_data() {
        let data1 = [0x15, 0x83, 0x21, 0x22, 0x62];
        let data2 = [0x15, 0x83, 0x21, 0x22, 0x63];

        assert_ne!(crc8_hm(&data1), crc8_hm(&data2), "CRC should change when data changes");
    }

    #[test]
    fn test_crc8_of_sealed_frame_is_zero() {
        // Appending the checksum makes the running XOR cancel out
        let mut data = vec![0x95, 0x83, 0x21, 0x22, 0x62, 0x78, 0x56, 0x30, 0x01, 0x01];
        data.push(crc8_hm(&data));
        assert_eq!(crc8_hm(&data), 0x00);
    }
}
