//! # CRC16-CCITT Implementation
//!
//! CRC-16-CCITT checksum used by fast (115200 baud) HoTT answers and by
//! every outgoing command frame.
//!
//! **Polynomial**: 0x1021 (x^16 + x^12 + x^5 + 1)
//! **Initial Value**: 0xFFFF, no reflection, no final XOR

/// CRC-16-CCITT polynomial
const CRC16_POLY: u16 = 0x1021;

/// CRC-16-CCITT initial value
const CRC16_INIT: u16 = 0xFFFF;

/// Precomputed CRC16 lookup table for fast calculation
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate CRC16-CCITT over `length` bytes of `buffer` starting at `start`
///
/// # Arguments
///
/// * `buffer` - Byte buffer holding the checksummed region
/// * `start` - Index of the first checksummed byte
/// * `length` - Number of bytes to include
///
/// # Returns
///
/// * `u16` - Calculated checksum, or the initial value if the range is empty
///   or falls outside `buffer`
///
/// # Examples
///
/// ```no_run
/// use hott_link::hott::crc::crc16_ccitt;
///
/// let crc = crc16_ccitt(b"123456789", 0, 9);
/// assert_eq!(crc, 0x29B1);
/// ```
pub fn crc16_ccitt(buffer: &[u8], start: usize, length: usize) -> u16 {
    let Some(region) = start
        .checked_add(length)
        .and_then(|end| buffer.get(start..end))
    else {
        return CRC16_INIT;
    };

    region.iter().fold(CRC16_INIT, |crc, &byte| {
        (crc << 8) ^ CRC16_TABLE[((crc >> 8) as u8 ^ byte) as usize]
    })
}

/// Check the two trailing checksum bytes of `buffer`
///
/// The checksum covers `buffer[start..len-2]` and is stored low byte first.
///
/// # Returns
///
/// * `bool` - true if the stored checksum matches, false otherwise (including
///   buffers too short to hold a checksum)
pub fn verify_checksum(buffer: &[u8], start: usize) -> bool {
    if buffer.len() < start + 2 {
        return false;
    }

    let crc = crc16_ccitt(buffer, start, buffer.len() - 2 - start);
    let [lo, hi] = crc.to_le_bytes();

    buffer[buffer.len() - 2] == lo && buffer[buffer.len() - 1] == hi
}

/// Calculate CRC16-CCITT bit by bit (slow, for verification)
///
/// Used primarily for testing the lookup table implementation.
#[allow(dead_code)]
fn crc16_ccitt_slow(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        crc ^= (byte as u16) << 8;

        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        // Standard CCITT-FALSE check value
        assert_eq!(crc16_ccitt(b"123456789", 0, 9), 0x29B1);
        assert_eq!(crc16_ccitt_slow(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_crc16_empty() {
        assert_eq!(crc16_ccitt(&[], 0, 0), CRC16_INIT);
        assert_eq!(crc16_ccitt(&[0x01, 0x02], 1, 0), CRC16_INIT);
    }

    #[test]
    fn test_crc16_out_of_range_does_not_panic() {
        let data = [0x00u8; 4];
        assert_eq!(crc16_ccitt(&data, 3, 10), CRC16_INIT);
        assert_eq!(crc16_ccitt(&data, usize::MAX, 2), CRC16_INIT);
    }

    #[test]
    fn test_crc16_offset_window() {
        let data = b"xx123456789yy";
        assert_eq!(crc16_ccitt(data, 2, 9), 0x29B1, "CRC must only cover the requested window");
    }

    #[test]
    fn test_crc16_lookup_table_matches_slow() {
        let test_data = [
            vec![0x01, 0x02, 0x03],
            vec![0xFF, 0xFE, 0xFD],
            vec![0x00, 0x00, 0x04, 0x34],
            vec![0x00; 57],
            vec![0xFF; 10],
        ];

        for data in test_data.iter() {
            assert_eq!(
                crc16_ccitt(data, 0, data.len()),
                crc16_ccitt_slow(data),
                "CRC mismatch for data: {:?}",
                data
            );
        }
    }

    #[test]
    fn test_verify_checksum() {
        let mut frame = vec![0x00, 0x01, 0xFE, 0x00, 0x00, 0x04, 0x34];
        let [lo, hi] = crc16_ccitt(&frame, 3, 4).to_le_bytes();
        frame.push(lo);
        frame.push(hi);

        assert!(verify_checksum(&frame, 3));

        frame[5] ^= 0x01;
        assert!(!verify_checksum(&frame, 3), "corrupted payload must fail the check");
    }

    #[test]
    fn test_verify_checksum_swapped_bytes_fail() {
        let mut frame = b"123456789".to_vec();
        frame.extend_from_slice(&[0x29, 0xB1]); // high byte first
        assert!(!verify_checksum(&frame, 0), "checksum is stored low byte first");

        let len = frame.len();
        frame.swap(len - 2, len - 1);
        assert!(verify_checksum(&frame, 0));
    }

    #[test]
    fn test_verify_checksum_short_buffer() {
        assert!(!verify_checksum(&[], 0));
        assert!(!verify_checksum(&[0xFF], 0));
        assert!(!verify_checksum(&[0x00, 0x01, 0x02], 3));
    }
}
