//! Length-prefix framing for byte-stream transports
//!
//! Every datagram carried over a file or pipe is preceded by a 4-byte
//! big-endian unsigned length:
//!
//! ```text
//! ┌──────────────────┬────────────────────┐
//! │ Length (4 bytes) │ Payload (variable) │
//! │ Big-endian u32   │ 0..=u32::MAX bytes │
//! └──────────────────┴────────────────────┘
//! ```
//!
//! Consecutive datagrams are concatenated with no separator. A zero-length
//! payload is legal and carries an all-zero prefix.

use crate::error::{Error, Result};

/// Length of the big-endian datagram-length prefix
pub const PREFIX_LEN: usize = 4;

/// Encode a payload length as a 4-byte big-endian prefix.
///
/// Fails with [`Error::LengthOverflow`] for lengths above `u32::MAX`.
pub fn encode_prefix(len: usize) -> Result<[u8; PREFIX_LEN]> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| Error::LengthOverflow(len))
}

/// Decode a 4-byte big-endian prefix into a payload length.
pub fn decode_prefix(bytes: [u8; PREFIX_LEN]) -> usize {
    u32::from_be_bytes(bytes) as usize
}

/// Total byte length of a scatter list.
pub fn total_len<'a, I>(segments: I) -> usize
where
    I: IntoIterator<Item = &'a [u8]>,
{
    segments.into_iter().map(<[u8]>::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_roundtrip() {
        for len in [0usize, 1, 3, 1472, 65_535, u32::MAX as usize] {
            let prefix = encode_prefix(len).unwrap();
            assert_eq!(decode_prefix(prefix), len);
        }
    }

    #[test]
    fn test_prefix_is_big_endian() {
        assert_eq!(encode_prefix(3).unwrap(), [0x00, 0x00, 0x00, 0x03]);
        assert_eq!(encode_prefix(0x01020304).unwrap(), [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_zero_length_prefix() {
        assert_eq!(encode_prefix(0).unwrap(), [0, 0, 0, 0]);
        assert_eq!(decode_prefix([0, 0, 0, 0]), 0);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_prefix_overflow() {
        let too_big = u32::MAX as usize + 1;
        assert!(matches!(
            encode_prefix(too_big),
            Err(Error::LengthOverflow(n)) if n == too_big
        ));
    }

    #[test]
    fn test_total_len() {
        let a: &[u8] = b"hello";
        let b: &[u8] = b"";
        let c: &[u8] = b"world!";
        assert_eq!(total_len([a, b, c]), 11);
        assert_eq!(total_len(std::iter::empty::<&[u8]>()), 0);
    }
}
