//! LEB128-style variable length integers and the zig-zag mapping used for
//! signed values.

use bytes::BufMut;

use crate::error::{Error, Result};

/// Maximum number of bytes a varint of `bits` width may occupy.
#[must_use]
pub const fn max_len(bits: u32) -> usize {
    (bits as usize).div_ceil(7)
}

/// Append `value` as a varint: seven bits per byte, least significant group
/// first, high bit set on every byte but the last.
pub fn encode(mut value: u128, out: &mut impl BufMut) {
    loop {
        let low = (value & 0x7f) as u8;
        if value < 0x80 {
            out.put_u8(low);
            return;
        }
        out.put_u8(low | 0x80);
        value >>= 7;
    }
}

/// Decode a varint that must fit in `bits` bits. Returns the value and the
/// number of bytes consumed.
///
/// # Errors
/// Fails on a truncated buffer, or when the encoding is longer than the
/// width allows or carries bits beyond it.
pub fn decode(input: &[u8], bits: u32) -> Result<(u128, usize)> {
    let limit = max_len(bits);
    let mut value: u128 = 0;
    for (index, &byte) in input.iter().enumerate() {
        if index >= limit {
            return Err(Error::VarintOverflow { bits });
        }
        let shift = 7 * u32::try_from(index).map_err(|_| Error::VarintOverflow { bits })?;
        let group = u128::from(byte & 0x7f);
        if shift + 7 > bits && group >> (bits - shift) != 0 {
            return Err(Error::VarintOverflow { bits });
        }
        value |= group << shift;
        if byte & 0x80 == 0 {
            return Ok((value, index + 1));
        }
    }
    Err(Error::UnexpectedEof)
}

#[must_use]
pub const fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[must_use]
pub const fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

#[must_use]
pub const fn zigzag_encode_128(n: i128) -> u128 {
    ((n << 1) ^ (n >> 127)) as u128
}

#[must_use]
pub const fn zigzag_decode_128(n: u128) -> i128 {
    ((n >> 1) as i128) ^ -((n & 1) as i128)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: u128) -> Vec<u8> {
        let mut out = Vec::new();
        encode(value, &mut out);
        out
    }

    #[test]
    fn single_byte_boundary() {
        assert_eq!(encoded(0), [0x00]);
        assert_eq!(encoded(127), [0x7f]);
        assert_eq!(encoded(128), [0x80, 0x01]);
        assert_eq!(encoded(300), [0xac, 0x02]);
    }

    #[test]
    fn max_widths_use_max_len_bytes() {
        assert_eq!(encoded(u128::from(u16::MAX)).len(), max_len(16));
        assert_eq!(encoded(u128::from(u32::MAX)).len(), 5);
        assert_eq!(encoded(u128::from(u64::MAX)).len(), 10);
        assert_eq!(encoded(u128::MAX).len(), max_len(128));
    }

    #[test]
    fn decode_reports_consumed_bytes() {
        let (value, used) = decode(&[0x80, 0x01, 0xff], 32).expect("decode");
        assert_eq!(value, 128);
        assert_eq!(used, 2);
    }

    #[test]
    fn decode_rejects_truncated_and_overlong() {
        assert_eq!(decode(&[0x80], 32), Err(Error::UnexpectedEof));
        assert_eq!(decode(&[], 16), Err(Error::UnexpectedEof));
        // u32::MAX + 1 needs a 33rd bit.
        assert_eq!(
            decode(&[0x80, 0x80, 0x80, 0x80, 0x10], 32),
            Err(Error::VarintOverflow { bits: 32 })
        );
        assert_eq!(
            decode(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00], 32),
            Err(Error::VarintOverflow { bits: 32 })
        );
    }

    #[test]
    fn decode_accepts_full_width() {
        for bits in [16_u32, 32, 64, 128] {
            let max = if bits == 128 {
                u128::MAX
            } else {
                (1_u128 << bits) - 1
            };
            let (value, used) = decode(&encoded(max), bits).expect("decode max");
            assert_eq!(value, max);
            assert_eq!(used, max_len(bits));
        }
    }

    #[test]
    fn zigzag_maps_small_magnitudes_to_small_values() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        assert_eq!(zigzag_encode(i64::from(i32::MIN)), u64::from(u32::MAX));
        assert_eq!(zigzag_encode(i64::from(i32::MAX)), u64::from(u32::MAX) - 1);
    }

    #[test]
    fn zigzag_inverts_for_every_i32_edge() {
        for n in [i32::MIN, i32::MIN + 1, -65, -1, 0, 1, 64, i32::MAX - 1, i32::MAX] {
            let n = i64::from(n);
            assert_eq!(zigzag_decode(zigzag_encode(n)), n);
        }
        for n in [i64::MIN, i64::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(n)), n);
        }
        for n in [i128::MIN, -1, 0, i128::MAX] {
            assert_eq!(zigzag_decode_128(zigzag_encode_128(n)), n);
        }
    }
}
