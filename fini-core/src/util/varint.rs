use crate::error::{FiniError, Result};

/// Unsigned LEB128, as used by multiformats and CAR section framing.
pub fn put_uvarint(out: &mut Vec<u8>, mut x: u64) {
    while x >= 0x80 {
        out.push((x as u8) | 0x80);
        x >>= 7;
    }
    out.push(x as u8);
}

pub fn uvarint_len(mut x: u64) -> usize {
    let mut n = 1;
    while x >= 0x80 {
        x >>= 7;
        n += 1;
    }
    n
}

/// Decode from the front of `buf`; returns the value and bytes consumed.
pub fn get_uvarint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut x: u64 = 0;
    let mut s: u32 = 0;
    for (i, &byte) in buf.iter().enumerate().take(10) {
        if byte < 0x80 {
            x |= (byte as u64) << s;
            return Ok((x, i + 1));
        }
        x |= ((byte & 0x7f) as u64) << s;
        s += 7;
    }
    Err(FiniError::Format("truncated or overlong varint".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multibyte_values() {
        let mut out = Vec::new();
        put_uvarint(&mut out, 300);
        assert_eq!(out, vec![0xac, 0x02]);
        assert_eq!(uvarint_len(300), 2);
        assert_eq!(get_uvarint(&out).unwrap(), (300, 2));
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(get_uvarint(&[0x80, 0x80]).is_err());
        assert!(get_uvarint(&[]).is_err());
    }
}
