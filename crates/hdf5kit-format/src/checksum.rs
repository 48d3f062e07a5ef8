//! Metadata checksum: Bob Jenkins' lookup3 `hashlittle`, as used for
//! B-tree v2 headers and nodes.

use crate::error::FormatError;

/// Jenkins lookup3 checksum of `data` with initial value 0.
pub fn jenkins_lookup3(data: &[u8]) -> u32 {
    hashlittle(data, 0)
}

/// Compare the checksum stored in the last four bytes of `block` against
/// the checksum of everything before it.
pub fn verify_trailing(block: &[u8]) -> Result<(), FormatError> {
    if block.len() < 4 {
        return Err(FormatError::UnexpectedEof {
            expected: 4,
            available: block.len(),
        });
    }
    let (body, tail) = block.split_at(block.len() - 4);
    let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let computed = jenkins_lookup3(body);
    if expected != computed {
        return Err(FormatError::ChecksumMismatch { expected, computed });
    }
    Ok(())
}

fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}

fn words(block: &[u8]) -> (u32, u32, u32) {
    let w = |i: usize| u32::from_le_bytes([block[i], block[i + 1], block[i + 2], block[i + 3]]);
    (w(0), w(4), w(8))
}

fn hashlittle(data: &[u8], initval: u32) -> u32 {
    let init = 0xdead_beefu32
        .wrapping_add(data.len() as u32)
        .wrapping_add(initval);
    let (mut a, mut b, mut c) = (init, init, init);

    if data.is_empty() {
        return c;
    }

    // The final block (1..=12 bytes) is handled after the loop, so a
    // message of exactly 12n bytes still gets its last block final-mixed.
    let full = (data.len() - 1) / 12;
    for block in data[..full * 12].chunks_exact(12) {
        let (x, y, z) = words(block);
        a = a.wrapping_add(x);
        b = b.wrapping_add(y);
        c = c.wrapping_add(z);
        mix(&mut a, &mut b, &mut c);
    }

    // Byte-wise tail additions equal adding zero-padded little-endian words.
    let mut tail = [0u8; 12];
    let rest = &data[full * 12..];
    tail[..rest.len()].copy_from_slice(rest);
    let (x, y, z) = words(&tail);
    a = a.wrapping_add(x);
    b = b.wrapping_add(y);
    c = c.wrapping_add(z);
    final_mix(&mut a, &mut b, &mut c);
    c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input() {
        assert_eq!(jenkins_lookup3(b""), 0xdeadbeef);
    }

    #[test]
    fn known_vectors() {
        // Published lookup3 test vector: hashlittle("Four score and seven years ago", 0)
        assert_eq!(jenkins_lookup3(b"Four score and seven years ago"), 0x17770551);
    }

    #[test]
    fn block_boundaries_differ() {
        let twelve = [7u8; 12];
        let thirteen = [7u8; 13];
        assert_ne!(jenkins_lookup3(&twelve), jenkins_lookup3(&thirteen));
        assert_ne!(jenkins_lookup3(&twelve), jenkins_lookup3(&twelve[..11]));
    }

    #[test]
    fn verify_trailing_detects_corruption() {
        let mut block = b"BTHD payload".to_vec();
        let sum = jenkins_lookup3(&block);
        block.extend_from_slice(&sum.to_le_bytes());
        assert!(verify_trailing(&block).is_ok());
        block[2] ^= 1;
        assert!(matches!(
            verify_trailing(&block),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }
}
