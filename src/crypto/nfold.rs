//! RFC 3961 n-fold.
//!
//! Stretches or compresses an arbitrary byte string to `n` bytes by
//! concatenating 13-bit right rotations of the input up to the least common
//! multiple of both lengths, then summing `n`-byte chunks with ones'
//! complement addition.

/// Fold `input` to `out_len` bytes.
pub fn nfold(input: &[u8], out_len: usize) -> Vec<u8> {
    if input.is_empty() || out_len == 0 {
        return vec![0; out_len];
    }

    let in_len = input.len();
    let lcm = in_len / gcd(in_len, out_len) * out_len;

    let mut big = Vec::with_capacity(lcm);
    for i in 0..lcm / in_len {
        big.extend(rotate_right(input, 13 * i));
    }

    let mut acc = vec![0u8; out_len];
    for chunk in big.chunks(out_len) {
        acc = ones_complement_add(&acc, chunk);
    }
    acc
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn rotate_right(data: &[u8], bits: usize) -> Vec<u8> {
    let len = data.len();
    let byte_shift = (bits / 8) % len;
    let bit_shift = (bits % 8) as u32;

    (0..len)
        .map(|i| {
            let hi = data[(i + len - byte_shift) % len] as u16;
            let lo = data[(i + 2 * len - byte_shift - 1) % len] as u16;
            (((hi >> bit_shift) | (lo << (8 - bit_shift))) & 0xff) as u8
        })
        .collect()
}

fn ones_complement_add(a: &[u8], b: &[u8]) -> Vec<u8> {
    let n = a.len();
    let mut sums: Vec<u32> = a.iter().zip(b).map(|(x, y)| *x as u32 + *y as u32).collect();

    while sums.iter().any(|v| *v > 0xff) {
        sums = (0..n)
            .map(|i| (sums[(i + 1) % n] >> 8) + (sums[i] & 0xff))
            .collect();
    }

    sums.into_iter().map(|v| v as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(input: &str, bits: usize, expected: &str) {
        assert_eq!(hex::encode(nfold(input.as_bytes(), bits / 8)), expected, "{input}");
    }

    #[test]
    fn rfc3961_vectors() {
        check("012345", 64, "be072631276b1955");
        check("password", 56, "78a07b6caf85fa");
        check("Rough Consensus, and Running Code", 64, "bb6ed30870b7f0e0");
        check("password", 168, "59e4a8ca7c0385c3c37b3f6d2000247cb6e6bd5b3e");
        check("kerberos", 64, "6b65726265726f73");
        check("kerberos", 128, "6b65726265726f737b9b5b2b93132b93");
    }
}
