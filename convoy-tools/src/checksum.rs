//! Checksum helpers.

/// Number of hex digits kept from the SHA-512 digest.
pub const CHECKSUM_LEN: usize = 64;

/// Content checksum used to name block objects: the first 64 hex digits
/// of the SHA-512 digest of `data`.
pub fn get_checksum(data: &[u8]) -> String {
    let digest = openssl::sha::sha512(data);
    let mut checksum = hex::encode(digest);
    checksum.truncate(CHECKSUM_LEN);
    checksum
}

/// Check that `checksum` looks like a value returned by [get_checksum].
pub fn is_valid_checksum(checksum: &str) -> bool {
    checksum.len() == CHECKSUM_LEN
        && checksum
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[test]
fn test_checksum() {
    let csum = get_checksum(b"");
    assert_eq!(
        csum,
        "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce"
    );
    assert!(is_valid_checksum(&csum));
    assert_ne!(get_checksum(&[0u8; 16]), get_checksum(&[1u8; 16]));
    assert!(!is_valid_checksum("../../etc/passwd"));
}
