//! gzip helpers for block objects.

use std::io::{Read, Write};

use anyhow::{format_err, Error};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use convoy_api_types::volume_bail;

use crate::checksum::get_checksum;

/// gzip compress `data` into a new buffer.
pub fn compress_data(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|err| format_err!("unable to compress data - {}", err))?;
    encoder
        .finish()
        .map_err(|err| format_err!("unable to finish compression - {}", err))
}

/// Decompress a gzip stream and verify the checksum of the uncompressed data.
pub fn decompress_and_verify<R: Read>(reader: R, checksum: &str) -> Result<Vec<u8>, Error> {
    let mut decoder = GzDecoder::new(reader);
    let mut data = Vec::new();
    decoder
        .read_to_end(&mut data)
        .map_err(|err| format_err!("unable to decompress data - {}", err))?;

    let computed = get_checksum(&data);
    if computed != checksum {
        volume_bail!(
            Corruption,
            "checksum verification failed - expected {}, got {}",
            checksum,
            computed
        );
    }
    Ok(data)
}

#[cfg(test)]
mod test {
    use super::*;
    use convoy_api_types::{error_kind, ErrorKind};

    #[test]
    fn test_compress_verify() {
        let data = vec![7u8; 64 * 1024];
        let compressed = compress_data(&data).unwrap();
        assert!(compressed.len() < data.len());

        let restored = decompress_and_verify(&compressed[..], &get_checksum(&data)).unwrap();
        assert_eq!(restored, data);

        let err = decompress_and_verify(&compressed[..], &get_checksum(b"other")).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Corruption));
    }
}
