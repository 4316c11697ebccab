//! `<scheme>://<location>?backup=<name>&volume=<name>` handling.

use anyhow::Error;

use convoy_api_types::{check_name, volume_bail};

use crate::driver::parse_store_url;

/// Build the URL of backup `backup_name` of `volume_name` stored at `dest_url`.
pub fn encode_backup_url(backup_name: &str, volume_name: &str, dest_url: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("backup", backup_name)
        .append_pair("volume", volume_name)
        .finish();
    format!("{}?{}", dest_url, query)
}

/// Split a backup URL into `(backup_name, volume_name)`.
pub fn decode_backup_url(backup_url: &str) -> Result<(String, String), Error> {
    let url = parse_store_url(backup_url)?;

    let mut backup_name = None;
    let mut volume_name = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "backup" => backup_name = Some(value.into_owned()),
            "volume" => volume_name = Some(value.into_owned()),
            _ => {}
        }
    }

    let (backup_name, volume_name) = match (backup_name, volume_name) {
        (Some(backup), Some(volume)) => (backup, volume),
        _ => volume_bail!(InvalidArgument, "invalid backup url {:?} - missing volume or backup", backup_url),
    };
    check_name(&backup_name)?;
    check_name(&volume_name)?;

    Ok((backup_name, volume_name))
}

#[cfg(test)]
mod test {
    use super::*;
    use convoy_api_types::{error_kind, ErrorKind};

    #[test]
    fn test_backup_url() {
        let url = encode_backup_url("backup-0123456789abcdef", "db", "vfs:///var/backups");
        assert_eq!(
            url,
            "vfs:///var/backups?backup=backup-0123456789abcdef&volume=db"
        );
        assert_eq!(
            decode_backup_url(&url).unwrap(),
            ("backup-0123456789abcdef".to_string(), "db".to_string())
        );

        let err = decode_backup_url("vfs:///var/backups?volume=db").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));
        assert!(decode_backup_url("vfs:///x?volume=../etc&backup=b").is_err());
        assert!(decode_backup_url("not a url").is_err());
    }
}
