//! Basic API types shared by the daemon, the drivers and the client.

#[macro_use]
mod error;
pub use error::*;

pub mod common_regex;
pub mod opts;

mod human_byte;
pub use human_byte::{parse_size, HumanByte};

mod request;
pub use request::*;

mod response;
pub use response::*;

/// Capability name announced on `Plugin.Activate`.
pub const PLUGIN_IMPLEMENTS: &str = "VolumeDriver";

/// Check that `name` can be used as volume or snapshot name.
pub fn check_name(name: &str) -> Result<(), anyhow::Error> {
    if !common_regex::validate_name(name) {
        volume_bail!(
            InvalidArgument,
            "invalid name {:?} - must only contain 0-9, a-z, dash(-), underscore(_) and dot(.)",
            name
        );
    }
    Ok(())
}

/// Interpret an option value as boolean, treating missing values as `false`.
pub fn parse_bool_opt(value: Option<&String>) -> Result<bool, anyhow::Error> {
    match value.map(|v| v.to_lowercase()).as_deref() {
        None | Some("") => Ok(false),
        Some("1") | Some("true") | Some("yes") | Some("on") => Ok(true),
        Some("0") | Some("false") | Some("no") | Some("off") => Ok(false),
        Some(other) => volume_bail!(InvalidArgument, "unable to parse boolean {:?}", other),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_check_name() {
        assert!(check_name("db-1_data.x").is_ok());
        let err = check_name("Db").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));
        assert!(check_name("").is_err());
        assert!(check_name("a/b").is_err());
    }

    #[test]
    fn test_parse_bool_opt() {
        assert!(!parse_bool_opt(None).unwrap());
        assert!(parse_bool_opt(Some(&"True".to_string())).unwrap());
        assert!(!parse_bool_opt(Some(&"0".to_string())).unwrap());
        assert!(parse_bool_opt(Some(&"maybe".to_string())).is_err());
    }
}
