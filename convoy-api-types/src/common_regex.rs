//! Predefined Regular Expressions

use lazy_static::lazy_static;
use regex::Regex;

#[rustfmt::skip]
#[macro_export]
macro_rules! CONVOY_NAME_REGEX_STR { () => (r"[0-9a-z_.\-]+") }

/// Docker passes the requested size as `<name>~<N>{G|T}`.
#[rustfmt::skip]
#[macro_export]
macro_rules! SIZED_NAME_REGEX_STR { () => (concat!(r"^(", CONVOY_NAME_REGEX_STR!(), r")~([0-9]+[gGtT])$")) }

lazy_static! {
    pub static ref NAME_REGEX: Regex =
        Regex::new(concat!("^", CONVOY_NAME_REGEX_STR!(), "$")).unwrap();
    pub static ref SIZED_NAME_REGEX: Regex = Regex::new(SIZED_NAME_REGEX_STR!()).unwrap();
}

pub fn validate_name(name: &str) -> bool {
    NAME_REGEX.is_match(name)
}

/// Split `<name>~<size>` into name and size suffix.
pub fn split_sized_name(name: &str) -> Option<(&str, &str)> {
    let caps = SIZED_NAME_REGEX.captures(name)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

#[test]
fn test_split_sized_name() {
    assert_eq!(split_sized_name("db~10G"), Some(("db", "10G")));
    assert_eq!(split_sized_name("db~2t"), Some(("db", "2t")));
    assert_eq!(split_sized_name("db"), None);
    assert_eq!(split_sized_name("db~10M"), None);
}
