//! Client API and docker plugin handlers.
//!
//! Handlers are synchronous. The router takes the daemon wide lock in the
//! mode the route asks for before calling them.

use std::collections::HashMap;

use anyhow::Error;
use serde::de::DeserializeOwned;
use serde_json::Value;

use convoy_api_types::volume_bail;

use crate::daemon::Daemon;

pub mod backup;
pub mod info;
pub mod plugin;
pub mod snapshot;
pub mod volume;

/// Decoded HTTP request as seen by a handler.
#[derive(Debug, Default)]
pub struct ApiRequest {
    pub body: Vec<u8>,
    pub query: HashMap<String, String>,
}

impl ApiRequest {
    pub fn new(body: Vec<u8>, query: HashMap<String, String>) -> Self {
        Self { body, query }
    }

    /// Decode the JSON body, an empty body gives the default value.
    pub fn parse<T: DeserializeOwned + Default>(&self) -> Result<T, Error> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        match serde_json::from_slice(&self.body) {
            Ok(data) => Ok(data),
            Err(err) => volume_bail!(InvalidArgument, "unable to parse request body - {}", err),
        }
    }

    pub fn query_flag(&self, key: &str) -> bool {
        matches!(
            self.query.get(key).map(String::as_str),
            Some("1") | Some("true")
        )
    }
}

pub type ApiHandler = fn(&Daemon, &ApiRequest) -> Result<Value, Error>;

/// Global lock mode a route runs under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    None,
    Read,
    Write,
}

/// Clients escape `&` in URLs, undo it.
pub fn unescape_url(url: &str) -> String {
    url.replace("\\u0026", "&")
}

/// Non verbose replies are a bare JSON string.
pub(crate) fn string_response(value: String) -> Value {
    Value::String(value)
}

#[cfg(test)]
mod test {
    use super::*;
    use convoy_api_types::VolumeInspectRequest;

    #[test]
    fn test_parse_request() {
        let req = ApiRequest::new(br#"{"VolumeName":"db"}"#.to_vec(), HashMap::new());
        let data: VolumeInspectRequest = req.parse().unwrap();
        assert_eq!(data.volume_name, "db");

        let req = ApiRequest::new(b" \n".to_vec(), HashMap::new());
        let data: VolumeInspectRequest = req.parse().unwrap();
        assert_eq!(data.volume_name, "");

        let req = ApiRequest::new(b"{".to_vec(), HashMap::new());
        assert!(req.parse::<VolumeInspectRequest>().is_err());
    }

    #[test]
    fn test_unescape_url() {
        assert_eq!(
            unescape_url("vfs:///b?backup=x\\u0026volume=y"),
            "vfs:///b?backup=x&volume=y"
        );
    }
}
