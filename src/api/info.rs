use anyhow::Error;
use serde_json::{json, Value};

use super::ApiRequest;
use crate::daemon::Daemon;

/// Daemon configuration as `General` plus one entry per driver.
pub fn api_info(daemon: &Daemon, _param: &ApiRequest) -> Result<Value, Error> {
    let mut result = json!({
        "General": daemon.config,
    });
    for driver in daemon.drivers() {
        result[driver.name()] = serde_json::to_value(driver.info()?)?;
    }
    Ok(result)
}
