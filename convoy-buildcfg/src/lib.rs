//! Exports configuration data from the build system

pub const CONVOY_PKG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION_MAJOR"),
    ".",
    env!("CARGO_PKG_VERSION_MINOR"),
);
pub const CONVOY_PKG_RELEASE: &str = env!("CARGO_PKG_VERSION_PATCH");

/// Version of the client API. Clients announcing a different version in
/// their user agent are rejected.
pub const API_VERSION: &str = "1";

/// Tag used by our own clients in the `User-Agent` header.
pub const CLIENT_USER_AGENT_TAG: &str = "Convoy-Client";

#[macro_export]
macro_rules! CONVOY_RUN_DIR_M {
    () => {
        "/var/run/convoy"
    };
}

#[macro_export]
macro_rules! CONVOY_STATE_DIR_M {
    () => {
        "/var/lib/rancher/convoy"
    };
}

/// namespaced directory for in-memory (tmpfs) run state
pub const CONVOY_RUN_DIR: &str = CONVOY_RUN_DIR_M!();

/// default daemon root, holding configs and per-driver state
pub const CONVOY_STATE_DIR: &str = CONVOY_STATE_DIR_M!();

/// the control socket of the daemon
pub const CONVOY_SOCKET_FN: &str = concat!(CONVOY_RUN_DIR_M!(), "/convoy.sock");

/// Prepend the run directory to a file name.
#[macro_export]
macro_rules! rundir {
    ($subdir:expr) => {
        concat!($crate::CONVOY_RUN_DIR_M!(), $subdir)
    };
}

/// User agent sent by [convoy-client](../convoy_client/index.html).
pub fn client_user_agent() -> String {
    format!("{}/{}", CLIENT_USER_AGENT_TAG, API_VERSION)
}
