pub mod archive;
pub mod checksum;
pub mod compression;

mod ident;
pub use ident::{generate_name, generate_uuid, now_rfc3339};

mod command;
pub use command::{
    execute, init_command_timeout, init_mount_namespace, parse_timeout, run_command_timeout,
    DEFAULT_CMD_TIMEOUT,
};
