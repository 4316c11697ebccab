//! Convoy host volume manager
//!
//! The daemon keeps volume and snapshot records on disk, delegates the
//! actual storage work to [driver]s and answers client and docker plugin
//! requests on a unix socket, see [server].

pub mod api;
pub mod daemon;
pub mod driver;
pub mod index;
pub mod server;
