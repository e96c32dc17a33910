//! TCP server that computes Burrows-Wheeler transforms and keeps a durable
//! log of every computation.
//!
//! - [`transform`] is the pure transform itself.
//! - [`record`] defines the log entries and their JSON layout on disk.
//! - [`store`] guards the shared log file behind a single lock.
//! - [`protocol`] frames requests and responses on the wire.
//! - [`server`] accepts connections and serves one request per connection.
//! - [`client`] speaks the protocol from the other side.
//! - [`cli`] parses the command line for the `bwt_server` binary.

pub mod cli;
pub mod client;
pub mod protocol;
pub mod record;
pub mod server;
pub mod store;
pub mod transform;
