use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{protocol::DEFAULT_MAX_FRAME_BYTES, server::ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the transform server.
    Serve(ServeArgs),
    /// Ask a running server to transform some text.
    Compute(ComputeArgs),
    /// Print the server's log of completed transforms as JSON.
    Retrieve(ConnectArgs),
    /// Forward text verbatim; the exact retrieve keyword fetches the log.
    Send(ComputeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, env = "BWT_LISTEN", default_value = "0.0.0.0:65432")]
    pub listen: SocketAddr,

    /// JSON file holding the log of completed transforms.
    #[arg(long, env = "BWT_LOG_FILE", default_value = "/data/output.json")]
    pub log_file: PathBuf,

    /// Maximum connections handled at once, at least 1. Unlimited when omitted.
    #[arg(long)]
    pub max_connections: Option<NonZeroUsize>,

    /// Seconds allowed for reading a request and, separately, writing its response.
    #[arg(long)]
    pub io_timeout_secs: Option<u64>,

    /// Largest request frame accepted, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,
}

impl ServeArgs {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_connections: self.max_connections,
            io_timeout: self.io_timeout_secs.map(Duration::from_secs),
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Address of the server to connect to.
    #[arg(long, env = "BWT_SERVER", default_value = "127.0.0.1:65432")]
    pub server: SocketAddr,

    /// Give up when the server has not answered within this many seconds.
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ComputeArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Text to send.
    pub text: String,
}
