use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use bwt_server::{
    cli::{Cli, Command, ConnectArgs},
    client::Client,
    protocol::Response,
    record::{TransformRecord, encode_log},
    server::Server,
    store::RecordStore,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let listener = TcpListener::bind(args.listen)
                .await
                .with_context(|| format!("failed to bind {}", args.listen))?;
            let store = Arc::new(RecordStore::open(&args.log_file));
            let server = Server::with_config(listener, store, args.server_config());
            let addr = server.local_addr()?;
            info!(log_file = %args.log_file.display(), "serving transforms");
            println!("bwt server listening on {addr}");
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("server exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Compute(args) => {
            let (transformed, elapsed) = connect(&args.connect).compute(&args.text).await?;
            print_computed(&transformed, elapsed);
        }
        Command::Retrieve(args) => {
            let records = connect(&args).retrieve().await?;
            print_log(&records)?;
        }
        Command::Send(args) => match connect(&args.connect).send_text(&args.text).await? {
            Response::Computed {
                transformed_text,
                elapsed_seconds,
            } => print_computed(&transformed_text, elapsed_seconds),
            Response::Log(records) => print_log(&records)?,
        },
    }

    Ok(())
}

fn connect(args: &ConnectArgs) -> Client {
    Client::new(args.server).with_timeout(Duration::from_secs(args.timeout_secs))
}

fn print_computed(transformed: &str, elapsed_seconds: f64) {
    println!("{transformed}");
    println!("computed in {elapsed_seconds:.6}s");
}

fn print_log(records: &[TransformRecord]) -> Result<()> {
    let encoded = encode_log(records).context("failed to encode log")?;
    println!("{}", String::from_utf8_lossy(&encoded));
    Ok(())
}
