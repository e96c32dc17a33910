use std::{future::Future, io, net::SocketAddr, num::NonZeroUsize, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    select,
    sync::{OwnedSemaphorePermit, Semaphore},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    protocol::{DEFAULT_MAX_FRAME_BYTES, Request, Response, read_request, write_response},
    record::TransformRecord,
    store::RecordStore,
    transform::transform_timed,
};

/// Tuning knobs for the listener and its connection handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upper bound on connections handled at once. `None` accepts without limit.
    pub max_connections: Option<NonZeroUsize>,
    /// Deadline applied separately to reading the request and writing the response.
    pub io_timeout: Option<Duration>,
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: None,
            io_timeout: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

struct ServerState {
    store: Arc<RecordStore>,
    config: ServerConfig,
    slots: Option<Arc<Semaphore>>,
}

impl Server {
    pub fn new(listener: TcpListener, store: Arc<RecordStore>) -> Self {
        Self::with_config(listener, store, ServerConfig::default())
    }

    pub fn with_config(
        listener: TcpListener,
        store: Arc<RecordStore>,
        config: ServerConfig,
    ) -> Self {
        let slots = config
            .max_connections
            .map(|limit| Arc::new(Semaphore::new(limit.get())));
        Self {
            listener,
            state: Arc::new(ServerState {
                store,
                config,
                slots,
            }),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves. Each connection is
    /// served on its own task; the loop never waits for a handler to finish
    /// unless a connection limit is configured and every slot is taken.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            let permit = select! {
                _ = &mut shutdown => break,
                permit = acquire_slot(&state) => permit?,
            };

            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, permit, &state);
                }
            }
        }

        info!("server shutting down");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn acquire_slot(state: &ServerState) -> Result<Option<OwnedSemaphorePermit>> {
    match &state.slots {
        Some(slots) => {
            let permit = Arc::clone(slots)
                .acquire_owned()
                .await
                .context("connection limiter closed")?;
            Ok(Some(permit))
        }
        None => Ok(None),
    }
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    permit: Option<OwnedSemaphorePermit>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, permit, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(
    stream: TcpStream,
    peer: SocketAddr,
    permit: Option<OwnedSemaphorePermit>,
    state: &Arc<ServerState>,
) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        let _permit = permit;
        debug!(%peer, "connection accepted");
        if let Err(err) = handle_connection(stream, &state.store, &state.config).await {
            warn!(%peer, error = ?err, "connection closed without a response");
        }
    });
}

/// Serves one request on `stream` and closes it.
///
/// Any failure (a malformed or missing request, a deadline, a storage error)
/// ends the cycle without writing a response frame, so the peer only sees
/// the connection close.
pub async fn handle_connection<S>(
    mut stream: S,
    store: &RecordStore,
    config: &ServerConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = with_deadline(
        config.io_timeout,
        read_request(&mut stream, config.max_frame_bytes),
    )
    .await
    .context("failed to read request")?;

    let Some(request) = request else {
        anyhow::bail!("peer closed the connection before sending a request");
    };

    let response = dispatch(request, store).await?;

    with_deadline(config.io_timeout, write_response(&mut stream, &response))
        .await
        .context("failed to write response")?;
    stream.shutdown().await.context("failed to close connection")?;
    Ok(())
}

async fn dispatch(request: Request, store: &RecordStore) -> Result<Response> {
    match request {
        Request::Compute { text } => {
            info!(chars = text.chars().count(), "compute request");
            let (text, transformed_text, elapsed) = tokio::task::spawn_blocking(move || {
                let (transformed, elapsed) = transform_timed(&text);
                (text, transformed, elapsed)
            })
            .await
            .context("transform task failed")?;

            let elapsed_seconds = elapsed.as_secs_f64();
            let records = store
                .append(TransformRecord::new(
                    text,
                    transformed_text.clone(),
                    elapsed_seconds,
                ))
                .await
                .context("failed to store record")?;
            debug!(records, elapsed_seconds, "transform stored");

            Ok(Response::Computed {
                transformed_text,
                elapsed_seconds,
            })
        }
        Request::Retrieve => {
            let records = store.snapshot().await.context("failed to read log")?;
            info!(records = records.len(), "retrieve request");
            Ok(Response::Log(records))
        }
    }
}

async fn with_deadline<F, T>(deadline: Option<Duration>, operation: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(limit) => timeout(limit, operation).await.map_err(|_| {
            io::Error::new(io::ErrorKind::TimedOut, format!("no progress within {limit:?}"))
        })?,
        None => operation.await,
    }
}
