use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};
use tracing::debug;

use crate::{
    protocol::{Request, Response, read_response, write_request},
    record::TransformRecord,
};

/// Responses carry the whole log, so they may be far larger than any request.
const MAX_RESPONSE_BYTES: usize = 256 * 1024 * 1024;

/// Opens one connection per request, as the server expects.
#[derive(Debug, Clone)]
pub struct Client {
    server: SocketAddr,
    timeout: Option<Duration>,
}

impl Client {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            timeout: None,
        }
    }

    /// Bounds each whole request/response exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Transforms `text` on the server. Returns the transformed text and the
    /// server-side computation time in seconds.
    pub async fn compute(&self, text: &str) -> Result<(String, f64)> {
        let request = Request::Compute {
            text: text.to_string(),
        };
        match self.exchange(&request).await? {
            Response::Computed {
                transformed_text,
                elapsed_seconds,
            } => Ok((transformed_text, elapsed_seconds)),
            Response::Log(_) => Err(anyhow!("server answered a compute request with the log")),
        }
    }

    pub async fn retrieve(&self) -> Result<Vec<TransformRecord>> {
        match self.exchange(&Request::Retrieve).await? {
            Response::Log(records) => Ok(records),
            Response::Computed { .. } => {
                Err(anyhow!("server answered a retrieve request with a transform"))
            }
        }
    }

    /// Forwards caller text the way a bridge does: the exact retrieve keyword
    /// fetches the log, anything else is transformed.
    pub async fn send_text(&self, text: &str) -> Result<Response> {
        self.exchange(&Request::from_text(text)).await
    }

    async fn exchange(&self, request: &Request) -> Result<Response> {
        self.bounded(self.exchange_unbounded(request)).await
    }

    async fn exchange_unbounded(&self, request: &Request) -> Result<Response> {
        let mut stream = TcpStream::connect(self.server)
            .await
            .with_context(|| format!("failed to connect to {}", self.server))?;
        debug!(server = %self.server, "connected");

        write_request(&mut stream, request)
            .await
            .context("failed to send request")?;
        let response = read_response(&mut stream, request, MAX_RESPONSE_BYTES)
            .await
            .context("failed to read response")?;
        // Best effort: the server closes its side right after answering.
        let _ = stream.shutdown().await;

        match response {
            Some(response) => Ok(response),
            None => bail!("server closed the connection without a response"),
        }
    }

    async fn bounded<F, T>(&self, exchange: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.timeout {
            Some(limit) => timeout(limit, exchange)
                .await
                .with_context(|| format!("no response from {} within {limit:?}", self.server))?,
            None => exchange.await,
        }
    }
}
