//! Wire format shared by the server and its clients.
//!
//! Every message is a frame: a big-endian `u32` body length followed by the
//! body. One connection carries exactly one request frame and at most one
//! response frame.
//!
//! Request bodies start with a tag byte, `0x01` for a compute request followed
//! by the UTF-8 text, or `0x02` for a retrieve request with nothing after it.
//! Compute responses are the `bincode` encoding of
//! `(transformed_text, elapsed_seconds)`; retrieve responses are the log as
//! JSON text. There is no error response: on any failure the server closes
//! the connection without writing a frame.

use std::{io, str::Utf8Error};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::record::{TransformRecord, decode_log, encode_log};

/// Text that bridges forward verbatim to ask for the log instead of a
/// transform.
pub const RETRIEVE_KEYWORD: &str = "GET_OUTPUT";

/// Largest frame body accepted unless configured otherwise.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

const HEADER_LEN: usize = 4;
const TAG_COMPUTE: u8 = 0x01;
const TAG_RETRIEVE: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Compute { text: String },
    Retrieve,
}

impl Request {
    /// Classifies text forwarded verbatim by a bridge.
    ///
    /// Only text exactly equal to [`RETRIEVE_KEYWORD`] is a retrieve request.
    /// Text that merely contains the keyword is an ordinary compute payload.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        if text == RETRIEVE_KEYWORD {
            Request::Retrieve
        } else {
            Request::Compute { text }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Request::Compute { text } => {
                let mut body = Vec::with_capacity(1 + text.len());
                body.push(TAG_COMPUTE);
                body.extend_from_slice(text.as_bytes());
                body
            }
            Request::Retrieve => vec![TAG_RETRIEVE],
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let (&tag, payload) = body.split_first().ok_or(DecodeError::Empty)?;
        match tag {
            TAG_COMPUTE => {
                let text = std::str::from_utf8(payload)?;
                if text.is_empty() {
                    return Err(DecodeError::EmptyText);
                }
                Ok(Request::Compute {
                    text: text.to_string(),
                })
            }
            TAG_RETRIEVE if payload.is_empty() => Ok(Request::Retrieve),
            TAG_RETRIEVE => Err(DecodeError::UnexpectedPayload(payload.len())),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("request frame is empty")]
    Empty,
    #[error("unknown request tag {0:#04x}")]
    UnknownTag(u8),
    #[error("request text is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),
    #[error("compute request carries no text")]
    EmptyText,
    #[error("retrieve request carries {0} unexpected bytes")]
    UnexpectedPayload(usize),
}

impl From<DecodeError> for io::Error {
    fn from(err: DecodeError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Computed {
        transformed_text: String,
        elapsed_seconds: f64,
    },
    Log(Vec<TransformRecord>),
}

impl Response {
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        match self {
            Response::Computed {
                transformed_text,
                elapsed_seconds,
            } => bincode::serialize(&(transformed_text, elapsed_seconds)).map_err(to_io_error),
            Response::Log(records) => encode_log(records).map_err(to_io_error),
        }
    }

    /// Decodes a response body. The body does not say what it is, so the
    /// caller passes the request it answers.
    pub fn decode_for(request: &Request, body: &[u8]) -> io::Result<Self> {
        match request {
            Request::Compute { .. } => {
                let (transformed_text, elapsed_seconds): (String, f64) =
                    bincode::deserialize(body).map_err(to_io_error)?;
                Ok(Response::Computed {
                    transformed_text,
                    elapsed_seconds,
                })
            }
            Request::Retrieve => decode_log(body).map(Response::Log).map_err(to_io_error),
        }
    }
}

/// Reads one frame body.
///
/// Returns `Ok(None)` when the peer closes the stream before sending any
/// header byte. Bodies longer than `max_len` are refused before allocating.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let first = reader.read(&mut header).await?;
    if first == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[first..]).await?;

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {max_len}"),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes does not fit a u32 length", body.len()),
        )
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

pub async fn read_request<R>(reader: &mut R, max_len: usize) -> io::Result<Option<Request>>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, max_len).await? {
        Some(body) => Ok(Some(Request::decode(&body)?)),
        None => Ok(None),
    }
}

pub async fn write_request<W>(writer: &mut W, request: &Request) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &request.encode()).await
}

pub async fn read_response<R>(
    reader: &mut R,
    request: &Request,
    max_len: usize,
) -> io::Result<Option<Response>>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, max_len).await? {
        Some(body) => Ok(Some(Response::decode_for(request, &body)?)),
        None => Ok(None),
    }
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &response.encode()?).await
}

fn to_io_error<E>(err: E) -> io::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}
