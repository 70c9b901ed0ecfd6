// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Framed peer connection: 4-byte big-endian length prefix followed by
//! a JSON [`BridgeFrame`].
//!
//! Malformed JSON is reported as [`ConnectionError::Malformed`] so the
//! bridge can fail the frame back without tearing the socket down; only
//! I/O errors are connection-fatal.

use crate::protocol::BridgeFrame;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Connection error types.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// Frame body could not be decoded; the connection survives.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// A connected peer socket. Generic over the stream so tests can run
/// against `tokio::io::duplex` pipes.
pub struct FrameConnection<S> {
    stream: S,
    max_message_size: usize,
    read_buffer: Vec<u8>,
}

impl<S> FrameConnection<S> {
    pub fn new(stream: S, max_message_size: usize) -> Self {
        Self {
            stream,
            max_message_size,
            read_buffer: Vec::with_capacity(4096),
        }
    }

    /// Split into independently-owned read and write halves so the
    /// bridge can read frames and flush outbound traffic concurrently.
    pub fn into_split(
        self,
    ) -> (
        FrameConnection<tokio::io::ReadHalf<S>>,
        FrameConnection<tokio::io::WriteHalf<S>>,
    )
    where
        S: AsyncRead + AsyncWrite,
    {
        let (read_half, write_half) = tokio::io::split(self.stream);
        (
            FrameConnection {
                stream: read_half,
                max_message_size: self.max_message_size,
                read_buffer: self.read_buffer,
            },
            FrameConnection {
                stream: write_half,
                max_message_size: self.max_message_size,
                read_buffer: Vec::new(),
            },
        )
    }
}

impl<S: AsyncRead + Unpin> FrameConnection<S> {
    /// Read one frame. Returns `Ok(None)` on graceful close.
    ///
    /// Not cancellation-safe: dropping the future mid-frame loses the
    /// bytes already consumed. The bridge keeps reads on a dedicated
    /// task for exactly this reason.
    pub async fn read_frame(&mut self) -> Result<Option<BridgeFrame>, ConnectionError> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => return Err(ConnectionError::Io(e)),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Err(ConnectionError::Protocol("empty frame".into()));
        }
        if len > self.max_message_size {
            return Err(ConnectionError::Protocol(format!(
                "frame too large: {} > {}",
                len, self.max_message_size
            )));
        }

        self.read_buffer.clear();
        self.read_buffer.resize(len, 0);
        self.stream.read_exact(&mut self.read_buffer).await?;

        match serde_json::from_slice(&self.read_buffer) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => Err(ConnectionError::Malformed(e.to_string())),
        }
    }
}

impl<S: AsyncWrite + Unpin> FrameConnection<S> {
    /// Write one frame with length prefix and flush.
    pub async fn write_frame(&mut self, frame: &BridgeFrame) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_vec(frame).map_err(|e| ConnectionError::Protocol(e.to_string()))?;
        if json.len() > self.max_message_size {
            return Err(ConnectionError::Protocol(format!(
                "frame too large: {} > {}",
                json.len(),
                self.max_message_size
            )));
        }

        let len = json.len() as u32;
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(&json).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
