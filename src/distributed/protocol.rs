//! Stats reporting protocol
//!
//! Tasks report their metrics to the collecting process over a byte stream.
//! The protocol uses MessagePack (rmp-serde) so messages keep full serde
//! feature support while staying compact.
//!
//! # Protocol Version
//!
//! Current version: 1
//!
//! # Message Flow
//!
//! ```text
//! Driver / tasks                    Collector
//!     |                                 |
//!     |-- BEGIN_WINDOW(stages) -------->|
//!     |-- SAMPLE(metrics) ------------->|   (any number, any order)
//!     |-- STAGE_DONE(blocks) ---------->|
//!     |-- WINDOW_DONE ----------------->|
//!     |              ...                |
//!     |-- SHUTDOWN -------------------->|
//! ```
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack-serialized message]
//! ```

use crate::stats::registry::StagePlan;
use crate::stats::{RawTaskMetrics, StageId};
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frames larger than this are rejected before the body is read
pub const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

/// Protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// A window became available; stages are listed in execution order
    BeginWindow {
        protocol_version: u32,
        window_index: u64,
        stages: Vec<StagePlan>,
    },

    /// One task's metrics
    Sample {
        window_index: u64,
        metrics: RawTaskMetrics,
    },

    /// The stage has no more tasks to report
    StageDone {
        window_index: u64,
        stage_id: StageId,
        #[serde(default)]
        blocks_expected: Option<u64>,
    },

    /// The consumer finished (or abandoned) the window
    WindowDone { window_index: u64 },

    /// No more messages will follow
    Shutdown,
}

impl Message {
    pub fn begin_window(window_index: u64, stages: Vec<StagePlan>) -> Self {
        Message::BeginWindow {
            protocol_version: PROTOCOL_VERSION,
            window_index,
            stages,
        }
    }
}

/// Serialize a message to bytes
///
/// Prepends a 4-byte length field for framing.
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec_named(msg).context("Failed to serialize message")?;
    if msg_bytes.len() > MAX_FRAME_BYTES {
        anyhow::bail!("Message too large: {} bytes (max 100MB)", msg_bytes.len());
    }

    let msg_len = msg_bytes.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Deserialize a message from bytes
///
/// Returns (message, bytes_consumed) where bytes_consumed includes the length prefix.
pub fn deserialize_message(buf: &[u8]) -> Result<(Message, usize)> {
    if buf.len() < 4 {
        anyhow::bail!("Buffer too small for message length (need 4 bytes, got {})", buf.len());
    }

    let msg_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if msg_len > MAX_FRAME_BYTES {
        anyhow::bail!("Message too large: {} bytes (max 100MB)", msg_len);
    }
    if buf.len() < 4 + msg_len {
        anyhow::bail!("Incomplete message (need {} bytes, got {})", 4 + msg_len, buf.len());
    }

    let msg = rmp_serde::from_slice(&buf[4..4 + msg_len]).context("Failed to deserialize message")?;

    Ok((msg, 4 + msg_len))
}

/// Read a complete message from a stream
///
/// Returns `Ok(None)` on a clean end of stream between frames.
pub async fn read_message<R>(stream: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    // Only EOF before the first length byte ends the stream cleanly
    let mut len_buf = [0u8; 4];
    let first = stream
        .read(&mut len_buf[..1])
        .await
        .context("Failed to read message length")?;
    if first == 0 {
        return Ok(None);
    }
    stream
        .read_exact(&mut len_buf[1..])
        .await
        .context("Truncated message length")?;

    let msg_len = u32::from_le_bytes(len_buf) as usize;
    if msg_len > MAX_FRAME_BYTES {
        anyhow::bail!("Message too large: {} bytes (max 100MB)", msg_len);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream
        .read_exact(&mut msg_buf)
        .await
        .context("Failed to read message body")?;

    let msg = rmp_serde::from_slice(&msg_buf).context("Failed to deserialize message")?;

    Ok(Some(msg))
}

/// Write a message to a stream and flush it
pub async fn write_message<W>(stream: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = serialize_message(msg)?;

    stream.write_all(&framed).await.context("Failed to write message")?;
    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> RawTaskMetrics {
        RawTaskMetrics {
            stage_id: 1,
            task_id: 42,
            node_id: "10.0.1.10".to_string(),
            wall_time_s: 0.25,
            cpu_time_s: 0.125,
            output_rows: 1000,
            output_bytes: 8000,
        }
    }

    #[test]
    fn test_serialize_deserialize_begin_window() {
        let msg = Message::begin_window(3, vec![StagePlan::cached("read"), StagePlan::new("map").with_blocks(20)]);

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, consumed) = deserialize_message(&bytes).unwrap();

        assert_eq!(consumed, bytes.len());
        match deserialized {
            Message::BeginWindow {
                protocol_version,
                window_index,
                stages,
            } => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(window_index, 3);
                assert!(stages[0].cached);
                assert_eq!(stages[1].blocks_expected, Some(20));
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_serialize_deserialize_sample() {
        let msg = Message::Sample {
            window_index: 0,
            metrics: metrics(),
        };

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, _) = deserialize_message(&bytes).unwrap();
        assert_eq!(deserialized, msg);
    }

    #[test]
    fn test_message_framing() {
        let bytes = serialize_message(&Message::Shutdown).unwrap();

        assert!(bytes.len() >= 4);
        let msg_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 4 + msg_len);
    }

    #[test]
    fn test_incomplete_buffer_rejected() {
        let bytes = serialize_message(&Message::WindowDone { window_index: 7 }).unwrap();
        assert!(deserialize_message(&bytes[..2]).is_err());
        assert!(deserialize_message(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_consecutive_frames_in_one_buffer() {
        let mut buf = serialize_message(&Message::WindowDone { window_index: 0 }).unwrap();
        buf.extend(serialize_message(&Message::Shutdown).unwrap());

        let (first, used) = deserialize_message(&buf).unwrap();
        let (second, rest) = deserialize_message(&buf[used..]).unwrap();
        assert_eq!(first, Message::WindowDone { window_index: 0 });
        assert_eq!(second, Message::Shutdown);
        assert_eq!(used + rest, buf.len());
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);

        write_message(
            &mut tx,
            &Message::StageDone {
                window_index: 1,
                stage_id: 2,
                blocks_expected: None,
            },
        )
        .await
        .unwrap();
        write_message(&mut tx, &Message::Shutdown).await.unwrap();
        drop(tx);

        assert!(matches!(
            read_message(&mut rx).await.unwrap(),
            Some(Message::StageDone { stage_id: 2, .. })
        ));
        assert_eq!(read_message(&mut rx).await.unwrap(), Some(Message::Shutdown));
        assert_eq!(read_message(&mut rx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let len = (MAX_FRAME_BYTES as u32 + 1).to_le_bytes();
        tx.write_all(&len).await.unwrap();

        let err = read_message(&mut rx).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn test_truncated_length_is_an_error() {
        let framed = serialize_message(&Message::Shutdown).unwrap();
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(&framed[..2]).await.unwrap();
        drop(tx);

        let err = read_message(&mut rx).await.unwrap_err();
        assert!(err.to_string().contains("Truncated"));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let framed = serialize_message(&Message::WindowDone { window_index: 7 }).unwrap();
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(&framed[..framed.len() - 1]).await.unwrap();
        drop(tx);

        assert!(read_message(&mut rx).await.is_err());
    }
}
