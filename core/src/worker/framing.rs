//! Length-prefixed message framing
//!
//! Wire format per message: a 4-byte big-endian payload length followed by
//! exactly that many payload bytes. A short read or write leaves the stream
//! in an unknown state, so the caller must discard the connection rather
//! than return it to a pool.

use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. A length above this is treated as a
/// desynchronized peer, not a real message.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Write one framed message: length then payload, no interleaving.
pub async fn write_frame<W>(stream: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::Transport(format!(
            "frame too large: {} bytes (max {})",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }

    let len = payload.len() as u32;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| Error::Transport(format!("failed to send frame length: {}", e)))?;
    stream
        .write_all(payload)
        .await
        .map_err(|e| Error::Transport(format!("failed to send frame payload: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| Error::Transport(format!("failed to flush frame: {}", e)))?;

    Ok(())
}

/// Read one framed message: exactly 4 length bytes, then exactly that many
/// payload bytes.
pub async fn read_frame<R>(stream: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    stream
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| Error::Transport(format!("failed to read frame length: {}", e)))?;

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Transport(format!(
            "frame length {} exceeds maximum {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| Error::Transport(format!("failed to read frame payload: {}", e)))?;

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        let payload = b"framed message".to_vec();
        write_frame(&mut a, &payload).await.unwrap();

        let received = read_frame(&mut b).await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn round_trip_empty_payload() {
        let (mut a, mut b) = tokio::io::duplex(64);

        write_frame(&mut a, &[]).await.unwrap();
        let received = read_frame(&mut b).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn multiple_frames_in_order() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_frame(&mut a, b"first").await.unwrap();
        write_frame(&mut a, b"second").await.unwrap();

        assert_eq!(read_frame(&mut b).await.unwrap(), b"first");
        assert_eq!(read_frame(&mut b).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn short_length_read_is_transport_error() {
        let (mut a, mut b) = tokio::io::duplex(64);

        // Two bytes of a length prefix, then EOF.
        tokio::io::AsyncWriteExt::write_all(&mut a, &[0u8, 0u8])
            .await
            .unwrap();
        drop(a);

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn short_payload_read_is_transport_error() {
        let (mut a, mut b) = tokio::io::duplex(64);

        // Length announces 10 bytes but only 3 arrive.
        tokio::io::AsyncWriteExt::write_all(&mut a, &10u32.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut a, b"abc")
            .await
            .unwrap();
        drop(a);

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn oversize_length_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);

        let bogus = (MAX_FRAME_LEN as u32) + 1;
        tokio::io::AsyncWriteExt::write_all(&mut a, &bogus.to_be_bytes())
            .await
            .unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
