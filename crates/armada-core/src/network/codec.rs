//! Wire framing for packets
//!
//! Every frame is a big-endian u32 length prefix followed by that many
//! bytes of JSON packet document. The length prefix is bounded; a peer
//! announcing an oversized frame is cut off before any allocation.

use armada_api::packet::Packet;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Write one length-prefixed packet frame and flush it.
pub async fn write_frame<W>(writer: &mut W, packet: &Packet) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(packet)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", body.len()),
        ));
    }

    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Read one length-prefixed packet frame.
///
/// A clean EOF before the length prefix surfaces as `UnexpectedEof`, which
/// the channel read loop treats as the peer closing.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Packet>
where
    R: AsyncRead + Unpin,
{
    let length = reader.read_u32().await? as usize;
    if length > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("peer announced frame of {} bytes", length),
        ));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let packet = Packet::new("test-channel", Bytes::from_static(b"payload"));

        let mut wire = Vec::new();
        write_frame(&mut wire, &packet).await.unwrap();

        // Length prefix is big-endian and counts only the body
        let announced = u32::from_be_bytes(wire[0..4].try_into().unwrap()) as usize;
        assert_eq!(announced, wire.len() - 4);

        let mut reader = std::io::Cursor::new(wire);
        let decoded = read_frame(&mut reader).await.unwrap();
        assert_eq!(decoded.channel, "test-channel");
        assert_eq!(decoded.correlation_id, packet.correlation_id);
        assert_eq!(decoded.body, packet.body);
    }

    #[tokio::test]
    async fn test_oversized_announcement_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&(u32::MAX).to_be_bytes());
        let mut reader = std::io::Cursor::new(wire);

        let error = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_eof_mid_frame() {
        let packet = Packet::new("test-channel", Bytes::from_static(b"payload"));
        let mut wire = Vec::new();
        write_frame(&mut wire, &packet).await.unwrap();
        wire.truncate(wire.len() - 2);

        let mut reader = std::io::Cursor::new(wire);
        let error = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
