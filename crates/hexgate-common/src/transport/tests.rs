//! Framing tests for the transport layer
//!
//! These tests run the frame reader and writer against in-memory duplex
//! streams.

#[cfg(test)]
mod tests {
    use crate::protocol::GatewayError;
    use crate::transport::{FrameReader, FrameWriter, MAX_MESSAGE_SIZE};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer.write_frame(b"first").await.unwrap();
        writer.write_frame(b"").await.unwrap();
        writer.write_frame(b"third").await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"first");
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"");
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"third");
    }

    #[tokio::test]
    async fn test_length_prefix_is_big_endian() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client);
        writer.write_frame(b"abc").await.unwrap();

        use tokio::io::AsyncReadExt;
        let mut raw = [0u8; 7];
        server.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw, [0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer.write_frame(b"last").await.unwrap();
        drop(writer);

        assert!(reader.read_frame().await.unwrap().is_some());
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_connection_lost() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"short").await.unwrap();
        drop(client);

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionLost(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        let len = (MAX_MESSAGE_SIZE as u32) + 1;
        client.write_all(&len.to_be_bytes()).await.unwrap();

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidMessage(_)));
        assert!(err.to_string().contains("Message too large"));
    }
}
