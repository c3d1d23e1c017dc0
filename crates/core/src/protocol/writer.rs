//! Single-writer access to the worker's input stream.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::ChildStdin;

use super::codec::FrameEncoder;
use super::envelope::RequestEnvelope;
use super::error::ProtocolError;

/// Writes whole request records to a stream. Once closed, it rejects sends.
pub struct FrameWriter<W = ChildStdin> {
    stream: Option<W>,
    encoder: FrameEncoder,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(stream: W, encoder: FrameEncoder) -> Self {
        Self {
            stream: Some(stream),
            encoder,
        }
    }

    /// Encodes the envelope completely before writing, so a failed encode
    /// never leaves a partial record on the stream.
    pub async fn send(&mut self, envelope: &RequestEnvelope) -> Result<(), ProtocolError> {
        let record = self.encoder.encode_request(envelope)?;
        let stream = self.stream.as_mut().ok_or(ProtocolError::Closed)?;
        stream.write_all(&record).await?;
        stream.flush().await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Signals end of input. Idempotent.
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_send_then_close() {
        let config = ProtocolConfig::default();
        let (client, mut server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client, FrameEncoder::new(&config));

        let first = RequestEnvelope::new("a", json!({"n": 1})).unwrap();
        let second = RequestEnvelope::new("b", json!({"n": 2})).unwrap();
        writer.send(&first).await.unwrap();
        writer.send(&second).await.unwrap();
        writer.close().await.unwrap();
        assert!(writer.is_closed());

        let mut received = String::new();
        server.read_to_string(&mut received).await.unwrap();
        assert_eq!(
            received,
            "{\"id\":\"a\",\"n\":1}<<END>>\n{\"id\":\"b\",\"n\":2}<<END>>\n"
        );
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let config = ProtocolConfig::default();
        let (client, _server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client, FrameEncoder::new(&config));
        writer.close().await.unwrap();
        writer.close().await.unwrap();

        let env = RequestEnvelope::new("a", json!({})).unwrap();
        assert!(matches!(
            writer.send(&env).await,
            Err(ProtocolError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_broken_pipe_is_write_error() {
        let config = ProtocolConfig::default();
        let stream = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "worker is gone",
            ))
            .build();
        let mut writer = FrameWriter::new(stream, FrameEncoder::new(&config));

        let env = RequestEnvelope::new("a", json!({})).unwrap();
        assert!(matches!(
            writer.send(&env).await,
            Err(ProtocolError::Write(_))
        ));
    }
}
