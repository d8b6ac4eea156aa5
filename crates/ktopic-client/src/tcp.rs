//! TCP broker client
//!
//! Speaks `ktopic-protocol` over plain TCP. Every frame carries a 4-byte
//! big-endian length prefix followed by the wire-encoded message.

use async_trait::async_trait;
use ktopic_core::compress;
use ktopic_protocol::{Request, Response, WireFormat, MAX_MESSAGE_SIZE};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::broker::{BrokerConnector, BrokerProducer, ConnectOptions};
use crate::error::{Error, Result};

/// Upper bound for retry backoff
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(1);

// ============================================================================
// Framing
// ============================================================================

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(frame.len())
        .map_err(|_| Error::ResponseTooLarge(frame.len(), u32::MAX as usize))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame, refusing frames above `max_size`
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_size {
        return Err(Error::ResponseTooLarge(len, max_size));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

// ============================================================================
// Connector
// ============================================================================

/// Dials [`TcpProducer`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl BrokerConnector for TcpConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn BrokerProducer>> {
        Ok(Box::new(TcpProducer::connect(options.clone()).await?))
    }
}

/// Try each broker in order; the first that accepts wins
async fn dial(options: &ConnectOptions) -> Result<(TcpStream, String)> {
    if options.brokers.is_empty() {
        return Err(Error::ConnectionError("no brokers configured".to_string()));
    }

    let mut last_error = String::new();
    for addr in &options.brokers {
        match tokio::time::timeout(options.connection_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                return Ok((stream, addr.clone()));
            }
            Ok(Err(e)) => {
                warn!(broker = %addr, error = %e, "Failed to connect to broker");
                last_error = e.to_string();
            }
            Err(_) => {
                warn!(broker = %addr, timeout = ?options.connection_timeout, "Connection timeout");
                last_error = format!("connection timeout to {}", addr);
            }
        }
    }

    Err(Error::ConnectionError(format!(
        "no reachable broker in {:?}: {}",
        options.brokers, last_error
    )))
}

// ============================================================================
// Producer
// ============================================================================

/// One TCP connection to a broker.
///
/// The stream is taken out for the duration of each exchange and only put
/// back once the exchange completed, so a request cut short by an error or a
/// cancelled future never leaves a half-written frame on a reused socket.
pub struct TcpProducer {
    options: ConnectOptions,
    stream: Option<TcpStream>,
    broker: String,
    correlation_id: u32,
}

impl TcpProducer {
    /// Connect eagerly to the first reachable broker
    pub async fn connect(options: ConnectOptions) -> Result<Self> {
        let (stream, broker) = dial(&options).await?;
        info!(broker = %broker, "Connected to broker");
        Ok(Self {
            options,
            stream: Some(stream),
            broker,
            correlation_id: 0,
        })
    }

    /// Address of the broker currently or last connected
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Round-trip a ping
    pub async fn ping(&mut self) -> Result<()> {
        match self.request(&Request::Ping, true).await? {
            Some(Response::Pong) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn request(&mut self, request: &Request, expect_response: bool) -> Result<Option<Response>> {
        let mut attempt = 0u32;
        loop {
            match self.exchange(request, expect_response).await {
                Err(e) if e.is_retriable() && attempt < self.options.retries => {
                    attempt += 1;
                    let backoff = self
                        .options
                        .retry_backoff
                        .saturating_mul(1u32 << (attempt - 1).min(16))
                        .min(MAX_RETRY_BACKOFF);
                    warn!(
                        broker = %self.broker,
                        attempt,
                        error = %e,
                        "Request failed, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                result => return result,
            }
        }
    }

    async fn exchange(&mut self, request: &Request, expect_response: bool) -> Result<Option<Response>> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                let (stream, broker) = dial(&self.options).await?;
                debug!(broker = %broker, "Reconnected to broker");
                self.broker = broker;
                stream
            }
        };

        self.correlation_id = self.correlation_id.wrapping_add(1);
        let correlation_id = self.correlation_id;
        let frame = request.to_wire(WireFormat::Postcard, correlation_id)?;

        let result = match tokio::time::timeout(
            self.options.request_timeout,
            exchange_on(&mut stream, &frame, correlation_id, expect_response),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "no response from {} within {:?}",
                self.broker, self.options.request_timeout
            ))),
        };

        if result.is_ok() {
            self.stream = Some(stream);
        }
        result
    }
}

async fn exchange_on(
    stream: &mut TcpStream,
    frame: &[u8],
    correlation_id: u32,
    expect_response: bool,
) -> Result<Option<Response>> {
    write_frame(stream, frame).await?;
    if !expect_response {
        return Ok(None);
    }

    let bytes = read_frame(stream, MAX_MESSAGE_SIZE).await?;
    let (response, _, response_id) = Response::from_wire(&bytes)?;
    if response_id != correlation_id {
        return Err(Error::InvalidResponse(format!(
            "correlation id mismatch: sent {}, got {}",
            correlation_id, response_id
        )));
    }
    Ok(Some(response))
}

fn unexpected(response: Option<Response>) -> Error {
    match response {
        Some(Response::Error { message }) => Error::ServerError(message),
        Some(other) => Error::InvalidResponse(format!("unexpected response: {:?}", other)),
        None => Error::InvalidResponse("missing response".to_string()),
    }
}

#[async_trait]
impl BrokerProducer for TcpProducer {
    async fn send(&mut self, topic: &str, partition: u32, payload: &[u8]) -> Result<()> {
        let request = Request::Publish {
            topic: topic.to_string(),
            partition,
            acks: self.options.acks,
            value: compress(self.options.compression, payload)?,
        };

        match self
            .request(&request, self.options.acks.expects_response())
            .await?
        {
            None | Some(Response::Published { .. }) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn partition_count(&mut self, topic: &str) -> Result<u32> {
        let request = Request::GetMetadata {
            topic: topic.to_string(),
        };
        match self.request(&request, true).await? {
            Some(Response::Metadata { partitions, .. }) => Ok(partitions),
            other => Err(unexpected(other)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
            debug!(broker = %self.broker, "Connection closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"hello").await.unwrap();
        let frame = read_frame(&mut server, 1024).await.unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&(4096u32).to_be_bytes()).await.unwrap();
        assert!(matches!(
            read_frame(&mut server, 1024).await,
            Err(Error::ResponseTooLarge(4096, 1024))
        ));
    }

    #[tokio::test]
    async fn test_dial_without_brokers() {
        let options = ConnectOptions {
            brokers: vec![],
            ..Default::default()
        };
        assert!(matches!(
            TcpConnector.connect(&options).await,
            Err(Error::ConnectionError(_))
        ));
    }

    #[tokio::test]
    async fn test_dial_unreachable_broker() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let options = ConnectOptions {
            brokers: vec![addr],
            connection_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(matches!(
            TcpProducer::connect(options).await,
            Err(Error::ConnectionError(_))
        ));
    }

    #[test]
    fn test_unexpected_response_mapping() {
        assert!(matches!(
            unexpected(Some(Response::Error {
                message: "no such topic".to_string()
            })),
            Error::ServerError(_)
        ));
        assert!(matches!(
            unexpected(Some(Response::Pong)),
            Error::InvalidResponse(_)
        ));
        assert!(matches!(unexpected(None), Error::InvalidResponse(_)));
    }
}
