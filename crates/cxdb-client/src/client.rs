//! TCP client for the CXDB binary protocol.
//!
//! One connection, one request in flight. Responses are matched to requests
//! by arrival order on the socket; the request id is bookkeeping only.
//!
//! Any I/O failure or timeout drops the socket, leaving the client
//! `Disconnected`. Reconnecting is the caller's decision.

use std::time::Duration;

use async_trait::async_trait;
use cxdb_core::append::{AppendRequest, encode_append_payload};
use cxdb_core::constants::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE, PROTOCOL_VERSION, msg};
use cxdb_core::frame::{FrameHeader, checked_encode_frame, decode_error_payload};
use cxdb_core::payload::content_hash;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::errors::{ClientError, Result};
use crate::store::{AppendAck, ContextHead, ContextStore, TurnHead};

/// Default client tag when the host does not supply one.
pub const DEFAULT_CLIENT_TAG: &str = "amplifier-hooks-cxdb";

/// Connection parameters for [`CxdbClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Binary protocol port.
    pub port: u16,
    /// Limit on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Limit on each request/response exchange, handshake included.
    pub request_timeout: Duration,
    /// Tag announced in HELLO.
    pub client_tag: String,
}

impl ClientConfig {
    /// Config with 5 s timeouts and the default client tag.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            client_tag: DEFAULT_CLIENT_TAG.to_string(),
        }
    }

    /// Replace the client tag.
    #[must_use]
    pub fn with_client_tag(mut self, tag: impl Into<String>) -> Self {
        self.client_tag = tag.into();
        self
    }

    /// Replace both timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Async CXDB protocol client.
#[derive(Debug)]
pub struct CxdbClient {
    config: ClientConfig,
    stream: Option<TcpStream>,
    next_request_id: u64,
    session_id: Option<u64>,
}

impl CxdbClient {
    /// Create a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            stream: None,
            next_request_id: 0,
            session_id: None,
        }
    }

    /// Server-assigned session id from the last successful handshake.
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Configured host.
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.next_request_id
    }

    /// Send one request and wait for its response on the held connection.
    ///
    /// Connection-class failures drop the socket.
    async fn request(&mut self, msg_type: u16, payload: &[u8]) -> Result<Vec<u8>> {
        if self.stream.is_none() {
            return Err(ClientError::NotConnected);
        }
        let request_id = self.next_request_id();
        let timeout = self.config.request_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        let result = exchange(stream, msg_type, request_id, payload, timeout).await;
        if let Err(ref e) = result {
            if e.is_connection_error() {
                debug!(op = msg::name(msg_type), error = %e, "dropping CXDB connection");
                self.stream = None;
            }
        }
        result
    }
}

/// Write one frame and read one response frame, under a single timeout.
async fn exchange(
    stream: &mut TcpStream,
    msg_type: u16,
    request_id: u64,
    payload: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>> {
    let frame = checked_encode_frame(msg_type, request_id, payload, 0)?;
    let io = async {
        stream.write_all(&frame).await?;
        stream.flush().await?;

        let mut header_buf = [0u8; FRAME_HEADER_SIZE];
        let _ = stream.read_exact(&mut header_buf).await?;
        let header = FrameHeader::decode(&header_buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let len = header.payload_len as usize;
        if len > MAX_FRAME_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("response frame of {len} bytes exceeds {MAX_FRAME_SIZE}"),
            ));
        }
        let mut body = vec![0u8; len];
        if !body.is_empty() {
            let _ = stream.read_exact(&mut body).await?;
        }
        Ok::<_, std::io::Error>((header.msg_type, body))
    };

    let (resp_type, body) = tokio::time::timeout(timeout, io)
        .await
        .map_err(|_| ClientError::Timeout {
            op: msg::name(msg_type),
            timeout,
        })?
        .map_err(ClientError::ConnectionLost)?;

    if resp_type == msg::ERROR {
        let (code, detail) = decode_error_payload(&body);
        return Err(ClientError::Protocol { code, detail });
    }
    Ok(body)
}

fn require(op: &'static str, body: &[u8], need: usize) -> Result<()> {
    if body.len() < need {
        return Err(ClientError::Malformed {
            op,
            got: body.len(),
            need,
        });
    }
    Ok(())
}

fn u64_at(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

/// HELLO body: version u16 · tag_len u16 · tag · meta_len u32 (always 0).
fn hello_payload(client_tag: &str) -> Result<Vec<u8>> {
    let tag = client_tag.as_bytes();
    let tag_len = u16::try_from(tag.len()).map_err(|_| {
        ClientError::Wire(cxdb_core::WireError::LengthOverflow {
            field: "client_tag",
            len: tag.len(),
        })
    })?;
    let mut out = Vec::with_capacity(2 + 2 + tag.len() + 4);
    out.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    out.extend_from_slice(&tag_len.to_le_bytes());
    out.extend_from_slice(tag);
    out.extend_from_slice(&0u32.to_le_bytes());
    Ok(out)
}

fn parse_context_head(op: &'static str, body: &[u8]) -> Result<ContextHead> {
    require(op, body, 20)?;
    Ok(ContextHead {
        context_id: u64_at(body, 0),
        head_turn_id: u64_at(body, 8),
        head_depth: u32_at(body, 16),
    })
}

#[async_trait]
impl ContextStore for CxdbClient {
    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn client_tag(&self) -> &str {
        &self.config.client_tag
    }

    async fn connect(&mut self) -> Result<()> {
        self.close().await;

        let addr = self.config.addr();
        let mut stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(addr.as_str()),
        )
        .await
        .map_err(|_| ClientError::Timeout {
            op: "connect",
            timeout: self.config.connect_timeout,
        })?
        .map_err(|source| ClientError::Connect {
            addr: addr.clone(),
            source,
        })?;

        let hello = hello_payload(&self.config.client_tag)?;
        let request_id = self.next_request_id();
        let body = exchange(
            &mut stream,
            msg::HELLO,
            request_id,
            &hello,
            self.config.request_timeout,
        )
        .await?;

        if body.len() >= 8 {
            self.session_id = Some(u64_at(&body, 0));
        }
        info!(
            addr = %addr,
            session = ?self.session_id,
            tag = %self.config.client_tag,
            "connected to CXDB"
        );
        self.stream = Some(stream);
        Ok(())
    }

    async fn create_context(&mut self, base_turn_id: u64) -> Result<ContextHead> {
        let body = self
            .request(msg::CTX_CREATE, &base_turn_id.to_le_bytes())
            .await?;
        let head = parse_context_head("CTX_CREATE", &body)?;
        debug!(
            context_id = head.context_id,
            head_turn_id = head.head_turn_id,
            head_depth = head.head_depth,
            "created context"
        );
        Ok(head)
    }

    async fn fork_context(&mut self, base_turn_id: u64) -> Result<ContextHead> {
        let body = self
            .request(msg::CTX_FORK, &base_turn_id.to_le_bytes())
            .await?;
        let head = parse_context_head("CTX_FORK", &body)?;
        debug!(context_id = head.context_id, base_turn_id, "forked context");
        Ok(head)
    }

    async fn get_head(&mut self, context_id: u64) -> Result<TurnHead> {
        let body = self
            .request(msg::GET_HEAD, &context_id.to_le_bytes())
            .await?;
        require("GET_HEAD", &body, 12)?;
        Ok(TurnHead {
            turn_id: u64_at(&body, 0),
            depth: u32_at(&body, 8),
        })
    }

    async fn append_serialized(
        &mut self,
        context_id: u64,
        payload: &[u8],
        type_id: &str,
        type_version: u32,
        parent_turn_id: u64,
    ) -> Result<AppendAck> {
        if self.stream.is_none() {
            return Err(ClientError::NotConnected);
        }
        let hash = content_hash(payload);
        let body = encode_append_payload(&AppendRequest {
            context_id,
            parent_turn_id,
            type_id,
            type_version,
            payload,
            content_hash: &hash,
        })?;
        let resp = self.request(msg::APPEND_TURN, &body).await?;
        require("APPEND_TURN", &resp, 20)?;
        let ack = AppendAck {
            context_id: u64_at(&resp, 0),
            turn_id: u64_at(&resp, 8),
            depth: u32_at(&resp, 16),
        };
        debug!(
            context_id,
            turn_id = ack.turn_id,
            depth = ack.depth,
            type_id,
            "appended turn"
        );
        Ok(ack)
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.session_id = None;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
