//! Info Protocol Client
//!
//! Name/value request-response exchanged with a node over an open connection.
//! The tend loop treats it as a synchronous RPC: send command names, get back
//! a map from name to value.
//!
//! ## Wire framing ([`TextInfoClient`])
//!
//! ```text
//! +---------+------+-------------------------+----------------------+
//! | version | type | length (48-bit, BE)     | body                 |
//! |  1 byte |  1 B |        6 bytes          | `length` bytes       |
//! +---------+------+-------------------------+----------------------+
//! request body:  "name1\nname2\n"
//! response body: "name1\tvalue1\nname2\tvalue2\n"
//! ```

use crate::transport::Connection;
use crate::{ClusterError, Result};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

/// Info protocol version
pub const INFO_VERSION: u8 = 2;

/// Message type for info exchanges
pub const INFO_TYPE: u8 = 1;

const HEADER_SIZE: usize = 8;

/// Largest response body accepted
pub const MAX_INFO_SIZE: usize = 128 * 1024 * 1024;

/// Issues info requests
#[async_trait]
pub trait InfoClient: Send + Sync {
    async fn request(
        &self,
        conn: &mut dyn Connection,
        commands: &[&str],
    ) -> Result<HashMap<String, String>>;
}

/// [`InfoClient`] speaking the text framing above
#[derive(Debug, Default, Clone)]
pub struct TextInfoClient;

impl TextInfoClient {
    pub fn new() -> Self {
        Self
    }

    /// Build the framed request for `commands`
    pub fn encode_request(commands: &[&str]) -> BytesMut {
        let body_len: usize = commands.iter().map(|c| c.len() + 1).sum();
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_len);
        buf.put_u64(encode_header(body_len));
        for command in commands {
            buf.put_slice(command.as_bytes());
            buf.put_u8(b'\n');
        }
        buf
    }

    /// Split a response body into name/value pairs
    pub fn parse_response(body: &str) -> HashMap<String, String> {
        body.split('\n')
            .filter(|line| !line.is_empty())
            .map(|line| match line.split_once('\t') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (line.to_string(), String::new()),
            })
            .collect()
    }
}

fn encode_header(body_len: usize) -> u64 {
    ((INFO_VERSION as u64) << 56) | ((INFO_TYPE as u64) << 48) | (body_len as u64 & 0xFFFF_FFFF_FFFF)
}

#[async_trait]
impl InfoClient for TextInfoClient {
    async fn request(
        &self,
        conn: &mut dyn Connection,
        commands: &[&str],
    ) -> Result<HashMap<String, String>> {
        let request = Self::encode_request(commands);
        conn.write(&request).await?;

        let header = conn.read(HEADER_SIZE).await?;
        let raw: [u8; HEADER_SIZE] = header
            .get(..HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| ClusterError::parse(format!("Short info header: {} bytes", header.len())))?;
        let header = u64::from_be_bytes(raw);

        let version = (header >> 56) as u8;
        let msg_type = ((header >> 48) & 0xFF) as u8;
        let length = (header & 0xFFFF_FFFF_FFFF) as usize;

        if version != INFO_VERSION || msg_type != INFO_TYPE {
            return Err(ClusterError::parse(format!(
                "Unexpected info header: version {} type {}",
                version, msg_type
            )));
        }
        if length > MAX_INFO_SIZE {
            return Err(ClusterError::parse(format!(
                "Info response size {} exceeds maximum {}",
                length, MAX_INFO_SIZE
            )));
        }
        if length == 0 {
            return Ok(HashMap::new());
        }

        let body = conn.read(length).await?;
        let body = std::str::from_utf8(&body)
            .map_err(|e| ClusterError::parse(format!("Info response is not UTF-8: {}", e)))?;

        Ok(Self::parse_response(body))
    }
}
