//! Engine.IO v4 / Socket.IO v5 text frames
//!
//! Only the default namespace and text frames are used. Engine.IO packet
//! types are the first character; Socket.IO packets ride inside Engine.IO
//! `message` packets (`4`) with their own type digit.

use serde::Deserialize;

/// Client reply to a server ping.
pub const PONG: &str = "3";
/// Socket.IO connect request for the default namespace.
pub const CONNECT: &str = "40";
/// Engine.IO close.
pub const CLOSE: &str = "1";

/// Engine.IO open handshake payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl Handshake {
    /// Longest silence tolerated before the connection is considered dead.
    pub fn watchdog(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    /// Namespace connect acknowledged.
    Connected,
    /// Server dropped the namespace.
    Disconnect,
    Event {
        name: String,
        data: serde_json::Value,
    },
    ConnectError(String),
    Unknown(String),
}

impl Packet {
    pub fn decode(text: &str) -> Packet {
        let unknown = || Packet::Unknown(text.to_string());
        let mut chars = text.chars();
        match chars.next() {
            Some('0') => serde_json::from_str(&text[1..])
                .map(Packet::Open)
                .unwrap_or_else(|_| unknown()),
            Some('1') => Packet::Close,
            Some('2') => Packet::Ping,
            Some('3') => Packet::Pong,
            Some('4') => decode_socket_packet(&text[1..]).unwrap_or_else(unknown),
            _ => unknown(),
        }
    }
}

fn decode_socket_packet(body: &str) -> Option<Packet> {
    let kind = body.chars().next()?;
    let rest = &body[kind.len_utf8()..];
    match kind {
        '0' => Some(Packet::Connected),
        '1' => Some(Packet::Disconnect),
        '2' => {
            // An optional ack id precedes the array.
            let array = rest.trim_start_matches(|c: char| c.is_ascii_digit());
            let mut items: Vec<serde_json::Value> = serde_json::from_str(array).ok()?;
            if items.is_empty() {
                return None;
            }
            let name = items.remove(0).as_str()?.to_string();
            let data = if items.is_empty() {
                serde_json::Value::Null
            } else {
                items.remove(0)
            };
            Some(Packet::Event { name, data })
        }
        '4' => {
            let message = serde_json::from_str::<serde_json::Value>(rest)
                .ok()
                .and_then(|v| match v {
                    serde_json::Value::String(s) => Some(s),
                    other => other
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(String::from),
                })
                .unwrap_or_else(|| rest.to_string());
            Some(Packet::ConnectError(message))
        }
        _ => None,
    }
}

/// Whether a connect error means the token was refused.
pub fn is_auth_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["unauthorized", "auth", "token", "jwt", "forbidden"]
        .iter()
        .any(|needle| lower.contains(needle))
}
