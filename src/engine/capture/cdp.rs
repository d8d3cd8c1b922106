//! Minimal DevTools protocol client over a websocket

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace};

/// Events kept while waiting for a command reply
const MAX_BUFFERED_EVENTS: usize = 512;

#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub session_id: Option<String>,
    pub params: Value,
}

enum Incoming {
    Reply {
        id: u64,
        result: std::result::Result<Value, String>,
    },
    Event(CdpEvent),
}

pub struct CdpConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    events: VecDeque<CdpEvent>,
    timeout: Duration,
}

impl CdpConnection {
    pub async fn connect(ws_url: &str, timeout: Duration) -> Result<Self> {
        let (socket, _) = tokio::time::timeout(timeout, connect_async(ws_url))
            .await
            .context("DevTools connect timed out")?
            .with_context(|| format!("DevTools connect to {} failed", ws_url))?;
        debug!(ws_url, "DevTools connected");
        Ok(Self {
            socket,
            next_id: 0,
            events: VecDeque::new(),
            timeout,
        })
    }

    /// Send a command and wait for its reply
    pub async fn call(&mut self, method: &str, params: Value, session: Option<&str>) -> Result<Value> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.call_inner(method, params, session))
            .await
            .with_context(|| format!("{} timed out after {:?}", method, timeout))?
    }

    async fn call_inner(&mut self, method: &str, params: Value, session: Option<&str>) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;

        let mut message = json!({ "id": id, "method": method, "params": params });
        if let Some(session) = session {
            message["sessionId"] = Value::String(session.to_string());
        }
        trace!(id, method, "CDP call");
        self.socket
            .send(WsMessage::Text(message.to_string().into()))
            .await
            .with_context(|| format!("Failed to send {}", method))?;

        loop {
            match self.receive().await? {
                Incoming::Reply { id: reply_id, result } if reply_id == id => {
                    return result.map_err(|e| anyhow::anyhow!("{} failed: {}", method, e));
                }
                Incoming::Reply { .. } => {}
                Incoming::Event(event) => self.buffer(event),
            }
        }
    }

    /// Wait for an event, consuming a buffered one if it already arrived
    pub async fn wait_event(&mut self, method: &str, session: Option<&str>) -> Result<Value> {
        let matches =
            |e: &CdpEvent| e.method == method && e.session_id.as_deref() == session;

        if let Some(pos) = self.events.iter().position(matches) {
            if let Some(event) = self.events.remove(pos) {
                return Ok(event.params);
            }
        }

        let timeout = self.timeout;
        tokio::time::timeout(timeout, async {
            loop {
                match self.receive().await? {
                    Incoming::Event(event) if matches(&event) => {
                        return Ok::<Value, anyhow::Error>(event.params)
                    }
                    Incoming::Event(event) => self.buffer(event),
                    Incoming::Reply { .. } => {}
                }
            }
        })
        .await
        .with_context(|| format!("No {} within {:?}", method, timeout))?
    }

    /// Drop buffered events belonging to `session`
    pub fn discard_events(&mut self, session: &str) {
        self.events
            .retain(|e| e.session_id.as_deref() != Some(session));
    }

    fn buffer(&mut self, event: CdpEvent) {
        if self.events.len() >= MAX_BUFFERED_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    async fn receive(&mut self) -> Result<Incoming> {
        loop {
            let Some(message) = self.socket.next().await else {
                anyhow::bail!("DevTools socket closed");
            };

            let payload: Value = match message.context("DevTools receive failed")? {
                WsMessage::Text(payload) => serde_json::from_str(payload.as_ref())?,
                WsMessage::Binary(payload) => serde_json::from_slice(&payload)?,
                WsMessage::Ping(payload) => {
                    self.socket.send(WsMessage::Pong(payload)).await?;
                    continue;
                }
                WsMessage::Close(_) => anyhow::bail!("DevTools socket closed by browser"),
                _ => continue,
            };

            return Ok(parse_incoming(payload));
        }
    }
}

fn parse_incoming(mut payload: Value) -> Incoming {
    if let Some(id) = payload.get("id").and_then(Value::as_u64) {
        let error = payload.get("error").map(|error| {
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string()
        });
        let result = match error {
            Some(message) => Err(message),
            None => Ok(payload.get_mut("result").map(Value::take).unwrap_or(Value::Null)),
        };
        return Incoming::Reply { id, result };
    }

    Incoming::Event(CdpEvent {
        method: payload
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        session_id: payload
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string),
        params: payload.get_mut("params").map(Value::take).unwrap_or(Value::Null),
    })
}
