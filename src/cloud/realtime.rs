//! Realtime insert feed over the Phoenix channel protocol.
//!
//! One websocket per subscription, owned by a background thread:
//!
//! ```text
//! connect  wss://host/realtime/v1/websocket?apikey=…&vsn=1.0.0
//! send     phx_join  realtime:public:{table}  (postgres_changes, INSERT)
//! loop     read with a short timeout → dispatch INSERT records
//!          every 30s → heartbeat on topic "phoenix"
//! stop     phx_leave, close frame
//! ```
//!
//! The thread stops when the [`Subscription`] is dropped.

use super::{CloudError, CloudRecord, SupabaseClient};
use serde_json::{Value, json};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tungstenite::protocol::Message;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::WebSocket;
use url::Url;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// How long a read may block before the loop checks for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// A decoded server message we care about.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Insert(CloudRecord),
    Joined,
    JoinFailed(String),
    /// Heartbeat replies, presence, other tables.
    Ignored,
}

fn topic(table: &str) -> String {
    format!("realtime:public:{table}")
}

/// `wss://host/realtime/v1/websocket?apikey=…&vsn=1.0.0` for an http(s) base.
pub(super) fn realtime_url(base: &Url, anon_key: &str) -> Result<Url, CloudError> {
    let mut url = base.clone();
    let scheme = if base.scheme() == "http" { "ws" } else { "wss" };
    url.set_scheme(scheme)
        .map_err(|_| CloudError::InvalidUrl(base.to_string()))?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| CloudError::InvalidUrl(base.to_string()))?;
        path.pop_if_empty().extend(["realtime", "v1", "websocket"]);
    }
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

pub(super) fn join_message(table: &str, anon_key: &str, msg_ref: u64) -> String {
    json!({
        "topic": topic(table),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "INSERT", "schema": "public", "table": table }
                ]
            },
            "access_token": anon_key
        },
        "ref": msg_ref.to_string(),
        "join_ref": msg_ref.to_string()
    })
    .to_string()
}

pub(super) fn heartbeat_message(msg_ref: u64) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string()
    })
    .to_string()
}

pub(super) fn leave_message(table: &str, msg_ref: u64) -> String {
    json!({
        "topic": topic(table),
        "event": "phx_leave",
        "payload": {},
        "ref": msg_ref.to_string()
    })
    .to_string()
}

/// Decode one text frame. Frames for other topics are ignored.
pub fn parse_message(table: &str, text: &str) -> Result<RealtimeEvent, CloudError> {
    let msg: Value = serde_json::from_str(text)?;
    if msg["topic"] != topic(table).as_str() {
        return Ok(RealtimeEvent::Ignored);
    }
    match msg["event"].as_str() {
        Some("postgres_changes") => {
            let data = &msg["payload"]["data"];
            if data["type"] != "INSERT" {
                return Ok(RealtimeEvent::Ignored);
            }
            let record = serde_json::from_value(data["record"].clone())?;
            Ok(RealtimeEvent::Insert(record))
        }
        Some("phx_reply") if msg["ref"] == msg["join_ref"] || msg["join_ref"].is_null() => {
            let payload = &msg["payload"];
            if payload["status"] == "ok" {
                Ok(RealtimeEvent::Joined)
            } else {
                Ok(RealtimeEvent::JoinFailed(payload["response"].to_string()))
            }
        }
        Some("phx_error") => Ok(RealtimeEvent::JoinFailed(msg["payload"].to_string())),
        _ => Ok(RealtimeEvent::Ignored),
    }
}

fn set_read_timeout(socket: &Socket, timeout: Duration) -> std::io::Result<()> {
    match socket.get_ref() {
        MaybeTlsStream::Plain(s) => s.set_read_timeout(Some(timeout)),
        MaybeTlsStream::Rustls(s) => s.get_ref().set_read_timeout(Some(timeout)),
        _ => Ok(()),
    }
}

fn is_timeout(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::Io(e)
            if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
    )
}

/// Live insert feed. Dropping it sends `phx_leave` and joins the worker.
#[derive(Debug)]
pub struct Subscription {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Subscription {
    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("realtime worker panicked");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SupabaseClient {
    /// Subscribe to inserts on the metadata table.
    ///
    /// Connects and sends the join before returning, so connection errors
    /// surface here. `on_insert` runs on the subscription's thread.
    pub fn subscribe_inserts(
        &self,
        mut on_insert: impl FnMut(CloudRecord) + Send + 'static,
    ) -> Result<Subscription, CloudError> {
        let url = realtime_url(self.base(), self.anon_key())?;
        let (mut socket, _response) = tungstenite::connect(url.as_str())?;
        set_read_timeout(&socket, POLL_INTERVAL)?;

        let table = self.table().to_string();
        socket.send(Message::Text(join_message(&table, self.anon_key(), 1).into()))?;
        tracing::info!(table = %table, "realtime subscription started");

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker = std::thread::spawn(move || {
            if let Err(e) = run(&mut socket, &table, &worker_stop, &mut on_insert) {
                tracing::warn!(error = %e, "realtime connection ended");
            }
        });
        Ok(Subscription {
            stop,
            worker: Some(worker),
        })
    }
}

fn run(
    socket: &mut Socket,
    table: &str,
    stop: &AtomicBool,
    on_insert: &mut impl FnMut(CloudRecord),
) -> Result<(), CloudError> {
    let mut next_ref = 2u64;
    let mut last_heartbeat = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
            socket.send(Message::Text(heartbeat_message(next_ref).into()))?;
            next_ref += 1;
            last_heartbeat = Instant::now();
        }

        match socket.read() {
            Ok(Message::Text(text)) => match parse_message(table, &text) {
                Ok(RealtimeEvent::Insert(record)) => on_insert(record),
                Ok(RealtimeEvent::Joined) => tracing::debug!(table, "realtime channel joined"),
                Ok(RealtimeEvent::JoinFailed(reason)) => {
                    tracing::warn!(table, %reason, "realtime channel rejected");
                    return Ok(());
                }
                Ok(RealtimeEvent::Ignored) => {}
                Err(e) => tracing::debug!(error = %e, "unparseable realtime frame"),
            },
            Ok(Message::Close(_)) => {
                tracing::info!(table, "realtime connection closed by server");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Best effort: the server drops the channel with the socket anyway.
    let _ = socket.send(Message::Text(leave_message(table, next_ref).into()));
    let _ = socket.close(None);
    tracing::info!(table, "realtime subscription stopped");
    Ok(())
}
