use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::protocol::{
    self, Incoming, RpcError, StatusReply, TextReply, METHOD_EXIT, METHOD_SEND_TEXT,
    METHOD_SHOW_HEALTH, METHOD_START_SPINNER, METHOD_STATUS, METHOD_STOP,
};
use crate::session::TaskKind;
use crate::task::{HealthCard, SpinnerFrame, TaskReport};

type Reply = Result<Value, RpcError>;

/// Ticks buffered per stream before newer ones are dropped.
const STREAM_BUFFER: usize = 64;

#[derive(Default)]
struct Routes {
    pending: HashMap<u64, oneshot::Sender<Reply>>,
    streams: HashMap<u64, mpsc::Sender<Value>>,
}

/// One connection to a fleet server. Calls may overlap, so a stream can be
/// stopped from the same client that started it.
pub struct FleetClient {
    request_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<Value>,
    routes: Arc<Mutex<Routes>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Ticks of one streaming call, followed by its final report.
pub struct TickStream<T> {
    ticks: mpsc::Receiver<Value>,
    done: oneshot::Receiver<Reply>,
    _tick: PhantomData<T>,
}

impl<T: DeserializeOwned> TickStream<T> {
    /// `None` once the server has closed the stream.
    pub async fn next(&mut self) -> Option<Result<T>> {
        let raw = self.ticks.recv().await?;
        Some(serde_json::from_value(raw).context("Malformed tick"))
    }

    /// Waits for the closing response. A rejected start surfaces here as an
    /// [`RpcError`] with `is_already_active()`.
    pub async fn finish(self) -> Result<TaskReport> {
        let reply = self
            .done
            .await
            .map_err(|_| anyhow!("Connection closed before stream finished"))?;
        let value = reply?;
        serde_json::from_value(value).context("Malformed stream report")
    }
}

impl FleetClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("Failed to connect to server")?;
        let (read_half, mut write_half) = stream.into_split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Value>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let Ok(line) = serde_json::to_string(&msg) else {
                    continue;
                };
                if write_half.write_all(line.as_bytes()).await.is_err()
                    || write_half.write_all(b"\n").await.is_err()
                    || write_half.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let routes = Arc::new(Mutex::new(Routes::default()));
        let reader = tokio::spawn(Self::read_loop(read_half, Arc::clone(&routes)));

        Ok(Self {
            request_id: AtomicU64::new(1),
            outgoing,
            routes,
            reader,
            writer,
        })
    }

    async fn read_loop(read_half: tokio::net::tcp::OwnedReadHalf, routes: Arc<Mutex<Routes>>) {
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }

            let Ok(msg) = serde_json::from_str::<Value>(&line) else {
                tracing::debug!("ignoring unparseable line from server");
                continue;
            };

            match Incoming::classify(&msg) {
                Some(Incoming::Tick { id, tick }) => {
                    // The reader also carries responses, so a slow consumer
                    // loses ticks rather than stalling the connection.
                    if let Some(tx) = routes.lock().await.streams.get(&id) {
                        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(tick) {
                            tracing::debug!(id, "stream buffer full, tick dropped");
                        }
                    }
                }
                Some(Incoming::Response { id, result }) => {
                    let mut routes = routes.lock().await;
                    routes.streams.remove(&id);
                    if let Some(tx) = routes.pending.remove(&id) {
                        let _ = tx.send(result);
                    }
                }
                None => tracing::debug!("ignoring unexpected message: {}", msg),
            }
        }

        // Wake everyone still waiting; their receivers now see a closed channel.
        let mut routes = routes.lock().await;
        routes.pending.clear();
        routes.streams.clear();
    }

    async fn send(
        &self,
        method: &str,
        params: Value,
        stream: Option<mpsc::Sender<Value>>,
    ) -> Result<oneshot::Receiver<Reply>> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut routes = self.routes.lock().await;
            routes.pending.insert(id, tx);
            if let Some(stream) = stream {
                routes.streams.insert(id, stream);
            }
        }
        self.outgoing
            .send(protocol::request(id, method, params))
            .map_err(|_| anyhow!("Connection closed"))?;
        Ok(rx)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let rx = self.send(method, params, None).await?;
        let value = rx
            .await
            .map_err(|_| anyhow!("Connection closed before {} returned", method))??;
        serde_json::from_value(value).with_context(|| format!("Malformed {} response", method))
    }

    async fn open_stream<T>(&self, method: &str) -> Result<TickStream<T>> {
        let (tick_tx, ticks) = mpsc::channel(STREAM_BUFFER);
        let done = self.send(method, json!({}), Some(tick_tx)).await?;
        Ok(TickStream {
            ticks,
            done,
            _tick: PhantomData,
        })
    }

    pub async fn send_text(&self, text: &str) -> Result<String> {
        let reply: TextReply = self.call(METHOD_SEND_TEXT, json!({ "text": text })).await?;
        Ok(reply.result)
    }

    pub async fn start_spinner(&self) -> Result<TickStream<SpinnerFrame>> {
        self.open_stream(METHOD_START_SPINNER).await
    }

    pub async fn show_health(&self) -> Result<TickStream<HealthCard>> {
        self.open_stream(METHOD_SHOW_HEALTH).await
    }

    pub async fn stop(&self) -> Result<String> {
        let reply: TextReply = self.call(METHOD_STOP, json!({})).await?;
        Ok(reply.result)
    }

    pub async fn exit(&self) -> Result<String> {
        let reply: TextReply = self.call(METHOD_EXIT, json!({})).await?;
        Ok(reply.result)
    }

    pub async fn status(&self) -> Result<Option<TaskKind>> {
        let reply: StatusReply = self.call(METHOD_STATUS, json!({})).await?;
        Ok(reply.active)
    }
}

/// Console layout of a health card.
pub fn render_health_card(card: &HealthCard) -> String {
    let mut out = String::from("--- ROBOT HEALTH ---\n");
    out.push_str(card.robot_ascii.trim_matches('\n'));
    out.push('\n');
    if let Some(h) = &card.health {
        out.push_str(&format!(
            "Status: {} | CPU: {:.1}% | Mem: {:.1}% | Current: {:.1}A | Uptime: {}\n",
            h.status, h.cpu_pct, h.mem_pct, h.current_amps, h.uptime
        ));
    }
    if let Some(c) = &card.connection {
        out.push_str(&format!(
            "RTT: {:.0} ms | Jitter: {:.0} ms | Connected: {}\n",
            c.rtt_ms, c.jitter_ms, c.connected
        ));
    }
    out
}

impl Drop for FleetClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
