use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::endpoints::FleetService;
use crate::error::{DeliveryError, SessionError};
use crate::protocol::{
    self, RpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_EXIT, METHOD_NOT_FOUND,
    METHOD_SEND_TEXT, METHOD_SHOW_HEALTH, METHOD_START_SPINNER, METHOD_STATUS, METHOD_STOP,
    PARSE_ERROR,
};
use crate::shutdown::Shutdown;
use crate::task::{TaskReport, TickSink};

/// Outgoing messages queued per connection before stream ticks block.
const OUTGOING_BUFFER: usize = 64;

pub struct FleetServer {
    service: FleetService,
    shutdown: Shutdown,
}

impl FleetServer {
    pub fn new(service: FleetService, shutdown: Shutdown) -> Self {
        Self { service, shutdown }
    }

    /// Accepts connections until shutdown is triggered.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!("HRI server has started on {}", addr);

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => {
                    tracing::info!("Shutting down server...");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "client connected");
                        let service = self.service.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(service, stream).await {
                                tracing::warn!(%peer, "connection error: {}", e);
                            }
                            tracing::debug!(%peer, "client disconnected");
                        });
                    }
                    Err(e) => tracing::warn!("accept failed: {}", e),
                }
            }
        }

        Ok(())
    }
}

/// Ticks for one streaming request, framed as notifications on the
/// connection's outgoing queue. Delivery fails once the writer has hit a
/// write error and dropped the queue.
struct StreamSink {
    id: Value,
    outgoing: mpsc::Sender<Value>,
}

impl<T: Serialize + Send + 'static> TickSink<T> for StreamSink {
    fn emit(&mut self, tick: T) -> impl Future<Output = Result<(), DeliveryError>> + Send {
        async move {
            let tick = serde_json::to_value(&tick).map_err(|e| DeliveryError(e.to_string()))?;
            self.outgoing
                .send(protocol::tick_notification(&self.id, tick))
                .await
                .map_err(|_| DeliveryError("client disconnected".into()))
        }
    }
}

async fn handle_connection(service: FleetService, stream: TcpStream) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Value>(OUTGOING_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            let line = match serde_json::to_string(&msg) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("dropping unserializable message: {}", e);
                    continue;
                }
            };
            if write_half.write_all(line.as_bytes()).await.is_err()
                || write_half.write_all(b"\n").await.is_err()
                || write_half.flush().await.is_err()
            {
                tracing::debug!("write failed, client disconnected");
                break;
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            // A half-closed client may still be reading its streams.
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("read error: {}", e);
                break;
            }
        }

        if line.trim().is_empty() {
            continue;
        }

        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                let err = RpcError::new(PARSE_ERROR, format!("Parse error: {}", e));
                if outgoing_tx.send(protocol::failure(None, &err)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        // Each request runs on its own task so Stop can overtake a stream.
        let service = service.clone();
        let outgoing = outgoing_tx.clone();
        tokio::spawn(async move {
            if let Some(response) = handle_request(&service, msg, outgoing.clone()).await {
                let _ = outgoing.send(response).await;
            }
        });
    }

    // Requests still running hold their own senders; the writer ends once
    // they finish or a write fails.
    drop(outgoing_tx);
    let _ = writer.await;
    Ok(())
}

/// Returns the response to write, or `None` for notifications.
async fn handle_request(
    service: &FleetService,
    request: Value,
    outgoing: mpsc::Sender<Value>,
) -> Option<Value> {
    let method = request
        .get("method")
        .and_then(|m| m.as_str())
        .unwrap_or("")
        .to_string();
    let id = request.get("id").cloned().filter(|id| !id.is_null());
    let params = request.get("params").cloned().unwrap_or(json!({}));

    tracing::debug!(%method, ?id, "request");

    let result = match method.as_str() {
        METHOD_SEND_TEXT => match params.get("text").and_then(|t| t.as_str()) {
            Some(text) => to_value(service.send_text(text)),
            None => Err(RpcError::new(INVALID_PARAMS, "Missing text")),
        },
        METHOD_STOP => to_value(service.stop()),
        METHOD_EXIT => to_value(service.exit()),
        METHOD_STATUS => to_value(service.status()),
        METHOD_START_SPINNER | METHOD_SHOW_HEALTH => match &id {
            Some(stream_id) => {
                let sink = StreamSink {
                    id: stream_id.clone(),
                    outgoing,
                };
                let report = if method == METHOD_START_SPINNER {
                    service.start_spinner(sink).await
                } else {
                    service.show_health(sink).await
                };
                stream_result(report)
            }
            None => {
                tracing::warn!(%method, "streaming call without id ignored");
                return None;
            }
        },
        "" => Err(RpcError::new(INVALID_REQUEST, "Missing method")),
        other => Err(RpcError::new(
            METHOD_NOT_FOUND,
            format!("Unknown method: {}", other),
        )),
    };

    let id = id?;
    Some(match result {
        Ok(value) => protocol::success(Some(id), value),
        Err(e) => protocol::failure(Some(id), &e),
    })
}

fn stream_result(report: Result<TaskReport, SessionError>) -> Result<Value, RpcError> {
    match report {
        Ok(report) => to_value(report),
        Err(SessionError::AlreadyActive { active }) => {
            tracing::info!(%active, "start rejected, slot busy");
            Err(RpcError::already_active(active))
        }
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
}
