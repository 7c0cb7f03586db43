use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};

use crate::error::DeliveryError;
use crate::session::TaskGuard;
use crate::telemetry::{ConnectionStatus, HealthStatus, TelemetrySource, ROBOT_ASCII};

pub const SPINNER_FRAMES: [&str; 8] = ["|", "/", "-", "\\", "|", "/", "-", "\\"];

pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(60);
pub const SPINNER_INTERVAL: Duration = Duration::from_millis(200);
pub const HEALTH_INTERVAL: Duration = Duration::from_millis(2000);

/// Why a stream ended on its own terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stopped,
    Timeout,
}

impl FinishReason {
    pub fn marker(&self) -> &'static str {
        match self {
            FinishReason::Stopped => "[stopped]",
            FinishReason::Timeout => "[timeout]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Stopped,
    Timeout,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub outcome: TaskOutcome,
    /// Regular ticks delivered, not counting the final one.
    pub ticks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPolicy {
    pub max_duration: Duration,
    pub tick_interval: Duration,
}

impl TaskPolicy {
    pub fn spinner() -> Self {
        Self {
            max_duration: DEFAULT_MAX_DURATION,
            tick_interval: SPINNER_INTERVAL,
        }
    }

    pub fn health() -> Self {
        Self {
            max_duration: DEFAULT_MAX_DURATION,
            tick_interval: HEALTH_INTERVAL,
        }
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpinnerFrame {
    pub frame: String,
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionStatus>,
    pub robot_ascii: String,
    #[serde(default)]
    pub finished: bool,
}

/// Builds the payload for each tick of one task kind.
pub trait TickProducer: Send {
    type Tick: Send;

    fn next_tick(&mut self, index: u64) -> Self::Tick;
    fn final_tick(&self, reason: FinishReason) -> Self::Tick;
}

/// Where ticks go. An error means the receiver is gone for good.
pub trait TickSink<T>: Send {
    fn emit(&mut self, tick: T) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

impl<T: Send> TickSink<T> for mpsc::Sender<T> {
    fn emit(&mut self, tick: T) -> impl Future<Output = Result<(), DeliveryError>> + Send {
        async move {
            self.send(tick)
                .await
                .map_err(|_| DeliveryError("receiver closed".into()))
        }
    }
}

pub fn spinner_frame(index: u64) -> &'static str {
    SPINNER_FRAMES[(index % SPINNER_FRAMES.len() as u64) as usize]
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpinnerTicks;

impl TickProducer for SpinnerTicks {
    type Tick = SpinnerFrame;

    fn next_tick(&mut self, index: u64) -> SpinnerFrame {
        SpinnerFrame {
            frame: spinner_frame(index).to_string(),
            finished: false,
        }
    }

    fn final_tick(&self, reason: FinishReason) -> SpinnerFrame {
        SpinnerFrame {
            frame: reason.marker().to_string(),
            finished: true,
        }
    }
}

pub struct HealthTicks {
    source: Arc<dyn TelemetrySource>,
}

impl HealthTicks {
    pub fn new(source: Arc<dyn TelemetrySource>) -> Self {
        Self { source }
    }
}

impl TickProducer for HealthTicks {
    type Tick = HealthCard;

    fn next_tick(&mut self, _index: u64) -> HealthCard {
        HealthCard {
            health: Some(self.source.sample_health()),
            connection: Some(self.source.sample_connection()),
            robot_ascii: ROBOT_ASCII.to_string(),
            finished: false,
        }
    }

    fn final_tick(&self, reason: FinishReason) -> HealthCard {
        HealthCard {
            health: None,
            connection: None,
            robot_ascii: reason.marker().to_string(),
            finished: true,
        }
    }
}

/// Drives one streamed task until it is stopped, times out, or the sink
/// fails. The slot held by `guard` is free by the time this returns.
///
/// Stop is checked before timeout on every iteration, and both are only
/// checked between ticks, so a stop lands within one `tick_interval`.
pub async fn run_streamed_task<P, K>(
    guard: TaskGuard,
    policy: TaskPolicy,
    mut producer: P,
    mut sink: K,
) -> TaskReport
where
    P: TickProducer,
    K: TickSink<P::Tick>,
{
    let kind = guard.kind();
    let task = guard.task_id();
    let started = Instant::now();
    let mut ticks: u64 = 0;

    tracing::info!(%task, %kind, "task started");

    let outcome = loop {
        let finish = if guard.stop_signal().is_triggered() {
            Some(FinishReason::Stopped)
        } else if started.elapsed() > policy.max_duration {
            Some(FinishReason::Timeout)
        } else {
            None
        };

        if let Some(reason) = finish {
            if let Err(e) = sink.emit(producer.final_tick(reason)).await {
                tracing::debug!(%task, %kind, "final tick not delivered: {}", e);
            }
            break match reason {
                FinishReason::Stopped => {
                    tracing::info!(%task, %kind, ticks, "task stopped by client");
                    TaskOutcome::Stopped
                }
                FinishReason::Timeout => {
                    tracing::info!(%task, %kind, ticks, "task timed out");
                    TaskOutcome::Timeout
                }
            };
        }

        if let Err(e) = sink.emit(producer.next_tick(ticks)).await {
            tracing::warn!(%task, %kind, ticks, "abandoning task: {}", e);
            break TaskOutcome::Disconnected;
        }
        tracing::debug!(%task, %kind, tick = ticks, "tick sent");
        ticks += 1;

        sleep(policy.tick_interval).await;
    };

    guard.release();
    TaskReport { outcome, ticks }
}
