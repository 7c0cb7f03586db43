use std::sync::Arc;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::protocol::{StatusReply, TextReply};
use crate::session::{SessionManager, TaskKind};
use crate::shutdown::Shutdown;
use crate::task::{
    run_streamed_task, HealthCard, HealthTicks, SpinnerFrame, SpinnerTicks, TaskReport, TickSink,
};
use crate::telemetry::{MockTelemetry, TelemetrySource};

/// The remote commands, independent of transport.
#[derive(Clone)]
pub struct FleetService {
    sessions: SessionManager,
    telemetry: Arc<dyn TelemetrySource>,
    config: SessionConfig,
    shutdown: Shutdown,
}

impl FleetService {
    pub fn new(config: SessionConfig, shutdown: Shutdown) -> Self {
        Self {
            sessions: SessionManager::new(),
            telemetry: Arc::new(MockTelemetry),
            config,
            shutdown,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySource>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn send_text(&self, text: &str) -> TextReply {
        tracing::info!("[TEXT] {}", text);
        TextReply {
            result: format!("Text received: {}", text),
        }
    }

    /// Fails with `AlreadyActive` before any frame is sent if the slot is taken.
    pub async fn start_spinner<K>(&self, sink: K) -> Result<TaskReport, SessionError>
    where
        K: TickSink<SpinnerFrame>,
    {
        let guard = self.sessions.try_acquire(TaskKind::Spinner)?;
        Ok(run_streamed_task(guard, self.config.spinner_policy(), SpinnerTicks, sink).await)
    }

    pub async fn show_health<K>(&self, sink: K) -> Result<TaskReport, SessionError>
    where
        K: TickSink<HealthCard>,
    {
        let guard = self.sessions.try_acquire(TaskKind::Health)?;
        let producer = HealthTicks::new(Arc::clone(&self.telemetry));
        Ok(run_streamed_task(guard, self.config.health_policy(), producer, sink).await)
    }

    pub fn stop(&self) -> TextReply {
        let outcome = self.sessions.signal();
        tracing::info!(?outcome, "stop requested");
        TextReply {
            result: outcome.message().to_string(),
        }
    }

    /// Acknowledges, then ends the process after the configured delay
    /// whatever task is running.
    pub fn exit(&self) -> TextReply {
        tracing::info!(delay_ms = self.config.exit_delay_ms, "[EXIT] shutdown requested by client");
        self.shutdown.trigger_after(self.config.exit_delay());
        TextReply {
            result: "Server is shutting down".to_string(),
        }
    }

    pub fn status(&self) -> StatusReply {
        StatusReply {
            active: self.sessions.active(),
        }
    }
}
