//! Mock robot readings for the health card.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Ok,
    Warn,
    Error,
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HealthLevel::Ok => "ok",
            HealthLevel::Warn => "warn",
            HealthLevel::Error => "error",
        })
    }
}

const LEVELS: [HealthLevel; 3] = [HealthLevel::Ok, HealthLevel::Warn, HealthLevel::Error];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthLevel,
    pub cpu_pct: f32,
    pub mem_pct: f32,
    pub current_amps: f32,
    pub uptime: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub rtt_ms: f32,
    pub jitter_ms: f32,
    pub connected: bool,
}

pub const ROBOT_ASCII: &str = r"
   [ROBOT]
   O
  /|\
  / \
[___]
";

/// Source of health and link readings, sampled once per tick.
pub trait TelemetrySource: Send + Sync {
    fn sample_health(&self) -> HealthStatus;
    fn sample_connection(&self) -> ConnectionStatus;
}

/// Random readings in plausible ranges.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockTelemetry;

impl TelemetrySource for MockTelemetry {
    fn sample_health(&self) -> HealthStatus {
        let mut rng = rand::thread_rng();
        HealthStatus {
            status: LEVELS[rng.gen_range(0..LEVELS.len())],
            cpu_pct: rng.gen_range(20.0..80.0),
            mem_pct: rng.gen_range(30.0..90.0),
            current_amps: rng.gen_range(8.0..12.0),
            uptime: format!(
                "{}h {}m {}s",
                rng.gen_range(0..2),
                rng.gen_range(0..60),
                rng.gen_range(0..60)
            ),
        }
    }

    fn sample_connection(&self) -> ConnectionStatus {
        let mut rng = rand::thread_rng();
        ConnectionStatus {
            rtt_ms: rng.gen_range(40.0..60.0),
            jitter_ms: rng.gen_range(10.0..30.0),
            connected: true,
        }
    }
}
