pub mod client;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod task;
pub mod telemetry;

pub use client::FleetClient;
pub use config::Config;
pub use endpoints::FleetService;
pub use error::{ConfigError, DeliveryError, SessionError};
pub use logging::init_logging;
pub use server::FleetServer;
pub use session::{SessionManager, StopOutcome, TaskGuard, TaskKind};
pub use shutdown::Shutdown;
pub use task::{run_streamed_task, TaskOutcome, TaskPolicy, TaskReport};
