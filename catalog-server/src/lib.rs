pub mod app;
pub mod lifecycle;
pub mod metrics_http;
pub mod subsystems;

pub use app::{build, App};
pub use lifecycle::{Orchestrator, ShutdownCause, ShutdownReport, Subsystem};
