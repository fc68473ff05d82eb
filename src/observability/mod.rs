//! Event tap + health reporter (§4's Observability row): lightweight runtime
//! counters and a periodic JSONL health snapshot. Everything else in the
//! spec's logging story is `tracing` call sites at each component, owned by
//! that component rather than centralized here.

pub mod health;
pub mod tap;

pub use health::{HealthReporter, HealthReporterConfig};
pub use tap::EventTap;
