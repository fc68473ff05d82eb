//! Real-time market-data ingestion and processing backbone.
//!
//! Multiple exchanges stream order-book, trade, kline, open-interest,
//! funding, and liquidation data over WebSocket and REST. This crate
//! normalizes those heterogeneous feeds into canonical events, fans them out
//! through an in-process pub/sub bus, aggregates cross-venue signals,
//! journals them to a partitioned append-only store, and exposes a
//! readiness/quality signal that gates downstream trading.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── bus/            # Typed, synchronous event bus + event meta
//! ├── model/           # Canonical market entities and identifiers
//! ├── exchange/         # Per-venue WS gateway: lifecycle, heartbeat, resync
//! ├── rest/             # REST client + derivatives poller
//! ├── gateway/          # Composition: WS + REST + topic routing
//! ├── journal/          # Partitioned JSONL writer + quality detectors
//! ├── aggregate/         # Cross-venue signal aggregators
//! ├── quality/          # Global data-quality monitor
//! ├── readiness/        # Market-data readiness monitor
//! ├── orchestrator/      # Lifecycle + cleanup ordering
//! └── observability/     # Event tap + health reporter
//! ```
//!
//! The CLI, structured logging sinks, trading strategy engine, risk manager,
//! execution, portfolio bookkeeping, analytics feature builders, and
//! snapshot/recovery persistence are external collaborators that interact
//! with this crate solely through [`bus::EventBus`].

pub mod aggregate;
pub mod bus;
pub mod config;
pub mod error;
pub mod exchange;
pub mod gateway;
pub mod journal;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod quality;
pub mod readiness;
pub mod rest;

pub use error::{Error, Result};
