//! Event metadata attached to every bus payload.
//!
//! See the data-model invariant: when a component derives an event from an
//! input, it inherits `correlation_id` and `ts_event` unchanged; only
//! `source` and `ts` may be updated. Replay-sensitive planes must never read
//! the wall clock — their timestamps flow from payload meta instead.

use std::time::{SystemTime, UNIX_EPOCH};

/// Who emitted an event, for routing and guard checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Market,
    Storage,
    Risk,
    Strategy,
    Execution,
    Portfolio,
    Analytics,
    GlobalData,
    Metrics,
    Replay,
    State,
    Cli,
    System,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Market => "market",
            Source::Storage => "storage",
            Source::Risk => "risk",
            Source::Strategy => "strategy",
            Source::Execution => "execution",
            Source::Portfolio => "portfolio",
            Source::Analytics => "analytics",
            Source::GlobalData => "global_data",
            Source::Metrics => "metrics",
            Source::Replay => "replay",
            Source::State => "state",
            Source::Cli => "cli",
            Source::System => "system",
        }
    }
}

/// Wall-clock milliseconds since epoch. Only meta-construction helpers and
/// the WS/REST ingress edge may call this; every other component must derive
/// timestamps from an existing [`EventMeta`].
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

/// Metadata carried by every bus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMeta {
    pub source: Source,
    /// Wall-clock time of emission, milliseconds.
    pub ts: i64,
    /// Logical event time (e.g. a kline's end timestamp).
    pub ts_event: Option<i64>,
    /// Arrival time at the ingress boundary.
    pub ts_ingest: Option<i64>,
    /// Exchange-stamped time, when the venue provides one.
    pub ts_exchange: Option<i64>,
    /// Opaque id propagated along an event-derivation chain.
    pub correlation_id: Option<String>,
    /// Stable venue+market-type+channel identifier.
    pub stream_id: Option<String>,
    pub sequence: Option<u64>,
}

/// Optional overrides passed to [`create_meta`] / [`inherit_meta`].
#[derive(Debug, Clone, Default)]
pub struct MetaOpts {
    pub ts: Option<i64>,
    pub ts_event: Option<i64>,
    pub ts_ingest: Option<i64>,
    pub ts_exchange: Option<i64>,
    pub correlation_id: Option<String>,
    pub stream_id: Option<String>,
    pub sequence: Option<u64>,
}

/// Construct a fresh [`EventMeta`]. `ts` defaults to [`now_ms`] unless
/// `opts.ts` is set (used by replay harnesses that must not read the clock).
pub fn create_meta(source: Source, opts: MetaOpts) -> EventMeta {
    EventMeta {
        source,
        ts: opts.ts.unwrap_or_else(now_ms),
        ts_event: opts.ts_event,
        ts_ingest: opts.ts_ingest,
        ts_exchange: opts.ts_exchange,
        correlation_id: opts.correlation_id,
        stream_id: opts.stream_id,
        sequence: opts.sequence,
    }
}

/// Derive a child [`EventMeta`] from a parent event. `correlation_id`,
/// `ts_event`, and `stream_id` are copied unchanged from `parent`; `source`
/// and `ts` are updated. Other fields come from `opts` only (they are not
/// inherited by default).
pub fn inherit_meta(parent: &EventMeta, new_source: Source, opts: MetaOpts) -> EventMeta {
    EventMeta {
        source: new_source,
        ts: opts.ts.unwrap_or_else(now_ms),
        ts_event: parent.ts_event,
        ts_ingest: opts.ts_ingest,
        ts_exchange: opts.ts_exchange,
        correlation_id: parent.correlation_id.clone(),
        stream_id: parent.stream_id.clone(),
        sequence: opts.sequence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_meta_defaults_ts_to_now() {
        let before = now_ms();
        let meta = create_meta(Source::Market, MetaOpts::default());
        let after = now_ms();
        assert!(meta.ts >= before && meta.ts <= after);
        assert_eq!(meta.source, Source::Market);
        assert!(meta.correlation_id.is_none());
    }

    #[test]
    fn create_meta_honors_ts_override_for_replay() {
        let meta = create_meta(
            Source::Replay,
            MetaOpts {
                ts: Some(1_700_000_000_000),
                ..Default::default()
            },
        );
        assert_eq!(meta.ts, 1_700_000_000_000);
    }

    #[test]
    fn inherit_meta_copies_correlation_and_event_ts() {
        let parent = create_meta(
            Source::Market,
            MetaOpts {
                correlation_id: Some("corr-1".into()),
                ts_event: Some(1_700_000_000_000),
                stream_id: Some("bybit.public.linear.v5".into()),
                ..Default::default()
            },
        );

        let child = inherit_meta(&parent, Source::Storage, MetaOpts::default());

        assert_eq!(child.correlation_id, parent.correlation_id);
        assert_eq!(child.ts_event, parent.ts_event);
        assert_eq!(child.stream_id, parent.stream_id);
        assert_eq!(child.source, Source::Storage);
    }

    #[test]
    fn inherit_meta_does_not_inherit_sequence_or_ts_exchange() {
        let parent = create_meta(
            Source::Market,
            MetaOpts {
                sequence: Some(42),
                ts_exchange: Some(1_700_000_000_500),
                ..Default::default()
            },
        );

        let child = inherit_meta(&parent, Source::Storage, MetaOpts::default());
        assert_eq!(child.sequence, None);
        assert_eq!(child.ts_exchange, None);
    }
}
