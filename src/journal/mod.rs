//! Event journal: partitioned JSONL persistence plus the quality detectors
//! that run on the way in (§4.5, §4.6).

pub mod quality;
pub mod writer;

pub use quality::{
    DuplicateEvent, GapEvent, LatencySpikeEvent, OutOfOrderEvent, QualityDetector, SequenceIssueEvent, SequenceIssueKind,
};
pub use writer::{JournalConfig, JournalWriter, WriteFailedEvent};
