//! REST client and the derivatives poller built on top of it (§4.3).

pub mod client;
pub mod poller;

pub use client::{ClassifiedError, ErrorCategory, ResponseMeta, RestClient, RestResponse};
pub use poller::{DerivativesPoller, PollerConfig};
