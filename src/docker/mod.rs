//! Docker payload handling.
//!
//! # Data Flow
//! ```text
//! upstream response body
//!     → logs.rs (multiplexed frame decoding → text)
//!     → labels.rs (host path redaction → sanitized labels)
//!     → dashboard
//! ```
//!
//! # Design Decisions
//! - Pure functions over byte slices and maps; no I/O
//! - Malformed input degrades to best-effort output instead of an error

pub mod labels;
pub mod logs;

pub use labels::{sanitize_label_value, sanitize_labels, REDACTED};
pub use logs::{classify, decode_log_payload, frames, LogFrame, LogPayload, StreamKind};
