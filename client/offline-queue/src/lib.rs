//! Client-side delivery pipeline for practice-session submissions.
//!
//! A finished session's answers are written to a local durable queue and
//! drained to the API by a network-aware scheduler: at-least-once delivery
//! with bounded, exponentially backed-off retries. The server's recompute
//! path makes redelivery harmless, so the queue never tries to deduplicate.

pub mod clock;
pub mod network;
pub mod scheduler;
pub mod store;
pub mod submission;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use network::NetworkMonitor;
pub use scheduler::{QueueError, QueueEvent, SubmissionQueue};
pub use store::{StoreError, SubmissionStore};
pub use submission::{QueuedSubmission, SubmissionStatus, TimingData};
pub use transport::{DeliveryReceipt, HttpTransport, SubmissionTransport, TransportError};
