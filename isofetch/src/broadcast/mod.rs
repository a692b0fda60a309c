//! Progress fan-out to live subscribers.
//!
//! ```text
//!   DownloadService ──broadcast(id, payload)──► ProgressBroadcaster
//!                                                  │ try_send
//!                        ┌─────────────────────────┼──────────────────┐
//!                        ▼                         ▼                  ▼
//!                  client_1 {}             client_2 {4, 9}      client_3 {7}
//!                  (everything)            (downloads 4, 9)     (download 7)
//! ```
//!
//! Delivery never blocks: each connection has a bounded queue and a full or
//! closed queue gets the connection dropped.

mod broadcaster;
mod event;

pub use broadcaster::{ConnectionId, ProgressBroadcaster, DEFAULT_CONNECTION_CAPACITY};
pub use event::{ClientMessage, ProgressPayload, ServerMessage};
