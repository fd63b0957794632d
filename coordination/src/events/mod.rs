//! Progress events
//!
//! ```text
//! pipeline stage ──► ProgressBroadcaster ──► ProgressStream (one per request)
//!                          │
//!                          ▼
//!                      EventBus ──► monitoring observers (all requests)
//! ```
//!
//! The broadcaster owns the sequence counter for its request. Events leave
//! it in ascending `seq` order and nothing is sent after a terminal
//! `final_response` or `error`.

pub mod broadcaster;
pub mod bus;
pub mod types;

pub use broadcaster::{ProgressBroadcaster, ProgressStream};
pub use bus::{
    EventBus, EventBusExt, EventFilter, FilteredReceiver, RequestEvent, SharedEventBus,
};
pub use types::{ProgressEvent, ProgressPayload, Stage};
