//! Broadcast hub for live fan-out
//!
//! The hub tracks every connected viewer and copies each frame of the live
//! feed into the bounded queue of every viewer that is streaming. Each queue
//! is drained by that viewer's own writer task, so a slow socket only ever
//! costs its own viewer frames.
//!
//! # Architecture
//!
//! ```text
//!                         Arc<BroadcastHub>
//!                    ┌──────────────────────────┐
//!                    │ feed: GopCache           │
//!                    │ clients: HashMap<Id,     │
//!                    │   ClientEntry {          │
//!                    │     state, synced,       │
//!                    │     queue: FrameQueue,   │
//!                    │   }                      │
//!                    │ >                        │
//!                    └────────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!     [Feed pump]           [Writer task]           [Writer task]
//!     hub.publish()         queue.pop()             queue.pop()
//!         │                       │                       │
//!         └──► push_frame() ──────┴──► ws.send() ──► TCP ─┘
//! ```
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` is reference counted, so every queue holding a frame shares
//! the allocation the framer produced. It is freed when the last writer has
//! sent (or dropped) it.

pub mod config;
pub mod entry;
pub mod error;
pub mod queue;
pub mod store;

pub use config::{HubConfig, MIN_QUEUE_CAPACITY};
pub use entry::{ClientEntry, ClientId, Delivery, StartOutcome};
pub use error::HubError;
pub use queue::{FrameQueue, Outbound, PushOutcome};
pub use store::{BroadcastHub, PublishReport};
