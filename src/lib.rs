//! PageSync — the collaboration core of a shared visual page editor.
//!
//! ARCHITECTURE
//! ============
//! Many browser sessions edit one page — an ordered list of positioned
//! elements plus canvas settings — and see each other's cursors, selections,
//! and chat bubbles live. The core is four pieces:
//!
//! - [`crdt`]: the replicated document. Transactions apply locally first and
//!   merge conflict-free in any delivery order; all replicas converge.
//! - [`presence`]: fire-and-forget per-session state with reader-side expiry.
//! - [`election`]: derives exactly one Leader per Room from presence join
//!   order; the Leader persists the document and arbitrates bootstrap.
//! - [`bootstrap`]: seeds empty Rooms from durable storage and runs the
//!   capped-retry reconnection policy with a degraded local-only fallback.
//!
//! [`room::RoomClient`] wires the four together over a [`transport`]; the
//! binary target is the websocket relay ([`routes`], [`relay`]) that fans
//! Room traffic out between sessions and serves the durable content
//! endpoints backed by [`storage`].

pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod crdt;
pub mod db;
pub mod election;
pub mod frame;
pub mod persist;
pub mod presence;
pub mod relay;
pub mod room;
pub mod routes;
pub mod session;
pub mod state;
pub mod storage;
pub mod transport;

pub use config::SyncConfig;
pub use room::RoomClient;
pub use session::{Identity, Session};
