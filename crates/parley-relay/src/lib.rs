//! # parley-relay
//!
//! Presence tracking and live direct-message relay for Parley.
//!
//! This crate holds the only stateful part of the chat backend: which user is
//! reachable through which live connection, and how a direct message reaches
//! its recipient.
//!
//! ## Architecture
//!
//! ```text
//!   transport task ──accept/bind/disconnect──> LifecycleManager ──writes──┐
//!                                                                         v
//!   transport task ──send-msg──> RelayEngine ──lookup──> ConnectionRegistry
//!                                    │                                    │
//!                                    v                                    v
//!                              MessageStore                    ConnectionHandle
//!                              (persist)                       (mpsc::Sender)
//! ```
//!
//! - **ConnectionRegistry**: `UserId -> ConnectionHandle`, last bind wins
//! - **LifecycleManager**: per-connection `Unbound -> Bound -> Closed` state
//!   machine, the only writer of the registry
//! - **RelayEngine**: persists each message then attempts a single live
//!   delivery, degrading to store-and-forward when the recipient is offline
//! - **MessageStore**: durable collaborator implemented by the server crate

pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod store;

mod error;
mod types;

pub use error::{RelayError, StoreError};
pub use lifecycle::{Connection, ConnectionState, LifecycleConfig, LifecycleManager};
pub use protocol::{ClientEvent, SendMessage, ServerEvent};
pub use registry::{ConnectionHandle, ConnectionRegistry, SendResult};
pub use relay::{Delivery, RelayEngine, RelayOutcome};
pub use store::{MessageStore, StoredMessage};
pub use types::*;
