//! The board client: an in-memory view of the caller's tasks kept in sync
//! with the task service through direct calls and the realtime channel.
//!
//! | Module       | Role                                                     |
//! |--------------|----------------------------------------------------------|
//! | `state`      | task store, filter, query, editing draft, derived view   |
//! | `controller` | mutation policy, reconciliation, notices                 |
//! | `runtime`    | event loop owning the controller                         |
//! | `client`     | `TaskApi` seam and its HTTP implementation               |
//! | `realtime`   | reconnecting WebSocket subscriber                        |
//! | `session`    | stored credential and profile                            |
//! | `render`     | terminal output                                          |

pub mod client;
pub mod controller;
pub mod realtime;
pub mod render;
pub mod runtime;
pub mod session;
pub mod state;

pub use client::{AuthClient, HttpTaskApi, TaskApi};
pub use controller::{BoardController, Notice, NoticeKind};
pub use realtime::{RealtimeEvent, RealtimeSubscriber};
pub use runtime::{BoardHandle, BoardRuntime, BoardView, Command};
pub use session::{Session, SessionStore};
pub use state::{BoardState, Slot, StatusFilter};
