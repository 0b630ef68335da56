//! `hostlink-middleware` – fan-out and command dispatch.
//!
//! - [`bus`] – [`EventBus`]: `tokio::sync::broadcast` channel carrying
//!   fresh cache entries from the poller scheduler to the hub.
//! - [`hub`] – [`ConnectionHub`]: registry of live client connections,
//!   origin-checked accept, initial snapshot, per-connection send queues and
//!   failure-isolating broadcast.
//! - [`router`] – [`CommandRouter`]: closed mapping from command name to
//!   cache read, control action or guarded filesystem action.

pub mod bus;
pub mod hub;
pub mod router;

pub use bus::EventBus;
pub use hub::{BroadcastReport, ConnectionHub, Registration};
pub use router::{CommandRouter, Dispatch, Route, RouterContext};
