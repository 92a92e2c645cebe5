//! Generation event bus and live-notification relay.
//!
//! - [`EventBus`]: in-process publish/subscribe hub with two typed
//!   channels backed by `tokio::sync::broadcast`: raw worker frames and
//!   synthesized generation results.
//! - [`LiveRelay`]: background service forwarding generation results to
//!   end-user sessions through a [`LiveNotifier`].

pub mod bus;
pub mod relay;

pub use bus::{EventBus, GenerationEvent, RawFrameEvent};
pub use relay::{LiveNotifier, LiveRelay};
