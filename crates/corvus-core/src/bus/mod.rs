//! In-process pub/sub message bus connecting channels, the agent loop, and
//! the HTTP gateway.

pub mod queue;
pub mod types;

pub use queue::{MessageBus, Subscription};
pub use types::{InboundMessage, OutboundMessage};
