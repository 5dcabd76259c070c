//! Content-based request multiplexer.
//!
//! One listener, several backends: every inbound request is matched against an
//! ordered list of [`HandlerRule`]s and handed to the first rule whose predicate
//! accepts it, falling back to a default handler. The canonical order is gRPC,
//! then push-delivery unwrap, then the REST gateway as default.

pub mod handler;
pub mod mux;
pub mod observability;
pub mod predicate;
pub mod pubsub;

pub use handler::{Handler, HandlerRule};
pub use mux::{make, Multiplexer};
pub use pubsub::{EnvelopeError, PubSubOptions};
