mod client;
mod error;
mod mock;
mod publisher;

pub use client::{KinesisSink, SinkRecord, StreamSink};
pub use error::{SinkError, SinkResult};
pub use mock::MockSink;
pub use publisher::{Publisher, PublisherConfig};
