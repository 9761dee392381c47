/// Inbound side of a session: the connected terminal client
mod connection;
#[cfg(test)]
pub mod memory_connection;
mod output_sink;

pub use connection::{
    ConnectionError, ConnectionResult, InboundConnection, InboundStreams, ResizeEvent, ResizeFeed,
};
pub use output_sink::OutputSink;
