pub mod error;
pub mod events;
pub mod lifecycle;
pub mod pull;
pub mod readable;
pub mod stream_configuration;
pub mod writable;

use futures_util::stream::BoxStream;

/// A boxed, heap-allocated stream used at the edges of the adapters
pub type RS2Stream<O> = BoxStream<'static, O>;

pub use error::{StreamError, StreamResult};
pub use lifecycle::Phase;
pub use pull::{PullSink, PullSource, Request, Response};
pub use readable::{readable, Readable};
pub use stream_configuration::StreamOptions;
pub use writable::{writeable, Writable};
