//! The pull-stream protocol as first-class types
//!
//! A pull source only produces when asked: every call to
//! [`PullSource::request`] resolves to exactly one [`Response`]. A pull sink
//! owns its demand loop and drives a source until it sees `End` or `Error`.
//! Aborting is an explicit [`Request::Abort`] rather than a sentinel argument.

pub mod sinks;
pub mod sources;

use async_trait::async_trait;

use crate::error::{StreamError, StreamResult};

pub use sinks::{collect, concat, drain, take_sink, Collect, Concat, Drain, TakeSink};
pub use sources::{
    empty, error, from_result_stream, from_stream, values, values_with_abort, Empty, ErrorSource,
    FromResultStream, FromStream, Values,
};

/// What a consumer asks of a pull source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Produce the next item
    Demand,
    /// Stop producing and release resources. `None` is a plain abort,
    /// `Some` carries the error that caused it.
    Abort(Option<StreamError>),
}

impl Request {
    pub fn is_abort(&self) -> bool {
        matches!(self, Request::Abort(_))
    }
}

/// Resolution of a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response<T> {
    Item(T),
    End,
    Error(StreamError),
}

impl<T> Response<T> {
    /// Whether no further items will follow
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::Item(_))
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Response::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn into_result(self) -> StreamResult<Option<T>> {
        match self {
            Response::Item(item) => Ok(Some(item)),
            Response::End => Ok(None),
            Response::Error(err) => Err(err),
        }
    }
}

/// A demand-driven producer.
///
/// Taking `&mut self` means a caller can never have two requests in flight
/// on the same source. After an `Abort` the source must answer `End` (or an
/// error raised while cleaning up) and produce nothing more.
#[async_trait]
pub trait PullSource<T: Send + 'static>: Send {
    async fn request(&mut self, request: Request) -> Response<T>;
}

#[async_trait]
impl<T, S> PullSource<T> for Box<S>
where
    T: Send + 'static,
    S: PullSource<T> + ?Sized,
{
    async fn request(&mut self, request: Request) -> Response<T> {
        (**self).request(request).await
    }
}

/// A consumer that owns its demand loop.
///
/// `consume` keeps requesting from `source` until it sees `End` or `Error`,
/// or until it decides to stop early, in which case it must send
/// `Request::Abort` first. It returns `Ok(())` on a normal finish and the
/// propagated error otherwise.
#[async_trait]
pub trait PullSink<T: Send + 'static>: Send {
    async fn consume(&mut self, source: &mut (dyn PullSource<T> + Send)) -> StreamResult<()>;
}
