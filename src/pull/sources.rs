//! Ready-made pull sources

use async_trait::async_trait;
use futures_util::StreamExt;

use super::{PullSource, Request, Response};
use crate::error::{StreamError, StreamResult};
use crate::RS2Stream;

type AbortHook = Box<dyn FnOnce(Option<StreamError>) + Send + 'static>;

/// Source yielding the values of an iterator, then `End`
pub struct Values<I> {
    iter: Option<I>,
    on_abort: Option<AbortHook>,
}

/// Create a source from anything iterable
pub fn values<I>(iter: I) -> Values<I::IntoIter>
where
    I: IntoIterator,
{
    Values {
        iter: Some(iter.into_iter()),
        on_abort: None,
    }
}

/// Like [`values`], calling `on_abort` with the abort reason when the
/// consumer aborts before the values run out.
pub fn values_with_abort<I, F>(iter: I, on_abort: F) -> Values<I::IntoIter>
where
    I: IntoIterator,
    F: FnOnce(Option<StreamError>) + Send + 'static,
{
    Values {
        iter: Some(iter.into_iter()),
        on_abort: Some(Box::new(on_abort)),
    }
}

#[async_trait]
impl<I> PullSource<I::Item> for Values<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
{
    async fn request(&mut self, request: Request) -> Response<I::Item> {
        match request {
            Request::Abort(reason) => {
                self.iter = None;
                if let Some(hook) = self.on_abort.take() {
                    hook(reason);
                }
                Response::End
            }
            Request::Demand => match self.iter.as_mut().and_then(Iterator::next) {
                Some(item) => Response::Item(item),
                None => {
                    self.iter = None;
                    Response::End
                }
            },
        }
    }
}

/// Source failing every demand with the same error
#[derive(Debug, Clone)]
pub struct ErrorSource {
    error: StreamError,
}

pub fn error(error: StreamError) -> ErrorSource {
    ErrorSource { error }
}

#[async_trait]
impl<T: Send + 'static> PullSource<T> for ErrorSource {
    async fn request(&mut self, request: Request) -> Response<T> {
        match request {
            Request::Demand => Response::Error(self.error.clone()),
            Request::Abort(_) => Response::End,
        }
    }
}

/// Source that ends immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct Empty;

pub fn empty() -> Empty {
    Empty
}

#[async_trait]
impl<T: Send + 'static> PullSource<T> for Empty {
    async fn request(&mut self, _request: Request) -> Response<T> {
        Response::End
    }
}

/// Source pulling from a boxed futures stream. Aborting drops the stream.
pub struct FromStream<T> {
    stream: Option<RS2Stream<T>>,
}

pub fn from_stream<T>(stream: RS2Stream<T>) -> FromStream<T> {
    FromStream {
        stream: Some(stream),
    }
}

#[async_trait]
impl<T: Send + 'static> PullSource<T> for FromStream<T> {
    async fn request(&mut self, request: Request) -> Response<T> {
        if request.is_abort() {
            self.stream = None;
            return Response::End;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Response::End;
        };
        match stream.next().await {
            Some(item) => Response::Item(item),
            None => {
                self.stream = None;
                Response::End
            }
        }
    }
}

/// Source pulling from a stream of results; the first `Err` ends it.
pub struct FromResultStream<T> {
    stream: Option<RS2Stream<StreamResult<T>>>,
}

pub fn from_result_stream<T>(stream: RS2Stream<StreamResult<T>>) -> FromResultStream<T> {
    FromResultStream {
        stream: Some(stream),
    }
}

#[async_trait]
impl<T: Send + 'static> PullSource<T> for FromResultStream<T> {
    async fn request(&mut self, request: Request) -> Response<T> {
        if request.is_abort() {
            self.stream = None;
            return Response::End;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Response::End;
        };
        match stream.next().await {
            Some(Ok(item)) => Response::Item(item),
            Some(Err(err)) => {
                self.stream = None;
                Response::Error(err)
            }
            None => {
                self.stream = None;
                Response::End
            }
        }
    }
}
