use std::collections::VecDeque;
use std::fmt;
use std::future::Future;

use ecr_driver::{DriverError, Page};
use futures::{future::BoxFuture, FutureExt};
use tracing::Instrument as _;

use crate::EcrError;

type NextPageFuture<T> = BoxFuture<'static, Result<Page<Result<T, EcrError>>, EcrError>>;
type FetchPage<T> = Box<dyn Fn(Option<String>) -> NextPageFuture<T> + Send>;

/// Where the next request starts.
#[derive(Debug)]
enum Cursor {
    First,
    Next(String),
}

impl Cursor {
    fn into_token(self) -> Option<String> {
        match self {
            Cursor::First => None,
            Cursor::Next(token) => Some(token),
        }
    }
}

enum PaginatedStreamState<T> {
    Query,
    Buffered(VecDeque<Result<T, EcrError>>),
    Requesting(NextPageFuture<T>),
    Done,
}

/// A stream of entities collected from a paginated registry call.
///
/// Pages are requested one at a time, only once the previous page has been
/// yielded, carrying the continuation token the service returned. Each raw
/// record is converted into `T` as it is buffered. A failed page request is
/// yielded as a single error, after which the stream ends.
#[pin_project::pin_project]
pub struct Paginated<T> {
    fetch: FetchPage<T>,
    cursor: Option<Cursor>,
    pages: usize,
    state: PaginatedStreamState<T>,
}

impl<T> fmt::Debug for Paginated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paginated")
            .field("cursor", &self.cursor)
            .field("pages", &self.pages)
            .finish()
    }
}

impl<T> Paginated<T>
where
    T: Send + 'static,
{
    /// Create a new paginated stream from a function which fetches one page,
    /// given the continuation token of the previous page.
    ///
    /// Every page request runs inside the span which is current here.
    pub(crate) fn new<R, F, Fut>(fetch: F) -> Self
    where
        F: Fn(Option<String>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Page<R>, DriverError>> + Send + 'static,
        R: Send + 'static,
        T: TryFrom<R, Error = EcrError>,
    {
        let span = tracing::Span::current();
        let fetch = move |token: Option<String>| -> NextPageFuture<T> {
            let page = fetch(token);
            async move {
                let page = page.await?;
                Ok(Page {
                    items: page.items.into_iter().map(T::try_from).collect(),
                    next_token: page.next_token,
                })
            }
            .instrument(span.clone())
            .boxed()
        };

        Self {
            fetch: Box::new(fetch),
            cursor: Some(Cursor::First),
            pages: 0,
            state: PaginatedStreamState::Query,
        }
    }
}

impl<T> Paginated<T> {
    /// The number of pages fetched so far.
    pub fn pages(&self) -> usize {
        self.pages
    }
}

impl<T> futures::Stream for Paginated<T> {
    type Item = Result<T, EcrError>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.project();
        match this.state {
            PaginatedStreamState::Query => {
                let Some(cursor) = this.cursor.take() else {
                    tracing::trace!("No more pages to request, stream is done");
                    *this.state = PaginatedStreamState::Done;
                    return std::task::Poll::Ready(None);
                };

                tracing::trace!(page = *this.pages + 1, "Requesting next page");
                let next_future = (this.fetch)(cursor.into_token());

                *this.state = PaginatedStreamState::Requesting(next_future);
                cx.waker().wake_by_ref();
                std::task::Poll::Pending
            }
            PaginatedStreamState::Buffered(items) => {
                if let Some(item) = items.pop_front() {
                    std::task::Poll::Ready(Some(item))
                } else {
                    tracing::trace!("Buffer is empty, requesting next page");
                    *this.state = PaginatedStreamState::Query;
                    cx.waker().wake_by_ref();
                    std::task::Poll::Pending
                }
            }
            PaginatedStreamState::Requesting(future) => match future.poll_unpin(cx) {
                std::task::Poll::Ready(Ok(page)) => {
                    *this.pages += 1;
                    tracing::trace!(
                        page = *this.pages,
                        items = page.items.len(),
                        more = page.next_token.is_some(),
                        "Received page"
                    );

                    *this.cursor = page.next_token.map(Cursor::Next);
                    *this.state = PaginatedStreamState::Buffered(VecDeque::from(page.items));
                    cx.waker().wake_by_ref();
                    std::task::Poll::Pending
                }
                std::task::Poll::Ready(Err(error)) => {
                    *this.cursor = None;
                    *this.state = PaginatedStreamState::Done;
                    std::task::Poll::Ready(Some(Err(error)))
                }
                std::task::Poll::Pending => std::task::Poll::Pending,
            },
            PaginatedStreamState::Done => std::task::Poll::Ready(None),
        }
    }
}

impl<T> futures::stream::FusedStream for Paginated<T> {
    fn is_terminated(&self) -> bool {
        matches!(self.state, PaginatedStreamState::Done)
    }
}
