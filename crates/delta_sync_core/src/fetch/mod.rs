//! Paged REST fetching with transport-level retry.
//!
//! [`PagedFetcher`] walks an offset/limit endpoint lazily; [`HttpTransport`]
//! owns the retry budget so business-level signals in the body are never
//! retried.

mod pager;
mod retry;
mod transport;

pub use pager::{
    fetch_document, FetchCursor, PagedEndpoint, PagedFetcher, Pages, PagingParams,
    DEFAULT_ERROR_FIELD,
};
pub use retry::{
    AttemptError, RetryPolicy, RetryState, DEFAULT_BACKOFF_FACTOR, DEFAULT_RETRYABLE_STATUSES,
    DEFAULT_RETRY_TOTAL,
};
pub use transport::{Auth, HttpResponse, HttpTransport, PageTransport, DEFAULT_REQUEST_TIMEOUT};
