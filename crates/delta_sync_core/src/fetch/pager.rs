use std::time::Instant;

use serde_json::Value;

use super::transport::{HttpResponse, PageTransport};
use crate::error::FetchError;
use crate::redact::mask_params;

pub const DEFAULT_ERROR_FIELD: &str = "errorMessages";

/// Query parameter names an endpoint uses for offset paging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingParams {
    pub offset: String,
    pub limit: String,
}

impl PagingParams {
    pub fn new(offset: impl Into<String>, limit: impl Into<String>) -> Self {
        Self {
            offset: offset.into(),
            limit: limit.into(),
        }
    }

    pub fn jira() -> Self {
        Self::new("startAt", "maxResults")
    }

    pub fn service_now() -> Self {
        Self::new("sysparm_offset", "sysparm_limit")
    }
}

impl Default for PagingParams {
    fn default() -> Self {
        Self::jira()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedEndpoint {
    pub url: String,
    /// Body field holding the page's record array.
    pub result_field: String,
    /// Body field whose presence signals an inline business error.
    pub error_field: String,
    pub paging: PagingParams,
}

impl PagedEndpoint {
    pub fn new(url: impl Into<String>, result_field: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            result_field: result_field.into(),
            error_field: DEFAULT_ERROR_FIELD.to_string(),
            paging: PagingParams::default(),
        }
    }

    pub fn with_paging(mut self, paging: PagingParams) -> Self {
        self.paging = paging;
        self
    }

    pub fn with_error_field(mut self, error_field: impl Into<String>) -> Self {
        self.error_field = error_field.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCursor {
    pub offset: u64,
    pub page_size: u32,
}

impl FetchCursor {
    pub fn new(page_size: u32) -> Self {
        Self {
            offset: 0,
            page_size: page_size.max(1),
        }
    }

    /// Moves past the records actually returned, not the requested page size.
    pub fn advance(&mut self, returned: usize) {
        self.offset += returned as u64;
    }
}

pub struct PagedFetcher<'a> {
    transport: &'a dyn PageTransport,
}

impl<'a> PagedFetcher<'a> {
    pub fn new(transport: &'a dyn PageTransport) -> Self {
        Self { transport }
    }

    /// Starts a fresh single-pass page stream at offset 0.
    pub fn fetch(
        &self,
        endpoint: &PagedEndpoint,
        page_size: u32,
        extra_params: &[(String, String)],
    ) -> Pages<'a> {
        let extra_params = extra_params
            .iter()
            .filter(|(key, _)| *key != endpoint.paging.offset && *key != endpoint.paging.limit)
            .cloned()
            .collect();
        Pages {
            transport: self.transport,
            endpoint: endpoint.clone(),
            cursor: FetchCursor::new(page_size),
            extra_params,
            started: Instant::now(),
            pages: 0,
            finished: false,
        }
    }
}

/// Lazy page sequence. Ends on an empty page, a missing result field, an
/// inline error field, or the first error.
pub struct Pages<'a> {
    transport: &'a dyn PageTransport,
    endpoint: PagedEndpoint,
    cursor: FetchCursor,
    extra_params: Vec<(String, String)>,
    started: Instant,
    pages: u32,
    finished: bool,
}

enum PageOutcome {
    Records(Vec<Value>),
    End,
}

impl Pages<'_> {
    pub fn cursor(&self) -> FetchCursor {
        self.cursor
    }

    fn query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            (
                self.endpoint.paging.offset.clone(),
                self.cursor.offset.to_string(),
            ),
            (
                self.endpoint.paging.limit.clone(),
                self.cursor.page_size.to_string(),
            ),
        ];
        query.extend(self.extra_params.iter().cloned());
        query
    }

    fn next_page(&mut self) -> Result<PageOutcome, FetchError> {
        let query = self.query();
        tracing::debug!(
            component = "fetcher",
            event = "page_request",
            url = self.endpoint.url.as_str(),
            offset = self.cursor.offset,
            params = mask_params(&self.extra_params).as_str()
        );
        let response = self.transport.get(&self.endpoint.url, &query)?;
        let mut body = parse_body(&self.endpoint.url, &response)?;

        if let Some(errors) = body.get(&self.endpoint.error_field) {
            tracing::warn!(
                component = "fetcher",
                event = "inline_error",
                url = self.endpoint.url.as_str(),
                offset = self.cursor.offset,
                errors = %errors
            );
            return Ok(PageOutcome::End);
        }
        if response.status == 400 {
            return Err(FetchError::Status {
                status: response.status,
                url: self.endpoint.url.clone(),
            });
        }

        let records = match body.get_mut(&self.endpoint.result_field).map(Value::take) {
            None | Some(Value::Null) => return Ok(PageOutcome::End),
            Some(Value::Array(records)) => records,
            Some(other) => {
                return Err(FetchError::Malformed {
                    url: self.endpoint.url.clone(),
                    message: format!(
                        "field `{}` is not a list: {other}",
                        self.endpoint.result_field
                    ),
                })
            }
        };
        if records.is_empty() {
            return Ok(PageOutcome::End);
        }
        self.cursor.advance(records.len());
        Ok(PageOutcome::Records(records))
    }

    fn finish(&mut self) {
        self.finished = true;
        tracing::info!(
            component = "fetcher",
            event = "stream_finished",
            url = self.endpoint.url.as_str(),
            pages = self.pages,
            records = self.cursor.offset,
            elapsed_ms = self.started.elapsed().as_millis() as u64
        );
    }
}

impl Iterator for Pages<'_> {
    type Item = Result<Vec<Value>, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_page() {
            Ok(PageOutcome::Records(records)) => {
                self.pages += 1;
                Some(Ok(records))
            }
            Ok(PageOutcome::End) => {
                self.finish();
                None
            }
            Err(error) => {
                self.finished = true;
                Some(Err(error))
            }
        }
    }
}

impl std::iter::FusedIterator for Pages<'_> {}

/// Fetches a single non-paged document. An inline error field yields an
/// empty object.
pub fn fetch_document(
    transport: &dyn PageTransport,
    url: &str,
    params: &[(String, String)],
    error_field: &str,
) -> Result<Value, FetchError> {
    let response = transport.get(url, params)?;
    let body = parse_body(url, &response)?;
    if let Some(errors) = body.get(error_field) {
        tracing::warn!(
            component = "fetcher",
            event = "inline_error",
            url,
            errors = %errors
        );
        return Ok(Value::Object(serde_json::Map::new()));
    }
    if response.status == 400 {
        return Err(FetchError::Status {
            status: response.status,
            url: url.to_string(),
        });
    }
    Ok(body)
}

fn parse_body(url: &str, response: &HttpResponse) -> Result<Value, FetchError> {
    let success = (200..300).contains(&response.status);
    if !success && response.status != 400 {
        return Err(FetchError::Status {
            status: response.status,
            url: url.to_string(),
        });
    }
    serde_json::from_slice(&response.body).map_err(|error| FetchError::Malformed {
        url: url.to_string(),
        message: error.to_string(),
    })
}
