use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use super::retry::{AttemptError, RetryPolicy};
use crate::error::FetchError;
use crate::redact::mask_secret;
use crate::sleep::ThreadSleeper;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Issues GET requests; retry policy, if any, lives behind this seam.
pub trait PageTransport {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, FetchError>;
}

#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    Bearer(String),
    Basic { user: String, password: String },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(token) => write!(f, "Bearer({})", mask_secret(token, 4)),
            Self::Basic { user, .. } => write!(f, "Basic({user}, ****)"),
        }
    }
}

/// Blocking `reqwest` session with authentication and retry applied to every
/// request it issues.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    auth: Auth,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(auth: Auth, retry: RetryPolicy, timeout: Duration) -> Result<Self, FetchError> {
        retry.validate().map_err(FetchError::Request)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| FetchError::Request(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            client,
            auth,
            retry,
        })
    }

    fn attempt(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, AttemptError> {
        let request = self
            .client
            .get(url)
            .query(query)
            .header(CONTENT_TYPE, "application/json");
        let request = match &self.auth {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { user, password } => request.basic_auth(user, Some(password)),
        };

        let response = request.send().map_err(|error| {
            if error.is_builder() {
                AttemptError::Fatal(FetchError::Request(error.to_string()))
            } else {
                AttemptError::Transient(error.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if self.retry.is_retryable_status(status) {
            return Err(AttemptError::Transient(format!("HTTP {status} from {url}")));
        }

        let body = response
            .bytes()
            .map_err(|error| AttemptError::Transient(format!("failed to read body: {error}")))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

impl PageTransport for HttpTransport {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, FetchError> {
        self.retry
            .execute(&ThreadSleeper, |_| self.attempt(url, query))
    }
}
