//! REST client for Twitter v1.1-compatible timeline APIs.
//!
//! Two endpoints are used:
//! - `users/lookup.json` - batch identity lookup (up to 100 per call)
//! - `statuses/user_timeline.json` - one page of a user's timeline
//!
//! Rate limiting is absorbed here: a 429 response waits for the window
//! announced by `x-rate-limit-reset` (or backs off exponentially when the
//! header is missing) and retries. Everything the harvester sees is either a
//! successful page or an [`AppError::Transport`] with a classified kind.

use std::time::Duration;

use chrono::{DateTime, Utc};
use mneme_core::error::{AppError, TransportErrorDetails, TransportErrorKind};
use mneme_core::traits::TimelineClient;
use mneme_core::{AddressMode, ApiConfig, HttpConfig, Identity, Item, LookupResult, PageRequest};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;

/// Platform timestamp format, e.g. `Wed Oct 10 20:19:24 +0000 2018`.
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Error body returned by the API:
/// `{"errors": [{"code": 34, "message": "Sorry, that page does not exist."}]}`
#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    errors: Vec<ApiErrorEntry>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorEntry {
    #[serde(default)]
    code: Option<i64>,
    message: String,
}

/// HTTP client for a Twitter v1.1-compatible REST API.
///
/// # Examples
///
/// ```no_run
/// use mneme_client::TimelineApiClient;
/// use mneme_core::{AddressMode, ApiConfig, Identity};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = TimelineApiClient::new(ApiConfig::new("AAAA..."))?;
/// let found = client
///     .lookup_users(&[Identity::Handle("nasa".to_string())], AddressMode::Handles)
///     .await?;
/// println!("{} confirmed", found.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TimelineApiClient {
    client: Client,
    base_url: Url,
    bearer_token: String,
    http_config: HttpConfig,
}

impl TimelineApiClient {
    /// Maximum backoff delay for rate-limited retries without a reset header.
    const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

    /// Upper bound on a wait announced by `x-rate-limit-reset`: one
    /// 15-minute window plus slack for clock skew.
    const MAX_RESET_WAIT: Duration = Duration::from_secs(15 * 60 + 5);

    /// Maximum retries for rate-limited (429) responses.
    /// Higher than normal retries because rate limits are transient.
    const RATE_LIMIT_MAX_RETRIES: u32 = 10;

    /// Creates a client with default HTTP settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the base URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(api: ApiConfig) -> Result<Self, AppError> {
        Self::with_http_config(api, HttpConfig::default())
    }

    pub fn with_http_config(api: ApiConfig, http_config: HttpConfig) -> Result<Self, AppError> {
        let mut base = api.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| AppError::ConfigError(format!("Invalid API URL '{}': {}", base, e)))?;

        let client = Client::builder()
            .user_agent(concat!("mneme/", env!("CARGO_PKG_VERSION")))
            .timeout(http_config.timeout)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            bearer_token: api.bearer_token,
            http_config,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Looks up at most 100 identities and returns the ones the API knows.
    pub async fn lookup_users(
        &self,
        identities: &[Identity],
        mode: AddressMode,
    ) -> Result<Vec<LookupResult>, AppError> {
        if identities.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.lookup_url(identities, mode)?;

        let resp = match self.request_with_retry(&url).await {
            Ok(resp) => resp,
            // The API answers 404 when none of the requested users exist.
            Err(AppError::Transport(details)) if details.kind == TransportErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let users: Vec<Value> = resp.json().await.map_err(|e| {
            AppError::Transport(TransportErrorDetails::malformed(format!(
                "lookup response: {}",
                e
            )))
        })?;

        users
            .iter()
            .map(|user| parse_user(user, mode).map(LookupResult::confirmed))
            .collect()
    }

    /// Fetches one page of `identity`'s timeline, newest first.
    pub async fn user_timeline(
        &self,
        identity: &Identity,
        request: PageRequest,
    ) -> Result<Vec<Item>, AppError> {
        let url = self.timeline_url(identity, request)?;
        let resp = self.request_with_retry(&url).await?;

        let statuses: Vec<Value> = resp.json().await.map_err(|e| {
            AppError::Transport(TransportErrorDetails::malformed(format!(
                "timeline response: {}",
                e
            )))
        })?;

        statuses
            .into_iter()
            .map(|status| parse_item(identity, status))
            .collect()
    }

    fn lookup_url(&self, identities: &[Identity], mode: AddressMode) -> Result<Url, AppError> {
        let mut url = self.endpoint("users/lookup.json")?;
        let joined = identities
            .iter()
            .map(|identity| match identity {
                Identity::Handle(name) => name.clone(),
                Identity::Id(id) => id.to_string(),
            })
            .collect::<Vec<_>>()
            .join(",");
        let param = match mode {
            AddressMode::Handles => "screen_name",
            AddressMode::Ids => "user_id",
        };
        url.query_pairs_mut()
            .append_pair(param, &joined)
            .append_pair("include_entities", "false");
        Ok(url)
    }

    fn timeline_url(&self, identity: &Identity, request: PageRequest) -> Result<Url, AppError> {
        let mut url = self.endpoint("statuses/user_timeline.json")?;
        {
            let mut pairs = url.query_pairs_mut();
            match identity {
                Identity::Handle(name) => pairs.append_pair("screen_name", name),
                Identity::Id(id) => pairs.append_pair("user_id", &id.to_string()),
            };
            pairs
                .append_pair("count", &request.count.to_string())
                .append_pair("tweet_mode", "extended")
                .append_pair("include_rts", "true");
            if let Some(max_id) = request.max_id {
                pairs.append_pair("max_id", &max_id.to_string());
            }
            if let Some(since_id) = request.since_id {
                pairs.append_pair("since_id", &since_id.to_string());
            }
        }
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::ConfigError(format!("Invalid endpoint '{}': {}", path, e)))
    }

    async fn request_with_retry(&self, url: &Url) -> Result<reqwest::Response, AppError> {
        let max_retries = self.http_config.max_retries.max(1);
        let base_delay = self.http_config.retry_base_delay;
        let mut last_error = AppError::Generic("No attempts made".to_string());
        // Use higher retry count for 429s since they are transient
        let effective_max = Self::RATE_LIMIT_MAX_RETRIES.max(max_retries);

        for attempt in 1..=effective_max {
            let sent = self
                .client
                .get(url.clone())
                .bearer_auth(&self.bearer_token)
                .send()
                .await;

            match sent {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        return Ok(resp);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        last_error = AppError::transport(
                            TransportErrorKind::RateLimit,
                            "Rate limit exceeded",
                            status.as_u16(),
                        );
                        if attempt < effective_max {
                            let delay = rate_limit_delay(
                                resp.headers(),
                                attempt,
                                base_delay,
                                Utc::now().timestamp(),
                            );
                            tracing::warn!(
                                attempt,
                                delay_secs = delay.as_secs(),
                                "Rate limited, waiting for window reset"
                            );
                            sleep(delay).await;
                            continue;
                        }
                        break;
                    }

                    let body = resp.text().await.unwrap_or_default();
                    let error = AppError::transport(
                        classify_status(status),
                        error_message(&body, status),
                        status.as_u16(),
                    );

                    if status.is_server_error() && attempt < max_retries {
                        tracing::debug!(attempt, status = status.as_u16(), "Server error, retrying");
                        last_error = error;
                        sleep(base_delay * attempt).await;
                        continue;
                    }

                    return Err(error);
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    last_error = if e.is_timeout() {
                        AppError::transport(
                            TransportErrorKind::Timeout,
                            format!(
                                "No response within {}s",
                                self.http_config.timeout.as_secs()
                            ),
                            0,
                        )
                    } else if e.is_connect() {
                        AppError::transport(
                            TransportErrorKind::NetworkError,
                            format!("Connection failed: {}", e),
                            0,
                        )
                    } else {
                        AppError::transport(TransportErrorKind::Unknown, e.to_string(), 0)
                    };

                    if retryable && attempt < max_retries {
                        tracing::debug!(attempt, error = %e, "Request failed, retrying");
                        sleep(base_delay * attempt).await;
                        continue;
                    }
                    break;
                }
            }
        }

        Err(last_error)
    }
}

// =============================================================================
// Response helpers
// =============================================================================

/// Maps an unsuccessful HTTP status to a transport error kind.
fn classify_status(status: StatusCode) -> TransportErrorKind {
    match status.as_u16() {
        401 | 403 => TransportErrorKind::Authentication,
        404 => TransportErrorKind::NotFound,
        429 => TransportErrorKind::RateLimit,
        500..=599 => TransportErrorKind::ServerError,
        _ => TransportErrorKind::Unknown,
    }
}

/// Extracts the first API error message from a response body.
fn error_message(body: &str, status: StatusCode) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => {
            let first = &parsed.errors[0];
            match first.code {
                Some(code) => format!("{} (code {})", first.message, code),
                None => first.message.clone(),
            }
        }
        _ => status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    }
}

/// How long to wait after a 429.
///
/// Honors `x-rate-limit-reset` (epoch seconds) when present, otherwise
/// `base * 2^attempt` capped at `MAX_RETRY_DELAY`.
fn rate_limit_delay(headers: &HeaderMap, attempt: u32, base: Duration, now: i64) -> Duration {
    let reset = headers
        .get("x-rate-limit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok());

    match reset {
        Some(reset) => {
            let wait = (reset - now).max(1) as u64;
            Duration::from_secs(wait).min(TimelineApiClient::MAX_RESET_WAIT)
        }
        None => (base * 2_u32.saturating_pow(attempt)).min(TimelineApiClient::MAX_RETRY_DELAY),
    }
}

/// Reads a 64-bit id, preferring the exact `id_str` form.
fn parse_id(record: &Value) -> Option<u64> {
    record
        .get("id_str")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .or_else(|| record.get("id").and_then(Value::as_u64))
}

fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Builds an [`Item`] from a status record, keeping the record as payload.
fn parse_item(author: &Identity, record: Value) -> Result<Item, AppError> {
    let id = parse_id(&record).ok_or_else(|| {
        AppError::Transport(TransportErrorDetails::malformed("status without id"))
    })?;

    let created_at = record
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(parse_created_at)
        .ok_or_else(|| {
            AppError::Transport(TransportErrorDetails::malformed(format!(
                "status {} has no readable created_at",
                id
            )))
        })?;

    Ok(Item {
        id,
        author: author.clone(),
        created_at,
        payload: record,
    })
}

/// Reads the identity a lookup answer refers to, in the requested mode.
fn parse_user(record: &Value, mode: AddressMode) -> Result<Identity, AppError> {
    let identity = match mode {
        AddressMode::Handles => record
            .get("screen_name")
            .and_then(Value::as_str)
            .map(|name| mneme_core::normalize(name)),
        AddressMode::Ids => parse_id(record).map(|id| Ok(Identity::Id(id))),
    };

    identity.unwrap_or_else(|| {
        let field = match mode {
            AddressMode::Handles => "screen_name",
            AddressMode::Ids => "id",
        };
        Err(AppError::Transport(TransportErrorDetails::malformed(
            format!("user record without {}", field),
        )))
    })
}


// =============================================================================
// Trait Implementation: TimelineClient
// =============================================================================

impl TimelineClient for TimelineApiClient {
    async fn lookup(
        &self,
        identities: &[Identity],
        mode: AddressMode,
    ) -> Result<Vec<LookupResult>, AppError> {
        self.lookup_users(identities, mode).await
    }

    async fn timeline_page(
        &self,
        identity: &Identity,
        request: PageRequest,
    ) -> Result<Vec<Item>, AppError> {
        self.user_timeline(identity, request).await
    }
}
