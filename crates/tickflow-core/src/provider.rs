//! Twelve Data `time_series` client.
//!
//! Responsible for building the request, classifying the outcome into an
//! [`ErrorKind`], and decoding the string-encoded payload into domain types.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::gateway::{ErrorKind, FetchError, FetchResult};
use crate::http_client::{ApiKeyAuth, HttpClient, HttpRequest};
use crate::{Metadata, StockAggregate, TimeSeriesPoint, Timestamp, WorkItem};

pub const DEFAULT_BASE_URL: &str = "https://api.twelvedata.com/";

pub const RATE_LIMITED_MESSAGE: &str = "The Twelve Data API has a rate limit of 8 requests per minute. Not enough time is allowed to complete all of the requests. Please configure the HTTP client timeout to a higher value.";
pub const UNAUTHORIZED_MESSAGE: &str = "Invalid API key.";
pub const NOT_FOUND_MESSAGE: &str = "Symbol not found.";
pub const BAD_REQUEST_MESSAGE: &str = "Invalid output size. Output size must be between 1 - 5000";

/// Supported Twelve Data API versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V1,
}

impl ApiVersion {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "V1",
        }
    }
}

impl Display for ApiVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiVersion {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "V1" => Ok(Self::V1),
            _ => Err(value.trim().to_owned()),
        }
    }
}

/// Connection settings for the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Always ends with `/`.
    pub base_url: String,
    pub api_version: ApiVersion,
    pub timeout: Duration,
    pub api_key: String,
}

impl ProviderConfig {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Self {
        let mut base_url = base_url.trim().to_owned();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Self {
            base_url,
            api_version: ApiVersion::V1,
            timeout,
            api_key: api_key.into(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Map an HTTP (or in-band) status to an error kind; `None` for success.
pub const fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        200..=299 => None,
        429 => Some(ErrorKind::RateLimited),
        401 => Some(ErrorKind::Unauthorized),
        404 => Some(ErrorKind::NotFound),
        400 => Some(ErrorKind::BadRequest),
        _ => Some(ErrorKind::Unknown),
    }
}

/// Fixed operator-facing message for a classified status.
pub fn status_message(kind: ErrorKind, status: u16) -> String {
    match kind {
        ErrorKind::RateLimited => RATE_LIMITED_MESSAGE.to_owned(),
        ErrorKind::Unauthorized => UNAUTHORIZED_MESSAGE.to_owned(),
        ErrorKind::NotFound => NOT_FOUND_MESSAGE.to_owned(),
        ErrorKind::BadRequest => BAD_REQUEST_MESSAGE.to_owned(),
        _ => format!("provider returned unexpected status {status}"),
    }
}

fn status_error(status: u16) -> Option<FetchError> {
    classify_status(status).map(|kind| FetchError::new(kind, status_message(kind, status)))
}

/// Client for the `time_series` endpoint.
pub struct TwelveDataClient {
    http_client: Arc<dyn HttpClient>,
    config: ProviderConfig,
    auth: ApiKeyAuth,
}

impl TwelveDataClient {
    pub fn new(config: ProviderConfig, http_client: Arc<dyn HttpClient>) -> Self {
        let auth = ApiKeyAuth::new(config.api_key.clone());
        Self {
            http_client,
            config,
            auth,
        }
    }

    pub fn time_series_url(&self, item: &WorkItem) -> String {
        format!(
            "{}time_series?symbol={}&interval={}&outputsize={}",
            self.config.base_url,
            urlencoding::encode(item.symbol.as_str()),
            item.interval.as_str(),
            item.output_size.get()
        )
    }

    /// Fetch and decode one partition's latest points.
    pub async fn time_series(&self, item: &WorkItem) -> FetchResult<StockAggregate> {
        let request = HttpRequest::get(self.time_series_url(item))
            .with_auth(&self.auth)
            .with_timeout(self.config.timeout);

        let response = self.http_client.execute(request).await.map_err(|e| {
            let message = if e.timed_out() {
                format!(
                    "twelvedata request timed out after {}s: {}",
                    self.config.timeout.as_secs(),
                    e.message()
                )
            } else {
                format!("twelvedata transport error: {}", e.message())
            };
            FetchError::new(ErrorKind::Transport, message)
        })?;

        if let Some(error) = status_error(response.status) {
            return Err(error);
        }

        let envelope: TimeSeriesEnvelope = serde_json::from_str(&response.body).map_err(|e| {
            FetchError::new(
                ErrorKind::Fatal,
                format!("failed to parse twelvedata response: {e}"),
            )
        })?;

        decode(item, envelope)
    }
}

impl std::fmt::Debug for TwelveDataClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwelveDataClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn decode(item: &WorkItem, envelope: TimeSeriesEnvelope) -> FetchResult<StockAggregate> {
    if envelope.status.as_deref() == Some("error") {
        let code = envelope.code.unwrap_or(0);
        let kind = classify_status(code).unwrap_or(ErrorKind::Unknown);
        warn!(
            symbol = %item.symbol,
            interval = %item.interval,
            code,
            provider_message = envelope.message.as_deref().unwrap_or_default(),
            "twelvedata returned an error envelope"
        );
        return Err(FetchError::new(kind, status_message(kind, code)));
    }

    let meta = envelope
        .meta
        .ok_or_else(|| FetchError::new(ErrorKind::Fatal, "no meta in twelvedata response"))?;
    let values = envelope
        .values
        .ok_or_else(|| FetchError::new(ErrorKind::Fatal, "no values in twelvedata response"))?;

    if !meta.symbol.eq_ignore_ascii_case(item.symbol.as_str()) {
        debug!(
            requested = %item.symbol,
            reported = %meta.symbol,
            "provider reported a different symbol spelling"
        );
    }

    let metadata = Metadata {
        symbol: item.symbol.clone(),
        interval: item.interval,
        instrument_type: meta.instrument_type.unwrap_or_default(),
        currency: meta
            .currency
            .or(meta.currency_quote)
            .unwrap_or_default(),
        exchange: meta.exchange.unwrap_or_default(),
        exchange_timezone: meta.exchange_timezone.unwrap_or_default(),
        mic_code: meta.mic_code.unwrap_or_default(),
    };

    let points = values
        .into_iter()
        .map(normalize_point)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StockAggregate::new(metadata, points))
}

fn normalize_point(value: WireValue) -> FetchResult<TimeSeriesPoint> {
    let timestamp = Timestamp::parse(&value.datetime).map_err(fatal)?;
    TimeSeriesPoint::new(
        timestamp,
        parse_decimal("open", &value.open)?,
        parse_decimal("high", &value.high)?,
        parse_decimal("low", &value.low)?,
        parse_decimal("close", &value.close)?,
        parse_volume(value.volume.as_deref())?,
    )
    .map_err(fatal)
}

/// Decimal strings use `.` regardless of locale.
fn parse_decimal(field: &'static str, raw: &str) -> FetchResult<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| FetchError::new(ErrorKind::Fatal, format!("invalid {field} value '{raw}'")))
}

/// Instruments without volume (forex, indices) report none; stored as zero.
fn parse_volume(raw: Option<&str>) -> FetchResult<u64> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(0);
    };

    if let Ok(volume) = raw.parse::<u64>() {
        return Ok(volume);
    }

    match raw.parse::<f64>() {
        Ok(volume) if volume.is_finite() && volume >= 0.0 => Ok(volume.trunc() as u64),
        _ => Err(FetchError::new(
            ErrorKind::Fatal,
            format!("invalid volume value '{raw}'"),
        )),
    }
}

fn fatal(error: impl Display) -> FetchError {
    FetchError::new(ErrorKind::Fatal, error.to_string())
}

#[derive(Debug, Deserialize)]
struct TimeSeriesEnvelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    meta: Option<WireMeta>,
    #[serde(default)]
    values: Option<Vec<WireValue>>,
}

#[derive(Debug, Deserialize)]
struct WireMeta {
    symbol: String,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    currency_quote: Option<String>,
    #[serde(default)]
    exchange_timezone: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
    #[serde(default)]
    mic_code: Option<String>,
    #[serde(rename = "type", default)]
    instrument_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use super::*;
    use crate::http_client::{HttpError, HttpResponse};
    use crate::{Interval, OutputSize, Symbol};

    struct CannedHttpClient {
        outcome: Result<HttpResponse, HttpError>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl CannedHttpClient {
        fn new(outcome: Result<HttpResponse, HttpError>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl HttpClient for CannedHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.seen.lock().expect("seen mutex").push(request);
            let outcome = self.outcome.clone();
            Box::pin(async move { outcome })
        }
    }

    fn item(symbol: &str, interval: Interval) -> WorkItem {
        WorkItem::new(
            Symbol::parse(symbol).expect("symbol"),
            interval,
            OutputSize::new(2).expect("output size"),
        )
    }

    fn client(http: Arc<CannedHttpClient>) -> TwelveDataClient {
        TwelveDataClient::new(
            ProviderConfig::new(
                "https://api.twelvedata.test",
                "demo-key",
                Duration::from_secs(60),
            ),
            http,
        )
    }

    const BODY: &str = r#"{
        "meta": {
            "symbol": "AAPL",
            "interval": "1min",
            "currency": "USD",
            "exchange_timezone": "America/New_York",
            "exchange": "NASDAQ",
            "mic_code": "XNGS",
            "type": "Common Stock"
        },
        "values": [
            {"datetime": "2024-05-02 15:59:00", "open": "172.50", "high": "173.00", "low": "172.40", "close": "172.95", "volume": "120034"},
            {"datetime": "2024-05-02 15:58:00", "open": "172.10", "high": "172.60", "low": "172.00", "close": "172.50", "volume": "98211"}
        ],
        "status": "ok"
    }"#;

    #[test]
    fn classification_is_a_pure_status_mapping() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(204), None);
        assert_eq!(classify_status(429), Some(ErrorKind::RateLimited));
        assert_eq!(classify_status(401), Some(ErrorKind::Unauthorized));
        assert_eq!(classify_status(404), Some(ErrorKind::NotFound));
        assert_eq!(classify_status(400), Some(ErrorKind::BadRequest));
        assert_eq!(classify_status(500), Some(ErrorKind::Unknown));
        assert_eq!(classify_status(302), Some(ErrorKind::Unknown));
    }

    #[test]
    fn builds_encoded_time_series_url() {
        let client = client(CannedHttpClient::new(Ok(HttpResponse::ok_json("{}"))));
        assert_eq!(
            client.time_series_url(&item("eur/usd", Interval::OneDay)),
            "https://api.twelvedata.test/time_series?symbol=EUR%2FUSD&interval=1day&outputsize=2"
        );
    }

    #[test]
    fn api_version_accepts_only_v1() {
        assert_eq!("v1".parse::<ApiVersion>(), Ok(ApiVersion::V1));
        assert_eq!("V2".parse::<ApiVersion>(), Err(String::from("V2")));
    }

    #[tokio::test]
    async fn decodes_string_encoded_payload_ascending() {
        let http = CannedHttpClient::new(Ok(HttpResponse::ok_json(BODY)));
        let aggregate = client(Arc::clone(&http))
            .time_series(&item("AAPL", Interval::OneMinute))
            .await
            .expect("decoded");

        assert_eq!(aggregate.metadata.exchange, "NASDAQ");
        assert_eq!(aggregate.metadata.instrument_type, "Common Stock");
        assert_eq!(aggregate.points().len(), 2);
        assert_eq!(
            aggregate.points()[0].timestamp.format(),
            "2024-05-02 15:58:00"
        );
        assert_eq!(aggregate.points()[1].close, 172.95);
        assert_eq!(aggregate.points()[1].volume, 120_034);

        let seen = http.seen.lock().expect("seen mutex");
        assert_eq!(
            seen[0].headers.get("authorization").map(String::as_str),
            Some("apikey demo-key")
        );
        assert_eq!(seen[0].timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn status_codes_carry_fixed_messages() {
        let http = CannedHttpClient::new(Ok(HttpResponse::new(429, "")));
        let error = client(http)
            .time_series(&item("AAPL", Interval::OneMinute))
            .await
            .expect_err("rate limited");
        assert_eq!(error.kind(), ErrorKind::RateLimited);
        assert_eq!(error.message(), RATE_LIMITED_MESSAGE);

        let http = CannedHttpClient::new(Ok(HttpResponse::new(503, "")));
        let error = client(http)
            .time_series(&item("AAPL", Interval::OneMinute))
            .await
            .expect_err("unknown");
        assert_eq!(error.kind(), ErrorKind::Unknown);
        assert_eq!(error.message(), "provider returned unexpected status 503");
    }

    #[tokio::test]
    async fn in_band_error_envelope_is_classified_by_code() {
        let body = r#"{"code":404,"message":"**symbol** not found: ZZZZ","status":"error"}"#;
        let http = CannedHttpClient::new(Ok(HttpResponse::ok_json(body)));
        let error = client(http)
            .time_series(&item("ZZZZ", Interval::OneMinute))
            .await
            .expect_err("not found");
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert_eq!(error.message(), NOT_FOUND_MESSAGE);
    }

    #[tokio::test]
    async fn undecodable_body_is_fatal() {
        let http = CannedHttpClient::new(Ok(HttpResponse::ok_json("<html>")));
        let error = client(http)
            .time_series(&item("AAPL", Interval::OneMinute))
            .await
            .expect_err("fatal");
        assert_eq!(error.kind(), ErrorKind::Fatal);

        let body = r#"{"meta":{"symbol":"AAPL"},"values":[{"datetime":"2024-05-02","open":"abc","high":"1","low":"1","close":"1","volume":"1"}],"status":"ok"}"#;
        let http = CannedHttpClient::new(Ok(HttpResponse::ok_json(body)));
        let error = client(http)
            .time_series(&item("AAPL", Interval::OneDay))
            .await
            .expect_err("fatal");
        assert_eq!(error.kind(), ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn transport_failure_is_classified() {
        let http = CannedHttpClient::new(Err(HttpError::new("connection refused")));
        let error = client(http)
            .time_series(&item("AAPL", Interval::OneMinute))
            .await
            .expect_err("transport");
        assert_eq!(error.kind(), ErrorKind::Transport);
        assert!(error.message().starts_with("twelvedata transport error"));
    }

    #[tokio::test]
    async fn timeout_is_reported_as_a_timed_out_transport_failure() {
        let http = CannedHttpClient::new(Err(HttpError::timeout("request timeout")));
        let error = client(http)
            .time_series(&item("AAPL", Interval::OneMinute))
            .await
            .expect_err("timeout");
        assert_eq!(error.kind(), ErrorKind::Transport);
        assert!(error.message().contains("timed out after"));
        assert!(error.message().ends_with("request timeout"));
    }

    #[test]
    fn missing_volume_reads_as_zero() {
        assert_eq!(parse_volume(None).expect("volume"), 0);
        assert_eq!(parse_volume(Some("")).expect("volume"), 0);
        assert_eq!(parse_volume(Some("1200.0")).expect("volume"), 1_200);
        assert!(parse_volume(Some("-5")).is_err());
    }
}
