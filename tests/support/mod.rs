//! Shared fixtures for the behavior suites: a scripted provider and builders.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tickflow_core::{
    HttpClient, HttpError, HttpRequest, HttpResponse, Interval, OutputSize, ProviderConfig,
    QueueOrder, RateGateway, Symbol, TokenBucket, TokenBucketConfig, TwelveDataClient, WorkItem,
};

type Outcome = Result<HttpResponse, HttpError>;

/// Provider stand-in answering per symbol. The last scripted answer repeats.
#[derive(Default)]
pub struct ScriptedProvider {
    routes: Mutex<HashMap<String, VecDeque<Outcome>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, symbol: &str, outcome: Outcome) -> &Self {
        self.routes
            .lock()
            .expect("routes mutex")
            .entry(symbol.to_owned())
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn requests_for(&self, symbol: &str) -> usize {
        let needle = format!("symbol={symbol}&");
        self.requests
            .lock()
            .expect("requests mutex")
            .iter()
            .filter(|request| request.url.contains(&needle))
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().expect("requests mutex").len()
    }

    fn next_outcome(&self, url: &str) -> Outcome {
        let mut routes = self.routes.lock().expect("routes mutex");
        let route = routes
            .iter_mut()
            .find(|(symbol, _)| url.contains(&format!("symbol={symbol}&")))
            .map(|(_, queue)| queue);

        match route {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("non-empty queue"),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, "{}"))),
            None => Ok(HttpResponse::new(404, "{}")),
        }
    }
}

impl HttpClient for ScriptedProvider {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let outcome = self.next_outcome(&request.url);
        self.requests.lock().expect("requests mutex").push(request);
        Box::pin(async move { outcome })
    }
}

/// A `time_series` success body. Bars are `(datetime, close)`, listed newest
/// first the way the provider returns them.
pub fn series_body(symbol: &str, interval: Interval, bars: &[(&str, f64)]) -> String {
    let values: Vec<serde_json::Value> = bars
        .iter()
        .map(|(datetime, close)| {
            serde_json::json!({
                "datetime": datetime,
                "open": format!("{:.2}", close - 0.5),
                "high": format!("{:.2}", close + 1.0),
                "low": format!("{:.2}", close - 1.0),
                "close": format!("{close:.2}"),
                "volume": "1000",
            })
        })
        .collect();

    serde_json::json!({
        "meta": {
            "symbol": symbol,
            "interval": interval.as_str(),
            "currency": "USD",
            "exchange_timezone": "America/New_York",
            "exchange": "NASDAQ",
            "mic_code": "XNGS",
            "type": "Common Stock",
        },
        "values": values,
        "status": "ok",
    })
    .to_string()
}

pub fn series(symbol: &str, bars: &[(&str, f64)]) -> Outcome {
    Ok(HttpResponse::ok_json(series_body(
        symbol,
        Interval::OneMinute,
        bars,
    )))
}

pub fn status(code: u16) -> Outcome {
    Ok(HttpResponse::new(code, "{}"))
}

pub fn transport_failure() -> Outcome {
    Err(HttpError::new("connection reset by peer"))
}

pub fn item(symbol: &str) -> WorkItem {
    WorkItem::new(
        Symbol::parse(symbol).expect("valid symbol"),
        Interval::OneMinute,
        OutputSize::new(5).expect("valid output size"),
    )
}

/// Manually replenished bucket with room for every call a suite makes.
pub fn roomy_bucket() -> TokenBucket {
    TokenBucket::new(TokenBucketConfig {
        capacity: 64,
        tokens_per_period: 64,
        period: Duration::from_secs(60),
        queue_limit: 16,
        queue_order: QueueOrder::OldestFirst,
        auto_replenish: false,
    })
    .expect("valid bucket")
}

pub fn gateway(provider: &Arc<ScriptedProvider>, bucket: TokenBucket) -> Arc<RateGateway> {
    let client = TwelveDataClient::new(
        ProviderConfig::new(
            "https://api.twelvedata.test/",
            "test-key",
            Duration::from_secs(5),
        ),
        Arc::clone(provider) as Arc<dyn HttpClient>,
    );
    Arc::new(RateGateway::new(bucket, client))
}
