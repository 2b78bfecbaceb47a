//! The HTTP client for the upstream NextBus feed.
//!
//! Grounded on `original_source/nextbus.py`'s `Nextbus.request`/
//! `async_request`: a single precheck-then-GET-then-log shape, and a
//! concurrent batch variant with the same error handling. Concurrency here
//! replaces the original's `ThreadPoolExecutor`/`FuturesSession` pairing with
//! `futures::stream::buffer_unordered`, bounded by `max_concurrent_requests`.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use transit_core::{ApiCallLog, ApiSource, Error, NewApiCall, Result, Store};
use transit_middleware::QuotaMeter;

use crate::xml::{self, Element};

const DEFAULT_BASE_URL: &str = "http://webservices.nextbus.com/service/publicXMLFeed";
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Query parameters for one upstream call. A `String` key may repeat (the
/// upstream's `stops` parameter for `predictionsForMultiStops` is
/// multi-valued) — the underlying request encodes repeats as repeated query
/// keys, matching the original's `urlencode(params, doseq=True)`.
pub type Params = Vec<(String, String)>;

/// HTTP client for the upstream feed's single XML endpoint.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn Store>,
    quota: Arc<QuotaMeter>,
    max_concurrent_requests: usize,
}

impl UpstreamClient {
    /// Build a client against the default `publicXMLFeed` endpoint.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, quota: Arc<QuotaMeter>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            store,
            quota,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }

    /// Point at a different endpoint (tests use this for a mock server).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the concurrent fan-out cap (default 50, per the upstream's
    /// documented limit).
    #[must_use]
    pub fn with_max_concurrent_requests(mut self, cap: usize) -> Self {
        self.max_concurrent_requests = cap;
        self
    }

    /// Issue one request and return the elements matching `tag_name`, or
    /// `None` on a transient failure. Always logs an `ApiCallLog` row, even
    /// on failure. A `shouldRetry=false` API error is returned as
    /// `Err(Error::UpstreamFatal)` — the log is still written first.
    pub async fn request(
        &self,
        params: Params,
        tag_name: &str,
    ) -> Result<(Option<Vec<Element>>, ApiCallLog)> {
        self.quota.ensure_available().await?;
        let outcome = self.fetch(&params, tag_name).await;
        let api_call = self.store.insert_api_call(outcome.new_api_call).await?;
        if let Some(message) = outcome.fatal {
            return Err(Error::upstream_fatal(message));
        }
        Ok((outcome.elements, api_call))
    }

    /// Issue a batch of requests concurrently (bounded by
    /// `max_concurrent_requests`). Results are returned in input order.
    /// Every `ApiCallLog` row in the batch is written once the whole batch
    /// has completed, even if one of the responses is a fatal API error —
    /// the log is never lost to an error raised mid-fan-in.
    pub async fn async_request(
        &self,
        requests: Vec<(Params, String)>,
    ) -> Result<Vec<(Option<Vec<Element>>, ApiCallLog)>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        self.quota.ensure_available().await?;
        let cap = self.max_concurrent_requests;
        let mut outcomes: Vec<(usize, FetchOutcome)> = stream::iter(requests.into_iter().enumerate())
            .map(|(index, (params, tag_name))| async move {
                (index, self.fetch(&params, &tag_name).await)
            })
            .buffer_unordered(cap)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut results = Vec::with_capacity(outcomes.len());
        let mut fatal: Option<String> = None;
        for (_, outcome) in outcomes {
            if fatal.is_none() {
                fatal = outcome.fatal;
            }
            let api_call = self.store.insert_api_call(outcome.new_api_call).await?;
            results.push((outcome.elements, api_call));
        }
        if let Some(message) = fatal {
            return Err(Error::upstream_fatal(message));
        }
        Ok(results)
    }

    async fn fetch(&self, params: &Params, tag_name: &str) -> FetchOutcome {
        match self.http.get(&self.base_url).query(params).send().await {
            Err(_) => FetchOutcome {
                elements: None,
                fatal: None,
                new_api_call: NewApiCall {
                    url: None,
                    params: params_to_json(params),
                    size: Some(0),
                    status: 0,
                    error: Some("Connection Error".to_string()),
                    source: ApiSource::Nextbus,
                },
            },
            Ok(response) => self.handle_response(response, params, tag_name).await,
        }
    }

    async fn handle_response(
        &self,
        response: reqwest::Response,
        params: &Params,
        tag_name: &str,
    ) -> FetchOutcome {
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let header_size = response.content_length();
        let body = response.text().await.unwrap_or_default();
        let size = header_size.or(Some(body.len() as u64));

        if status != 200 {
            return FetchOutcome {
                elements: None,
                fatal: None,
                new_api_call: NewApiCall {
                    url: Some(url),
                    params: params_to_json(params),
                    size,
                    status,
                    error: None,
                    source: ApiSource::Nextbus,
                },
            };
        }

        let tree = match xml::parse(&body) {
            Ok(tree) => tree,
            Err(err) => {
                let message = err.to_string();
                return FetchOutcome {
                    elements: None,
                    fatal: None,
                    new_api_call: NewApiCall {
                        url: Some(url),
                        params: params_to_json(params),
                        size,
                        status,
                        error: Some(message),
                        source: ApiSource::Nextbus,
                    },
                };
            }
        };

        if let Some(error_el) = tree.child("Error") {
            let message = error_el.text.trim().to_string();
            let should_retry = error_el.attr("shouldRetry") != Some("false");
            return FetchOutcome {
                elements: None,
                fatal: if should_retry { None } else { Some(message.clone()) },
                new_api_call: NewApiCall {
                    url: Some(url),
                    params: params_to_json(params),
                    size,
                    status,
                    error: Some(message),
                    source: ApiSource::Nextbus,
                },
            };
        }

        let elements = tree.children(tag_name).into_iter().cloned().collect();
        FetchOutcome {
            elements: Some(elements),
            fatal: None,
            new_api_call: NewApiCall {
                url: Some(url),
                params: params_to_json(params),
                size,
                status,
                error: None,
                source: ApiSource::Nextbus,
            },
        }
    }
}

struct FetchOutcome {
    elements: Option<Vec<Element>>,
    fatal: Option<String>,
    new_api_call: NewApiCall,
}

fn params_to_json(params: &Params) -> Value {
    let mut map: Map<String, Value> = Map::new();
    for (key, value) in params {
        match map.get_mut(key) {
            Some(Value::Array(values)) => values.push(Value::String(value.clone())),
            Some(existing) => {
                let prior = existing.clone();
                *existing = Value::Array(vec![prior, Value::String(value.clone())]);
            }
            None => {
                map.insert(key.clone(), Value::String(value.clone()));
            }
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_keys_become_json_arrays() {
        let params = vec![
            ("command".to_string(), "predictionsForMultiStops".to_string()),
            ("a".to_string(), "sf-muni".to_string()),
            ("stops".to_string(), "38|4288".to_string()),
            ("stops".to_string(), "38|4289".to_string()),
        ];
        let json = params_to_json(&params);
        assert_eq!(json["command"], "predictionsForMultiStops");
        assert_eq!(json["stops"], serde_json::json!(["38|4288", "38|4289"]));
    }
}
