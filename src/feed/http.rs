use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::auth::AuthSession;
use super::buffer::TickBuffer;
use super::source::{StreamHandle, TickSource};
use crate::config::FeedSettings;
use crate::error::FeedError;
use crate::models::{parse_quote, Tick};

// Type alias for the rate limiter to simplify signatures
type QuoteRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Quote source over a REST API with optional WebSocket streaming
///
/// Polling hits `GET {rest_url}/quote/{symbol}`; the response body is a
/// single JSON quote. Streaming is only offered when a `ws_url` is set.
pub struct HttpQuoteSource {
    client: Client,
    rest_url: String,
    ws_url: Option<String>,
    token: Option<String>,
    rate_limiter: Arc<QuoteRateLimiter>,
}

impl HttpQuoteSource {
    pub fn new(settings: &FeedSettings) -> Result<Self, FeedError> {
        let rest_url = settings
            .rest_url
            .clone()
            .ok_or_else(|| FeedError::Connection("feed.rest_url is not configured".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| FeedError::Connection(format!("failed to build HTTP client: {}", e)))?;

        let rate = NonZeroU32::new(settings.poll_rate_per_sec).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(rate)));

        Ok(Self {
            client,
            rest_url: rest_url.trim_end_matches('/').to_string(),
            ws_url: settings.ws_url.clone(),
            token: None,
            rate_limiter,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}{}", self.rest_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_checked(&self, path: &str) -> Result<reqwest::Response, FeedError> {
        self.rate_limiter.until_ready().await;

        let response = self.request(path).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(classify_status(status, &body))
    }
}

/// Map an upstream HTTP status to the feed's failure taxonomy
fn classify_status(status: StatusCode, body: &str) -> FeedError {
    match status.as_u16() {
        401 | 403 => FeedError::Authentication(format!("{}: {}", status, body)),
        // Broker APIs use 419/440 for expired login sessions
        419 | 440 => FeedError::SessionExpired,
        _ => FeedError::Connection(format!("quote API error ({}): {}", status, body)),
    }
}

impl TickSource for HttpQuoteSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn open(&mut self, session: &AuthSession) -> Result<(), FeedError> {
        self.token = session.token.clone();
        self.get_checked("/status").await?;
        tracing::info!(url = %self.rest_url, "Quote API reachable");
        Ok(())
    }

    async fn subscribe(&mut self, symbol: &str, buffer: TickBuffer) -> Result<StreamHandle, FeedError> {
        let url = self.ws_url.clone().ok_or(FeedError::StreamingUnsupported)?;

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe_msg = serde_json::json!({
            "op": "subscribe",
            "symbol": symbol,
            "token": self.token,
        });
        write.send(Message::Text(subscribe_msg.to_string())).await?;

        tracing::info!(%symbol, %url, "Subscribed to quote stream");

        let symbol_owned = symbol.to_string();
        Ok(StreamHandle::spawn(async move {
            // Keep the sink alive for the lifetime of the reader
            let _write = write;
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match parse_quote(&text) {
                        Ok(tick) => buffer.push(tick),
                        Err(e) => {
                            tracing::warn!(symbol = %symbol_owned, error = %e, "Dropping malformed stream frame")
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::warn!(symbol = %symbol_owned, "Quote stream closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(symbol = %symbol_owned, error = %e, "Quote stream error");
                        break;
                    }
                    _ => {}
                }
            }
        }))
    }

    async fn poll(&mut self, symbol: &str) -> Result<Tick, FeedError> {
        let response = self.get_checked(&format!("/quote/{}", symbol)).await?;
        let text = response.text().await?;
        parse_quote(&text)
    }

    async fn close(&mut self) {
        self.token = None;
        tracing::debug!(url = %self.rest_url, "Quote source closed");
    }
}
