//! Price quotes for estimated swap output
//!
//! Source chain: CoinGecko simple-price, Moralis token-price as fallback,
//! then the configured fixed rate as a last resort. Every quote carries its
//! source so a stale fallback rate is never presented as a live price.

pub mod cache;

pub use cache::{Clock, SystemClock, TtlCache};

use crate::config::QuotesConfig;
use crate::error::{FlowError, FlowResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where a price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSource {
    CoinGecko,
    Moralis,
    /// Hard-coded configured rate; treat as indicative only
    Fallback,
}

impl QuoteSource {
    /// Ordering for labeling derived quotes; higher is less trusted
    fn trust_rank(self) -> u8 {
        match self {
            QuoteSource::CoinGecko => 0,
            QuoteSource::Moralis => 1,
            QuoteSource::Fallback => 2,
        }
    }
}

/// Ephemeral USD quote for one token
#[derive(Debug, Clone, Serialize)]
pub struct PriceQuote {
    pub token: String,
    pub usd: f64,
    pub source: QuoteSource,
    pub fetched_at: DateTime<Utc>,
}

/// One upstream price API
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn usd_price(&self, token: &str) -> FlowResult<f64>;
    fn source(&self) -> QuoteSource;
}

/// CoinGecko simple-price endpoint
pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoSource {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn usd_price(&self, token: &str) -> FlowResult<f64> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url.trim_end_matches('/'),
            token
        );
        let body: HashMap<String, HashMap<String, f64>> = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FlowError::PriceSource(e.to_string()))?
            .error_for_status()
            .map_err(|e| FlowError::PriceSource(e.to_string()))?
            .json()
            .await
            .map_err(|e| FlowError::PriceSource(e.to_string()))?;

        body.get(token)
            .and_then(|m| m.get("usd"))
            .copied()
            .ok_or_else(|| FlowError::PriceSource(format!("no usd price for {}", token)))
    }

    fn source(&self) -> QuoteSource {
        QuoteSource::CoinGecko
    }
}

/// Moralis token-price endpoint
pub struct MoralisSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl MoralisSource {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[derive(serde::Deserialize)]
struct MoralisPriceResponse {
    #[serde(rename = "usdPrice")]
    usd_price: f64,
}

#[async_trait]
impl PriceSource for MoralisSource {
    async fn usd_price(&self, token: &str) -> FlowResult<f64> {
        let url = format!("{}/{}/price", self.base_url.trim_end_matches('/'), token);
        let body: MoralisPriceResponse = self
            .client
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| FlowError::PriceSource(e.to_string()))?
            .error_for_status()
            .map_err(|e| FlowError::PriceSource(e.to_string()))?
            .json()
            .await
            .map_err(|e| FlowError::PriceSource(e.to_string()))?;

        Ok(body.usd_price)
    }

    fn source(&self) -> QuoteSource {
        QuoteSource::Moralis
    }
}

/// Quote service with source fallback chain and TTL cache
pub struct QuoteService {
    sources: Vec<Arc<dyn PriceSource>>,
    fallback_rates: HashMap<String, f64>,
    cache: TtlCache<String, PriceQuote>,
}

impl QuoteService {
    pub fn new(
        sources: Vec<Arc<dyn PriceSource>>,
        fallback_rates: HashMap<String, f64>,
        cache_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sources,
            fallback_rates,
            cache: TtlCache::new(cache_ttl, clock),
        }
    }

    /// Build from configuration with the standard source chain
    pub fn from_config(config: &QuotesConfig, clock: Arc<dyn Clock>) -> Self {
        let mut sources: Vec<Arc<dyn PriceSource>> =
            vec![Arc::new(CoinGeckoSource::new(config.coingecko_url.clone()))];

        if let (Some(url), Some(key_env)) = (&config.moralis_url, &config.moralis_api_key_env) {
            if let Ok(key) = std::env::var(key_env) {
                sources.push(Arc::new(MoralisSource::new(url.clone(), key)));
            } else {
                warn!("Moralis configured but {} not set; skipping source", key_env);
            }
        }

        Self::new(
            sources,
            config.fallback_rates_usd.clone(),
            Duration::from_secs(config.cache_ttl_secs),
            clock,
        )
    }

    /// USD price for a token, walking the source chain
    pub async fn usd_price(&self, token: &str) -> FlowResult<PriceQuote> {
        if let Some(cached) = self.cache.get(&token.to_string()) {
            debug!("Quote cache hit for {} ({:?})", token, cached.source);
            return Ok(cached);
        }

        for source in &self.sources {
            match source.usd_price(token).await {
                Ok(usd) => {
                    let quote = PriceQuote {
                        token: token.to_string(),
                        usd,
                        source: source.source(),
                        fetched_at: Utc::now(),
                    };
                    self.cache.insert(token.to_string(), quote.clone());
                    crate::metrics::record_quote(quote.source);
                    return Ok(quote);
                }
                Err(e) => {
                    warn!("Price source {:?} failed for {}: {}", source.source(), token, e);
                }
            }
        }

        // Last resort: the configured fixed rate, clearly labeled
        if let Some(&usd) = self.fallback_rates.get(token) {
            warn!("All live price sources down for {}, using fallback rate {}", token, usd);
            let quote = PriceQuote {
                token: token.to_string(),
                usd,
                source: QuoteSource::Fallback,
                fetched_at: Utc::now(),
            };
            // Fallback rates are not cached; live sources get retried next call
            crate::metrics::record_quote(quote.source);
            return Ok(quote);
        }

        Err(FlowError::PriceSource(format!(
            "no price available for {}",
            token
        )))
    }

    /// Estimated output of swapping `amount_in` of one token for another.
    /// The result is labeled with the less trustworthy of the two sources.
    pub async fn estimate_output(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: f64,
    ) -> FlowResult<(f64, QuoteSource)> {
        let quote_in = self.usd_price(token_in).await?;
        let quote_out = self.usd_price(token_out).await?;

        if quote_out.usd <= 0.0 {
            return Err(FlowError::PriceSource(format!(
                "non-positive price for {}",
                token_out
            )));
        }

        let source = if quote_in.source.trust_rank() >= quote_out.source.trust_rank() {
            quote_in.source
        } else {
            quote_out.source
        };

        Ok((amount_in * quote_in.usd / quote_out.usd, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(sources: Vec<Arc<dyn PriceSource>>, fallback: &[(&str, f64)]) -> QuoteService {
        QuoteService::new(
            sources,
            fallback
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            Duration::from_secs(30),
            Arc::new(SystemClock),
        )
    }

    fn failing_source(kind: QuoteSource) -> Arc<dyn PriceSource> {
        let mut source = MockPriceSource::new();
        source
            .expect_usd_price()
            .returning(|_| Err(FlowError::PriceSource("down".into())));
        source.expect_source().return_const(kind);
        Arc::new(source)
    }

    #[tokio::test]
    async fn first_source_wins() {
        let mut primary = MockPriceSource::new();
        primary.expect_usd_price().returning(|_| Ok(0.31));
        primary.expect_source().return_const(QuoteSource::CoinGecko);

        let svc = service(vec![Arc::new(primary)], &[]);
        let quote = svc.usd_price("celo").await.unwrap();
        assert_eq!(quote.source, QuoteSource::CoinGecko);
        assert!((quote.usd - 0.31).abs() < 1e-9);
    }

    #[tokio::test]
    async fn falls_through_to_secondary_source() {
        let mut secondary = MockPriceSource::new();
        secondary.expect_usd_price().returning(|_| Ok(0.30));
        secondary.expect_source().return_const(QuoteSource::Moralis);

        let svc = service(
            vec![failing_source(QuoteSource::CoinGecko), Arc::new(secondary)],
            &[],
        );
        let quote = svc.usd_price("celo").await.unwrap();
        assert_eq!(quote.source, QuoteSource::Moralis);
    }

    #[tokio::test]
    async fn fallback_rate_is_labeled() {
        let svc = service(vec![failing_source(QuoteSource::CoinGecko)], &[("celo", 0.29)]);
        let quote = svc.usd_price("celo").await.unwrap();
        assert_eq!(quote.source, QuoteSource::Fallback);
        assert!((quote.usd - 0.29).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_token_with_no_fallback_errors() {
        let svc = service(vec![failing_source(QuoteSource::CoinGecko)], &[]);
        assert!(svc.usd_price("unlisted").await.is_err());
    }

    #[tokio::test]
    async fn cache_absorbs_repeat_lookups() {
        let mut primary = MockPriceSource::new();
        primary.expect_usd_price().times(1).returning(|_| Ok(1.0));
        primary.expect_source().return_const(QuoteSource::CoinGecko);

        let svc = service(vec![Arc::new(primary)], &[]);
        svc.usd_price("usdc").await.unwrap();
        // second lookup must come from cache; mockall enforces times(1)
        svc.usd_price("usdc").await.unwrap();
    }

    #[tokio::test]
    async fn estimate_output_divides_prices() {
        let mut primary = MockPriceSource::new();
        primary.expect_usd_price().returning(|token: &str| {
            Ok(if token == "celo" { 0.50 } else { 1.00 })
        });
        primary.expect_source().return_const(QuoteSource::CoinGecko);

        let svc = service(vec![Arc::new(primary)], &[]);
        let (out, source) = svc.estimate_output("celo", "cusd", 10.0).await.unwrap();
        assert!((out - 5.0).abs() < 1e-9);
        assert_eq!(source, QuoteSource::CoinGecko);
    }

    #[tokio::test]
    async fn estimate_output_labels_with_least_trusted_source() {
        // token_in priced by the primary, token_out only by the secondary
        let mut primary = MockPriceSource::new();
        primary.expect_usd_price().returning(|token: &str| {
            if token == "celo" {
                Ok(0.50)
            } else {
                Err(FlowError::PriceSource("not listed".into()))
            }
        });
        primary.expect_source().return_const(QuoteSource::CoinGecko);

        let mut secondary = MockPriceSource::new();
        secondary.expect_usd_price().returning(|_| Ok(1.00));
        secondary.expect_source().return_const(QuoteSource::Moralis);

        let svc = service(vec![Arc::new(primary), Arc::new(secondary)], &[]);
        let (_, source) = svc.estimate_output("celo", "cusd", 1.0).await.unwrap();
        assert_eq!(source, QuoteSource::Moralis);
    }

    #[tokio::test]
    async fn estimate_output_inherits_fallback_label() {
        let svc = service(
            vec![failing_source(QuoteSource::CoinGecko)],
            &[("celo", 0.29), ("cusd", 1.0)],
        );
        let (_, source) = svc.estimate_output("celo", "cusd", 1.0).await.unwrap();
        assert_eq!(source, QuoteSource::Fallback);
    }
}
