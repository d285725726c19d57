// ===============================
// src/fetcher.rs (ListingFetcher + upstream adapter)
// ===============================
//
// - QuoteSource      : satu halaman listing mentah (JSON) dari upstream
// - HttpQuoteSource  : reqwest, GET {base}/market/{id}/itemmarket?limit&offset
// - ListingFetcher   : paging s/d max_listings, setiap panggilan lewat TokenBucket,
//                      retry + backoff eksponensial (0.8s, x1.6, jitter),
//                      batas konkurensi per batch (buffer_unordered).
//
// Credential hanya lewat parameter; tidak pernah masuk log.
//
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use rand::Rng;
use rust_decimal::Decimal;
use serde_json::Value;
use std::{str::FromStr, sync::Arc};
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};
use url::Url;

use crate::config::Settings;
use crate::domain::{Credential, ItemId, ItemMeta, Listing};
use crate::metrics::{FETCH_ATTEMPTS, LISTINGS_REJECTED};
use crate::ratelimit::TokenBucket;

const INITIAL_BACKOFF: Duration = Duration::from_millis(800);
const BACKOFF_FACTOR: f64 = 1.6;
const MAX_JITTER_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned HTTP {status}")]
    Http { status: u16 },
    #[error("upstream error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("malformed upstream response: {0}")]
    Malformed(String),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

impl FetchError {
    /// Rate limiting, server errors, transport hiccups and the upstream's
    /// transient codes (0 unknown, 5 too many requests, 10 backend error).
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::TimedOut(_) => true,
            FetchError::Http { status } => *status == 429 || (500..600).contains(status),
            FetchError::Api { code, .. } => matches!(code, 0 | 5 | 10),
            FetchError::Malformed(_) | FetchError::Endpoint(_) => false,
        }
    }
}

/// One page of raw listings for an item.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_page(
        &self,
        item: &ItemId,
        offset: usize,
        limit: usize,
        credential: &Credential,
    ) -> Result<Value, FetchError>;
}

pub struct HttpQuoteSource {
    http: reqwest::Client,
    base: Url,
}

impl HttpQuoteSource {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, FetchError> {
        let base = Url::parse(base_url).map_err(|e| FetchError::Endpoint(format!("{base_url}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("item-market-pricer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { http, base })
    }

    pub fn endpoint(&self, item: &ItemId, offset: usize, limit: usize) -> Result<Url, FetchError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Endpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(["market", item.0.as_str(), "itemmarket"]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        Ok(url)
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn fetch_page(
        &self,
        item: &ItemId,
        offset: usize,
        limit: usize,
        credential: &Credential,
    ) -> Result<Value, FetchError> {
        let url = self.endpoint(item, offset, limit)?;
        let rsp = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::AUTHORIZATION, format!("ApiKey {}", credential.expose()))
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.without_url().to_string()))?;

        let status = rsp.status();
        let body = rsp.json::<Value>().await;
        match body {
            // Upstream kadang kirim payload error dengan status non-2xx
            Ok(v) if v.get("error").is_some() => Ok(v),
            Ok(v) if status.is_success() => Ok(v),
            Ok(_) => Err(FetchError::Http { status: status.as_u16() }),
            Err(_) if !status.is_success() => Err(FetchError::Http { status: status.as_u16() }),
            Err(e) => Err(FetchError::Malformed(e.without_url().to_string())),
        }
    }
}

/// `{"error": {"code": N, "error": "..."}}` payloads.
pub fn api_error(v: &Value) -> Option<FetchError> {
    let err = v.get("error")?;
    Some(FetchError::Api {
        code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
        message: err
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    })
}

/// Normalized page: valid listings plus what was dropped.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub meta: Option<ItemMeta>,
    pub listings: Vec<Listing>,
    /// Entries in the raw page, valid or not (drives paging).
    pub raw_count: usize,
    pub rejected: usize,
}

fn decimal_of(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => {
            let s = n.to_string();
            Decimal::from_str(&s).or_else(|_| Decimal::from_scientific(&s)).ok()
        }
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| !matches!(c, '$' | ',' | ' ')).collect();
            Decimal::from_str(&cleaned).ok()
        }
        _ => None,
    }
}

fn quantity_of(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn listing_of(entry: &Value) -> Option<Listing> {
    let (price, qty) = match entry {
        Value::Object(o) => (
            o.get("price")?,
            o.get("amount").or_else(|| o.get("quantity")).or_else(|| o.get("qty"))?,
        ),
        Value::Array(a) if a.len() >= 2 => (&a[0], &a[1]),
        _ => return None,
    };
    Listing::new(decimal_of(price)?, quantity_of(qty)?)
}

fn meta_of(v: &Value) -> Option<ItemMeta> {
    let item = v.get("itemmarket")?.get("item")?;
    Some(ItemMeta {
        name: item.get("name").and_then(Value::as_str).map(str::to_string),
        kind: item.get("type").and_then(Value::as_str).map(str::to_string),
        average_price: item.get("average_price").and_then(decimal_of),
    })
}

/// Accepts `{"itemmarket": {"listings": [...]}}`, `{"listings": [...]}` or a bare array.
/// Entries are `{price, amount|quantity}` objects or `[price, qty]` pairs.
pub fn normalize_page(v: &Value) -> Result<Page, FetchError> {
    if let Some(e) = api_error(v) {
        return Err(e);
    }
    let raw = match v {
        Value::Array(_) => v,
        _ => v
            .get("itemmarket")
            .and_then(|m| m.get("listings"))
            .or_else(|| v.get("listings"))
            .ok_or_else(|| FetchError::Malformed("no listings array".into()))?,
    };
    let entries: &[Value] = match raw {
        Value::Array(a) => a,
        Value::Null => &[],
        other => return Err(FetchError::Malformed(format!("listings is not an array: {other}"))),
    };

    let listings: Vec<Listing> = entries.iter().filter_map(listing_of).collect();
    Ok(Page {
        meta: meta_of(v),
        rejected: entries.len() - listings.len(),
        raw_count: entries.len(),
        listings,
    })
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub page_size: usize,
    pub max_listings: usize,
    pub retries: u32,
    pub item_timeout: Duration,
    pub workers: usize,
}

impl From<&Settings> for FetchOptions {
    fn from(s: &Settings) -> Self {
        Self {
            page_size: s.page_size,
            max_listings: s.max_listings,
            retries: s.retries,
            item_timeout: s.item_timeout,
            workers: s.workers,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchedBook {
    pub meta: ItemMeta,
    pub listings: Vec<Listing>,
}

pub struct ListingFetcher {
    source: Arc<dyn QuoteSource>,
    limiter: Arc<TokenBucket>,
    opts: FetchOptions,
}

impl ListingFetcher {
    pub fn new(source: Arc<dyn QuoteSource>, limiter: Arc<TokenBucket>, opts: FetchOptions) -> Self {
        Self { source, limiter, opts }
    }

    async fn page_with_retry(
        &self,
        item: &ItemId,
        offset: usize,
        limit: usize,
        credential: &Credential,
    ) -> Result<Value, FetchError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt: u32 = 0;
        loop {
            // setiap attempt (termasuk retry) ambil 1 token
            self.limiter.acquire().await;
            let res = self
                .source
                .fetch_page(item, offset, limit, credential)
                .await
                .and_then(|v| match api_error(&v) {
                    Some(e) => Err(e),
                    None => Ok(v),
                });

            match res {
                Ok(v) => {
                    FETCH_ATTEMPTS.with_label_values(&["ok"]).inc();
                    return Ok(v);
                }
                Err(e) if e.is_retryable() && attempt < self.opts.retries => {
                    FETCH_ATTEMPTS.with_label_values(&["retry"]).inc();
                    attempt += 1;
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER_MS));
                    warn!(item_id = %item, attempt, error = %e, ?backoff, "upstream call failed, backing off");
                    sleep(backoff + jitter).await;
                    backoff = backoff.mul_f64(BACKOFF_FACTOR);
                }
                Err(e) => {
                    FETCH_ATTEMPTS.with_label_values(&["error"]).inc();
                    return Err(e);
                }
            }
        }
    }

    /// Pages through the upstream until `max_listings` or a short page.
    pub async fn fetch_book(&self, item: &ItemId, credential: &Credential) -> Result<FetchedBook, FetchError> {
        let mut book = FetchedBook::default();
        let mut offset = 0usize;

        while book.listings.len() < self.opts.max_listings {
            let limit = self.opts.page_size.min(self.opts.max_listings - book.listings.len());
            let value = self.page_with_retry(item, offset, limit, credential).await?;
            let page = normalize_page(&value)?;

            if page.rejected > 0 {
                LISTINGS_REJECTED.inc_by(page.rejected as u64);
                debug!(item_id = %item, rejected = page.rejected, "dropped invalid listings");
            }
            if offset == 0 {
                book.meta = page.meta.unwrap_or_default();
            }
            book.listings.extend(page.listings);

            if page.raw_count < limit || page.raw_count == 0 {
                break;
            }
            offset += page.raw_count;
        }

        book.listings.truncate(self.opts.max_listings);
        debug!(item_id = %item, listings = book.listings.len(), "book fetched");
        Ok(book)
    }

    /// Fetches every item with at most `workers` in flight. Output order is completion order.
    pub async fn fetch_all(
        &self,
        items: &[ItemId],
        credential: &Credential,
    ) -> Vec<(ItemId, Result<FetchedBook, FetchError>)> {
        let item_timeout = self.opts.item_timeout;
        debug!(items = items.len(), workers = self.opts.workers, tokens = self.limiter.available(), "fetching batch");
        stream::iter(items.iter().cloned())
            .map(|id| async move {
                let res = match timeout(item_timeout, self.fetch_book(&id, credential)).await {
                    Ok(r) => r,
                    Err(_) => Err(FetchError::TimedOut(item_timeout)),
                };
                if let Err(e) = &res {
                    warn!(item_id = %id, error = %e, "fetch failed");
                }
                (id, res)
            })
            .buffer_unordered(self.opts.workers.max(1))
            .collect()
            .await
    }
}
