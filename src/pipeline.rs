// ===============================
// src/pipeline.rs (resolve -> fetch -> clean -> price)
// ===============================
//
// Satu batch = satu pemanggilan eksplisit (CLI atau POST /price).
// Kegagalan per item tidak menghentikan batch: setiap item selalu punya
// outcome (Priced / NoData / FetchFailed), setiap baris input punya resolusi.
//
use ahash::AHashMap as HashMap;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::hash_map::Entry;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cleaner::MarketCleaner;
use crate::config::Thresholds;
use crate::domain::{
    BatchReport, Credential, Event, ItemId, ItemMeta, ItemOutcome, ItemReport, MarketBook,
};
use crate::fetcher::{FetchError, FetchedBook, ListingFetcher};
use crate::kpi::{MarketKpis, Proceeds};
use crate::matching::MatchResolver;
use crate::metrics::{ANCHORS_REMOVED, BATCHES_IN_FLIGHT, ITEMS_BY_STRUCTURE, ITEMS_NO_DATA};
use crate::pricing::PricingEngine;

/// Keeps the in-flight gauge right even when a request future is dropped.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        BATCHES_IN_FLIGHT.inc();
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) { BATCHES_IN_FLIGHT.dec(); }
}

pub struct Pipeline {
    resolver: MatchResolver,
    fetcher: ListingFetcher,
    cleaner: MarketCleaner,
    engine: PricingEngine,
    fee_rate: Decimal,
    events: Option<mpsc::Sender<Event>>,
}

impl Pipeline {
    pub fn new(resolver: MatchResolver, fetcher: ListingFetcher, thresholds: &Thresholds, fee_rate: Decimal) -> Self {
        Self {
            resolver,
            fetcher,
            cleaner: MarketCleaner::new(thresholds.cleaner.clone()),
            engine: PricingEngine::new(thresholds.pricing.clone()),
            fee_rate,
            events: None,
        }
    }

    pub fn with_recorder(mut self, tx: mpsc::Sender<Event>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, ev: Event) {
        if let Some(tx) = &self.events {
            // recorder lambat tidak boleh menahan pipeline
            let _ = tx.try_send(ev);
        }
    }

    /// KPIs over the raw book, then clean, classify and price.
    pub fn price_book(&self, book: MarketBook, quantity: u64) -> ItemOutcome {
        let kpis = MarketKpis::from_book(&book);
        let cleaned = self.cleaner.clean(book);
        if !cleaned.anchor_fallback {
            ANCHORS_REMOVED.inc_by(cleaned.anchor_prices.len() as u64);
        }
        let recommendation = self.engine.price(&cleaned);
        ITEMS_BY_STRUCTURE.with_label_values(&[recommendation.structure_used.label()]).inc();
        let proceeds = Proceeds::for_recommendation(&recommendation, quantity, self.fee_rate);
        ItemOutcome::Priced { recommendation, book: cleaned, kpis, proceeds }
    }

    fn report_item(&self, item_id: ItemId, quantity: u64, fetched: Result<FetchedBook, FetchError>) -> ItemReport {
        let (meta, outcome) = match fetched {
            Err(e) => {
                let reason = e.to_string();
                self.emit(Event::FetchFailed { item_id: item_id.clone(), reason: reason.clone() });
                (ItemMeta::default(), ItemOutcome::FetchFailed { reason })
            }
            Ok(fetched) => {
                let outcome = match MarketBook::from_fetched(fetched.listings) {
                    None => {
                        ITEMS_NO_DATA.inc();
                        debug!(item_id = %item_id, "no listings");
                        self.emit(Event::NoData { item_id: item_id.clone() });
                        ItemOutcome::NoData
                    }
                    Some(book) => {
                        let outcome = self.price_book(book, quantity);
                        if let ItemOutcome::Priced { recommendation, book, .. } = &outcome {
                            info!(
                                item_id = %item_id,
                                structure = recommendation.structure_used.label(),
                                fast_sell = %recommendation.fast_sell,
                                fair = %recommendation.fair,
                                greedy = %recommendation.greedy,
                                anchors = book.anchor_prices.len(),
                                "item priced"
                            );
                            self.emit(Event::Priced {
                                item_id: item_id.clone(),
                                recommendation: recommendation.clone(),
                                anchors: book.anchor_prices.clone(),
                            });
                        }
                        outcome
                    }
                };
                (fetched.meta, outcome)
            }
        };
        ItemReport { item_id, requested_quantity: quantity, meta, outcome }
    }

    pub fn resolver(&self) -> &MatchResolver { &self.resolver }

    pub async fn run(&self, raw_text: &str, credential: &Credential) -> BatchReport {
        let _in_flight = InFlight::enter();
        let resolution = self.resolver.resolve_text(raw_text);
        for r in &resolution.items {
            self.emit(Event::Resolved(r.clone()));
        }

        // Gabungkan baris dengan id yang sama -> satu fetch per item
        let mut order: Vec<ItemId> = Vec::new();
        let mut quantities: HashMap<ItemId, u64> = HashMap::new();
        for r in &resolution.items {
            let Some(id) = &r.item_id else { continue };
            match quantities.entry(id.clone()) {
                Entry::Occupied(mut e) => {
                    let total = e.get_mut();
                    *total = total.saturating_add(r.requested_quantity);
                }
                Entry::Vacant(e) => {
                    order.push(id.clone());
                    e.insert(r.requested_quantity);
                }
            }
        }

        let mut fetched: HashMap<ItemId, Result<FetchedBook, FetchError>> = if order.is_empty() {
            HashMap::new()
        } else {
            self.fetcher.fetch_all(&order, credential).await.into_iter().collect()
        };

        let items: Vec<ItemReport> = order
            .into_iter()
            .map(|id| {
                let quantity = quantities.get(&id).copied().unwrap_or(0);
                let res = fetched
                    .remove(&id)
                    .unwrap_or_else(|| Err(FetchError::Malformed("no fetch result".into())));
                self.report_item(id, quantity, res)
            })
            .collect();

        let report = BatchReport {
            generated_at: Utc::now(),
            resolutions: resolution.items,
            skipped_lines: resolution.skipped,
            items,
        };
        info!(
            lines = report.resolutions.len(),
            unresolved = report.unresolved().count(),
            skipped = report.skipped_lines.len(),
            items = report.items.len(),
            "batch done"
        );
        self.emit(Event::Note(format!("batch done: {} items", report.items.len())));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Dictionary;
    use crate::domain::MarketStructure;
    use crate::fetcher::testing::{market_page, opts, ScriptedSource};
    use crate::fetcher::{FetchOptions, QuoteSource};
    use crate::ratelimit::TokenBucket;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;

    fn pipeline(source: Arc<dyn QuoteSource>) -> Pipeline {
        let dict = Arc::new(
            Dictionary::from_pairs([("Xanax", "206"), ("Kitchen Knife", "3"), ("Empty Box", "77")]).unwrap(),
        );
        let fetcher = ListingFetcher::new(source, Arc::new(TokenBucket::per_minute(6000, 100)), opts());
        Pipeline::new(MatchResolver::new(dict, 85), fetcher, &Thresholds::default(), dec!(0.05))
    }

    fn key() -> Credential { Credential::new("test-key").unwrap() }

    fn scripted() -> Arc<ScriptedSource> {
        Arc::new(ScriptedSource::new(|item, _, _, _| match item.0.as_str() {
            "206" => Ok(market_page(&[(100, 1), (100, 50), (105, 1)])),
            "77" => Ok(market_page(&[])),
            _ => Ok(json!({ "error": { "code": 6, "error": "Incorrect ID" } })),
        }))
    }

    #[tokio::test]
    async fn empty_text_fetches_nothing() {
        let src = scripted();
        let report = pipeline(src.clone()).run("", &key()).await;
        assert!(report.resolutions.is_empty());
        assert!(report.items.is_empty());
        assert_eq!(src.calls(), 0);
    }

    #[tokio::test]
    async fn every_item_gets_an_outcome() {
        let src = scripted();
        let text = "Xanax x2\nXanax x3\nKitchen Knife\nEmpty Box\nMystery Thing\n";
        let report = pipeline(src.clone()).run(text, &key()).await;

        assert_eq!(report.resolutions.len(), 5);
        assert_eq!(report.unresolved().count(), 1);
        // tiga item unik -> tiga fetch, urutan mengikuti input
        assert_eq!(src.calls(), 3);
        let ids: Vec<&str> = report.items.iter().map(|i| i.item_id.0.as_str()).collect();
        assert_eq!(ids, vec!["206", "3", "77"]);

        let xanax = &report.items[0];
        assert_eq!(xanax.requested_quantity, 5);
        assert_eq!(xanax.meta.name.as_deref(), Some("Xanax"));
        match &xanax.outcome {
            ItemOutcome::Priced { recommendation, proceeds, kpis, .. } => {
                assert_eq!(recommendation.structure_used, MarketStructure::Bulk);
                assert_eq!(recommendation.fast_sell, dec!(99));
                assert_eq!(kpis.total_stock, 52);
                // 99 * 5 = 495, fee ceil(24.75) = 25
                let fast = proceeds.fast_sell.as_ref().unwrap();
                assert_eq!(fast.gross, dec!(495));
                assert_eq!(fast.net, dec!(470));
            }
            other => panic!("expected priced, got {other:?}"),
        }
        assert!(matches!(report.items[1].outcome, ItemOutcome::FetchFailed { .. }));
        assert!(matches!(report.items[2].outcome, ItemOutcome::NoData));
    }

    #[tokio::test]
    async fn skipped_lines_are_reported_not_fetched() {
        let src = scripted();
        let report = pipeline(src.clone()).run("Kitchen Knife (equipped)\nXanax [untradable]", &key()).await;
        assert_eq!(report.skipped_lines.len(), 2);
        assert!(report.items.is_empty());
        assert_eq!(src.calls(), 0);
    }

    #[tokio::test]
    async fn recorder_receives_pipeline_events() {
        let (tx, mut rx) = mpsc::channel(32);
        let p = pipeline(scripted()).with_recorder(tx);
        p.run("Xanax\nEmpty Box", &key()).await;
        drop(p);

        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            kinds.push(match ev {
                Event::Resolved(_) => "resolved",
                Event::Priced { .. } => "priced",
                Event::NoData { .. } => "no_data",
                Event::FetchFailed { .. } => "failed",
                Event::Note(_) => "note",
            });
        }
        assert_eq!(kinds, vec!["resolved", "resolved", "priced", "no_data", "note"]);
    }

    #[tokio::test]
    async fn extreme_upstream_price_still_yields_a_report() {
        let src: Arc<ScriptedSource> = Arc::new(ScriptedSource::new(|item, _, _, _| match item.0.as_str() {
            "206" => Ok(market_page(&[(1_000_000_000_000_000, 1), (1, 1), (2, 1)])),
            _ => Ok(market_page(&[(100, 1), (100, 50), (105, 1)])),
        }));
        let report = pipeline(src).run("Xanax\nKitchen Knife", &key()).await;
        assert_eq!(report.items.len(), 2);
        match &report.items[0].outcome {
            ItemOutcome::Priced { kpis, recommendation, .. } => {
                assert_eq!(kpis.price_max, dec!(1000000000000000));
                assert!(recommendation.fair <= recommendation.greedy);
            }
            other => panic!("expected priced, got {other:?}"),
        }
        assert!(matches!(report.items[1].outcome, ItemOutcome::Priced { .. }));
    }

    #[tokio::test]
    async fn huge_quantities_saturate_instead_of_panicking() {
        let src: Arc<ScriptedSource> =
            Arc::new(ScriptedSource::new(|_, _, _, _| Ok(market_page(&[(10_000_000_000, 1), (10_000_000_001, 1)]))));
        let report = pipeline(src).run("Xanax x18446744073709551615\nXanax x5", &key()).await;
        let xanax = &report.items[0];
        assert_eq!(xanax.requested_quantity, u64::MAX);
        match &xanax.outcome {
            ItemOutcome::Priced { proceeds, .. } => {
                assert!(proceeds.fast_sell.is_none());
                assert!(proceeds.fair.is_none());
                assert!(proceeds.greedy.is_none());
            }
            other => panic!("expected priced, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_respects_the_listing_cap() {
        let src: Arc<ScriptedSource> = Arc::new(ScriptedSource::new(|_, offset, limit, _| {
            let rows: Vec<(i64, i64)> = (offset..offset + limit).map(|i| (100 + i as i64, 1)).collect();
            Ok(market_page(&rows))
        }));
        let dict = Arc::new(Dictionary::from_pairs([("Xanax", "206")]).unwrap());
        let fetcher = ListingFetcher::new(
            src,
            Arc::new(TokenBucket::per_minute(6000, 100)),
            FetchOptions { page_size: 40, max_listings: 100, ..opts() },
        );
        let p = Pipeline::new(MatchResolver::new(dict, 85), fetcher, &Thresholds::default(), dec!(0.05));
        let report = p.run("Xanax", &key()).await;
        match &report.items[0].outcome {
            ItemOutcome::Priced { kpis, .. } => assert_eq!(kpis.total_stock, 100),
            other => panic!("expected priced, got {other:?}"),
        }
    }
}
