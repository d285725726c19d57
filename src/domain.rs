// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::kpi::{MarketKpis, Proceeds};

/// Harga dalam satuan mata uang (presisi minor unit), selalu Decimal.
pub type Price = Decimal;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self { ItemId(s.to_string()) }
}

/// Opaque access token. Only the fetch stage reads it; Debug never prints it.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: &str) -> Option<Self> {
        let t = raw.trim();
        if t.is_empty() { None } else { Some(Credential(t.to_string())) }
    }
    pub fn expose(&self) -> &str { &self.0 }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Credential(***)") }
}

// ----- Input side -----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLine {
    pub raw_text: String,
    /// Nama item setelah noise (qty, angka, warna) dibuang.
    pub name: String,
    pub parsed_quantity: u64,
    pub is_equipped: bool,
    pub is_tradable: bool,
}

impl InventoryLine {
    pub fn is_sellable(&self) -> bool { !self.is_equipped && self.is_tradable }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedItem {
    pub raw_text: String,
    /// Normalized key of the input name.
    pub name: String,
    /// None when the best score stayed under the threshold.
    pub item_id: Option<ItemId>,
    pub canonical_name: Option<String>,
    pub match_score: u8,
    pub requested_quantity: u64,
}

impl ResolvedItem {
    pub fn is_resolved(&self) -> bool { self.item_id.is_some() }
}

// ----- Market side -----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing { pub price: Price, pub quantity: u64 }

/// Upper bounds for a single upstream listing; anything larger is rejected.
pub const MAX_LISTING_PRICE: Price = dec!(1000000000000000000);
pub const MAX_LISTING_QUANTITY: u64 = 1_000_000_000_000;

impl Listing {
    /// Rejects non-positive or out-of-range price and quantity (upstream data is untrusted).
    pub fn new(price: Price, quantity: u64) -> Option<Self> {
        let price_ok = price > Decimal::ZERO && price <= MAX_LISTING_PRICE;
        let quantity_ok = quantity > 0 && quantity <= MAX_LISTING_QUANTITY;
        if price_ok && quantity_ok { Some(Listing { price, quantity }) } else { None }
    }
}

/// Listings for one item, ascending by price; equal prices keep fetch order. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketBook { listings: Vec<Listing> }

impl MarketBook {
    pub fn from_fetched(mut listings: Vec<Listing>) -> Option<Self> {
        if listings.is_empty() {
            return None;
        }
        // sort_by is stable -> urutan fetch untuk harga sama tetap terjaga
        listings.sort_by(|a, b| a.price.cmp(&b.price));
        Some(MarketBook { listings })
    }
    pub fn listings(&self) -> &[Listing] { &self.listings }
    pub fn into_listings(self) -> Vec<Listing> { self.listings }
    pub fn total_depth(&self) -> u64 { self.listings.iter().map(|l| l.quantity).sum() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStructure { Bulk, UnitStyle, ThinExclusive }

impl MarketStructure {
    pub fn label(&self) -> &'static str {
        match self {
            MarketStructure::Bulk => "bulk",
            MarketStructure::UnitStyle => "unit_style",
            MarketStructure::ThinExclusive => "thin_exclusive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence { Normal, Low }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinReason { TooFewLevels, TooLittleDepth, DominantLevel }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanedBook {
    pub listings: Vec<Listing>,
    pub structure: MarketStructure,
    pub confidence: Confidence,
    pub thin_reason: Option<ThinReason>,
    pub anchor_prices: Vec<Price>,
    /// True when every level was an anchor and the unfiltered book was kept.
    pub anchor_fallback: bool,
    pub raw_median: Price,
    pub raw_mad: Price,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecommendation {
    pub fast_sell: Price,
    pub fair: Price,
    pub greedy: Price,
    pub structure_used: MarketStructure,
    /// Wall level the bulk fast-sell undercuts.
    pub wall_price: Option<Price>,
}

// ----- Output side -----

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMeta {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub average_price: Option<Price>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Priced {
        recommendation: PriceRecommendation,
        book: CleanedBook,
        kpis: MarketKpis,
        proceeds: Proceeds,
    },
    NoData,
    FetchFailed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub item_id: ItemId,
    pub requested_quantity: u64,
    pub meta: ItemMeta,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub generated_at: DateTime<Utc>,
    pub resolutions: Vec<ResolvedItem>,
    /// Lines dropped as equipped / untradable.
    pub skipped_lines: Vec<String>,
    pub items: Vec<ItemReport>,
}

impl BatchReport {
    pub fn unresolved(&self) -> impl Iterator<Item = &ResolvedItem> {
        self.resolutions.iter().filter(|r| !r.is_resolved())
    }
}

/// Pipeline events for the JSONL recorder.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    Resolved(ResolvedItem),
    FetchFailed { item_id: ItemId, reason: String },
    Priced { item_id: ItemId, recommendation: PriceRecommendation, anchors: Vec<Price> },
    NoData { item_id: ItemId },
    Note(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_rejects_non_positive_values() {
        assert!(Listing::new(dec!(0), 1).is_none());
        assert!(Listing::new(dec!(-5), 1).is_none());
        assert!(Listing::new(dec!(5), 0).is_none());
        assert!(Listing::new(dec!(5), 1).is_some());
    }

    #[test]
    fn listing_rejects_out_of_range_values() {
        assert!(Listing::new(MAX_LISTING_PRICE, MAX_LISTING_QUANTITY).is_some());
        assert!(Listing::new(MAX_LISTING_PRICE + Decimal::ONE, 1).is_none());
        assert!(Listing::new(dec!(5), MAX_LISTING_QUANTITY + 1).is_none());
    }

    #[test]
    fn book_sorts_stably_by_price() {
        let l = |p: Decimal, q| Listing::new(p, q).unwrap();
        let book = MarketBook::from_fetched(vec![l(dec!(7), 1), l(dec!(5), 2), l(dec!(7), 3), l(dec!(5), 4)]).unwrap();
        let qs: Vec<u64> = book.listings().iter().map(|l| l.quantity).collect();
        assert_eq!(qs, vec![2, 4, 1, 3]);
        assert_eq!(book.total_depth(), 10);
    }

    #[test]
    fn empty_book_is_no_data() {
        assert!(MarketBook::from_fetched(vec![]).is_none());
    }

    #[test]
    fn credential_debug_is_redacted() {
        let c = Credential::new(" secret-key ").unwrap();
        assert_eq!(c.expose(), "secret-key");
        assert_eq!(format!("{c:?}"), "Credential(***)");
        assert!(Credential::new("   ").is_none());
    }
}
