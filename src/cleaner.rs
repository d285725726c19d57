// ===============================
// src/cleaner.rs (anchor detection + market structure)
// ===============================
//
// Anchor = level harga yang (a) ekstrem secara robust-z DAN (b) memegang
// porsi depth yang besar. Dua syarat wajib terpenuhi: listing ekstrem
// bervolume kecil tidak dibuang, volume besar di harga wajar juga tidak.
//
// Klasifikasi (prioritas): ThinExclusive > Bulk > UnitStyle.
//
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use tracing::debug;

use crate::domain::{CleanedBook, Confidence, Listing, MarketBook, MarketStructure, Price, ThinReason};
use crate::stats::{exceeds, mad, median, robust_z};

#[derive(Debug, Clone)]
pub struct CleanerCfg {
    /// |robust z| above this marks a level as extreme.
    pub anchor_z: Decimal,
    /// Level depth / total depth above this marks a level as heavy.
    pub anchor_depth_share: Decimal,
    /// Secondary (lower) pair: a surviving level over both is "dominant".
    pub dominance_z: Decimal,
    pub dominance_share: Decimal,
    pub thin_min_levels: usize,
    pub thin_min_depth: u64,
    /// Mean quantity per listing above this is a stacked (bulk) market.
    pub bulk_mean_quantity: Decimal,
}

impl Default for CleanerCfg {
    fn default() -> Self {
        Self {
            anchor_z: dec!(3.5),
            anchor_depth_share: dec!(0.4),
            dominance_z: dec!(2.0),
            dominance_share: dec!(0.3),
            thin_min_levels: 2,
            thin_min_depth: 3,
            bulk_mean_quantity: dec!(2.0),
        }
    }
}

/// Depth per distinct price level, ascending.
pub fn price_levels(listings: &[Listing]) -> BTreeMap<Price, u64> {
    let mut levels = BTreeMap::new();
    for l in listings {
        *levels.entry(l.price).or_insert(0) += l.quantity;
    }
    levels
}

fn sorted_prices(listings: &[Listing]) -> Vec<Price> {
    let mut p: Vec<Price> = listings.iter().map(|l| l.price).collect();
    p.sort();
    p
}

/// Median and MAD over listing prices (one sample per listing).
fn center_and_spread(listings: &[Listing]) -> (Price, Price) {
    let prices = sorted_prices(listings);
    let m = median(&prices).unwrap_or(Decimal::ZERO);
    let d = mad(&prices, m).unwrap_or(Decimal::ZERO);
    (m, d)
}

fn share(part: u64, total: u64) -> Decimal {
    if total == 0 { Decimal::ZERO } else { Decimal::from(part) / Decimal::from(total) }
}

#[derive(Debug, Clone, Default)]
pub struct MarketCleaner {
    cfg: CleanerCfg,
}

impl MarketCleaner {
    pub fn new(cfg: CleanerCfg) -> Self { Self { cfg } }

    /// Price levels that satisfy both anchor conditions.
    pub fn detect_anchors(&self, book: &MarketBook) -> Vec<Price> {
        let (m, d) = center_and_spread(book.listings());
        let total = book.total_depth();
        price_levels(book.listings())
            .into_iter()
            .filter(|(price, depth)| {
                exceeds(robust_z(*price, m, d), self.cfg.anchor_z)
                    && share(*depth, total) > self.cfg.anchor_depth_share
            })
            .map(|(price, _)| price)
            .collect()
    }

    pub fn clean(&self, book: MarketBook) -> CleanedBook {
        let (raw_median, raw_mad) = center_and_spread(book.listings());
        let anchors = self.detect_anchors(&book);
        let listings = book.into_listings();

        let kept: Vec<Listing> = listings.iter().copied().filter(|l| !anchors.contains(&l.price)).collect();
        // Anchor tidak boleh menghapus seluruh data
        let (listings, anchor_fallback) = if kept.is_empty() { (listings, true) } else { (kept, false) };

        let (structure, thin_reason) = self.classify(&listings);
        debug!(
            anchors = anchors.len(),
            fallback = anchor_fallback,
            structure = structure.label(),
            "book cleaned"
        );

        CleanedBook {
            listings,
            structure,
            confidence: if thin_reason.is_some() { Confidence::Low } else { Confidence::Normal },
            thin_reason,
            anchor_prices: anchors,
            anchor_fallback,
            raw_median,
            raw_mad,
        }
    }

    pub fn classify(&self, listings: &[Listing]) -> (MarketStructure, Option<ThinReason>) {
        if let Some(reason) = self.thin_reason(listings) {
            return (MarketStructure::ThinExclusive, Some(reason));
        }
        let depth: u64 = listings.iter().map(|l| l.quantity).sum();
        let mean_qty = share(depth, listings.len() as u64);
        if mean_qty > self.cfg.bulk_mean_quantity {
            (MarketStructure::Bulk, None)
        } else {
            (MarketStructure::UnitStyle, None)
        }
    }

    fn thin_reason(&self, listings: &[Listing]) -> Option<ThinReason> {
        let levels = price_levels(listings);
        let depth: u64 = levels.values().sum();
        if levels.len() < self.cfg.thin_min_levels {
            return Some(ThinReason::TooFewLevels);
        }
        if depth < self.cfg.thin_min_depth {
            return Some(ThinReason::TooLittleDepth);
        }
        let (m, d) = center_and_spread(listings);
        let dominant = levels.iter().any(|(price, lvl_depth)| {
            share(*lvl_depth, depth) > self.cfg.dominance_share
                && exceeds(robust_z(*price, m, d), self.cfg.dominance_z)
        });
        dominant.then_some(ThinReason::DominantLevel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(rows: &[(Decimal, u64)]) -> MarketBook {
        MarketBook::from_fetched(rows.iter().map(|(p, q)| Listing::new(*p, *q).unwrap()).collect()).unwrap()
    }

    #[test]
    fn scenario_a_wall_book_is_bulk() {
        let c = MarketCleaner::default().clean(book(&[(dec!(100), 1), (dec!(100), 50), (dec!(105), 1)]));
        assert!(c.anchor_prices.is_empty());
        assert_eq!(c.structure, MarketStructure::Bulk);
        assert_eq!(c.confidence, Confidence::Normal);
        assert_eq!(c.listings.len(), 3);
    }

    #[test]
    fn scenario_b_singles_are_unit_style() {
        let c = MarketCleaner::default().clean(book(&[(dec!(50), 1), (dec!(52), 1), (dec!(55), 1)]));
        assert_eq!(c.structure, MarketStructure::UnitStyle);
        assert!(c.anchor_prices.is_empty());
    }

    #[test]
    fn scenario_c_extreme_but_shallow_is_not_an_anchor() {
        let b = book(&[(dec!(1000000), 1), (dec!(10), 1), (dec!(11), 1), (dec!(10), 1)]);
        let cleaner = MarketCleaner::default();
        assert!(cleaner.detect_anchors(&b).is_empty());
        let c = cleaner.clean(b);
        assert_eq!(c.listings.len(), 4);
        assert!(c.listings.iter().any(|l| l.price == dec!(1000000)));
        assert_eq!(c.raw_median, dec!(10.5));
    }

    #[test]
    fn heavy_and_extreme_level_is_removed() {
        // 20 unit organik di sekitar 100, satu tembok 5000 unit di harga 1
        let mut rows: Vec<(Decimal, u64)> = (0..20).map(|i| (Decimal::from(95 + i % 10), 1)).collect();
        rows.push((dec!(1), 5000));
        let c = MarketCleaner::default().clean(book(&rows));
        assert_eq!(c.anchor_prices, vec![dec!(1)]);
        assert!(!c.anchor_fallback);
        assert!(c.listings.iter().all(|l| l.price != dec!(1)));
        assert_eq!(c.listings.len(), 20);
    }

    #[test]
    fn heavy_but_central_level_is_kept() {
        let c = MarketCleaner::default().clean(book(&[(dec!(99), 1), (dec!(100), 500), (dec!(101), 1), (dec!(102), 1)]));
        assert!(c.anchor_prices.is_empty());
    }

    #[test]
    fn all_anchor_book_falls_back_to_unfiltered() {
        let cfg = CleanerCfg { anchor_depth_share: dec!(0.1), anchor_z: dec!(0.1), ..CleanerCfg::default() };
        let b = book(&[(dec!(10), 10), (dec!(20), 10)]);
        let cleaner = MarketCleaner::new(cfg);
        assert_eq!(cleaner.detect_anchors(&b).len(), 2);
        let c = cleaner.clean(b);
        assert!(c.anchor_fallback);
        assert_eq!(c.listings.len(), 2);
    }

    #[test]
    fn sparse_books_are_thin_with_low_confidence() {
        let c = MarketCleaner::default().clean(book(&[(dec!(500), 1)]));
        assert_eq!(c.structure, MarketStructure::ThinExclusive);
        assert_eq!(c.thin_reason, Some(ThinReason::TooFewLevels));
        assert_eq!(c.confidence, Confidence::Low);

        let c = MarketCleaner::default().clean(book(&[(dec!(500), 1), (dec!(510), 1)]));
        assert_eq!(c.thin_reason, Some(ThinReason::TooLittleDepth));
    }

    #[test]
    fn dominant_off_center_level_is_thin() {
        // level 130 menguasai 35% depth dan jauh dari median, tapi belum anchor (< 40%)
        let mut rows: Vec<(Decimal, u64)> = (0..13).map(|i| (Decimal::from(100 + i % 3), 1)).collect();
        rows.push((dec!(130), 7));
        let c = MarketCleaner::default().clean(book(&rows));
        assert!(c.anchor_prices.is_empty());
        assert_eq!(c.structure, MarketStructure::ThinExclusive);
        assert_eq!(c.thin_reason, Some(ThinReason::DominantLevel));
    }

    #[test]
    fn cleaned_book_is_never_empty() {
        let cleaner = MarketCleaner::default();
        for rows in [
            vec![(dec!(1), 1)],
            vec![(dec!(1), 100), (dec!(1000), 1)],
            vec![(dec!(5), 3), (dec!(5), 3), (dec!(5), 3)],
        ] {
            assert!(!cleaner.clean(book(&rows)).listings.is_empty());
        }
    }
}
