// ===============================
// src/pricing.rs (fast-sell / fair / greedy)
// ===============================
//
// - fair   = median harga listing (bobot per listing, bukan per unit)
// - greedy = Q3, interpolasi linear yang sama
// - fast   = Bulk: harga "tembok" pertama dikurangi 1 minor unit, dibulatkan
//            ke bawah ke kelipatan minor unit; kalau hasilnya tidak positif,
//            harga termurah dan wall_price = None
//            lainnya: harga termurah (tanpa undercut)
//
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::cleaner::price_levels;
use crate::domain::{CleanedBook, MarketStructure, Price, PriceRecommendation};
use crate::stats::{median, quantile};

#[derive(Debug, Clone)]
pub struct PricingCfg {
    /// A level holding at least this share of depth is a wall.
    pub wall_depth_share: Decimal,
    /// Smallest currency step (1 = whole units).
    pub minor_unit: Decimal,
}

impl Default for PricingCfg {
    fn default() -> Self {
        Self { wall_depth_share: dec!(0.4), minor_unit: Decimal::ONE }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PricingEngine {
    cfg: PricingCfg,
}

impl PricingEngine {
    pub fn new(cfg: PricingCfg) -> Self { Self { cfg } }

    fn snap(&self, p: Price, strategy: RoundingStrategy) -> Option<Price> {
        let mu = self.cfg.minor_unit;
        p.checked_div(mu)?.round_dp_with_strategy(0, strategy).checked_mul(mu)
    }

    /// Round to the nearest multiple of the minor unit; unchanged if that overflows.
    pub fn round_to_minor(&self, p: Price) -> Price {
        self.snap(p, RoundingStrategy::MidpointNearestEven).unwrap_or(p)
    }

    /// One minor unit under `wall`, floored onto the minor-unit grid.
    /// None when that leaves nothing positive below the wall.
    pub fn undercut(&self, wall: Price) -> Option<Price> {
        let p = self.snap(wall.checked_sub(self.cfg.minor_unit)?, RoundingStrategy::ToNegativeInfinity)?;
        (p > Decimal::ZERO && p < wall).then_some(p)
    }

    /// Lowest level whose depth share reaches the wall threshold. When no single level
    /// does, the level where cumulative depth first reaches it.
    pub fn wall_price(&self, book: &CleanedBook) -> Option<Price> {
        let levels = price_levels(&book.listings);
        let total: u64 = levels.values().sum();
        if total == 0 {
            return None;
        }
        let total = Decimal::from(total);
        let need = self.cfg.wall_depth_share;

        if let Some((p, _)) = levels.iter().find(|(_, d)| Decimal::from(**d) / total >= need) {
            return Some(*p);
        }
        let mut cum = 0u64;
        levels.iter().find_map(|(p, d)| {
            cum += d;
            (Decimal::from(cum) / total >= need).then_some(*p)
        })
    }

    pub fn price(&self, book: &CleanedBook) -> PriceRecommendation {
        let mut prices: Vec<Price> = book.listings.iter().map(|l| l.price).collect();
        prices.sort();

        let fair = median(&prices).unwrap_or(Decimal::ZERO);
        let greedy = quantile(&prices, dec!(0.75)).unwrap_or(fair);
        let lowest = self.round_to_minor(prices.first().copied().unwrap_or(Decimal::ZERO));

        let (fast_sell, wall_price) = match book.structure {
            MarketStructure::Bulk => match self.wall_price(book).and_then(|w| Some((self.undercut(w)?, w))) {
                Some((fast, wall)) => (fast, Some(wall)),
                // Undercut harus tetap positif; kalau tidak, pakai harga termurah
                None => (lowest, None),
            },
            MarketStructure::UnitStyle | MarketStructure::ThinExclusive => (lowest, None),
        };

        PriceRecommendation { fast_sell, fair, greedy, structure_used: book.structure, wall_price }
    }
}
