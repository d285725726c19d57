// ===============================
// src/kpi.rs (market KPIs + proceeds after fee)
// ===============================
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{MarketBook, Price, PriceRecommendation};
use crate::stats::{checked_sum, mean, sample_std};

/// Units used for the "first N units" depth average.
pub const FIRST_UNITS: u64 = 20;

/// Aggregates over the raw book. Fields that can overflow a Decimal on
/// extreme books are `None` (serialized as null) instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketKpis {
    pub price_min: Price,
    pub amount_at_min: u64,
    pub price_max: Price,
    pub price_range: Price,
    /// Range relative to the cheapest listing.
    pub spread_pct: Option<Decimal>,
    pub total_stock: u64,
    /// Unit-weighted mean over every unit on sale, rounded up.
    pub weighted_mean_all: Option<Price>,
    pub mean_first_units: Option<Price>,
    pub units_used_first: u64,
    pub cost_first_units: Option<Price>,
    /// Sample std / mean of listing prices; 0 for a single listing.
    pub cv_price: Decimal,
}

fn cost(price: Price, quantity: u64) -> Option<Price> {
    price.checked_mul(Decimal::from(quantity))
}

impl MarketKpis {
    pub fn from_book(book: &MarketBook) -> Self {
        let listings = book.listings();
        // book terurut naik -> listing pertama = termurah
        let first = listings[0];
        let price_max = listings.iter().map(|l| l.price).max().unwrap_or(first.price);
        let total_stock = book.total_depth();

        let weighted_mean_all = listings
            .iter()
            .map(|l| cost(l.price, l.quantity))
            .collect::<Option<Vec<Price>>>()
            .and_then(checked_sum)
            .and_then(|v| v.checked_div(Decimal::from(total_stock.max(1))))
            .map(|m| m.ceil());

        let mut remain = FIRST_UNITS;
        let mut used = 0u64;
        let mut cost_first = Some(Decimal::ZERO);
        for l in listings {
            if remain == 0 {
                break;
            }
            let take = l.quantity.min(remain);
            cost_first = cost_first.zip(cost(l.price, take)).and_then(|(acc, c)| acc.checked_add(c));
            used += take;
            remain -= take;
        }
        let mean_first_units = cost_first
            .and_then(|c| c.checked_div(Decimal::from(used.max(1))))
            .map(|m| m.ceil());

        // CV tidak bergantung skala -> hitung di atas harga / price_max supaya tidak overflow
        let scaled: Option<Vec<Decimal>> = listings.iter().map(|l| l.price.checked_div(price_max)).collect();
        let cv_price = match scaled.as_deref().map(|p| (sample_std(p), mean(p))) {
            Some((Some(sd), Some(m))) if !m.is_zero() => sd.checked_div(m).unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        };

        let price_range = price_max - first.price;
        MarketKpis {
            price_min: first.price,
            amount_at_min: first.quantity,
            price_max,
            price_range,
            spread_pct: price_range.checked_div(first.price),
            total_stock,
            weighted_mean_all,
            mean_first_units,
            units_used_first: used,
            cost_first_units: cost_first,
            cv_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleEstimate {
    pub unit_price: Price,
    pub quantity: u64,
    pub gross: Price,
    pub fee: Price,
    pub net: Price,
    pub net_per_unit: Price,
}

impl SaleEstimate {
    /// `None` when there is nothing to sell, or when the totals do not fit in a Decimal.
    pub fn at(unit_price: Price, quantity: u64, fee_rate: Decimal) -> Option<Self> {
        if quantity == 0 || unit_price <= Decimal::ZERO {
            return None;
        }
        let qty = Decimal::from(quantity);
        let gross = unit_price.checked_mul(qty)?;
        let fee = gross.checked_mul(fee_rate)?.ceil();
        let net = gross.checked_sub(fee)?;
        let net_per_unit = net.checked_div(qty)?.ceil();
        Some(SaleEstimate { unit_price, quantity, gross, fee, net, net_per_unit })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proceeds {
    pub fee_rate: Decimal,
    pub fast_sell: Option<SaleEstimate>,
    pub fair: Option<SaleEstimate>,
    pub greedy: Option<SaleEstimate>,
}

impl Proceeds {
    pub fn for_recommendation(rec: &PriceRecommendation, quantity: u64, fee_rate: Decimal) -> Self {
        Proceeds {
            fee_rate,
            fast_sell: SaleEstimate::at(rec.fast_sell, quantity, fee_rate),
            fair: SaleEstimate::at(rec.fair, quantity, fee_rate),
            greedy: SaleEstimate::at(rec.greedy, quantity, fee_rate),
        }
    }
}
