// ===============================
// src/stats.rs (robust statistics on Decimal)
// ===============================
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

/// Consistency constant for MAD-based z-scores.
pub const MAD_SCALE: Decimal = dec!(0.6745);

/// Quantile with linear interpolation between order statistics.
/// `sorted` must be ascending.
pub fn quantile(sorted: &[Decimal], q: Decimal) -> Option<Decimal> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let q = q.clamp(Decimal::ZERO, Decimal::ONE);
    let pos = Decimal::from(n - 1) * q;
    let lo = pos.floor();
    let frac = pos - lo;
    let i = lo.to_usize().unwrap_or(0).min(n - 1);
    if i + 1 >= n || frac.is_zero() {
        return Some(sorted[i]);
    }
    Some(sorted[i] + (sorted[i + 1] - sorted[i]) * frac)
}

pub fn median(sorted: &[Decimal]) -> Option<Decimal> {
    quantile(sorted, dec!(0.5))
}

/// Median absolute deviation around `center`.
pub fn mad(values: &[Decimal], center: Decimal) -> Option<Decimal> {
    let mut dev: Vec<Decimal> = values.iter().map(|v| (*v - center).abs()).collect();
    dev.sort();
    median(&dev)
}

/// Robust z-score. `None` means unbounded: MAD is zero and the price is off the
/// median, or the score does not fit in a Decimal.
pub fn robust_z(price: Decimal, median: Decimal, mad: Decimal) -> Option<Decimal> {
    if mad.is_zero() {
        if price == median { Some(Decimal::ZERO) } else { None }
    } else {
        MAD_SCALE.checked_mul(price.checked_sub(median)?)?.checked_div(mad)
    }
}

/// |z| > threshold, treating an unbounded z as exceeding everything.
pub fn exceeds(z: Option<Decimal>, threshold: Decimal) -> bool {
    z.map_or(true, |z| z.abs() > threshold)
}

/// Sum that gives up (None) instead of overflowing.
pub fn checked_sum<I: IntoIterator<Item = Decimal>>(values: I) -> Option<Decimal> {
    values.into_iter().try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
}

/// `None` for an empty slice or when the sum overflows.
pub fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    checked_sum(values.iter().copied())?.checked_div(Decimal::from(values.len()))
}

/// Sample standard deviation (ddof = 1). `None` under two values or on overflow.
pub fn sample_std(values: &[Decimal]) -> Option<Decimal> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let squares = values
        .iter()
        .map(|v| {
            let d = v.checked_sub(m)?;
            d.checked_mul(d)
        })
        .collect::<Option<Vec<Decimal>>>()?;
    checked_sum(squares)?.checked_div(Decimal::from(values.len() - 1))?.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_interpolates_linearly() {
        let v = [dec!(50), dec!(52), dec!(55)];
        assert_eq!(median(&v), Some(dec!(52)));
        assert_eq!(quantile(&v, dec!(0.75)), Some(dec!(53.5)));
        assert_eq!(quantile(&v, dec!(0)), Some(dec!(50)));
        assert_eq!(quantile(&v, dec!(1)), Some(dec!(55)));
        assert_eq!(median(&[dec!(10), dec!(10), dec!(11), dec!(1000000)]), Some(dec!(10.5)));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn mad_and_robust_z() {
        let v = [dec!(10), dec!(10), dec!(11), dec!(1000000)];
        let m = median(&v).unwrap();
        let d = mad(&v, m).unwrap();
        assert_eq!(d, dec!(0.5));
        assert_eq!(robust_z(dec!(11), m, d), Some(dec!(0.6745)));
        assert!(exceeds(robust_z(dec!(1000000), m, d), dec!(3.5)));
    }

    #[test]
    fn zero_mad_fallback() {
        assert_eq!(robust_z(dec!(100), dec!(100), Decimal::ZERO), Some(Decimal::ZERO));
        assert_eq!(robust_z(dec!(105), dec!(100), Decimal::ZERO), None);
        assert!(exceeds(None, dec!(1000)));
        assert!(!exceeds(Some(Decimal::ZERO), dec!(3.5)));
    }

    #[test]
    fn sample_std_of_constant_is_zero() {
        assert_eq!(sample_std(&[dec!(4), dec!(4), dec!(4)]), Some(Decimal::ZERO));
        assert_eq!(sample_std(&[dec!(4)]), None);
    }

    #[test]
    fn huge_values_give_none_instead_of_panicking() {
        let v = [dec!(1000000000000000), dec!(1), dec!(2)];
        // (1e15 - 3.3e14)^2 > Decimal::MAX
        assert_eq!(sample_std(&v), None);
        assert_eq!(mean(&[Decimal::MAX, Decimal::MAX]), None);
        assert_eq!(checked_sum([Decimal::MAX, Decimal::ONE]), None);
        assert_eq!(robust_z(Decimal::MAX, Decimal::MIN, dec!(0.0001)), None);
        assert!(exceeds(robust_z(Decimal::MAX, Decimal::ZERO, dec!(0.0001)), dec!(3.5)));
    }
}
