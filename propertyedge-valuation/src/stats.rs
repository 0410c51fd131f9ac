//! Small numeric helpers shared by the refinement chain and insight builders

use chrono::NaiveDate;

const EARTH_RADIUS_MILES: f64 = 3958.8;
const DAYS_PER_MONTH: f64 = 30.4375;

/// Median of the values, `None` when empty
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

/// Quantile with linear interpolation between closest ranks
///
/// `q` in [0, 1]. `None` when empty.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }

    let pos = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        Some(sorted[lo])
    } else {
        Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
    }
}

/// Signed percentage difference of `value` relative to `reference`
pub fn percent_diff(value: f64, reference: f64) -> Option<f64> {
    if reference == 0.0 {
        None
    } else {
        Some((value - reference) / reference * 100.0)
    }
}

/// Great-circle distance in miles
pub fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * a.sqrt().asin()
}

/// Fractional months elapsed from `from` to `to` (never negative)
pub fn months_between(from: NaiveDate, to: NaiveDate) -> f64 {
    let days = (to - from).num_days().max(0) as f64;
    days / DAYS_PER_MONTH
}

/// Round to the nearest multiple of `base`
pub fn round_to_nearest(value: f64, base: i64) -> i64 {
    ((value / base as f64).round() as i64) * base
}

/// Format a price as "£1,234,567"
pub fn format_gbp(value: f64) -> String {
    let rounded = value.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 2);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if rounded < 0 {
        format!("-£{}", out)
    } else {
        format!("£{}", out)
    }
}
