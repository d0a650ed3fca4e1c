/// Global average grams of CO₂ per page view. A policy constant, not a measurement.
pub const GLOBAL_AVERAGE_G: f64 = 0.36;

/// Percentage of sites the page is cleaner than, relative to `global_average`.
///
/// `clamp(((avg - co2) / avg) * 100, 0, 100)` rounded to the nearest integer.
/// Non-increasing in `co2_per_page`; a non-positive or non-finite baseline
/// yields 0.
pub fn estimate_cleaner_than(co2_per_page: f64, global_average: f64) -> u8 {
    if !global_average.is_finite() || global_average <= 0.0 || co2_per_page.is_nan() {
        return 0;
    }
    let pct = ((global_average - co2_per_page) / global_average) * 100.0;
    pct.clamp(0.0, 100.0).round() as u8
}
