/// Traffic assumed for the annual projection. Documented, not measured.
pub const DEFAULT_MONTHLY_VIEWS: u32 = 10_000;

const MONTHS_PER_YEAR: f64 = 12.0;
const GRAMS_PER_KG: f64 = 1000.0;

/// Annual kilograms of CO₂: `co2 * views * 12 / 1000`, rounded to 2 decimals.
pub fn project_annual(co2_per_page: f64, monthly_views: u32) -> f64 {
    let kg = co2_per_page * monthly_views as f64 * MONTHS_PER_YEAR / GRAMS_PER_KG;
    round_to(kg, 2)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
