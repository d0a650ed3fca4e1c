/// Human-readable CO₂ mass: milligrams below one milligram's worth of grams,
/// grams with six decimals otherwise.
pub fn format_co2(grams: f64) -> String {
    if !grams.is_finite() || grams == 0.0 {
        return "0 g".to_string();
    }
    if grams < 0.001 {
        format!("{:.3} mg", grams * 1000.0)
    } else {
        format!("{:.6} g", grams)
    }
}

pub fn format_transfer_kib(bytes: u64) -> String {
    format!("{:.2} KB", bytes as f64 / 1024.0)
}

pub fn format_annual_kg(kg: f64) -> String {
    format!("{:.2} kg", kg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_unit_by_magnitude() {
        assert_eq!(format_co2(0.0), "0 g");
        assert_eq!(format_co2(f64::NAN), "0 g");
        assert_eq!(format_co2(0.0001204866), "0.120 mg");
        assert_eq!(format_co2(0.253), "0.253000 g");
        assert_eq!(format_co2(1.5), "1.500000 g");
    }

    #[test]
    fn formats_transfer_and_annual() {
        assert_eq!(format_transfer_kib(813), "0.79 KB");
        assert_eq!(format_annual_kg(30.36), "30.36 kg");
    }
}
