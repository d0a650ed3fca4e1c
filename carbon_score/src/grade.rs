use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CarbonError;

/// Letter grade for a per-page CO₂ figure, best first.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
    D,
    F,
}

/// Exclusive upper bounds in grams, checked in order; anything above the last is `F`.
pub const GRADE_THRESHOLDS: [(f64, Grade); 5] = [
    (0.1, Grade::APlus),
    (0.2, Grade::A),
    (0.36, Grade::B),
    (0.5, Grade::C),
    (0.75, Grade::D),
];

/// Callers pass clamped, non-negative values; NaN grades as `F`.
pub fn classify(co2_per_page: f64) -> Grade {
    GRADE_THRESHOLDS
        .iter()
        .find(|(upper, _)| co2_per_page < *upper)
        .map(|(_, grade)| *grade)
        .unwrap_or(Grade::F)
}

impl Grade {
    pub const ALL: [Grade; 6] = [Grade::APlus, Grade::A, Grade::B, Grade::C, Grade::D, Grade::F];

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    /// Display colour used by the dashboard badges.
    pub fn color_hex(&self) -> &'static str {
        match self {
            Grade::APlus => "#12B76A",
            Grade::A => "#34D399",
            Grade::B => "#FACC15",
            Grade::C => "#FFD166",
            Grade::D => "#FFA500",
            Grade::F => "#E85A4F",
        }
    }

    /// Exclusive upper bound in grams, `None` for `F`.
    pub fn upper_bound_g(&self) -> Option<f64> {
        GRADE_THRESHOLDS
            .iter()
            .find(|(_, grade)| grade == self)
            .map(|(upper, _)| *upper)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = CarbonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Grade::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| CarbonError::InvalidPayload(format!("unknown grade '{trimmed}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_are_exclusive_upper() {
        assert_eq!(classify(0.0999999), Grade::APlus);
        assert_eq!(classify(0.1), Grade::A);
        assert_eq!(classify(0.1999), Grade::A);
        assert_eq!(classify(0.2), Grade::B);
        assert_eq!(classify(0.36), Grade::C);
        assert_eq!(classify(0.5), Grade::D);
        assert_eq!(classify(0.7499), Grade::D);
        assert_eq!(classify(0.75), Grade::F);
        assert_eq!(classify(2.0), Grade::F);
        assert_eq!(classify(f64::NAN), Grade::F);
    }

    #[test]
    fn grades_order_best_first() {
        assert!(Grade::APlus < Grade::A);
        assert!(Grade::D < Grade::F);
        assert_eq!(Grade::B.upper_bound_g(), Some(0.36));
        assert_eq!(Grade::F.upper_bound_g(), None);
    }

    #[test]
    fn parses_and_prints_labels() {
        for grade in Grade::ALL {
            assert_eq!(grade.to_string().parse::<Grade>().unwrap(), grade);
        }
        assert_eq!(" a+ ".parse::<Grade>().unwrap(), Grade::APlus);
        assert!("E".parse::<Grade>().is_err());
        assert_eq!(serde_json::to_string(&Grade::APlus).unwrap(), "\"A+\"");
        assert_eq!(Grade::F.color_hex(), "#E85A4F");
    }
}
