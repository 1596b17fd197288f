use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;

static QUARTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Q([1-4])\s+(\d{4})").expect("quarter pattern is valid")
});

/// Fiscal quarter of an earnings call, labelled `"Q3 2024"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiscalQuarter {
    // Field order matters for the derived ordering.
    pub year: i32,
    pub quarter: u8,
}

impl FiscalQuarter {
    pub fn new(year: i32, quarter: u8) -> anyhow::Result<Self> {
        anyhow::ensure!(
            (1..=4).contains(&quarter),
            "quarter must be 1..=4 (got {quarter})"
        );
        Ok(Self { year, quarter })
    }

    /// Finds `Q<n> <yyyy>` anywhere in the label.
    pub fn parse(label: &str) -> Option<Self> {
        let caps = QUARTER_RE.captures(label)?;
        let quarter = caps[1].parse::<u8>().ok()?;
        let year = caps[2].parse::<i32>().ok()?;
        Some(Self { year, quarter })
    }
}

impl fmt::Display for FiscalQuarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{} {}", self.quarter, self.year)
    }
}

impl Serialize for FiscalQuarter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FiscalQuarter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FiscalQuarter::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid quarter label: {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_label() {
        assert_eq!(
            FiscalQuarter::parse("Q3 2024"),
            Some(FiscalQuarter { year: 2024, quarter: 3 })
        );
    }

    #[test]
    fn parses_label_embedded_in_text() {
        assert_eq!(
            FiscalQuarter::parse("FY Q1  2025 earnings call"),
            Some(FiscalQuarter { year: 2025, quarter: 1 })
        );
    }

    #[test]
    fn rejects_out_of_range_or_malformed() {
        assert_eq!(FiscalQuarter::parse("Q5 2024"), None);
        assert_eq!(FiscalQuarter::parse("Q3-2024"), None);
        assert_eq!(FiscalQuarter::parse("2024 Q3"), None);
        assert!(FiscalQuarter::new(2024, 0).is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let q = FiscalQuarter::new(2023, 4).unwrap();
        assert_eq!(q.to_string(), "Q4 2023");
        assert_eq!(FiscalQuarter::parse(&q.to_string()), Some(q));
    }

    #[test]
    fn orders_by_year_then_quarter() {
        let mut qs = vec![
            FiscalQuarter::new(2024, 1).unwrap(),
            FiscalQuarter::new(2023, 4).unwrap(),
            FiscalQuarter::new(2024, 3).unwrap(),
        ];
        qs.sort();
        qs.reverse();
        let labels: Vec<_> = qs.iter().map(ToString::to_string).collect();
        assert_eq!(labels, ["Q3 2024", "Q1 2024", "Q4 2023"]);
    }

    #[test]
    fn serde_uses_label() {
        let q = FiscalQuarter::new(2024, 2).unwrap();
        assert_eq!(serde_json::to_value(q).unwrap(), serde_json::json!("Q2 2024"));
        let back: FiscalQuarter = serde_json::from_str("\"Q2 2024\"").unwrap();
        assert_eq!(back, q);
        assert!(serde_json::from_str::<FiscalQuarter>("\"next quarter\"").is_err());
    }
}
