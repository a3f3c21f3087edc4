//! Calendar tokens substituted into restriction values before a refresh.
//!
//! A restriction whose value cell holds exactly one of the token names below
//! is refreshed with the computed value instead:
//!
//! | token                  | value for 2026-01-15 |
//! |------------------------|----------------------|
//! | `current_period`       | `15.01.2026`         |
//! | `previous_period`      | `15.12.2025`         |
//! | `year_current_period`  | `2026`               |
//! | `year_previous_period` | `2025`               |
//! | `range_current_month`  | `1 - 1`              |
//! | `range_previous_month` | `12 - 12`            |
//! | `key_date`             | `15.01.2026`         |

use chrono::{Datelike, Months, NaiveDate};

const DATE_FORMAT: &str = "%d.%m.%Y";

/// Token values computed for one run date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodTokens {
    values: Vec<(&'static str, String)>,
}

impl PeriodTokens {
    pub fn for_date(today: NaiveDate) -> Self {
        // Month subtraction clamps to the last day of a shorter month
        let previous = today
            .checked_sub_months(Months::new(1))
            .unwrap_or(today);
        let values = vec![
            ("current_period", today.format(DATE_FORMAT).to_string()),
            ("previous_period", previous.format(DATE_FORMAT).to_string()),
            ("year_current_period", today.year().to_string()),
            ("year_previous_period", previous.year().to_string()),
            ("range_current_month", month_range(today)),
            ("range_previous_month", month_range(previous)),
            ("key_date", today.format(DATE_FORMAT).to_string()),
        ];
        Self { values }
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, value)| value.as_str())
    }

    /// The computed value when `value` is a token name, else `value` unchanged.
    pub fn substitute(&self, value: &str) -> String {
        match self.get(value.trim()) {
            Some(computed) => computed.to_string(),
            None => value.to_string(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.values.iter().map(|(name, value)| (*name, value.as_str()))
    }
}

fn month_range(date: NaiveDate) -> String {
    format!("{0} - {0}", date.month())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_january_rolls_back_to_december() {
        let tokens = PeriodTokens::for_date(date(2026, 1, 15));
        let rendered: Vec<_> = tokens.iter().collect();
        assert_eq!(
            rendered,
            vec![
                ("current_period", "15.01.2026"),
                ("previous_period", "15.12.2025"),
                ("year_current_period", "2026"),
                ("year_previous_period", "2025"),
                ("range_current_month", "1 - 1"),
                ("range_previous_month", "12 - 12"),
                ("key_date", "15.01.2026"),
            ]
        );
    }

    #[test]
    fn test_previous_period_clamps_to_month_end() {
        let tokens = PeriodTokens::for_date(date(2026, 3, 31));
        assert_eq!(tokens.get("previous_period"), Some("28.02.2026"));
    }

    #[test]
    fn test_substitute_exact_token_only() {
        let tokens = PeriodTokens::for_date(date(2026, 10, 16));
        assert_eq!(tokens.substitute("range_current_month"), "10 - 10");
        assert_eq!(tokens.substitute(" key_date "), "16.10.2026");
        assert_eq!(tokens.substitute("range_current_month_x"), "range_current_month_x");
        assert_eq!(tokens.substitute("1000"), "1000");
    }
}
