use chrono::{Datelike, NaiveDate};
use tracing::warn;

/// Lexical forms the usage endpoint accepts for `start` and `end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateForm {
    /// `YYYY-MM-DD`
    Day,
    /// `YYYY-MM`
    Month,
    /// `YYYY`
    Year,
}

impl DateForm {
    /// Recognises `raw` and returns its form together with the first day it
    /// covers.
    pub fn classify(raw: &str) -> Option<(DateForm, NaiveDate)> {
        let parts: Vec<&str> = raw.split('-').collect();
        let all_digits = parts
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
        if !all_digits || parts[0].len() != 4 {
            return None;
        }

        match parts.as_slice() {
            [_, month, day] if month.len() == 2 && day.len() == 2 => {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()
                    .map(|date| (DateForm::Day, date))
            }
            [_, month] if month.len() == 2 => {
                NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d")
                    .ok()
                    .map(|date| (DateForm::Month, date))
            }
            [year] => year
                .parse::<i32>()
                .ok()
                .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
                .map(|date| (DateForm::Year, date)),
            _ => None,
        }
    }
}

/// Problems spotted in a usage date. Never stops the query; the server has
/// the final say.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DateWarning {
    Unrecognised(String),
    InFuture(String),
}

pub fn check_usage_date(raw: &str, today: NaiveDate) -> Option<DateWarning> {
    match DateForm::classify(raw) {
        None => Some(DateWarning::Unrecognised(raw.to_string())),
        Some((form, first_day)) => {
            let in_future = match form {
                DateForm::Day => first_day > today,
                DateForm::Month => {
                    (first_day.year(), first_day.month()) > (today.year(), today.month())
                }
                DateForm::Year => first_day.year() > today.year(),
            };
            in_future.then(|| DateWarning::InFuture(raw.to_string()))
        }
    }
}

/// Logs a warning for each questionable date; the strings are sent anyway.
pub fn warn_on_questionable_dates(start: Option<&str>, end: Option<&str>, today: NaiveDate) {
    for (param, raw) in [("start", start), ("end", end)] {
        let Some(raw) = raw else { continue };
        match check_usage_date(raw, today) {
            Some(DateWarning::Unrecognised(raw)) => {
                warn!(param, %raw, "Date is not YYYY-MM-DD, YYYY-MM or YYYY, sending it as-is")
            }
            Some(DateWarning::InFuture(raw)) if param == "start" => {
                warn!(param, %raw, "Start date lies in the future")
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn accepted_forms_are_classified() {
        assert_eq!(
            DateForm::classify("2024-02-29").map(|(form, _)| form),
            Some(DateForm::Day)
        );
        assert_eq!(
            DateForm::classify("2024-02").map(|(form, _)| form),
            Some(DateForm::Month)
        );
        assert_eq!(
            DateForm::classify("2024").map(|(form, _)| form),
            Some(DateForm::Year)
        );
    }

    #[test]
    fn placeholder_and_invalid_dates_are_unrecognised() {
        for raw in ["YYYY-MM-DD", "2023-02-29", "2024-13", "24-01-01", "2024-1-01", "", "2024-"] {
            assert_eq!(DateForm::classify(raw), None, "{raw}");
            assert_eq!(
                check_usage_date(raw, today()),
                Some(DateWarning::Unrecognised(raw.to_string()))
            );
        }
    }

    #[test]
    fn future_dates_are_flagged_per_form() {
        assert_eq!(check_usage_date("2024-06-15", today()), None);
        assert_eq!(
            check_usage_date("2024-06-16", today()),
            Some(DateWarning::InFuture("2024-06-16".into()))
        );
        assert_eq!(check_usage_date("2024-06", today()), None);
        assert_eq!(
            check_usage_date("2024-07", today()),
            Some(DateWarning::InFuture("2024-07".into()))
        );
        assert_eq!(check_usage_date("2024", today()), None);
        assert_eq!(
            check_usage_date("2025", today()),
            Some(DateWarning::InFuture("2025".into()))
        );
    }
}
