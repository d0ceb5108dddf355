use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Day after `last`, moved forward to Monday when it lands on a weekend.
/// Holidays are not considered.
pub fn next_business_day(last: NaiveDate) -> NaiveDate {
    let mut next = last + Duration::days(1);
    while is_weekend(next) {
        next += Duration::days(1);
    }
    next
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}
