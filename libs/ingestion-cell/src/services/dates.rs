//! Calendar arithmetic for extracted dates and times.
//!
//! Everything here is pure and works on clinic-local values. The anchor is the
//! local date the message was received.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeDay {
    Today,
    Tomorrow,
    DayAfterTomorrow,
    /// Nearest upcoming occurrence, never the anchor itself.
    ThisWeekday(Weekday),
    /// The weekday in the Monday-start week after the anchor's.
    NextWeekday(Weekday),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meridiem {
    Am,
    Pm,
}

pub fn resolve_relative(day: RelativeDay, anchor: NaiveDate) -> NaiveDate {
    match day {
        RelativeDay::Today => anchor,
        RelativeDay::Tomorrow => anchor + Duration::days(1),
        RelativeDay::DayAfterTomorrow => anchor + Duration::days(2),
        RelativeDay::ThisWeekday(target) => {
            let offset = days_until(anchor.weekday(), target);
            anchor + Duration::days(if offset == 0 { 7 } else { offset })
        }
        RelativeDay::NextWeekday(target) => {
            let next_monday = anchor + Duration::days(7 - anchor.weekday().num_days_from_monday() as i64);
            next_monday + Duration::days(target.num_days_from_monday() as i64)
        }
    }
}

fn days_until(from: Weekday, to: Weekday) -> i64 {
    (to.num_days_from_monday() as i64 - from.num_days_from_monday() as i64).rem_euclid(7)
}

/// Month/day without a year: the anchor's year, or the next one if that date
/// has already passed.
pub fn infer_year(month: u32, day: u32, anchor: NaiveDate) -> Option<NaiveDate> {
    match NaiveDate::from_ymd_opt(anchor.year(), month, day) {
        Some(date) if date >= anchor => Some(date),
        _ => NaiveDate::from_ymd_opt(anchor.year() + 1, month, day),
    }
}

pub fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

/// 24-hour time from an optional meridiem. `午後12時` is noon and `午前12時`
/// is midnight; a meridiem with an hour above 12 is rejected.
pub fn to_24h(meridiem: Option<Meridiem>, hour: u32, minute: u32) -> Option<NaiveTime> {
    if minute >= 60 {
        return None;
    }
    let hour = match meridiem {
        None if hour < 24 => hour,
        None => return None,
        Some(_) if hour > 12 => return None,
        Some(Meridiem::Am) => hour % 12,
        Some(Meridiem::Pm) => hour % 12 + 12,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

pub fn weekday_ja(symbol: &str) -> Option<Weekday> {
    match symbol {
        "月" => Some(Weekday::Mon),
        "火" => Some(Weekday::Tue),
        "水" => Some(Weekday::Wed),
        "木" => Some(Weekday::Thu),
        "金" => Some(Weekday::Fri),
        "土" => Some(Weekday::Sat),
        "日" => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn weekday_en(name: &str) -> Option<Weekday> {
    name.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-01-15 is a Wednesday.
    fn anchor() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    #[test]
    fn simple_offsets() {
        assert_eq!(resolve_relative(RelativeDay::Today, anchor()), anchor());
        assert_eq!(resolve_relative(RelativeDay::Tomorrow, anchor()), d(1, 16));
        assert_eq!(resolve_relative(RelativeDay::DayAfterTomorrow, anchor()), d(1, 17));
    }

    #[test]
    fn this_weekday_never_resolves_to_the_anchor() {
        assert_eq!(resolve_relative(RelativeDay::ThisWeekday(Weekday::Fri), anchor()), d(1, 17));
        assert_eq!(resolve_relative(RelativeDay::ThisWeekday(Weekday::Wed), anchor()), d(1, 22));
        assert_eq!(resolve_relative(RelativeDay::ThisWeekday(Weekday::Mon), anchor()), d(1, 20));
    }

    #[test]
    fn next_weekday_lands_in_the_following_week() {
        assert_eq!(resolve_relative(RelativeDay::NextWeekday(Weekday::Mon), anchor()), d(1, 20));
        assert_eq!(resolve_relative(RelativeDay::NextWeekday(Weekday::Fri), anchor()), d(1, 24));

        let sunday = d(1, 19);
        assert_eq!(resolve_relative(RelativeDay::NextWeekday(Weekday::Mon), sunday), d(1, 20));
    }

    #[test]
    fn every_relative_keyword_except_today_is_strictly_future() {
        let weekdays = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ];
        for offset in 0..14 {
            let anchor = anchor() + Duration::days(offset);
            let mut days = vec![RelativeDay::Tomorrow, RelativeDay::DayAfterTomorrow];
            for w in weekdays {
                days.push(RelativeDay::ThisWeekday(w));
                days.push(RelativeDay::NextWeekday(w));
            }
            for day in days {
                assert!(resolve_relative(day, anchor) > anchor, "{:?} from {}", day, anchor);
            }
        }
    }

    #[test]
    fn year_rolls_over_for_past_month_day() {
        assert_eq!(infer_year(3, 1, anchor()), Some(d(3, 1)));
        assert_eq!(infer_year(1, 15, anchor()), Some(anchor()));
        assert_eq!(infer_year(1, 10, anchor()), NaiveDate::from_ymd_opt(2026, 1, 10));
        assert_eq!(infer_year(2, 30, anchor()), None);
    }

    #[test]
    fn meridiem_conversion() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0);
        assert_eq!(to_24h(Some(Meridiem::Pm), 2, 30), t(14, 30));
        assert_eq!(to_24h(Some(Meridiem::Pm), 12, 0), t(12, 0));
        assert_eq!(to_24h(Some(Meridiem::Am), 12, 0), t(0, 0));
        assert_eq!(to_24h(Some(Meridiem::Am), 9, 15), t(9, 15));
        assert_eq!(to_24h(Some(Meridiem::Pm), 13, 0), None);
        assert_eq!(to_24h(None, 24, 0), None);
        assert_eq!(to_24h(None, 10, 60), None);
    }
}
