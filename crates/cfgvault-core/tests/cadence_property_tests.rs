#![allow(clippy::unwrap_used, clippy::expect_used)]

// Cadence due checks over arbitrary success times and slots.

use cfgvault_core::{Cadence, CadenceKind, MonthDay, WeekdaySet};
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use proptest::prelude::*;

fn instant(secs: i64) -> DateTime<Utc> {
    // 2020-01-01 plus up to ten years
    Utc.timestamp_opt(1_577_836_800 + secs, 0).unwrap()
}

fn kind() -> impl Strategy<Value = CadenceKind> {
    prop_oneof![
        Just(CadenceKind::Daily),
        Just(CadenceKind::Weekly),
        Just(CadenceKind::Monthly),
    ]
}

fn slot() -> impl Strategy<Value = NaiveTime> {
    (0u32..24, 0u32..60).prop_map(|(h, m)| NaiveTime::from_hms_opt(h, m, 0).unwrap())
}

proptest! {
    #[test]
    fn prop_not_due_right_after_success(
        kind in kind(),
        at in slot(),
        last in 0i64..315_360_000,
    ) {
        let cadence = Cadence::new(kind, at);
        let last = instant(last);
        prop_assert!(!cadence.is_due(Some(last), last));
    }

    #[test]
    fn prop_due_stays_due_as_time_passes(
        kind in kind(),
        at in slot(),
        last in 0i64..315_360_000,
        gap in 0i64..5_000_000,
        later in 0i64..5_000_000,
    ) {
        let cadence = Cadence::new(kind, at);
        let last = instant(last);
        let now = last + Duration::seconds(gap);
        if cadence.is_due(Some(last), now) {
            prop_assert!(cadence.is_due(Some(last), now + Duration::seconds(later)));
        }
    }

    #[test]
    fn prop_daily_is_due_one_day_after_success(
        at in slot(),
        last in 0i64..315_360_000,
    ) {
        let cadence = Cadence::new(CadenceKind::Daily, at);
        let last = instant(last);
        prop_assert!(cadence.is_due(Some(last), last + Duration::days(1)));
    }

    #[test]
    fn prop_anchor_is_a_slot_within_one_day(
        at in slot(),
        t in 0i64..315_360_000,
    ) {
        let cadence = Cadence::new(CadenceKind::Daily, at);
        let t = instant(t);
        let anchor = cadence.anchor(t);
        prop_assert!(anchor <= t);
        prop_assert!(t - anchor < Duration::days(1));
        prop_assert_eq!(anchor.time(), at);
    }

    #[test]
    fn prop_monthly_next_due_lands_on_configured_day(
        day in 1u32..=31,
        at in slot(),
        last in 0i64..315_360_000,
    ) {
        let cadence = Cadence::new(CadenceKind::Monthly, at).with_month_day(MonthDay::Day(day));
        let next = cadence.next_due(Some(instant(last)), instant(last));
        prop_assert_eq!(next.time(), at);
        prop_assert_eq!(next.day(), MonthDay::Day(day).in_month(next.year(), next.month()));
    }

    #[test]
    fn prop_weekly_next_due_lands_on_configured_weekday(
        weekday in 0u8..7,
        at in slot(),
        last in 0i64..315_360_000,
    ) {
        let weekday = Weekday::try_from(weekday).unwrap();
        let cadence = Cadence::new(CadenceKind::Weekly, at).with_weekdays(WeekdaySet::single(weekday));
        let last = instant(last);
        let next = cadence.next_due(Some(last), last);
        prop_assert_eq!(next.weekday(), weekday);
        prop_assert!(next - last <= Duration::days(7));
    }
}
