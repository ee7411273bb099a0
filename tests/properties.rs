use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use row_audit::{
    classify::ComparisonType,
    compare::{Tolerance, Verdict, compare},
    date_format::{DATE_PATTERNS, DateFormat, resolve},
};
use rust_decimal::Decimal;

fn instant() -> impl Strategy<Value = NaiveDateTime> {
    (1900i32..2100, 1u32..=12, 1u32..=28, 0u32..24, 0u32..60, 0u32..60).prop_map(
        |(year, month, day, hour, minute, second)| {
            NaiveDate::from_ymd_opt(year, month, day)
                .and_then(|date| date.and_hms_opt(hour, minute, second))
                .expect("valid instant")
        },
    )
}

proptest! {
    #[test]
    fn any_rendered_candidate_resolves_to_a_round_tripping_format(
        at in instant(),
        pattern_idx in 0usize..DATE_PATTERNS.len(),
    ) {
        let pattern = DateFormat::new(DATE_PATTERNS[pattern_idx].format).expect("known pattern");
        let sample = pattern.format(&at).expect("render sample");
        let resolved = resolve(&sample, None);
        prop_assert!(resolved.is_some(), "no format for {sample}");
        prop_assert!(resolved.expect("resolved").round_trips(&sample));
    }

    #[test]
    fn the_same_day_in_two_layouts_compares_equal(at in instant()) {
        let date = at.date().and_hms_opt(0, 0, 0).expect("midnight");
        let iso = DateFormat::new("%Y-%m-%d").expect("iso").format(&date).expect("iso text");
        let named = DateFormat::new("%d-%b-%Y").expect("named").format(&date).expect("named text");
        prop_assert_eq!(
            compare(ComparisonType::Date, Some(&iso), Some(&named), &Tolerance::default()),
            Verdict::Equal
        );
    }

    #[test]
    fn surrounding_whitespace_never_makes_text_unequal(
        text in "[A-Za-z][A-Za-z0-9]{0,11}",
        left in 0usize..4,
        right in 0usize..4,
    ) {
        let padded = format!("{}{text}{}", " ".repeat(left), " ".repeat(right));
        prop_assert_eq!(
            compare(ComparisonType::Character, Some(&padded), Some(&text), &Tolerance::default()),
            Verdict::Equal
        );
    }

    #[test]
    fn null_matches_empty_and_blank_for_every_type(
        spaces in 0usize..5,
        kind in prop_oneof![
            Just(ComparisonType::Numeric),
            Just(ComparisonType::Date),
            Just(ComparisonType::Character),
        ],
    ) {
        let blank = " ".repeat(spaces);
        prop_assert_eq!(compare(kind, None, Some(&blank), &Tolerance::default()), Verdict::Equal);
        prop_assert_eq!(compare(kind, Some(&blank), None, &Tolerance::default()), Verdict::Equal);
        prop_assert_eq!(compare(kind, None, Some("7"), &Tolerance::default()), Verdict::Unequal);
    }

    #[test]
    fn trailing_zeros_do_not_change_a_number(value in any::<i64>(), zeros in 1usize..6) {
        let plain = value.to_string();
        let scaled = format!("{value}.{}", "0".repeat(zeros));
        prop_assert_eq!(
            compare(ComparisonType::Numeric, Some(&plain), Some(&scaled), &Tolerance::default()),
            Verdict::Equal
        );
    }

    #[test]
    fn absolute_tolerance_is_symmetric(
        a in -1_000_000i64..1_000_000,
        b in -1_000_000i64..1_000_000,
        allowance in 0i64..10_000,
    ) {
        let tolerance = Tolerance::absolute(Decimal::new(allowance, 2));
        let (a, b) = (Decimal::new(a, 2), Decimal::new(b, 2));
        prop_assert_eq!(tolerance.within(a, b), tolerance.within(b, a));
        prop_assert_eq!(tolerance.within(a, b), (a - b).abs() <= tolerance.amount);
    }

    #[test]
    fn percentage_tolerance_boundary_is_relative_to_the_target(
        target_cents in 1i64..1_000_000,
        hundredths in 0i64..5_000,
    ) {
        let percent = Decimal::new(hundredths, 2);
        let tolerance = Tolerance::percent(percent);
        let target = Decimal::new(target_cents, 2);
        let edge = target + target * percent / Decimal::ONE_HUNDRED;
        let beyond = edge + Decimal::new(1, 2);
        let target_text = target.to_string();
        prop_assert_eq!(
            compare(ComparisonType::Numeric, Some(&target_text), Some(&edge.to_string()), &tolerance),
            Verdict::Equal
        );
        prop_assert_eq!(
            compare(ComparisonType::Numeric, Some(&target_text), Some(&beyond.to_string()), &tolerance),
            Verdict::Unequal
        );
    }
}
