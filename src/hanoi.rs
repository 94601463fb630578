//! pure function mapping (firstDay, sets, today) -> (dayNumber, suffixLetter).
//!
//! Tower-of-Hanoi rotation: the suffix for a given day is the letter
//! corresponding to the largest `i` in `0..=sets` such that
//! `day mod 2^i == 0`. `i = 0` always matches (`day mod 1 == 0`), so the
//! walk terminates.

use chrono::NaiveDate;

/// Result of a Hanoi rotation computation for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HanoiResult {
    pub day: i64,
    pub suffix: char,
}

/// Compute the Hanoi day number and suffix letter for `today`, given the
/// rotation started on `first_day` with `sets` generations. `sets == 0`
/// disables rotation: callers should check that before calling this, but
/// as a pure function it still returns a well-defined `(1, 'A')`-style
/// result for `sets == 0` (day 1, suffix 'A') since no caller should act on
/// a disabled-rotation suffix anyway.
pub fn rotate(first_day: NaiveDate, sets: u32, today: NaiveDate) -> HanoiResult {
    assert!(today >= first_day, "today must not precede first_day");
    let day = (today - first_day).num_days() + 1;

    let mut i = sets as i64;
    loop {
        let modulus = 1i64 << i;
        if day % modulus == 0 {
            let suffix = (b'A' + i as u8) as char;
            return HanoiResult { day, suffix };
        }
        if i == 0 {
            unreachable!("day % 1 == 0 always holds");
        }
        i -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn day_one_is_always_the_highest_suffix() {
        let r = rotate(d("2024-01-01"), 3, d("2024-01-01"));
        assert_eq!(r, HanoiResult { day: 1, suffix: 'A' });
    }

    #[test]
    fn day_two_is_b() {
        let r = rotate(d("2024-01-01"), 3, d("2024-01-02"));
        assert_eq!(r, HanoiResult { day: 2, suffix: 'B' });
    }

    #[test]
    fn day_eight_is_d() {
        let r = rotate(d("2024-01-01"), 3, d("2024-01-08"));
        assert_eq!(r, HanoiResult { day: 8, suffix: 'D' });
    }

    #[test]
    fn day_three_is_a_again() {
        // odd day, only i=0 divides it
        let r = rotate(d("2024-01-01"), 3, d("2024-01-03"));
        assert_eq!(r.suffix, 'A');
    }

    #[test]
    fn totality_suffix_is_within_range() {
        let first = d("2024-01-01");
        for offset in 0..200 {
            let today = first + chrono::Duration::days(offset);
            let r = rotate(first, 4, today);
            assert!(('A'..=(b'A' + 4) as char).contains(&r.suffix));
        }
    }

    #[test]
    fn frequency_over_one_cycle() {
        // Over 2^3 = 8 consecutive days, A appears 4 times, B 2, C 1, D 1.
        let first = d("2024-01-01");
        let mut counts = std::collections::HashMap::new();
        for offset in 0..8 {
            let today = first + chrono::Duration::days(offset);
            let r = rotate(first, 3, today);
            *counts.entry(r.suffix).or_insert(0) += 1;
        }
        assert_eq!(counts[&'A'], 4);
        assert_eq!(counts[&'B'], 2);
        assert_eq!(counts[&'C'], 1);
        assert_eq!(counts[&'D'], 1);
    }
}
