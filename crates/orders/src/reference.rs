//! Human-readable order references (`YYYY/NNNN`).

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, ValueObject};

/// Format the reference of the next order of `year`.
///
/// `existing_count_for_year` is the number of orders already numbered in that
/// year; the new order gets `existing_count_for_year + 1`, zero-padded to four
/// digits. Past `9999` the field simply widens (`2024/10000`).
pub fn generate_reference(year: i32, existing_count_for_year: u64) -> String {
    format!("{year}/{:04}", successor(existing_count_for_year))
}

// Widened so that `u64::MAX` existing orders still has a successor.
fn successor(count: u64) -> u128 {
    u128::from(count) + 1
}

/// A parsed order reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderReference {
    raw: String,
    year: i32,
    sequence: u128,
}

impl OrderReference {
    /// Reference of the `existing_count_for_year + 1`-th order of `year`.
    pub fn next(year: i32, existing_count_for_year: u64) -> Self {
        Self {
            raw: generate_reference(year, existing_count_for_year),
            year,
            sequence: successor(existing_count_for_year),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let (year, sequence) = raw
            .split_once('/')
            .ok_or_else(|| DomainError::validation("order reference must look like YYYY/NNNN"))?;

        if year.len() != 4 || sequence.len() < 4 {
            return Err(DomainError::validation("order reference must look like YYYY/NNNN"));
        }
        if !year.bytes().chain(sequence.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation("order reference must be numeric"));
        }

        let year: i32 = year
            .parse()
            .map_err(|_| DomainError::validation("order reference year out of range"))?;
        let sequence: u128 = sequence
            .parse()
            .map_err(|_| DomainError::validation("order reference sequence out of range"))?;
        if sequence == 0 {
            return Err(DomainError::validation("order reference sequence starts at 1"));
        }

        Ok(Self {
            raw: raw.to_string(),
            year,
            sequence,
        })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// 1-based position of the order within its year.
    pub fn sequence(&self) -> u128 {
        self.sequence
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl ValueObject for OrderReference {}

impl core::fmt::Display for OrderReference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for OrderReference {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OrderReference {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderReference> for String {
    fn from(value: OrderReference) -> Self {
        value.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_order_of_the_year_is_0001() {
        assert_eq!(generate_reference(2024, 0), "2024/0001");
    }

    #[test]
    fn sequence_is_count_plus_one() {
        assert_eq!(generate_reference(2024, 41), "2024/0042");
        assert_eq!(generate_reference(2025, 998), "2025/0999");
    }

    #[test]
    fn widens_past_four_digits_without_error() {
        assert_eq!(generate_reference(2024, 9998), "2024/9999");
        assert_eq!(generate_reference(2024, 9999), "2024/10000");
    }

    #[test]
    fn largest_count_still_has_a_successor() {
        assert_eq!(generate_reference(2024, u64::MAX), "2024/18446744073709551616");

        let reference = OrderReference::next(2024, u64::MAX);
        assert_eq!(reference.sequence(), u128::from(u64::MAX) + 1);
        assert_eq!(OrderReference::parse(reference.as_str()).unwrap(), reference);
    }

    #[test]
    fn next_agrees_with_generate_reference() {
        let reference = OrderReference::next(2024, 41);
        assert_eq!(reference.as_str(), "2024/0042");
        assert_eq!(reference.year(), 2024);
        assert_eq!(reference.sequence(), 42);
    }

    #[test]
    fn parse_accepts_wide_sequences() {
        let reference = OrderReference::parse("2024/10000").unwrap();
        assert_eq!(reference.sequence(), 10_000);
    }

    #[test]
    fn parse_rejects_malformed_references() {
        for raw in ["", "2024", "2024-0001", "24/0001", "2024/001", "2024/00a1", "2024/0000"] {
            assert!(OrderReference::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        /// Property: the reference is `{year}/{count + 1}` zero-padded to 4 digits.
        #[test]
        fn reference_matches_padded_count(year in 1000i32..=9999, count in 0u64..100_000) {
            let reference = generate_reference(year, count);
            prop_assert_eq!(&reference, &format!("{}/{:04}", year, count + 1));

            let parsed = OrderReference::parse(&reference).unwrap();
            prop_assert_eq!(parsed.year(), year);
            prop_assert_eq!(parsed.sequence(), u128::from(count) + 1);
        }

        /// Property: generation is pure (same input, same output).
        #[test]
        fn generation_is_deterministic(year in 1000i32..=9999, count in 0u64..1_000_000) {
            prop_assert_eq!(generate_reference(year, count), generate_reference(year, count));
        }
    }
}
