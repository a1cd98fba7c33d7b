//! Monetary amounts
//!
//! Amounts arrive as free text ("$1,250.00", "€ 99.9", "-15"). They are
//! cleaned of currency symbols, thousands separators and whitespace, parsed
//! into an exact [`Decimal`] and normalised to [`SCALE`] fractional digits
//! with half-up rounding.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{LedgerError, Result};

/// Number of fractional digits every stored amount carries
pub const SCALE: u32 = 2;

const CURRENCY_SYMBOLS: [char; 4] = ['$', '€', '£', '¥'];

/// Strip currency symbols, thousands separators and whitespace.
pub fn clean_amount(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && !CURRENCY_SYMBOLS.contains(c))
        .collect()
}

/// Parse a raw amount into a decimal with exactly two fractional digits.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let cleaned = clean_amount(raw);
    if cleaned.is_empty() {
        return Err(LedgerError::Empty);
    }

    let value = Decimal::from_str(&cleaned).map_err(|e| LedgerError::InvalidAmount {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;

    Ok(round_money(value))
}

/// Round half-up (away from zero on ties) and pad to two fractional digits.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(SCALE);
    rounded
}

/// Monthly interest on `balance` for an annual `rate`.
///
/// Non-positive balances earn nothing.
pub fn monthly_interest(balance: Decimal, annual_rate: Decimal) -> Decimal {
    if balance <= Decimal::ZERO {
        return round_money(Decimal::ZERO);
    }
    round_money(balance * annual_rate / Decimal::from(12))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_clean_amount_strips_decorations() {
        assert_eq!(clean_amount("$1,250.00"), "1250.00");
        assert_eq!(clean_amount(" € 99.9 "), "99.9");
        assert_eq!(clean_amount("£-15"), "-15");
        assert_eq!(clean_amount("¥1 000"), "1000");
    }

    #[test]
    fn test_parse_amount_scales_to_cents() {
        let amount = parse_amount("1000").unwrap();
        assert_eq!(amount.scale(), 2);
        assert_eq!(amount.to_string(), "1000.00");

        assert_eq!(parse_amount("2.005").unwrap().to_string(), "2.01");
        assert_eq!(parse_amount("-2.005").unwrap().to_string(), "-2.01");
        assert_eq!(parse_amount("2.004").unwrap().to_string(), "2.00");
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert_eq!(parse_amount("  "), Err(LedgerError::Empty));
        assert!(matches!(
            parse_amount("12abc"),
            Err(LedgerError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_monthly_interest() {
        assert_eq!(monthly_interest(dec("1000.00"), dec("0.025")), dec("2.08"));
        assert_eq!(monthly_interest(dec("1200.00"), dec("0.01")), dec("1.00"));
        assert_eq!(monthly_interest(dec("-50.00"), dec("0.035")), dec("0.00"));
        assert_eq!(monthly_interest(dec("0.00"), dec("0.035")), dec("0.00"));
    }

    proptest! {
        #[test]
        fn prop_rounded_amounts_have_two_places(units in -10_000_000i64..10_000_000, frac in 0u32..100_000) {
            let raw = format!("{units}.{frac:05}");
            let amount = parse_amount(&raw).unwrap();
            prop_assert_eq!(amount.scale(), SCALE);
            let diff = (amount - Decimal::from_str(&raw).unwrap()).abs();
            prop_assert!(diff <= dec("0.005"));
        }

        #[test]
        fn prop_currency_decoration_does_not_change_value(cents in 0i64..1_000_000_000) {
            let plain = Decimal::new(cents, 2);
            let decorated = format!("${}", plain);
            prop_assert_eq!(parse_amount(&decorated).unwrap(), plain);
        }

        #[test]
        fn prop_interest_never_negative(cents in -10_000_000i64..1_000_000_000, bp in 0i64..1000) {
            let balance = Decimal::new(cents, 2);
            let rate = Decimal::new(bp, 4);
            let interest = monthly_interest(balance, rate);
            prop_assert!(interest >= Decimal::ZERO);
            prop_assert_eq!(interest.scale(), SCALE);
        }
    }
}
