//! Best-effort extraction of well-known fields from a flat-file payload.
//!
//! Bulk import uses these to label rows and seed the balance cache without
//! parsing the whole document. Missing fields are normal; a malformed
//! balance is an error the caller logs before moving on.

use std::str::FromStr;

use rust_decimal::Decimal;

/// Key holding the player's last known display name.
pub const NAME_FIELD: &str = "lastAccountName:";

/// Keys that may hold the player's balance, in lookup order.
pub const BALANCE_FIELDS: [&str; 2] = ["money:", "balance:"];

/// A balance field was present but did not hold a number.
#[derive(Debug, thiserror::Error)]
#[error("malformed balance {value:?}: {source}")]
pub struct FieldError {
    /// The raw value after quote stripping.
    pub value: String,
    /// Why it did not parse.
    #[source]
    pub source: rust_decimal::Error,
}

/// The player's display name, if the payload records one.
pub fn display_name(payload: &str) -> Option<String> {
    payload
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(NAME_FIELD))
        .map(clean_value)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
}

/// The player's balance, if the payload records one.
///
/// The first `money:` or `balance:` line with a non-empty value wins.
///
/// # Errors
///
/// Returns [`FieldError`] when that value is not a decimal number.
pub fn balance(payload: &str) -> Result<Option<Decimal>, FieldError> {
    let value = payload.lines().map(str::trim).find_map(|line| {
        BALANCE_FIELDS
            .iter()
            .find_map(|field| line.strip_prefix(field))
            .map(clean_value)
            .filter(|value| !value.is_empty())
    });

    let Some(value) = value else {
        return Ok(None);
    };
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map(Some)
        .map_err(|source| FieldError {
            value: value.to_owned(),
            source,
        })
}

fn clean_value(raw: &str) -> &str {
    raw.trim().trim_matches(['\'', '"']).trim()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reads_quoted_and_bare_names() {
        assert_eq!(display_name("lastAccountName: Steve\n").as_deref(), Some("Steve"));
        assert_eq!(display_name("x: 1\nlastAccountName: 'Alex'\n").as_deref(), Some("Alex"));
        assert_eq!(display_name("lastAccountName: \"\"\n"), None);
        assert_eq!(display_name("money: 5\n"), None);
    }

    #[test]
    fn reads_money_or_balance() {
        assert_eq!(balance("money: '1500.25'\n").unwrap(), Some(Decimal::new(150_025, 2)));
        assert_eq!(balance("balance: 42\n").unwrap(), Some(Decimal::from(42)));
        assert_eq!(balance("money: 1.5E3\n").unwrap(), Some(Decimal::from(1500)));
        assert_eq!(balance("homes:\n  a: 1\n").unwrap(), None);
    }

    #[test]
    fn empty_value_falls_through_to_next_line() {
        assert_eq!(balance("money:\nbalance: 7\n").unwrap(), Some(Decimal::from(7)));
    }

    #[test]
    fn malformed_balance_is_an_error() {
        let err = balance("money: lots\n").unwrap_err();
        assert_eq!(err.value, "lots");
    }
}
