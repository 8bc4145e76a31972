use std::fmt;

/// Quantities are whole units (meters of cable, routers, connectors).
/// Signed so that balances and debit contributions share one type.
pub type Quantity = i64;

/// Largest quantity a single movement may carry, and the largest balance
/// any `(subject, material)` key may reach. Keeps every fold over a
/// ledger, in memory or in SQL, far from `i64` overflow.
pub const MAX_QUANTITY: Quantity = 1_000_000_000_000;

/// Parse a quantity typed by a user or read from a spreadsheet cell.
/// Spreadsheets often hand integers back as floats, so an integral
/// decimal like "5.0" is accepted. Example: "12" -> 12, "12.00" -> 12
pub fn parse_quantity(input: &str) -> Result<Quantity, ParseQuantityError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseQuantityError::Empty);
    }

    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (input, ""),
    };

    if !fraction.chars().all(|c| c == '0') {
        return Err(ParseQuantityError::Fractional);
    }

    whole
        .parse::<Quantity>()
        .map_err(|_| ParseQuantityError::InvalidFormat)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseQuantityError {
    Empty,
    InvalidFormat,
    Fractional,
}

impl fmt::Display for ParseQuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseQuantityError::Empty => write!(f, "empty quantity"),
            ParseQuantityError::InvalidFormat => write!(f, "not a number"),
            ParseQuantityError::Fractional => write!(f, "quantity must be a whole number"),
        }
    }
}

impl std::error::Error for ParseQuantityError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("12"), Ok(12));
        assert_eq!(parse_quantity(" 7 "), Ok(7));
        assert_eq!(parse_quantity("5.0"), Ok(5));
        assert_eq!(parse_quantity("5.000"), Ok(5));
        assert_eq!(parse_quantity("-3"), Ok(-3));
        assert_eq!(parse_quantity("0"), Ok(0));
    }

    #[test]
    fn test_parse_quantity_invalid() {
        assert_eq!(parse_quantity(""), Err(ParseQuantityError::Empty));
        assert_eq!(parse_quantity("abc"), Err(ParseQuantityError::InvalidFormat));
        assert_eq!(parse_quantity("2.5"), Err(ParseQuantityError::Fractional));
        assert_eq!(parse_quantity("1.2.0"), Err(ParseQuantityError::Fractional));
    }
}
