//! Canonical `SITE/YY/DISC/DD/OOO` identifier

use crate::constants::{DISCIPLINE_SEQ_WIDTH, OVERALL_SEQ_WIDTH};
use crate::error::{OpexError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9]+)/(\d{2})/([A-Za-z0-9]+)/(\d{2,})/(\d{3,})$")
        .expect("identifier pattern is valid")
});

/// Site and discipline codes are plain ASCII alphanumerics
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Build the identifier from its parts.
///
/// `year` is reduced to its last two digits. Sequences wider than their
/// padding are printed in full. Empty codes are a caller bug and panic.
pub fn format_identifier(
    site_code: &str,
    year: i32,
    discipline_code: &str,
    discipline_seq: u64,
    overall_seq: u64,
) -> String {
    assert!(!site_code.is_empty(), "site code must not be empty");
    assert!(!discipline_code.is_empty(), "discipline code must not be empty");

    format!(
        "{}/{:02}/{}/{:0dw$}/{:0ow$}",
        site_code,
        year.rem_euclid(100),
        discipline_code,
        discipline_seq,
        overall_seq,
        dw = DISCIPLINE_SEQ_WIDTH,
        ow = OVERALL_SEQ_WIDTH,
    )
}

/// Components of a parsed identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierParts {
    pub site_code: String,
    pub year_suffix: u8,
    pub discipline_code: String,
    pub discipline_seq: u64,
    pub overall_seq: u64,
}

/// Split an externally supplied identifier into its parts
pub fn parse_identifier(identifier: &str) -> Result<IdentifierParts> {
    let captures = IDENTIFIER_RE
        .captures(identifier.trim())
        .ok_or_else(|| OpexError::InvalidInput(format!("Malformed initiative identifier: '{}'", identifier)))?;

    let number = |idx: usize| -> Result<u64> {
        captures[idx]
            .parse::<u64>()
            .map_err(|e| OpexError::InvalidInput(format!("Identifier '{}' has bad number: {}", identifier, e)))
    };

    Ok(IdentifierParts {
        site_code: captures[1].to_string(),
        year_suffix: number(2)? as u8,
        discipline_code: captures[3].to_string(),
        discipline_seq: number(4)?,
        overall_seq: number(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_format() {
        assert_eq!(format_identifier("NDS", 2025, "OP", 3, 12), "NDS/25/OP/03/012");
    }

    #[test]
    fn test_year_suffix_keeps_leading_zero() {
        assert_eq!(format_identifier("HSD1", 2007, "EL", 1, 1), "HSD1/07/EL/01/001");
    }

    #[test]
    fn test_overflowing_sequences_print_in_full() {
        assert_eq!(format_identifier("DHJ", 2026, "ME", 123, 4567), "DHJ/26/ME/123/4567");
    }

    #[test]
    #[should_panic(expected = "site code")]
    fn test_empty_site_is_a_contract_violation() {
        format_identifier("", 2025, "OP", 1, 1);
    }

    #[test]
    fn test_parse_inverts_format() {
        let parts = parse_identifier("NDS/25/OP/03/012").unwrap();
        assert_eq!(parts.site_code, "NDS");
        assert_eq!(parts.year_suffix, 25);
        assert_eq!(parts.discipline_code, "OP");
        assert_eq!(parts.discipline_seq, 3);
        assert_eq!(parts.overall_seq, 12);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "NDS/25/OP/3/012", "NDS/2025/OP/03/012", "NDS-25-OP-03-012", "N S/25/OP/03/012"] {
            let err = parse_identifier(bad).unwrap_err();
            assert!(matches!(err, OpexError::InvalidInput(_)), "{} should be rejected", bad);
        }
    }
}
