//! Useful helpers that don't really belong anywhere else.

use std::num::ParseIntError;

/// Parse a byte written either in hex ("0xC8") or decimal ("200")
///
/// Meant for use as a clap `value_parser`.
pub fn parse_u8(s: &str) -> Result<u8, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

/// Format bytes as space-separated hex, e.g. "c8 41"
pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn test_parse_u8() {
    assert_eq!(parse_u8("0xC8"), Ok(0xC8));
    assert_eq!(parse_u8("0X2c"), Ok(0x2C));
    assert_eq!(parse_u8("140"), Ok(0x8C));
    assert!(parse_u8("0x100").is_err());
    assert!(parse_u8("C8").is_err());
}

#[test]
fn test_hex_bytes() {
    assert_eq!(hex_bytes(&[0xC8, 0x41]), "c8 41");
    assert_eq!(hex_bytes(&[]), "");
}
