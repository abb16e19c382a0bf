/// PETSCII conversion for on-disk names

use crate::error::{D64Error, Result};

/// Padding byte used for names shorter than their field (shifted space)
pub const PAD: u8 = 0xA0;

/// Length of a file or disk name field in bytes
pub const NAME_SIZE: usize = 16;

/// Convert one PETSCII byte to a display character
///
/// The printable range 0x20-0x5F matches ASCII closely enough for
/// names; anything outside it renders as `?`. This mapping is for
/// display only and is deliberately lossy.
pub fn to_char(byte: u8) -> char {
    match byte {
        0x20..=0x5F => byte as char,
        _ => '?',
    }
}

/// Convert a display character to its PETSCII byte, if representable
///
/// Lowercase ASCII letters are folded to uppercase, matching what a
/// C64 keyboard would have produced.
pub fn from_char(c: char) -> Option<u8> {
    match c {
        ' '..='_' => Some(c.to_ascii_uppercase() as u8),
        'a'..='z' => Some(c.to_ascii_uppercase() as u8),
        _ => None,
    }
}

/// Encode a name into a 16-byte, 0xA0-padded PETSCII field
pub fn encode_name(name: &str) -> Result<[u8; NAME_SIZE]> {
    let mut field = [PAD; NAME_SIZE];
    let mut len = 0;
    for c in name.chars() {
        if len >= NAME_SIZE {
            return Err(D64Error::invalid_filename(format!(
                "'{}' is longer than {} characters",
                name, NAME_SIZE
            )));
        }
        field[len] = from_char(c).ok_or_else(|| {
            D64Error::invalid_filename(format!("'{}' is not representable in PETSCII", c))
        })?;
        len += 1;
    }
    if len == 0 {
        return Err(D64Error::invalid_filename("name is empty"));
    }
    Ok(field)
}

/// Decode a 0xA0-padded PETSCII name field for display
pub fn name_to_string(field: &[u8]) -> String {
    field
        .iter()
        .take_while(|&&b| b != PAD)
        .map(|&b| to_char(b))
        .collect()
}
