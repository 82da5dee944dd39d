use std::path::Path;

use anyhow::{Context, Result};
use libsic::{emit, parse_file, relocate, Machine};
use log::info;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressError {
    #[error("empty address")]
    Empty,
    #[error("invalid hex address {0:?}")]
    Invalid(String),
}

/// Parse a hex load address. Surrounding whitespace and a `0x` prefix are
/// allowed.
pub fn parse_hex_address(arg: &str) -> Result<u32, AddressError> {
    let trimmed = arg.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(AddressError::Empty);
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AddressError::Invalid(arg.to_owned()));
    }

    u32::from_str_radix(digits, 16).map_err(|_| AddressError::Invalid(arg.to_owned()))
}

/// Load the object program at `path`, relocate it to `address` and return
/// the text and end records to write out.
///
/// # Errors
///
/// If the file can't be read or parsed, or the program can't be relocated
/// for `machine`.
pub fn run(path: impl AsRef<Path>, address: u32, machine: Machine) -> Result<String> {
    let path = path.as_ref();
    let mut program =
        parse_file(path).with_context(|| format!("Failed to parse {}", path.display()))?;
    info!(
        "loaded {} with {} text records",
        program.header.name,
        program.text.len()
    );

    relocate(&mut program, address, machine).with_context(|| {
        format!(
            "Failed to relocate {} to {:0>6X}",
            program.header.name, address
        )
    })?;

    emit(&program).context("Failed to write relocated records")
}
