use std::fmt::{Display, Write};

use thiserror::Error;

pub const MAX_TEXT_BYTES: usize = 32;
pub const MAX_FIELD_NIBBLES: u8 = 8;
pub const MAX_RECORD_ADDRESS: u32 = 0xFF_FF_FF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub start_address: u32,
    pub length: u32,
}

impl Header {
    /// The address one past the last byte of the program.
    pub fn end_address(&self) -> u32 {
        self.start_address.saturating_add(self.length)
    }

    /// Whether `[address, address + len)` lies inside the program. Programs
    /// that declare a length of zero don't constrain anything.
    pub fn contains_span(&self, address: u32, len: u32) -> bool {
        if self.length == 0 {
            return true;
        }
        address >= self.start_address && address.saturating_add(len) <= self.end_address()
    }

    pub fn contains(&self, address: u32) -> bool {
        self.length == 0 || (address >= self.start_address && address < self.end_address())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text {
    pub address: u32,
    pub data: Vec<u8>,
}

impl Text {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Add,
    Subtract,
}

impl Sign {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Sign::Add),
            '-' => Some(Sign::Subtract),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modification {
    pub address: u32,
    pub nibbles: u8,
    pub sign: Sign,
}

impl Modification {
    /// Number of bytes the field touches, an odd nibble count starts
    /// halfway into the first byte.
    pub fn byte_count(&self) -> usize {
        (self.nibbles as usize + 1) / 2
    }

    pub fn bits(&self) -> u32 {
        self.nibbles as u32 * 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct End {
    pub first_address: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub header: Header,
    pub text: Vec<Text>,
    pub modifications: Vec<Modification>,
    pub end: End,
}

impl Display for Text {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{:0>6X}{:0>2X}", self.address, self.data.len())?;
        for byte in &self.data {
            write!(f, "{:0>2X}", byte)?;
        }

        Ok(())
    }
}

impl Display for End {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{:0>6X}", self.first_address)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EmitError {
    #[error("address {0:X} doesn't fit in six hex digits")]
    AddressTooWide(u32),
    #[error("text record at {address:0>6X} holds {len} bytes")]
    BadByteCount { address: u32, len: usize },
    #[error("formatting failed")]
    Format(#[from] std::fmt::Error),
}

/// Render the text and end records of a (relocated) program. Header and
/// modification records are consumed by the loader and not written back.
pub fn emit(program: &Program) -> Result<String, EmitError> {
    let mut emitted = String::new();

    for text in &program.text {
        if text.address > MAX_RECORD_ADDRESS {
            return Err(EmitError::AddressTooWide(text.address));
        }
        if text.is_empty() || text.len() > MAX_TEXT_BYTES {
            return Err(EmitError::BadByteCount {
                address: text.address,
                len: text.len(),
            });
        }
        writeln!(&mut emitted, "{}", text)?;
    }

    if program.end.first_address > MAX_RECORD_ADDRESS {
        return Err(EmitError::AddressTooWide(program.end.first_address));
    }
    writeln!(&mut emitted, "{}", program.end)?;

    Ok(emitted)
}
