use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use nom::{
    bytes::complete::take_while_m_n,
    character::complete::{anychar, space0},
    combinator::map_res,
    multi::count,
    sequence::preceded,
    IResult,
};
use thiserror::Error;

use crate::record::{
    End, Header, Modification, Program, Sign, Text, MAX_FIELD_NIBBLES, MAX_TEXT_BYTES,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    #[error("unknown record type {0:?}")]
    UnknownRecord(char),
    #[error("duplicate header record")]
    DuplicateHeader,
    #[error("record appears before the header record")]
    MissingHeader,
    #[error("record appears after the end record")]
    AfterEnd,
    #[error("duplicate end record")]
    DuplicateEnd,
    #[error("malformed {0} field")]
    BadField(&'static str),
    #[error("unexpected trailing text {0:?}")]
    TrailingText(String),
    #[error("byte count {0} is not between 1 and 32")]
    BadByteCount(u32),
    #[error("expected {expected} hex digits of object code, found {found}")]
    ByteCountMismatch { expected: usize, found: usize },
    #[error("field length of {0} nibbles is not between 1 and 8")]
    BadFieldLength(u32),
    #[error("invalid modification sign {0:?}")]
    BadSign(char),
    #[error("reference to external symbol {0}")]
    ExternalReference(String),
    #[error("text record at {address:0>6X} overlaps the one at {earlier:0>6X}")]
    OverlappingText { address: u32, earlier: u32 },
    #[error("{what} at {address:0>6X} lies outside the program")]
    OutOfRange { what: &'static str, address: u32 },
    #[error("out of memory growing record storage")]
    OutOfMemory,
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("couldn't read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {kind}")]
    Record { line: usize, kind: RecordError },
    #[error("no header record")]
    MissingHeader,
    #[error("no end record")]
    MissingEnd,
    #[error("text spans {low:0>6X}..{high:0>6X} fall outside program {start:0>6X}..{end:0>6X}")]
    TextOutsideProgram {
        low: u32,
        high: u32,
        start: u32,
        end: u32,
    },
}

fn hex_digits(digits: usize) -> impl FnMut(&str) -> IResult<&str, u32> {
    move |i| {
        map_res(
            take_while_m_n(digits, digits, |c: char| c.is_ascii_hexdigit()),
            |s| u32::from_str_radix(s, 16),
        )(i)
    }
}

fn hex_byte(i: &str) -> IResult<&str, u8> {
    map_res(
        take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
        |s| u8::from_str_radix(s, 16),
    )(i)
}

fn program_name(i: &str) -> IResult<&str, &str> {
    take_while_m_n(1, 6, |c: char| c.is_ascii_graphic())(i)
}

// Runs one nom parser over a field, naming the field if it fails.
fn field<'a, O>(
    i: &'a str,
    name: &'static str,
    mut parser: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> Result<(&'a str, O), RecordError> {
    parser(i).map_err(|_| RecordError::BadField(name))
}

fn finish(i: &str) -> Result<(), RecordError> {
    let rest = i.trim();
    if rest.is_empty() {
        Ok(())
    } else {
        Err(RecordError::TrailingText(rest.to_owned()))
    }
}

fn header(i: &str) -> Result<Header, RecordError> {
    let (i, name) = field(i, "program name", program_name)?;
    let (i, start_address) = field(i, "start address", preceded(space0, hex_digits(6)))?;
    let (i, length) = field(i, "program length", preceded(space0, hex_digits(6)))?;
    finish(i)?;

    Ok(Header {
        name: name.to_owned(),
        start_address,
        length,
    })
}

fn text(i: &str) -> Result<Text, RecordError> {
    let (i, address) = field(i, "address", hex_digits(6))?;
    let (i, len) = field(i, "byte count", hex_digits(2))?;
    if len == 0 || len as usize > MAX_TEXT_BYTES {
        return Err(RecordError::BadByteCount(len));
    }

    let expected = len as usize * 2;
    let found = i.chars().count();
    if found != expected {
        return Err(RecordError::ByteCountMismatch { expected, found });
    }
    let (_, data) = field(i, "object code", count(hex_byte, len as usize))?;

    Ok(Text { address, data })
}

fn modification(i: &str, program_name: &str) -> Result<Modification, RecordError> {
    let (i, address) = field(i, "address", hex_digits(6))?;
    let (i, nibbles) = field(i, "field length", hex_digits(2))?;
    let (i, sign) = field(i, "sign", anychar)?;
    let sign = Sign::from_char(sign).ok_or(RecordError::BadSign(sign))?;
    if nibbles == 0 || nibbles > MAX_FIELD_NIBBLES as u32 {
        return Err(RecordError::BadFieldLength(nibbles));
    }

    // SIC/XE assemblers name the program itself for internal relocation.
    let symbol = i.trim();
    if !symbol.is_empty() && symbol != program_name {
        return Err(RecordError::ExternalReference(symbol.to_owned()));
    }

    Ok(Modification {
        address,
        nibbles: nibbles as u8,
        sign,
    })
}

fn end(i: &str) -> Result<End, RecordError> {
    let (i, first_address) = field(i, "execution address", hex_digits(6))?;
    finish(i)?;

    Ok(End { first_address })
}

#[derive(Debug, Default)]
struct ProgramBuilder {
    header: Option<Header>,
    text: Vec<Text>,
    modifications: Vec<Modification>,
    end: Option<End>,
    text_span: Option<(u32, u32)>,
}

impl ProgramBuilder {
    fn new() -> Self {
        Self::default()
    }

    // Text and modification records need a header before them and no end.
    fn body_header(&self) -> Result<&Header, RecordError> {
        let header = self.header.as_ref().ok_or(RecordError::MissingHeader)?;
        if self.end.is_some() {
            return Err(RecordError::AfterEnd);
        }
        Ok(header)
    }

    fn record(&mut self, line: &str) -> Result<(), RecordError> {
        let mut chars = line.chars();
        let Some(tag) = chars.next() else {
            return Ok(());
        };
        let fields = chars.as_str().trim_start_matches(|c: char| c == ' ' || c == '\t');

        match tag {
            'H' => {
                if self.header.is_some() {
                    return Err(RecordError::DuplicateHeader);
                }
                self.header = Some(header(fields)?);
            }
            'T' => {
                let header = self.body_header()?;
                let text = text(fields)?;
                if !header.contains_span(text.address, text.len() as u32) {
                    return Err(RecordError::OutOfRange {
                        what: "text record",
                        address: text.address,
                    });
                }

                let high = text.address.saturating_add(text.len() as u32);
                if let Some(earlier) = self.text.iter().find(|earlier| {
                    text.address < earlier.address.saturating_add(earlier.len() as u32)
                        && earlier.address < high
                }) {
                    return Err(RecordError::OverlappingText {
                        address: text.address,
                        earlier: earlier.address,
                    });
                }
                self.text_span = Some(match self.text_span {
                    Some((low, top)) => (low.min(text.address), top.max(high)),
                    None => (text.address, high),
                });
                self.text
                    .try_reserve(1)
                    .map_err(|_| RecordError::OutOfMemory)?;
                self.text.push(text);
            }
            'M' => {
                let header = self.body_header()?;
                let modification = modification(fields, &header.name)?;
                if !header.contains(modification.address) {
                    return Err(RecordError::OutOfRange {
                        what: "modification",
                        address: modification.address,
                    });
                }

                self.modifications
                    .try_reserve(1)
                    .map_err(|_| RecordError::OutOfMemory)?;
                self.modifications.push(modification);
            }
            'E' => {
                let header = self.header.as_ref().ok_or(RecordError::MissingHeader)?;
                if self.end.is_some() {
                    return Err(RecordError::DuplicateEnd);
                }
                let end = end(fields)?;
                if !header.contains(end.first_address) {
                    return Err(RecordError::OutOfRange {
                        what: "execution address",
                        address: end.first_address,
                    });
                }
                self.end = Some(end);
            }
            unknown => return Err(RecordError::UnknownRecord(unknown)),
        }

        Ok(())
    }

    fn build(self) -> Result<Program, ParseError> {
        let header = self.header.ok_or(ParseError::MissingHeader)?;
        let end = self.end.ok_or(ParseError::MissingEnd)?;

        // Each record was checked on its own; check the whole span too.
        if let Some((low, high)) = self.text_span {
            if header.length > 0 && (low < header.start_address || high > header.end_address()) {
                return Err(ParseError::TextOutsideProgram {
                    low,
                    high,
                    start: header.start_address,
                    end: header.end_address(),
                });
            }
        }

        Ok(Program {
            header,
            text: self.text,
            modifications: self.modifications,
            end,
        })
    }
}

/// Parse the text of an object program. Nothing is returned unless every
/// record is well formed and in order.
pub fn parse_program(program_text: &str) -> Result<Program, ParseError> {
    let mut builder = ProgramBuilder::new();
    for (line_no, line) in program_text.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        builder
            .record(line)
            .map_err(|kind| ParseError::Record {
                line: line_no + 1,
                kind,
            })?;
    }

    let program = builder.build()?;
    debug!(
        "parsed {}: start {:0>6X} length {:0>6X}, {} text and {} modification records",
        program.header.name,
        program.header.start_address,
        program.header.length,
        program.text.len(),
        program.modifications.len()
    );

    Ok(program)
}

pub fn parse_file(path: impl AsRef<Path>) -> Result<Program, ParseError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_program(&content)
}
