use log::{debug, trace};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::{
    memory::{Memory, MemoryError},
    record::{Modification, Program, Sign},
};

pub const SIC_MEMORY_SIZE: usize = 1 << 15;
pub const SIC_XE_MEMORY_SIZE: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum Machine {
    #[strum(serialize = "SIC")]
    Sic,
    #[strum(serialize = "SICXE")]
    SicXe,
}

impl Machine {
    pub fn address_bits(self) -> u32 {
        match self {
            Machine::Sic => 24,
            Machine::SicXe => 20,
        }
    }

    pub fn address_mask(self) -> u32 {
        (1 << self.address_bits()) - 1
    }

    pub fn memory_size(self) -> usize {
        match self {
            Machine::Sic => SIC_MEMORY_SIZE,
            Machine::SicXe => SIC_XE_MEMORY_SIZE,
        }
    }

    /// Widest modification field the machine has a use for: one word on
    /// SIC, 32 bits on SIC/XE.
    pub fn max_field_nibbles(self) -> u8 {
        match self {
            Machine::Sic => 6,
            Machine::SicXe => 8,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RelocError {
    #[error("{what} {address:X} doesn't fit in {bits} address bits")]
    AddressOutOfRange {
        what: &'static str,
        address: u32,
        bits: u32,
    },
    #[error("modification at {address:0>6X} is {nibbles} nibbles wide, {machine} allows 1 to {max}")]
    BadFieldLength {
        address: u32,
        nibbles: u8,
        machine: Machine,
        max: u8,
    },
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

// Two's complement reinterpretation then masking is arithmetic mod 2^bits.
fn wrap(value: i64, mask: u64) -> u64 {
    (value as u64) & mask
}

/// Add or subtract `delta` to the field a modification record describes.
/// The field is the low `nibbles * 4` bits of the bytes it spans, so an odd
/// nibble count leaves the high nibble of the first byte alone. `base` is
/// the address staged at offset zero of `memory`.
fn patch(
    memory: &mut Memory,
    base: u32,
    modification: &Modification,
    delta: i64,
) -> Result<(), RelocError> {
    let len = modification.byte_count();
    let offset = modification.address - base;
    let word = memory
        .read_bytes(offset, len)?
        .iter()
        .fold(0u64, |word, byte| (word << 8) | *byte as u64);

    let mask = (1u64 << modification.bits()) - 1;
    let field = (word & mask) as i64;
    let patched = match modification.sign {
        Sign::Add => wrap(field.wrapping_add(delta), mask),
        Sign::Subtract => wrap(field.wrapping_sub(delta), mask),
    };
    let word = (word & !mask) | patched;

    trace!(
        "patch {:0>6X} ({} nibbles): {:X} -> {:X}",
        modification.address,
        modification.nibbles,
        field,
        patched
    );

    memory.write_bytes(offset, &word.to_be_bytes()[8 - len..])?;
    Ok(())
}

// Whether every byte of the field lies in some text record.
fn covered(program: &Program, modification: &Modification) -> bool {
    let start = modification.address as u64;
    (start..start + modification.byte_count() as u64).all(|address| {
        program.text.iter().any(|text| {
            let low = text.address as u64;
            address >= low && address < low + text.len() as u64
        })
    })
}

fn check_address(what: &'static str, address: u32, machine: Machine) -> Result<(), RelocError> {
    if address > machine.address_mask() {
        return Err(RelocError::AddressOutOfRange {
            what,
            address,
            bits: machine.address_bits(),
        });
    }
    Ok(())
}

/// Relocate `program` so that it starts at `target`.
///
/// Text is staged into a scratch memory relative to the lowest address the
/// program touches, every modification is applied there, and the patched bytes are copied back with
/// their addresses shifted. Modification addresses are shifted as well, so a
/// relocated program can be relocated again.
///
/// # Errors
///
/// If the target or start address is too wide for the machine, a
/// modification field is too wide, or the records span more than the
/// machine's memory. `program` is left untouched on error.
pub fn relocate(program: &mut Program, target: u32, machine: Machine) -> Result<(), RelocError> {
    check_address("target address", target, machine)?;
    check_address("start address", program.header.start_address, machine)?;
    let max = machine.max_field_nibbles();
    if let Some(m) = program
        .modifications
        .iter()
        .find(|m| m.nibbles == 0 || m.nibbles > max)
    {
        return Err(RelocError::BadFieldLength {
            address: m.address,
            nibbles: m.nibbles,
            machine,
            max,
        });
    }

    let delta = target as i64 - program.header.start_address as i64;
    debug!(
        "relocating {} for {} from {:0>6X} to {:0>6X}, delta {}",
        program.header.name, machine, program.header.start_address, target, delta
    );

    // Stage relative to the lowest address the program touches, so a program
    // fits whenever its extent does, wherever it was last loaded.
    let base = program
        .text
        .iter()
        .map(|text| text.address)
        .chain(program.modifications.iter().map(|m| m.address))
        .fold(program.header.start_address, u32::min);

    let mut memory = Memory::new(machine.memory_size());
    for text in &program.text {
        memory.write_bytes(text.address - base, &text.data)?;
    }
    for modification in &program.modifications {
        if !covered(program, modification) {
            debug!(
                "modification at {:0>6X} ({} nibbles) isn't fully covered by text",
                modification.address, modification.nibbles
            );
        }
        patch(&mut memory, base, modification, delta)?;
    }
    let patched = program
        .text
        .iter()
        .map(|text| {
            memory
                .read_bytes(text.address - base, text.len())
                .map(<[u8]>::to_vec)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mask = machine.address_mask() as u64;
    let shift = |address: u32| wrap(address as i64 + delta, mask) as u32;

    for (text, data) in program.text.iter_mut().zip(patched) {
        text.address = shift(text.address);
        text.data = data;
    }
    for modification in program.modifications.iter_mut() {
        modification.address = shift(modification.address);
    }
    program.header.start_address = target;
    program.end.first_address = shift(program.end.first_address);

    Ok(())
}

pub fn relocate_sic(program: &mut Program, target: u32) -> Result<(), RelocError> {
    relocate(program, target, Machine::Sic)
}

pub fn relocate_sic_xe(program: &mut Program, target: u32) -> Result<(), RelocError> {
    relocate(program, target, Machine::SicXe)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;
    use crate::record::{End, Header, Text};

    fn program(data: Vec<u8>, modifications: Vec<Modification>) -> Program {
        Program {
            header: Header {
                name: "TEST".to_owned(),
                start_address: 0x100,
                length: data.len() as u32,
            },
            text: vec![Text {
                address: 0x100,
                data,
            }],
            modifications,
            end: End {
                first_address: 0x100,
            },
        }
    }

    fn m(address: u32, nibbles: u8, sign: Sign) -> Modification {
        Modification {
            address,
            nibbles,
            sign,
        }
    }

    #[test]
    fn machine_names() {
        assert_eq!(Machine::from_str("SIC").unwrap(), Machine::Sic);
        assert_eq!(Machine::from_str("SICXE").unwrap(), Machine::SicXe);
        assert!(Machine::from_str("XE").is_err());
        assert_eq!(Machine::SicXe.to_string(), "SICXE");
        assert_eq!(Machine::Sic.address_mask(), 0xFF_FF_FF);
        assert_eq!(Machine::SicXe.address_mask(), 0x0F_FF_FF);
    }

    #[test]
    fn odd_fields_keep_high_nibble() {
        let mut program = program(
            vec![0x4B, 0xF1, 0x01, 0x16],
            vec![m(0x101, 5, Sign::Add)],
        );
        relocate_sic_xe(&mut program, 0x5100).unwrap();

        assert_eq!(program.text[0].address, 0x5100);
        assert_eq!(program.text[0].data, [0x4B, 0xF1, 0x51, 0x16]);
    }

    #[test]
    fn fields_wrap_at_their_width() {
        // 0xFFF + 1 wraps to 0x000 without carrying into the opcode nibble
        let mut program = program(vec![0x3C, 0xAF, 0xFF], vec![m(0x101, 3, Sign::Add)]);
        relocate_sic(&mut program, 0x101).unwrap();
        assert_eq!(program.text[0].data, [0x3C, 0xA0, 0x00]);
    }

    #[test]
    fn subtract_and_negative_delta() {
        let mut program = program(
            vec![0x00, 0x10, 0x00, 0x00, 0x01, 0x20],
            vec![m(0x100, 6, Sign::Subtract), m(0x104, 4, Sign::Add)],
        );
        relocate_sic(&mut program, 0x080).unwrap();

        // delta is -0x80
        assert_eq!(program.text[0].data, [0x00, 0x10, 0x80, 0x00, 0x00, 0xA0]);
        assert_eq!(program.text[0].address, 0x080);
        assert_eq!(program.modifications[0].address, 0x080);
        assert_eq!(program.modifications[1].address, 0x084);
        assert_eq!(program.end.first_address, 0x080);
        assert_eq!(program.header.start_address, 0x080);
    }

    #[test]
    fn full_width_fields() {
        let mut program = program(
            vec![0xFF, 0xFF, 0xFF, 0xFF],
            vec![m(0x100, 8, Sign::Add)],
        );
        relocate_sic_xe(&mut program, 0x102).unwrap();
        assert_eq!(program.text[0].data, [0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn addresses_wrap_at_machine_width() {
        let mut program = program(vec![0x00], vec![]);
        program.end.first_address = 0x100;
        program.text[0].address = 0x100;
        program.header.start_address = 0x200;
        relocate_sic_xe(&mut program, 0x0).unwrap();
        assert_eq!(program.text[0].address, 0x0F_FF_00);
        assert_eq!(program.end.first_address, 0x0F_FF_00);
    }

    #[test]
    fn rejects_wide_fields() {
        let mut original = program(vec![0; 4], vec![m(0x100, 7, Sign::Add)]);
        let mut relocated = original.clone();
        assert_eq!(
            relocate_sic(&mut relocated, 0x200),
            Err(RelocError::BadFieldLength {
                address: 0x100,
                nibbles: 7,
                machine: Machine::Sic,
                max: 6
            })
        );
        assert_eq!(relocated, original);

        assert!(relocate_sic_xe(&mut original, 0x200).is_ok());

        let mut zero = program(vec![0; 4], vec![m(0x100, 0, Sign::Add)]);
        assert!(matches!(
            relocate_sic_xe(&mut zero, 0x200),
            Err(RelocError::BadFieldLength { nibbles: 0, .. })
        ));
    }

    #[test]
    fn rejects_wide_addresses() {
        let mut program = program(vec![0], vec![]);
        assert_eq!(
            relocate_sic_xe(&mut program, 0x10_0000),
            Err(RelocError::AddressOutOfRange {
                what: "target address",
                address: 0x10_0000,
                bits: 20
            })
        );
        assert!(relocate_sic(&mut program, 0x10_0000).is_ok());
    }

    #[test]
    fn high_programs_fit_small_memory() {
        let mut program = program(vec![0x00, 0x90, 0x10], vec![m(0x100, 6, Sign::Add)]);
        program.header.start_address = 0x9000;
        program.text[0].address = 0x9000;
        program.modifications[0].address = 0x9000;
        program.end.first_address = 0x9000;

        relocate_sic(&mut program, 0x2000).unwrap();
        assert_eq!(program.text[0].address, 0x2000);
        assert_eq!(program.text[0].data, [0x00, 0x20, 0x10]);
    }

    #[test]
    fn uncovered_fields() {
        let original = program(vec![0x00, 0x01, 0x02, 0x03], vec![m(0x110, 2, Sign::Add)]);
        assert!(!covered(&original, &original.modifications[0]));
        assert!(!covered(&original, &m(0x102, 6, Sign::Add)));
        assert!(covered(&original, &m(0x101, 6, Sign::Add)));

        let mut program = original.clone();
        relocate_sic(&mut program, 0x200).unwrap();
        assert_eq!(program.text[0].data, original.text[0].data);
        assert_eq!(program.text[0].address, 0x200);
        assert_eq!(program.modifications[0].address, 0x210);
    }

    #[test]
    fn out_of_memory_is_an_error() {
        // An unbounded program whose text spans more than 32K
        let mut original = program(vec![0x00, 0x10, 0x00], vec![m(0x100, 6, Sign::Add)]);
        original.header.length = 0;
        original.text.push(Text {
            address: 0x8100,
            data: vec![0x01],
        });
        let mut relocated = original.clone();

        assert!(matches!(
            relocate_sic(&mut relocated, 0x100),
            Err(RelocError::Memory(_))
        ));
        assert_eq!(relocated, original);
        assert!(relocate_sic_xe(&mut relocated, 0x100).is_ok());
    }
}
