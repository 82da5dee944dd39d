pub use memory::WordExt;
pub use parser::{parse_file, parse_program};
pub use record::{emit, Program};
pub use reloc::{relocate, relocate_sic, relocate_sic_xe, Machine};

pub mod memory;
pub mod parser;
pub mod record;
pub mod reloc;
