use libsic::Machine;
use sicload::run;

fn program(name: &str) -> String {
    format!("{}/../libsic/programs/{}", env!("CARGO_MANIFEST_DIR"), name)
}

#[test]
fn test_relocate_copy() {
    let relocated = run(program("copy.ebj"), 0x2000, Machine::Sic).unwrap();

    assert_eq!(
        relocated,
        "T00200009142033483039002036\nT002020063C2003002027\nE002000\n"
    );
}

#[test]
fn test_relocate_xe() {
    let relocated = run(program("progxe.ebj"), 0x5000, Machine::SicXe).unwrap();

    insta::assert_snapshot!(relocated.trim_end(), @r###"
    T0050000E17202D4B10601603202677105018
    T00501803FFB007
    E005000
    "###);
}

#[test]
fn test_parse_failure() {
    let err = run(program("text_before_header.ebj"), 0x2000, Machine::Sic).unwrap_err();
    let message = format!("{:#}", err);

    assert!(message.starts_with("Failed to parse"));
    assert!(message.contains("line 1: record appears before the header record"));
}

#[test]
fn test_missing_file() {
    assert!(run(program("missing.ebj"), 0x2000, Machine::Sic).is_err());
}

#[test]
fn test_relocation_failure() {
    // Targets past 20 bits don't exist on SIC/XE
    let err = run(program("progxe.ebj"), 0x100000, Machine::SicXe).unwrap_err();

    assert!(format!("{:#}", err).starts_with("Failed to relocate PROGXE to 100000"));
}
