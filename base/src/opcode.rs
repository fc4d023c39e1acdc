//! MSCP and TMSCP opcodes, and the per-protocol table of command
//! attributes which the dispatcher validates against.
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::status::md;

/// Which of the two protocols a port speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    /// Mass Storage Control Protocol, for disks.
    Mscp,
    /// Tape Mass Storage Control Protocol.
    Tmscp,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            Protocol::Mscp => "MSCP",
            Protocol::Tmscp => "TMSCP",
        })
    }
}

/// Set in the opcode byte of every end message.
pub const OP_END: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Opcode {
    Abort,
    GetCommandStatus,
    GetUnitStatus,
    SetControllerCharacteristics,
    Available,
    Online,
    SetUnitCharacteristics,
    DetermineAccessPaths,
    Access,
    CompareControllerData,
    Erase,
    Flush,
    EraseGap,
    Compare,
    Read,
    Write,
    WriteTapeMark,
    Reposition,
    Format,
    /// Attention message: a unit has become available.
    AvailableAttention,
}

impl Opcode {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Opcode::Abort => 1,
            Opcode::GetCommandStatus => 2,
            Opcode::GetUnitStatus => 3,
            Opcode::SetControllerCharacteristics => 4,
            Opcode::Available => 8,
            Opcode::Online => 9,
            Opcode::SetUnitCharacteristics => 10,
            Opcode::DetermineAccessPaths => 11,
            Opcode::Access => 16,
            Opcode::CompareControllerData => 17,
            Opcode::Erase => 18,
            Opcode::Flush => 19,
            Opcode::EraseGap => 22,
            Opcode::Compare => 32,
            Opcode::Read => 33,
            Opcode::Write => 34,
            Opcode::WriteTapeMark => 36,
            Opcode::Reposition => 37,
            Opcode::Format => 47,
            Opcode::AvailableAttention => 64,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Opcode> {
        Some(match code {
            1 => Opcode::Abort,
            2 => Opcode::GetCommandStatus,
            3 => Opcode::GetUnitStatus,
            4 => Opcode::SetControllerCharacteristics,
            8 => Opcode::Available,
            9 => Opcode::Online,
            10 => Opcode::SetUnitCharacteristics,
            11 => Opcode::DetermineAccessPaths,
            16 => Opcode::Access,
            17 => Opcode::CompareControllerData,
            18 => Opcode::Erase,
            19 => Opcode::Flush,
            22 => Opcode::EraseGap,
            32 => Opcode::Compare,
            33 => Opcode::Read,
            34 => Opcode::Write,
            36 => Opcode::WriteTapeMark,
            37 => Opcode::Reposition,
            47 => Opcode::Format,
            64 => Opcode::AvailableAttention,
            _ => return None,
        })
    }

    /// The opcode byte of this command's end message.
    #[must_use]
    pub const fn end_code(self) -> u8 {
        self.code() | OP_END
    }

    /// Look up the attributes of this command for `protocol`.
    /// Returns `None` when the protocol does not implement it.
    #[must_use]
    pub fn attributes(self, protocol: Protocol) -> Option<CommandAttributes> {
        match protocol {
            Protocol::Mscp => disk_attributes(self),
            Protocol::Tmscp => tape_attributes(self),
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            Opcode::Abort => "ABORT",
            Opcode::GetCommandStatus => "GET COMMAND STATUS",
            Opcode::GetUnitStatus => "GET UNIT STATUS",
            Opcode::SetControllerCharacteristics => "SET CONTROLLER CHARACTERISTICS",
            Opcode::Available => "AVAILABLE",
            Opcode::Online => "ONLINE",
            Opcode::SetUnitCharacteristics => "SET UNIT CHARACTERISTICS",
            Opcode::DetermineAccessPaths => "DETERMINE ACCESS PATHS",
            Opcode::Access => "ACCESS",
            Opcode::CompareControllerData => "COMPARE CONTROLLER DATA",
            Opcode::Erase => "ERASE",
            Opcode::Flush => "FLUSH",
            Opcode::EraseGap => "ERASE GAP",
            Opcode::Compare => "COMPARE HOST DATA",
            Opcode::Read => "READ",
            Opcode::Write => "WRITE",
            Opcode::WriteTapeMark => "WRITE TAPE MARK",
            Opcode::Reposition => "REPOSITION",
            Opcode::Format => "FORMAT",
            Opcode::AvailableAttention => "AVAILABLE ATTENTION",
        })
    }
}

/// How the dispatcher must treat a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandAttributes {
    /// Modifier bits which are legal for this command.
    pub modifiers: u16,
    /// Sequential commands wait behind earlier work on the same unit.
    /// Immediate commands run on arrival.
    pub sequential: bool,
    /// The command moves data (and so has a working byte count that
    /// Get Command Status can report).
    pub transfer: bool,
    /// The command modifies the medium.
    pub write: bool,
}

const fn immediate(modifiers: u16) -> CommandAttributes {
    CommandAttributes {
        modifiers,
        sequential: false,
        transfer: false,
        write: false,
    }
}

const fn sequential(modifiers: u16) -> CommandAttributes {
    CommandAttributes {
        modifiers,
        sequential: true,
        transfer: false,
        write: false,
    }
}

const fn transfer(modifiers: u16, write: bool) -> CommandAttributes {
    CommandAttributes {
        modifiers,
        sequential: true,
        transfer: true,
        write,
    }
}

fn disk_attributes(op: Opcode) -> Option<CommandAttributes> {
    use md::*;
    let data = CSE | ERR | SEC | SER | EXP;
    Some(match op {
        Opcode::Abort => immediate(0),
        Opcode::GetCommandStatus => immediate(CSE),
        Opcode::GetUnitStatus => immediate(CSE | NXU),
        Opcode::SetControllerCharacteristics => immediate(CSE),
        Opcode::Available => sequential(CSE | EXA),
        Opcode::Online | Opcode::SetUnitCharacteristics => {
            sequential(CSE | EXA | SWP | IMF | RIP | SHD)
        }
        Opcode::DetermineAccessPaths | Opcode::CompareControllerData | Opcode::Flush => {
            sequential(CSE)
        }
        Opcode::Access | Opcode::Compare => transfer(data, false),
        Opcode::Read => transfer(data | CMP, false),
        Opcode::Erase => transfer(CSE | ERR | EXP, true),
        Opcode::Write => transfer(data | CMP, true),
        Opcode::EraseGap
        | Opcode::WriteTapeMark
        | Opcode::Reposition
        | Opcode::Format
        | Opcode::AvailableAttention => return None,
    })
}

fn tape_attributes(op: Opcode) -> Option<CommandAttributes> {
    use md::*;
    Some(match op {
        Opcode::Abort => immediate(0),
        Opcode::GetCommandStatus => immediate(CSE),
        Opcode::GetUnitStatus => immediate(CSE | NXU),
        Opcode::SetControllerCharacteristics => immediate(CSE),
        Opcode::Available => sequential(CSE | UNL | ACL),
        Opcode::Online | Opcode::SetUnitCharacteristics => sequential(CSE | EXA | SWP),
        Opcode::DetermineAccessPaths => sequential(CSE),
        Opcode::Flush => sequential(CSE | IMM),
        Opcode::Access | Opcode::Compare => transfer(CSE | REV | CDL | SCH, false),
        Opcode::Read => transfer(CSE | REV | CDL | CMP | SCH, false),
        Opcode::Write => transfer(CSE | CDL | CMP | ERW | IMM, true),
        Opcode::WriteTapeMark => transfer(CSE | CDL | ERW | IMM, true),
        Opcode::Erase | Opcode::EraseGap => transfer(CSE | CDL | IMM, true),
        Opcode::Reposition => transfer(CSE | CDL | REV | RWD | OBC | DLE | IMM | UNL, false),
        Opcode::CompareControllerData | Opcode::Format | Opcode::AvailableAttention => {
            return None
        }
    })
}

#[test]
fn test_code_round_trip() {
    for code in 0..=u8::MAX {
        if let Some(op) = Opcode::from_code(code) {
            assert_eq!(op.code(), code);
        }
    }
    assert_eq!(Opcode::from_code(0), None);
    assert_eq!(Opcode::from_code(OP_END | 33), None);
}

#[test]
fn test_disk_and_tape_tables_differ() {
    assert!(Opcode::Reposition.attributes(Protocol::Mscp).is_none());
    assert!(Opcode::Reposition.attributes(Protocol::Tmscp).is_some());
    assert!(Opcode::CompareControllerData
        .attributes(Protocol::Mscp)
        .is_some());
    assert!(Opcode::CompareControllerData
        .attributes(Protocol::Tmscp)
        .is_none());
    assert!(Opcode::Format.attributes(Protocol::Mscp).is_none());
}

#[test]
fn test_immediate_commands() {
    for protocol in [Protocol::Mscp, Protocol::Tmscp] {
        for op in [
            Opcode::Abort,
            Opcode::GetCommandStatus,
            Opcode::GetUnitStatus,
            Opcode::SetControllerCharacteristics,
        ] {
            let attr = op.attributes(protocol).expect("command should exist");
            assert!(!attr.sequential, "{op} should be immediate for {protocol}");
        }
        let read = Opcode::Read.attributes(protocol).expect("read should exist");
        assert!(read.sequential && read.transfer && !read.write);
    }
}

#[test]
fn test_next_unit_modifier_only_on_get_unit_status() {
    let gus = Opcode::GetUnitStatus
        .attributes(Protocol::Mscp)
        .expect("GUS should exist");
    assert_ne!(gus.modifiers & md::NXU, 0);
    let abo = Opcode::Abort
        .attributes(Protocol::Mscp)
        .expect("ABO should exist");
    assert_eq!(abo.modifiers, 0);
}

#[test]
fn test_write_attribute_marks_medium_changes() {
    let writers = |protocol: Protocol| -> Vec<Opcode> {
        (1..OP_END)
            .filter_map(Opcode::from_code)
            .filter(|op| op.attributes(protocol).is_some_and(|attr| attr.write))
            .collect()
    };
    assert_eq!(writers(Protocol::Mscp), vec![Opcode::Erase, Opcode::Write]);
    assert_eq!(
        writers(Protocol::Tmscp),
        vec![
            Opcode::Erase,
            Opcode::EraseGap,
            Opcode::Write,
            Opcode::WriteTapeMark
        ]
    );
}
