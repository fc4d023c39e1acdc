//! Status codes, end flags, modifiers, and the controller and unit
//! characteristic flags of MSCP and TMSCP.
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::layout::{invalid_field_subcode, CMD_MOD, CMD_OPC, RW_BCL, RW_LBNL, SCC_MSV};

const ST_V_SUB: u16 = 5;
const ST_M_MAJ: u16 = 0x1F;

/// The status word of an end message: a 5-bit major code and an
/// 11-bit sub-code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Status(u16);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const INVALID_COMMAND: Status = Status(1);
    pub const ABORTED: Status = Status(2);
    pub const OFFLINE: Status = Status(3);
    pub const AVAILABLE: Status = Status(4);
    pub const MEDIA_FORMAT_ERROR: Status = Status(5);
    pub const WRITE_PROTECTED: Status = Status(6);
    pub const COMPARE_ERROR: Status = Status(7);
    pub const DATA_ERROR: Status = Status(8);
    pub const HOST_BUFFER_ERROR: Status = Status(9);
    pub const CONTROLLER_ERROR: Status = Status(10);
    pub const DRIVE_ERROR: Status = Status(11);
    pub const FORMATTER_ERROR: Status = Status(12);
    pub const BOT_ENCOUNTERED: Status = Status(13);
    pub const TAPE_MARK: Status = Status(14);
    pub const RECORD_TRUNCATED: Status = Status(16);
    pub const POSITION_LOST: Status = Status(17);
    pub const SERIOUS_EXCEPTION: Status = Status(18);
    pub const LEOT_DETECTED: Status = Status(19);
    pub const BAD_BLOCK: Status = Status(20);
    pub const DIAGNOSTIC: Status = Status(31);

    // Success sub-codes.
    pub const UNLOAD_IGNORED: Status = Status::SUCCESS.with_sub(1);
    pub const ALREADY_ONLINE: Status = Status::SUCCESS.with_sub(8);
    pub const EOT_ENCOUNTERED: Status = Status::SUCCESS.with_sub(32);
    pub const READ_ONLY: Status = Status::SUCCESS.with_sub(128);

    // Offline sub-codes.
    pub const NO_VOLUME: Status = Status::OFFLINE.with_sub(1);
    pub const INOPERATIVE: Status = Status::OFFLINE.with_sub(2);

    // Available sub-codes.
    pub const IN_USE: Status = Status::AVAILABLE.with_sub(32);

    // Write protection sub-codes.
    pub const SOFTWARE_WRITE_LOCK: Status = Status::WRITE_PROTECTED.with_sub(128);
    pub const HARDWARE_WRITE_LOCK: Status = Status::WRITE_PROTECTED.with_sub(256);

    // Host buffer access sub-codes.
    pub const ODD_ADDRESS: Status = Status::HOST_BUFFER_ERROR.with_sub(1);
    pub const ODD_BYTE_COUNT: Status = Status::HOST_BUFFER_ERROR.with_sub(2);
    pub const NON_EXISTENT_MEMORY: Status = Status::HOST_BUFFER_ERROR.with_sub(3);

    // Data error sub-codes.
    pub const READ_ERROR: Status = Status::DATA_ERROR.with_sub(7);
    pub const UNREAD_DATA: Status = Status::RECORD_TRUNCATED.with_sub(1);

    // Invalid command sub-codes name the offending field.
    pub const INVALID_OPCODE: Status =
        Status(Status::INVALID_COMMAND.0 | invalid_field_subcode(CMD_OPC));
    pub const INVALID_FLAGS: Status =
        Status(Status::INVALID_COMMAND.0 | (invalid_field_subcode(CMD_OPC) + (1 << ST_V_SUB)));
    pub const INVALID_MODIFIERS: Status =
        Status(Status::INVALID_COMMAND.0 | invalid_field_subcode(CMD_MOD));
    pub const INVALID_BYTE_COUNT: Status =
        Status(Status::INVALID_COMMAND.0 | invalid_field_subcode(RW_BCL));
    pub const INVALID_LBN: Status =
        Status(Status::INVALID_COMMAND.0 | invalid_field_subcode(RW_LBNL));
    pub const INVALID_VERSION: Status =
        Status(Status::INVALID_COMMAND.0 | invalid_field_subcode(SCC_MSV));

    #[must_use]
    pub const fn from_bits(bits: u16) -> Status {
        Status(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Returns the same major code with the given sub-code.
    #[must_use]
    pub const fn with_sub(self, sub: u16) -> Status {
        Status((self.0 & ST_M_MAJ) | (sub << ST_V_SUB))
    }

    #[must_use]
    pub const fn major(self) -> Status {
        Status(self.0 & ST_M_MAJ)
    }

    #[must_use]
    pub const fn sub(self) -> u16 {
        self.0 >> ST_V_SUB
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 & ST_M_MAJ == 0
    }

    fn major_name(self) -> &'static str {
        match self.0 & ST_M_MAJ {
            0 => "success",
            1 => "invalid command",
            2 => "aborted",
            3 => "unit offline",
            4 => "unit available",
            5 => "media format error",
            6 => "write protected",
            7 => "compare error",
            8 => "data error",
            9 => "host buffer access error",
            10 => "controller error",
            11 => "drive error",
            12 => "formatter error",
            13 => "BOT encountered",
            14 => "tape mark encountered",
            16 => "record data truncated",
            17 => "position lost",
            18 => "serious exception",
            19 => "LEOT detected",
            20 => "bad block",
            31 => "diagnostic",
            _ => "unknown status",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        if self.sub() == 0 {
            f.write_str(self.major_name())
        } else {
            write!(f, "{} (sub-code {:o})", self.major_name(), self.sub())
        }
    }
}

/// Command modifier bits.  Several bits are shared between disk and
/// tape meanings; the attribute tables say which are legal where.
pub mod md {
    pub const EXP: u16 = 0x8000; // d: express request
    pub const CMP: u16 = 0x4000; // b: compare
    pub const CSE: u16 = 0x2000; // b: clear serious exception
    pub const ERR: u16 = 0x1000; // d: force error
    pub const CDL: u16 = 0x1000; // t: clear data lost
    pub const SCH: u16 = 0x0800; // t: suppress caching
    pub const SEC: u16 = 0x0200; // b: suppress error correction
    pub const SER: u16 = 0x0100; // b: suppress error recovery
    pub const DLE: u16 = 0x0080; // t: detect LEOT
    pub const IMM: u16 = 0x0040; // t: immediate completion
    pub const EXA: u16 = 0x0020; // b: exclusive access
    pub const SHD: u16 = 0x0010; // d: shadowing
    pub const UNL: u16 = 0x0010; // t avl: unload
    pub const ERW: u16 = 0x0008; // t wr: enable rewrite
    pub const REV: u16 = 0x0008; // t rd, pos: reverse
    pub const SWP: u16 = 0x0004; // b onl, suc: enable set write protect
    pub const OBC: u16 = 0x0004; // t pos: object count
    pub const IMF: u16 = 0x0002; // d onl: ignore media format error
    pub const RWD: u16 = 0x0002; // t pos: rewind
    pub const ACL: u16 = 0x0002; // t avl: all class
    pub const NXU: u16 = 0x0001; // b gus: next unit
    pub const RIP: u16 = 0x0001; // d onl: allow self destruction
}

/// Flags carried in the high byte of the opcode word of an end
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EndFlags(u8);

impl EndFlags {
    pub const NONE: EndFlags = EndFlags(0);
    pub const ERROR_LOG: EndFlags = EndFlags(0x20);
    pub const SERIOUS_EXCEPTION: EndFlags = EndFlags(0x10);
    pub const END_OF_TAPE: EndFlags = EndFlags(0x08);
    pub const POSITION_LOST: EndFlags = EndFlags(0x04);

    #[must_use]
    pub const fn from_bits(bits: u8) -> EndFlags {
        EndFlags(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn union(self, other: EndFlags) -> EndFlags {
        EndFlags(self.0 | other.0)
    }

    #[must_use]
    pub const fn contains(self, other: EndFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Controller characteristics which the host sets with Set
/// Controller Characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ControllerFlags(u16);

impl ControllerFlags {
    /// Controller-initiated bad block replacement; this is a property
    /// of the controller and survives Set Controller Characteristics.
    pub const REPLICATE: ControllerFlags = ControllerFlags(0x8000);
    pub const ATTENTION: ControllerFlags = ControllerFlags(0x0080);
    pub const MISC_ERROR_LOG: ControllerFlags = ControllerFlags(0x0040);
    pub const OTHER_HOST_ERROR_LOG: ControllerFlags = ControllerFlags(0x0020);
    pub const THIS_HOST_ERROR_LOG: ControllerFlags = ControllerFlags(0x0010);

    #[must_use]
    pub const fn from_bits(bits: u16) -> ControllerFlags {
        ControllerFlags(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: ControllerFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// The flags which result from the host asking for `requested`:
    /// only the replicate capability is retained from the old value.
    #[must_use]
    pub const fn updated_by_host(self, requested: u16) -> ControllerFlags {
        ControllerFlags((self.0 & Self::REPLICATE.0) | requested)
    }
}

/// Unit characteristic flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UnitFlags(u16);

impl UnitFlags {
    pub const NONE: UnitFlags = UnitFlags(0);
    pub const REPLICATE: UnitFlags = UnitFlags(0x8000);
    pub const WRITE_BACK_CACHE: UnitFlags = UnitFlags(0x8000);
    pub const HARDWARE_WRITE_PROTECT: UnitFlags = UnitFlags(0x2000);
    pub const SOFTWARE_WRITE_PROTECT: UnitFlags = UnitFlags(0x1000);
    pub const SUPPRESS_CACHE: UnitFlags = UnitFlags(0x0800);
    pub const EXCLUSIVE: UnitFlags = UnitFlags(0x0400);
    pub const REMOVABLE: UnitFlags = UnitFlags(0x0080);
    pub const VARIABLE_SPEED_SUPPRESS: UnitFlags = UnitFlags(0x0020);
    pub const VARIABLE_SPEED: UnitFlags = UnitFlags(0x0010);
    pub const ENHANCED_WRITE_RECOVERY: UnitFlags = UnitFlags(0x0008);
    pub const COMPARE_WRITES: UnitFlags = UnitFlags(0x0002);
    pub const COMPARE_READS: UnitFlags = UnitFlags(0x0001);

    /// Flags which reflect the hardware and survive an Available.
    pub const HARDWARE_FIXED: UnitFlags = UnitFlags(
        Self::REPLICATE.0 | Self::HARDWARE_WRITE_PROTECT.0 | Self::REMOVABLE.0,
    );

    /// Flags the host may set with Online or Set Unit
    /// Characteristics.  Software write protect is not among them;
    /// it needs the enable-set-write-protect modifier as well.
    pub const HOST_SETTABLE_DISK: UnitFlags =
        UnitFlags(Self::COMPARE_WRITES.0 | Self::COMPARE_READS.0);
    pub const HOST_SETTABLE_TAPE: UnitFlags = UnitFlags(
        Self::COMPARE_WRITES.0
            | Self::COMPARE_READS.0
            | Self::WRITE_BACK_CACHE.0
            | Self::SUPPRESS_CACHE.0
            | Self::VARIABLE_SPEED_SUPPRESS.0
            | Self::ENHANCED_WRITE_RECOVERY.0,
    );

    #[must_use]
    pub const fn from_bits(bits: u16) -> UnitFlags {
        UnitFlags(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: UnitFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: UnitFlags) -> UnitFlags {
        UnitFlags(self.0 | other.0)
    }

    #[must_use]
    pub const fn intersection(self, other: UnitFlags) -> UnitFlags {
        UnitFlags(self.0 & other.0)
    }

    #[must_use]
    pub const fn without(self, other: UnitFlags) -> UnitFlags {
        UnitFlags(self.0 & !other.0)
    }
}

#[test]
fn test_status_composition() {
    assert_eq!(Status::ALREADY_ONLINE.bits(), 8 << 5);
    assert!(Status::ALREADY_ONLINE.is_success());
    assert_eq!(Status::ALREADY_ONLINE.major(), Status::SUCCESS);
    assert_eq!(Status::NON_EXISTENT_MEMORY.major(), Status::HOST_BUFFER_ERROR);
    assert_eq!(Status::NON_EXISTENT_MEMORY.sub(), 3);
    assert_eq!(Status::INVALID_OPCODE.bits(), 1 | (8 << 5));
    assert_eq!(Status::INVALID_FLAGS.bits(), 1 | (9 << 5));
    assert_eq!(Status::INVALID_MODIFIERS.bits(), 1 | (10 << 5));
    assert!(!Status::ABORTED.is_success());
}

#[test]
fn test_status_display() {
    assert_eq!(Status::SUCCESS.to_string(), "success");
    assert_eq!(
        Status::ALREADY_ONLINE.to_string(),
        "success (sub-code 10)"
    );
    assert_eq!(Status::from_bits(15).to_string(), "unknown status");
}

#[test]
fn test_controller_flags_keep_only_replicate() {
    let old = ControllerFlags::REPLICATE.bits() | ControllerFlags::ATTENTION.bits();
    let updated = ControllerFlags::from_bits(old)
        .updated_by_host(ControllerFlags::THIS_HOST_ERROR_LOG.bits());
    assert!(updated.contains(ControllerFlags::REPLICATE));
    assert!(updated.contains(ControllerFlags::THIS_HOST_ERROR_LOG));
    assert!(!updated.contains(ControllerFlags::ATTENTION));
}

#[test]
fn test_hardware_fixed_unit_flags() {
    let flags = UnitFlags::HARDWARE_WRITE_PROTECT
        .union(UnitFlags::SOFTWARE_WRITE_PROTECT)
        .union(UnitFlags::COMPARE_READS)
        .union(UnitFlags::REMOVABLE);
    let kept = flags.intersection(UnitFlags::HARDWARE_FIXED);
    assert_eq!(
        kept,
        UnitFlags::HARDWARE_WRITE_PROTECT.union(UnitFlags::REMOVABLE)
    );
}
