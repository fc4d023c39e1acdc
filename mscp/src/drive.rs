//! Drive tables.
//!
//! A unit's drive type decides its capacity, the geometry and media
//! identifier it reports in Online and Get Unit Status responses, and
//! the class and model in its unit identifier.
use serde::Serialize;

/// Unit identifier classes (high byte of the last unit identifier word).
pub(crate) const UID_CLASS_DISK: u16 = 2;
pub(crate) const UID_CLASS_TAPE: u16 = 3;

/// Bytes in a logical block.
pub const BLOCK_BYTES: u32 = 512;

/// Encode a media identifier: two letters naming the device type,
/// two naming the medium, and the model number.  For example "DU",
/// "RA", 81 for an RA81.
#[must_use]
pub const fn media_id(device: &[u8; 2], medium: &[u8; 2], number: u32) -> u32 {
    const fn letter(c: u8) -> u32 {
        ((c - b'@') & 0x1F) as u32
    }
    (letter(device[0]) << 27)
        | (letter(device[1]) << 22)
        | (letter(medium[0]) << 17)
        | (letter(medium[1]) << 12)
        | (number & 0x7F)
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct DiskType {
    pub name: &'static str,
    pub sectors: u16,
    pub surfaces: u16,
    pub cylinders: u16,
    /// Tracks per group.
    pub tracks_per_group: u16,
    /// Groups per cylinder.
    pub groups_per_cylinder: u16,
    /// Size of the replacement and caching table, in blocks.
    pub rct_size: u16,
    /// Replacement blocks per track.
    pub rbns: u16,
    /// Host-visible capacity in logical blocks.
    pub blocks: u32,
    pub media: u32,
    pub model: u8,
    pub removable: bool,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct TapeType {
    pub name: &'static str,
    pub media: u32,
    pub model: u8,
    /// Density/format code reported in Online and Get Unit Status.
    pub format: u16,
    /// Format menu: the densities the drive supports.
    pub menu: u16,
    /// Formatter version.
    pub formatter_version: u16,
    pub unit_version: u16,
    /// Largest record the drive transfers.
    pub max_record: u32,
}

pub static RA60: DiskType = DiskType {
    name: "RA60",
    sectors: 42,
    surfaces: 4,
    cylinders: 2382,
    tracks_per_group: 4,
    groups_per_cylinder: 1,
    rct_size: 1680,
    rbns: 1,
    blocks: 400_176,
    media: media_id(b"DU", b"RA", 60),
    model: 4,
    removable: true,
};

pub static RA80: DiskType = DiskType {
    name: "RA80",
    sectors: 31,
    surfaces: 14,
    cylinders: 559,
    tracks_per_group: 14,
    groups_per_cylinder: 1,
    rct_size: 2,
    rbns: 1,
    blocks: 237_212,
    media: media_id(b"DU", b"RA", 80),
    model: 1,
    removable: false,
};

pub static RA81: DiskType = DiskType {
    name: "RA81",
    sectors: 51,
    surfaces: 14,
    cylinders: 1248,
    tracks_per_group: 14,
    groups_per_cylinder: 1,
    rct_size: 2856,
    rbns: 1,
    blocks: 891_072,
    media: media_id(b"DU", b"RA", 81),
    model: 5,
    removable: false,
};

pub static RA82: DiskType = DiskType {
    name: "RA82",
    sectors: 57,
    surfaces: 15,
    cylinders: 1435,
    tracks_per_group: 15,
    groups_per_cylinder: 1,
    rct_size: 3420,
    rbns: 1,
    blocks: 1_216_665,
    media: media_id(b"DU", b"RA", 82),
    model: 11,
    removable: false,
};

pub static TK50: TapeType = TapeType {
    name: "TK50",
    media: media_id(b"MU", b"TK", 50),
    model: 3,
    format: 0x0800,
    menu: 0x0800,
    formatter_version: 5,
    unit_version: 3,
    max_record: 1 << 16,
};

pub static TU81: TapeType = TapeType {
    name: "TU81",
    media: media_id(b"MU", b"TU", 81),
    model: 5,
    format: 0x0004,
    menu: 0x0006,
    formatter_version: 3,
    unit_version: 2,
    max_record: 1 << 16,
};

pub static DISKS: [&DiskType; 4] = [&RA60, &RA80, &RA81, &RA82];
pub static TAPES: [&TapeType; 2] = [&TK50, &TU81];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriveType {
    Disk(&'static DiskType),
    Tape(&'static TapeType),
}

impl DriveType {
    /// Look a drive model up by name (case-insensitive).
    #[must_use]
    pub fn by_name(name: &str) -> Option<DriveType> {
        DISKS
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .map(|d| DriveType::Disk(*d))
            .or_else(|| {
                TAPES
                    .iter()
                    .find(|t| t.name.eq_ignore_ascii_case(name))
                    .map(|t| DriveType::Tape(*t))
            })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DriveType::Disk(d) => d.name,
            DriveType::Tape(t) => t.name,
        }
    }

    #[must_use]
    pub fn media(&self) -> u32 {
        match self {
            DriveType::Disk(d) => d.media,
            DriveType::Tape(t) => t.media,
        }
    }

    /// The last word of the unit identifier: class and model.
    #[must_use]
    pub(crate) fn uid_class_model(&self) -> u16 {
        match self {
            DriveType::Disk(d) => (UID_CLASS_DISK << 8) | u16::from(d.model),
            DriveType::Tape(t) => (UID_CLASS_TAPE << 8) | u16::from(t.model),
        }
    }

    #[must_use]
    pub fn removable(&self) -> bool {
        match self {
            DriveType::Disk(d) => d.removable,
            DriveType::Tape(_) => true,
        }
    }
}

#[test]
fn test_media_id_matches_published_value() {
    assert_eq!(RA81.media, 0x2564_1051);
}

#[test]
fn test_lookup_by_name() {
    assert_eq!(DriveType::by_name("ra82"), Some(DriveType::Disk(&RA82)));
    assert_eq!(DriveType::by_name("TK50"), Some(DriveType::Tape(&TK50)));
    assert_eq!(DriveType::by_name("RK05"), None);
}

#[test]
fn test_uid_class() {
    assert_eq!(DriveType::Disk(&RA81).uid_class_model() >> 8, UID_CLASS_DISK);
    assert_eq!(DriveType::Tape(&TK50).uid_class_model(), (3 << 8) | 3);
}
