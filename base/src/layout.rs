//! Word layout of MSCP/TMSCP message packets.
//!
//! Offsets count 16-bit words from the start of the packet as the
//! port holds it.  That includes the 4-byte UQ header which sits in
//! host memory immediately *below* the address in the ring
//! descriptor:
//!
//! | Word | Contents                                   |
//! | ---- | ------------------------------------------ |
//! | 0    | message length in bytes (excluding header) |
//! | 1    | credits (0-3), type (4-7), connection (8-15) |
//! | 2-3  | command reference number                   |
//! | 4    | unit number                                |
//! | 6    | opcode (low byte), end flags (high byte)   |
//! | 7    | modifiers (command) or status (response)   |
//! | 8-   | command-specific fields                    |
//!
//! Invalid-command sub-status values identify the offending field by
//! its *byte* offset within the message text (i.e. after the header);
//! see [`invalid_field_subcode`].

/// Number of 16-bit words in each packet of the port's pool.
pub const PACKET_WORDS: usize = 32;

/// Size in bytes of the UQ header which precedes the message text.
pub const HEADER_BYTES: u32 = 4;

// Header.
pub const UQ_LNT: usize = 0;
pub const UQ_CTC: usize = 1;

// Common command and response fields.
pub const CMD_REFL: usize = 2;
pub const CMD_REFH: usize = 3;
pub const CMD_UN: usize = 4;
pub const CMD_OPC: usize = 6;
pub const CMD_MOD: usize = 7;
pub const RSP_UN: usize = CMD_UN;
pub const RSP_OPF: usize = 6;
pub const RSP_STS: usize = 7;
pub const RSP_LNT: u16 = 12;

// Abort, Get Command Status.
pub const ABO_REFL: usize = 8;
pub const ABO_REFH: usize = 9;
pub const ABO_LNT: u16 = 16;
pub const GCS_REFL: usize = 8;
pub const GCS_REFH: usize = 9;
pub const GCS_STSL: usize = 10;
pub const GCS_STSH: usize = 11;
pub const GCS_LNT: u16 = 20;

// Set Controller Characteristics.
pub const SCC_MSV: usize = 8;
pub const SCC_CFL: usize = 9;
pub const SCC_TMO: usize = 10;
pub const SCC_VER: usize = 11;
pub const SCC_CIDA: usize = 12;
pub const SCC_CIDB: usize = 13;
pub const SCC_CIDC: usize = 14;
pub const SCC_CIDD: usize = 15;
pub const SCC_MBCL: usize = 16;
pub const SCC_MBCH: usize = 17;
pub const SCC_LNT: u16 = 32;

// Online, Set Unit Characteristics, Get Unit Status (shared prefix).
pub const ONL_MLUN: usize = 8;
pub const ONL_UFL: usize = 9;
pub const ONL_RSVL: usize = 10;
pub const ONL_RSVH: usize = 11;
pub const ONL_UIDA: usize = 12;
pub const ONL_UIDB: usize = 13;
pub const ONL_UIDC: usize = 14;
pub const ONL_UIDD: usize = 15;
pub const ONL_MEDL: usize = 16;
pub const ONL_MEDH: usize = 17;
pub const ONL_SHUN: usize = 18;
pub const ONL_SHST: usize = 19;
pub const ONL_SIZL: usize = 20;
pub const ONL_SIZH: usize = 21;
pub const ONL_VSNL: usize = 22;
pub const ONL_VSNH: usize = 23;
pub const ONL_LNT: u16 = 44;

// Online / Set Unit Characteristics, tape specific.
pub const TONL_FMT: usize = 20;
pub const TONL_SPD: usize = 21;
pub const TONL_MAXL: usize = 22;
pub const TONL_MAXH: usize = 23;
pub const TONL_LNT: u16 = 44;

// Get Unit Status.
pub const GUS_MLUN: usize = ONL_MLUN;
pub const GUS_UFL: usize = ONL_UFL;
pub const GUS_SHUN: usize = ONL_SHUN;
pub const GUS_SHST: usize = ONL_SHST;
pub const GUS_TRK: usize = 20;
pub const GUS_GRP: usize = 21;
pub const GUS_CYL: usize = 22;
pub const GUS_UVER: usize = 23;
pub const GUS_RCTS: usize = 24;
pub const GUS_RBSC: usize = 25;
pub const GUS_LNT_D: u16 = 48;
pub const GUS_FMT: usize = 20;
pub const GUS_SPEED: usize = 21;
pub const GUS_MENU: usize = 22;
pub const GUS_CAP: usize = 23;
pub const GUS_FVER: usize = 24;
pub const GUS_LNT_T: u16 = 46;

// Available.
pub const AVL_LNT: u16 = RSP_LNT;

// Data transfers (disk).
pub const RW_BCL: usize = 8;
pub const RW_BCH: usize = 9;
pub const RW_BAL: usize = 10;
pub const RW_BAH: usize = 11;
pub const RW_MAPL: usize = 12;
pub const RW_MAPH: usize = 13;
pub const RW_LBNL: usize = 16;
pub const RW_LBNH: usize = 17;
pub const RW_WBCL: usize = 18;
pub const RW_WBCH: usize = 19;
pub const RW_WBAL: usize = 20;
pub const RW_WBAH: usize = 21;
pub const RW_WBLL: usize = 22;
pub const RW_WBLH: usize = 23;
pub const RW_LNT_D: u16 = 32;

// Data transfers and motion (tape).
pub const RW_POSL: usize = 16;
pub const RW_POSH: usize = 17;
pub const RW_RSZL: usize = 18;
pub const RW_RSZH: usize = 19;
pub const RW_LNT_T: u16 = 36;

// Reposition.
pub const POS_RCL: usize = 8;
pub const POS_RCH: usize = 9;
pub const POS_TMCL: usize = 12;
pub const POS_TMCH: usize = 13;
pub const POS_POSL: usize = 16;
pub const POS_POSH: usize = 17;
pub const POS_LNT: u16 = 32;

// Error log packets: common header.
pub const ELP_REFL: usize = 2;
pub const ELP_REFH: usize = 3;
pub const ELP_UN: usize = 4;
pub const ELP_SEQ: usize = 5;
pub const ELP_FF: usize = 6;
pub const ELP_EVT: usize = 7;
pub const ELP_CIDA: usize = 8;
pub const ELP_CIDB: usize = 9;
pub const ELP_CIDC: usize = 10;
pub const ELP_CIDD: usize = 11;
pub const ELP_VER: usize = 12;

// Host bus error log.
pub const HBE_RSV: usize = 13;
pub const HBE_BADL: usize = 14;
pub const HBE_BADH: usize = 15;
pub const HBE_LNT: u16 = 28;

// Disk transfer error log.
pub const DTE_UIDA: usize = 13;
pub const DTE_UIDB: usize = 14;
pub const DTE_UIDC: usize = 15;
pub const DTE_UIDD: usize = 16;
pub const DTE_UVER: usize = 17;
pub const DTE_RTRY: usize = 18;
pub const DTE_VSNL: usize = 19;
pub const DTE_VSNH: usize = 20;
pub const DTE_HDRL: usize = 21;
pub const DTE_HDRH: usize = 22;
pub const DTE_LNT: u16 = 42;

// Tape transfer error log.
pub const TLE_UIDA: usize = 13;
pub const TLE_UIDD: usize = 16;
pub const TLE_UVER: usize = 17;
pub const TLE_RTRY: usize = 18;
pub const TLE_POSL: usize = 19;
pub const TLE_POSH: usize = 20;
pub const TLE_FVER: usize = 21;
pub const TLE_LNT: u16 = 40;

// Last fail.
pub const PLF_CIDA: usize = 8;
pub const PLF_CIDB: usize = 9;
pub const PLF_CIDC: usize = 10;
pub const PLF_CIDD: usize = 11;
pub const PLF_VER: usize = 12;
pub const PLF_ERR: usize = 13;
pub const PLF_LNT: u16 = 24;

// Unit-now-available attention message.
pub const UNA_LNT: u16 = 32;

/// The central table of named packet fields.  Host-side tooling and
/// the packet dumper use it; the engine uses the constants directly.
pub const FIELDS: &[(&str, usize)] = &[
    ("UQ_LNT", UQ_LNT),
    ("UQ_CTC", UQ_CTC),
    ("CMD_REFL", CMD_REFL),
    ("CMD_REFH", CMD_REFH),
    ("CMD_UN", CMD_UN),
    ("CMD_OPC", CMD_OPC),
    ("CMD_MOD", CMD_MOD),
    ("RSP_STS", RSP_STS),
    ("ABO_REFL", ABO_REFL),
    ("ABO_REFH", ABO_REFH),
    ("GCS_STSL", GCS_STSL),
    ("GCS_STSH", GCS_STSH),
    ("SCC_MSV", SCC_MSV),
    ("SCC_CFL", SCC_CFL),
    ("SCC_TMO", SCC_TMO),
    ("SCC_VER", SCC_VER),
    ("SCC_MBCL", SCC_MBCL),
    ("ONL_MLUN", ONL_MLUN),
    ("ONL_UFL", ONL_UFL),
    ("ONL_UIDA", ONL_UIDA),
    ("ONL_MEDL", ONL_MEDL),
    ("ONL_SHUN", ONL_SHUN),
    ("ONL_SIZL", ONL_SIZL),
    ("ONL_VSNL", ONL_VSNL),
    ("GUS_TRK", GUS_TRK),
    ("GUS_CYL", GUS_CYL),
    ("GUS_RCTS", GUS_RCTS),
    ("RW_BCL", RW_BCL),
    ("RW_BAL", RW_BAL),
    ("RW_MAPL", RW_MAPL),
    ("RW_LBNL", RW_LBNL),
    ("RW_WBCL", RW_WBCL),
    ("RW_WBAL", RW_WBAL),
    ("RW_WBLL", RW_WBLL),
    ("RW_POSL", RW_POSL),
    ("RW_RSZL", RW_RSZL),
    ("POS_RCL", POS_RCL),
    ("POS_TMCL", POS_TMCL),
    ("POS_POSL", POS_POSL),
    ("ELP_FF", ELP_FF),
    ("ELP_EVT", ELP_EVT),
    ("ELP_VER", ELP_VER),
    ("HBE_BADL", HBE_BADL),
    ("PLF_ERR", PLF_ERR),
];

/// Look up a field's word offset by name.
#[must_use]
pub fn field_offset(name: &str) -> Option<usize> {
    FIELDS
        .iter()
        .find(|(field_name, _)| *field_name == name)
        .map(|(_, offset)| *offset)
}

/// Returns the invalid-command sub-status which identifies the
/// packet word `word` as the offending field.
#[must_use]
pub const fn invalid_field_subcode(word: usize) -> u16 {
    (((word - 2) * 2) as u16) << 5
}

#[test]
fn test_fields_fit_in_a_packet() {
    for (name, offset) in FIELDS {
        assert!(*offset < PACKET_WORDS, "field {name} is outside the packet");
    }
}

#[test]
fn test_field_names_are_unique() {
    for (i, (name, _)) in FIELDS.iter().enumerate() {
        assert!(
            FIELDS[i + 1..].iter().all(|(other, _)| other != name),
            "field {name} appears twice"
        );
    }
}

#[test]
fn test_field_lookup() {
    assert_eq!(field_offset("CMD_OPC"), Some(6));
    assert_eq!(field_offset("RW_LBNL"), Some(16));
    assert_eq!(field_offset("NO_SUCH_FIELD"), None);
}

#[test]
fn test_invalid_field_subcodes() {
    // The opcode lives at message byte 8, the modifiers at byte 10.
    assert_eq!(invalid_field_subcode(CMD_OPC), 8 << 5);
    assert_eq!(invalid_field_subcode(CMD_MOD), 10 << 5);
    assert_eq!(invalid_field_subcode(RW_LBNL), 28 << 5);
}

#[test]
fn test_response_lengths_fit_in_a_packet() {
    for lnt in [
        RSP_LNT, ABO_LNT, GCS_LNT, SCC_LNT, ONL_LNT, GUS_LNT_D, GUS_LNT_T, RW_LNT_D, RW_LNT_T,
        POS_LNT, HBE_LNT, DTE_LNT, TLE_LNT, PLF_LNT, UNA_LNT,
    ] {
        assert!(u32::from(lnt) + HEADER_BYTES <= (PACKET_WORDS * 2) as u32);
    }
}
