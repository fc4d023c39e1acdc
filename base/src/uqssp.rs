//! The UQSSP port: the two-register initialisation handshake, ring
//! descriptors, the UQ packet header, and fatal port error codes.
//!
//! ## Registers
//!
//! | Offset | Read                                  | Write                          |
//! | ------ | ------------------------------------- | ------------------------------ |
//! | 0 (IP) | start polling / finish purge-poll test | initialise the port            |
//! | 1 (SA) | status, step words, fatal error code  | initialisation step parameters |
//!
//! ## Step 1 host word
//!
//! | 15    | 14   | 13-11          | 10-8            | 7         | 6-0        |
//! | ----- | ---- | -------------- | --------------- | --------- | ---------- |
//! | valid | wrap | log2 cmd ring  | log2 resp ring  | int enable | vector / 4 |
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

// Step bits in SA as read by the host.
pub const SA_ER: u16 = 0x8000;
pub const SA_S1: u16 = 0x0800;
pub const SA_S2: u16 = 0x1000;
pub const SA_S3: u16 = 0x2000;
pub const SA_S4: u16 = 0x4000;

// Step 1 port capabilities.
pub const SA_S1C_NV: u16 = 0x0400;
pub const SA_S1C_Q22: u16 = 0x0200;
pub const SA_S1C_DI: u16 = 0x0100;
pub const SA_S1C_OD: u16 = 0x0080;
pub const SA_S1C_MP: u16 = 0x0040;

// Step 1 host word.
pub const SA_S1H_VL: u16 = 0x8000;
pub const SA_S1H_WR: u16 = 0x4000;
pub const SA_S1H_IE: u16 = 0x0080;
pub const SA_S1H_VEC: u16 = 0x007F;

// Step 2.
pub const SA_S2C_PT: u16 = 0x0000;
pub const SA_S2H_CLO: u16 = 0xFFFE;
pub const SA_S2H_PI: u16 = 0x0001;

// Step 3.
pub const SA_S3H_PP: u16 = 0x8000;
pub const SA_S3H_CHI: u16 = 0x7FFF;

// Step 4.
pub const SA_S4C_V_MOD: u16 = 4;
pub const SA_S4C_M_MOD: u16 = 0x7F;
pub const SA_S4H_LF: u16 = 0x0002;
pub const SA_S4H_GO: u16 = 0x0001;

/// Number of slots in the command ring requested by a step 1 word.
#[must_use]
pub const fn s1_command_slots(s1: u16) -> u32 {
    1 << ((s1 >> 11) & 7)
}

/// Number of slots in the response ring requested by a step 1 word.
#[must_use]
pub const fn s1_response_slots(s1: u16) -> u32 {
    1 << ((s1 >> 8) & 7)
}

/// The interrupt vector requested by a step 1 word (zero means
/// interrupts are not used).
#[must_use]
pub const fn s1_vector(s1: u16) -> u16 {
    (s1 & SA_S1H_VEC) << 2
}

/// The step 2 status word echoes the high byte of the step 1 word.
#[must_use]
pub const fn s2_echo(s1: u16) -> u16 {
    (s1 >> 8) & 0xFF
}

/// The step 3 status word echoes the low byte of the step 1 word.
#[must_use]
pub const fn s3_echo(s1: u16) -> u16 {
    s1 & 0xFF
}

// Communication area: interrupt flag words below the ring base.
pub const COMM_QQ: i32 = -8;
pub const COMM_PI: i32 = -6;
pub const COMM_CI: i32 = -4;
pub const COMM_RI: i32 = -2;

pub const DESCRIPTOR_BYTES: u32 = 4;

/// A 32-bit ring descriptor as it sits in host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Descriptor(u32);

impl Descriptor {
    /// Set: the slot belongs to the port.  Clear: to the host.
    pub const OWN: u32 = 0x8000_0000;
    /// Host wants an interrupt when the port hands the slot back.
    pub const FLAG: u32 = 0x4000_0000;
    /// Packet buffer address (word aligned).
    pub const ADDRESS: u32 = 0x003F_FFFE;

    #[must_use]
    pub const fn from_bits(bits: u32) -> Descriptor {
        Descriptor(bits)
    }

    #[must_use]
    pub const fn new(address: u32, owned_by_port: bool, flag: bool) -> Descriptor {
        let mut bits = address & Self::ADDRESS;
        if owned_by_port {
            bits |= Self::OWN;
        }
        if flag {
            bits |= Self::FLAG;
        }
        Descriptor(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn owned_by_port(self) -> bool {
        self.0 & Self::OWN != 0
    }

    #[must_use]
    pub const fn wants_interrupt(self) -> bool {
        self.0 & Self::FLAG != 0
    }

    #[must_use]
    pub const fn address(self) -> u32 {
        self.0 & Self::ADDRESS
    }

    /// The value written back when the port returns the slot to the
    /// host: ownership cleared, flag set.
    #[must_use]
    pub const fn released(self) -> Descriptor {
        Descriptor((self.0 & !Self::OWN) | Self::FLAG)
    }
}

// UQ header, word 1.
pub const UQ_M_CR: u16 = 0xF;
pub const UQ_V_TYP: u16 = 4;
pub const UQ_M_TYP: u16 = 0xF;
pub const UQ_V_CID: u16 = 8;
pub const UQ_M_CID: u16 = 0xFF;

/// The most credits the port grants in a single response.
pub const MAX_CREDIT_GRANT: u16 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageType {
    Sequential,
    Datagram,
    Other(u8),
}

impl MessageType {
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            MessageType::Sequential => 0,
            MessageType::Datagram => 1,
            MessageType::Other(n) => n as u16,
        }
    }

    #[must_use]
    pub const fn from_header(ctc: u16) -> MessageType {
        match (ctc >> UQ_V_TYP) & UQ_M_TYP {
            0 => MessageType::Sequential,
            1 => MessageType::Datagram,
            n => MessageType::Other(n as u8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionId {
    Mscp,
    Tmscp,
    Dup,
    Diagnostic,
    Other(u8),
}

impl ConnectionId {
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            ConnectionId::Mscp => 0,
            ConnectionId::Tmscp => 1,
            ConnectionId::Dup => 2,
            ConnectionId::Diagnostic => 0xFF,
            ConnectionId::Other(n) => n as u16,
        }
    }

    #[must_use]
    pub const fn from_header(ctc: u16) -> ConnectionId {
        match (ctc >> UQ_V_CID) & UQ_M_CID {
            0 => ConnectionId::Mscp,
            1 => ConnectionId::Tmscp,
            2 => ConnectionId::Dup,
            0xFF => ConnectionId::Diagnostic,
            n => ConnectionId::Other(n as u8),
        }
    }
}

/// Build header word 1 from its three fields.
#[must_use]
pub const fn header_ctc(credits: u16, typ: MessageType, cid: ConnectionId) -> u16 {
    (credits & UQ_M_CR) | (typ.code() << UQ_V_TYP) | (cid.code() << UQ_V_CID)
}

/// Fatal port error codes, as shown in SA (with [`SA_ER`]) and in
/// the last-fail packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum FatalCode {
    PacketReadError,
    PacketWriteError,
    QueueReadError,
    QueueWriteError,
    HostAccessTimeout,
    InvalidConnectionId,
    PurgePollFailure,
    NoSuchResource,
    PacketInterfaceError,
}

impl FatalCode {
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            FatalCode::PacketReadError => 1,
            FatalCode::PacketWriteError => 2,
            FatalCode::QueueReadError => 6,
            FatalCode::QueueWriteError => 7,
            FatalCode::HostAccessTimeout => 9,
            FatalCode::InvalidConnectionId => 14,
            FatalCode::PurgePollFailure => 15,
            FatalCode::NoSuchResource => 18,
            FatalCode::PacketInterfaceError => 20,
        }
    }
}

impl Display for FatalCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            FatalCode::PacketReadError => "packet read error",
            FatalCode::PacketWriteError => "packet write error",
            FatalCode::QueueReadError => "queue read error",
            FatalCode::QueueWriteError => "queue write error",
            FatalCode::HostAccessTimeout => "host access timeout",
            FatalCode::InvalidConnectionId => "invalid connection identifier",
            FatalCode::PurgePollFailure => "purge/poll test failure",
            FatalCode::NoSuchResource => "no such resource (packet pool exhausted)",
            FatalCode::PacketInterfaceError => "packet interface error",
        })
    }
}

#[test]
fn test_step1_decoding() {
    let s1: u16 = 0x0A00;
    assert_eq!(s1_command_slots(s1), 2);
    assert_eq!(s1_response_slots(s1), 4);
    assert_eq!(s2_echo(s1), 0x0A);
    assert_eq!(s3_echo(s1), 0x00);

    let s1: u16 = SA_S1H_VL | (3 << 11) | (3 << 8) | SA_S1H_IE | 0o124 / 4;
    assert_eq!(s1_command_slots(s1), 8);
    assert_eq!(s1_response_slots(s1), 8);
    assert_eq!(s1_vector(s1), 0o124);
}

#[test]
fn test_descriptor_bits() {
    let d = Descriptor::new(0x1235, true, true);
    assert!(d.owned_by_port());
    assert!(d.wants_interrupt());
    assert_eq!(d.address(), 0x1234);
    let r = d.released();
    assert!(!r.owned_by_port());
    assert!(r.wants_interrupt());
    assert_eq!(r.address(), 0x1234);
    assert!(Descriptor::new(0x100, true, false).released().wants_interrupt());
}

#[test]
fn test_header_fields() {
    let ctc = header_ctc(15, MessageType::Datagram, ConnectionId::Tmscp);
    assert_eq!(ctc & UQ_M_CR, 15);
    assert_eq!(MessageType::from_header(ctc), MessageType::Datagram);
    assert_eq!(ConnectionId::from_header(ctc), ConnectionId::Tmscp);
    assert_eq!(
        ConnectionId::from_header(header_ctc(0, MessageType::Sequential, ConnectionId::Diagnostic)),
        ConnectionId::Diagnostic
    );
}
