//! Failures which the controller reports to its caller.
//!
//! [`FatalError`] is a failure of the port itself.  The controller
//! turns it into the `Dead` state with the error's code in the SA
//! register; the host has to re-initialise the port.  Per-command
//! failures are not errors in this sense at all, they are statuses in
//! response packets.
use std::error;
use std::fmt::{self, Display, Formatter};
use std::io;

use base::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// Reading a command packet from host memory failed.
    PacketRead { address: u32 },
    /// Writing a response packet to host memory failed.
    PacketWrite { address: u32 },
    /// Reading a ring descriptor failed.
    QueueRead { address: u32 },
    /// Writing a ring descriptor (or a ring interrupt flag, or the
    /// communication area) failed.
    QueueWrite { address: u32 },
    /// The host did not service the port within its timeout.
    HostAccessTimeout,
    /// A command packet named a connection we don't serve.
    InvalidConnectionId(ConnectionId),
    /// The host wrote a nonzero value during the purge/poll test.
    PurgePollFailure { value: u16 },
    /// The packet pool is empty.
    NoSuchResource,
    /// A command packet was not a sequential message.
    PacketInterface { message_type: MessageType },
}

impl FatalError {
    #[must_use]
    pub fn code(&self) -> FatalCode {
        match self {
            FatalError::PacketRead { .. } => FatalCode::PacketReadError,
            FatalError::PacketWrite { .. } => FatalCode::PacketWriteError,
            FatalError::QueueRead { .. } => FatalCode::QueueReadError,
            FatalError::QueueWrite { .. } => FatalCode::QueueWriteError,
            FatalError::HostAccessTimeout => FatalCode::HostAccessTimeout,
            FatalError::InvalidConnectionId(_) => FatalCode::InvalidConnectionId,
            FatalError::PurgePollFailure { .. } => FatalCode::PurgePollFailure,
            FatalError::NoSuchResource => FatalCode::NoSuchResource,
            FatalError::PacketInterface { .. } => FatalCode::PacketInterfaceError,
        }
    }
}

impl Display for FatalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            FatalError::PacketRead { address } => {
                write!(f, "{} at address {address:o}", self.code())
            }
            FatalError::PacketWrite { address } => {
                write!(f, "{} at address {address:o}", self.code())
            }
            FatalError::QueueRead { address } => {
                write!(f, "{} at address {address:o}", self.code())
            }
            FatalError::QueueWrite { address } => {
                write!(f, "{} at address {address:o}", self.code())
            }
            FatalError::InvalidConnectionId(cid) => {
                write!(f, "{}: {cid:?}", self.code())
            }
            FatalError::PurgePollFailure { value } => {
                write!(f, "{}: host wrote {value:#06x}", self.code())
            }
            FatalError::PacketInterface { message_type } => {
                write!(f, "{}: message type {message_type:?}", self.code())
            }
            FatalError::HostAccessTimeout | FatalError::NoSuchResource => {
                write!(f, "{}", self.code())
            }
        }
    }
}

impl error::Error for FatalError {}

/// Failures of the attach and detach operations.
#[derive(Debug)]
pub enum AttachError {
    NoSuchUnit(usize),
    /// The image is of the wrong class for this controller (a tape
    /// image on a disk controller, say).
    WrongMediaClass {
        unit: usize,
        protocol: Protocol,
    },
    AlreadyAttached(usize),
    NotAttached(usize),
    Io(io::Error),
}

impl Display for AttachError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            AttachError::NoSuchUnit(unit) => write!(f, "there is no unit {unit}"),
            AttachError::WrongMediaClass { unit, protocol } => {
                write!(f, "unit {unit} is on a {protocol} controller, which cannot use this medium")
            }
            AttachError::AlreadyAttached(unit) => write!(f, "unit {unit} is already attached"),
            AttachError::NotAttached(unit) => write!(f, "unit {unit} is not attached"),
            AttachError::Io(e) => write!(f, "failed to open image: {e}"),
        }
    }
}

impl error::Error for AttachError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            AttachError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for AttachError {
    fn from(e: io::Error) -> AttachError {
        AttachError::Io(e)
    }
}

#[test]
fn test_fatal_codes() {
    assert_eq!(
        FatalError::QueueWrite { address: 0o1000 }.code().code(),
        7
    );
    assert_eq!(FatalError::NoSuchResource.code().code(), 18);
    assert_eq!(
        FatalError::PurgePollFailure { value: 1 }.code(),
        FatalCode::PurgePollFailure
    );
}

#[test]
fn test_fatal_display() {
    assert_eq!(
        FatalError::QueueWrite { address: 0o1000 }.to_string(),
        "queue write error at address 1000"
    );
    assert_eq!(
        FatalError::HostAccessTimeout.to_string(),
        "host access timeout"
    );
}
