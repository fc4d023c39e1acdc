//! A point-in-time snapshot of the controller, for display.
use serde::Serialize;

use base::prelude::*;

use crate::controller::PortState;
use crate::unit::{Medium, Unit};

#[derive(Debug, Clone, Serialize)]
pub struct RingInfo {
    /// Host address of the first descriptor.
    pub base: u32,
    pub slots: u32,
    /// The slot the port will look at next.
    pub index: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitInfo {
    pub number: usize,
    /// Drive model name, e.g. "RA81".
    pub drive: &'static str,
    pub attached: bool,
    pub online: bool,
    pub flags: UnitFlags,
    /// The unit is part way through a command.
    pub busy: bool,
    /// Commands waiting behind the current one.
    pub pending: usize,
    /// Transfer chunks performed since the medium was attached.
    pub chunks: u64,
    /// Objects between the beginning of tape and the head.  `None`
    /// for disks.
    pub tape_position: Option<u32>,
    pub serious_exception: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerInfo {
    pub protocol: Protocol,
    pub csr: u32,
    pub state: PortState,
    /// The value the host would read from SA.
    pub sa: u16,
    pub last_failure: Option<FatalCode>,
    pub vector: u16,
    pub command_ring: RingInfo,
    pub response_ring: RingInfo,
    pub credits: u16,
    pub flags: ControllerFlags,
    pub host_timeout: u16,
    /// Size of the packet pool.
    pub packets: usize,
    pub packets_free: usize,
    /// Responses waiting for a free response ring slot.
    pub responses_queued: usize,
    pub polling: bool,
    pub units: Vec<UnitInfo>,
}

impl UnitInfo {
    pub(crate) fn of(u: &Unit) -> UnitInfo {
        UnitInfo {
            number: u.number,
            drive: u.drive.name(),
            attached: u.attached(),
            online: u.online,
            flags: u.flags,
            busy: u.busy(),
            pending: u.pending.len(),
            chunks: u.chunks,
            tape_position: match u.medium {
                Some(Medium::Tape(_)) => Some(u.tape.objects),
                _ => None,
            },
            serious_exception: u.tape.serious_exception,
        }
    }
}
