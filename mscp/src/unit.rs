//! Logical units.
use base::prelude::*;

use crate::drive::DriveType;
use crate::packet::{PacketId, PacketQueue};
use crate::store::{Backing, DiskImage, TapeImage};

pub(crate) type Image = Box<dyn Backing>;

pub(crate) enum Medium {
    Disk(DiskImage<Image>),
    Tape(TapeImage<Image>),
}

impl std::fmt::Debug for Medium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Medium::Disk(_) => f.write_str("Disk"),
            Medium::Tape(t) => write!(f, "Tape(position {})", t.position()),
        }
    }
}

/// Tape motion state which persists between commands.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TapeState {
    /// A motion command failed; further motion commands are refused
    /// until the host clears the condition.
    pub(crate) serious_exception: bool,
    pub(crate) position_lost: bool,
    /// The last object passed moving forward was a tape mark.
    pub(crate) after_tape_mark: bool,
    /// Objects (records and tape marks) between the beginning of
    /// tape and the head.
    pub(crate) objects: u32,
}

#[derive(Debug)]
pub(crate) struct Unit {
    pub(crate) number: usize,
    pub(crate) drive: DriveType,
    pub(crate) medium: Option<Medium>,
    pub(crate) online: bool,
    pub(crate) flags: UnitFlags,
    /// The command this unit is executing.  `Some` exactly when the
    /// unit is mid-command.
    pub(crate) current: Option<PacketId>,
    pub(crate) pending: PacketQueue,
    pub(crate) tape: TapeState,
    /// An attention message is owed to the host.
    pub(crate) attention_pending: bool,
    /// Transfer chunks performed since the unit was attached.
    pub(crate) chunks: u64,
}

impl Unit {
    pub(crate) fn new(number: usize, drive: DriveType) -> Unit {
        Unit {
            number,
            drive,
            medium: None,
            online: false,
            flags: UnitFlags::NONE,
            current: None,
            pending: PacketQueue::default(),
            tape: TapeState::default(),
            attention_pending: false,
            chunks: 0,
        }
    }

    pub(crate) fn attached(&self) -> bool {
        self.medium.is_some()
    }

    pub(crate) fn busy(&self) -> bool {
        self.current.is_some()
    }

    pub(crate) fn has_work(&self) -> bool {
        self.current.is_some() || !self.pending.is_empty()
    }

    /// The flags which belong to the hardware rather than to the
    /// host's choices.
    pub(crate) fn fixed_flags(&self, protocol: Protocol, read_only: bool) -> UnitFlags {
        let mut flags = UnitFlags::NONE;
        if protocol == Protocol::Mscp {
            flags = flags.union(UnitFlags::REPLICATE);
        }
        if self.drive.removable() {
            flags = flags.union(UnitFlags::REMOVABLE);
        }
        if read_only {
            flags = flags.union(UnitFlags::HARDWARE_WRITE_PROTECT);
        }
        flags
    }

    /// Apply the unit flags the host asked for in an Online or Set
    /// Unit Characteristics command.  Software write protect needs
    /// both the flag and the enable modifier.
    pub(crate) fn apply_host_flags(&mut self, requested: u16, modifiers: u16, settable: UnitFlags) {
        let requested = UnitFlags::from_bits(requested);
        let mut flags = self
            .flags
            .intersection(UnitFlags::HARDWARE_FIXED)
            .union(requested.intersection(settable));
        if modifiers & md::SWP != 0 && requested.contains(UnitFlags::SOFTWARE_WRITE_PROTECT) {
            flags = flags.union(UnitFlags::SOFTWARE_WRITE_PROTECT);
        } else if modifiers & md::SWP == 0 {
            flags = flags.union(self.flags.intersection(UnitFlags::SOFTWARE_WRITE_PROTECT));
        }
        self.flags = flags;
    }

    /// Forget everything the host told us; keep the hardware flags.
    pub(crate) fn make_available(&mut self) {
        self.online = false;
        self.flags = self.flags.intersection(UnitFlags::HARDWARE_FIXED);
    }

    /// The write-protect status a write to this unit would get, if any.
    pub(crate) fn write_lock(&self) -> Option<Status> {
        if self.flags.contains(UnitFlags::SOFTWARE_WRITE_PROTECT) {
            Some(Status::SOFTWARE_WRITE_LOCK)
        } else if self.flags.contains(UnitFlags::HARDWARE_WRITE_PROTECT) {
            Some(Status::HARDWARE_WRITE_LOCK)
        } else {
            None
        }
    }
}
