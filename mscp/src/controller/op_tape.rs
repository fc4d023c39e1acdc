//! ## Tape motion commands
//!
//! - ACCESS, COMPARE HOST DATA, READ (forward and reverse), WRITE,
//!   WRITE TAPE MARK, ERASE, ERASE GAP, REPOSITION, FLUSH:
//!   [`Controller::op_tape_motion`]
//!
//! Commands are checked when they are dispatched and carried out when
//! the unit's timer fires.  Any motion which does not end in success
//! puts the unit into the serious exception state; until a command
//! carrying the clear-serious-exception modifier arrives, every
//! further motion command is refused.
use tracing::{event, Level};

use base::opcode::OP_END;
use base::prelude::*;

use super::errlog::log_flag;
use super::Controller;
use crate::bus::Bus;
use crate::context::Context;
use crate::drive::DriveType;
use crate::fault::FatalError;
use crate::packet::PacketId;
use crate::store::{StoreError, TapeImage, TapeStatus};
use crate::timer::TimerId;
use crate::unit::{Image, Medium, TapeState};

/// What a motion command did, for its end message.
#[derive(Debug)]
struct Motion {
    status: Status,
    /// Bytes moved to or from the host.
    bytes: u32,
    /// Length of the record passed over.
    record_size: u32,
    /// Records (or objects) skipped by a reposition.
    records: u32,
    /// Tape marks skipped by a reposition.
    marks: u32,
    /// Host memory failed at this address.
    host_error: Option<u32>,
}

impl Motion {
    fn new() -> Motion {
        Motion {
            status: Status::SUCCESS,
            bytes: 0,
            record_size: 0,
            records: 0,
            marks: 0,
            host_error: None,
        }
    }

    fn ended(status: Status) -> Motion {
        Motion {
            status,
            ..Motion::new()
        }
    }
}

fn status_of(e: &TapeStatus) -> Status {
    match e {
        TapeStatus::TapeMark => Status::TAPE_MARK,
        TapeStatus::BeginningOfTape => Status::BOT_ENCOUNTERED,
        TapeStatus::EndOfMedium => Status::DATA_ERROR,
        TapeStatus::Error(StoreError::BadRecord { .. }) => Status::READ_ERROR,
        TapeStatus::Error(StoreError::Io(_)) => Status::DRIVE_ERROR,
    }
}

/// Account for the head moving over one object.  A tape mark comes
/// back as `Ok(None)`.
fn count_object<T>(
    state: &mut TapeState,
    reverse: bool,
    moved: Result<T, TapeStatus>,
) -> Result<Option<T>, TapeStatus> {
    let found = match moved {
        Ok(x) => Some(x),
        Err(TapeStatus::TapeMark) => None,
        Err(e) => return Err(e),
    };
    state.objects = if reverse {
        state.objects.saturating_sub(1)
    } else {
        state.objects + 1
    };
    state.after_tape_mark = found.is_none() && !reverse;
    Ok(found)
}

fn space(tape: &mut TapeImage<Image>, state: &mut TapeState, reverse: bool) -> Result<Option<u32>, TapeStatus> {
    let moved = if reverse {
        tape.space_reverse()
    } else {
        tape.space_forward()
    };
    count_object(state, reverse, moved)
}

/// Carry out a REPOSITION.  With the object count modifier, `records`
/// counts records and tape marks alike; otherwise the tape first
/// passes `marks` tape marks and then `records` records, stopping at
/// any tape mark in the second phase.
fn reposition(
    tape: &mut TapeImage<Image>,
    state: &mut TapeState,
    modifiers: u16,
    records: u32,
    marks: u32,
) -> Motion {
    let mut motion = Motion::new();
    if modifiers & md::RWD != 0 {
        tape.rewind();
        *state = TapeState {
            serious_exception: state.serious_exception,
            ..TapeState::default()
        };
    }
    let reverse = modifiers & md::REV != 0;
    let detect_leot = modifiers & md::DLE != 0 && !reverse;

    if modifiers & md::OBC != 0 {
        while motion.records < records {
            let after_mark = state.after_tape_mark;
            match space(tape, state, reverse) {
                Ok(found) => {
                    motion.records += 1;
                    if found.is_none() && after_mark && detect_leot {
                        motion.status = Status::LEOT_DETECTED;
                        return motion;
                    }
                }
                Err(e) => {
                    motion.status = status_of(&e);
                    return motion;
                }
            }
        }
        return motion;
    }

    while motion.marks < marks {
        let after_mark = state.after_tape_mark;
        match space(tape, state, reverse) {
            Ok(Some(_)) => (),
            Ok(None) => {
                motion.marks += 1;
                if after_mark && detect_leot {
                    motion.status = Status::LEOT_DETECTED;
                    return motion;
                }
            }
            Err(e) => {
                motion.status = status_of(&e);
                return motion;
            }
        }
    }
    while motion.records < records {
        match space(tape, state, reverse) {
            Ok(Some(_)) => motion.records += 1,
            Ok(None) => {
                motion.status = Status::TAPE_MARK;
                return motion;
            }
            Err(e) => {
                motion.status = status_of(&e);
                return motion;
            }
        }
    }
    motion
}

impl Controller {
    pub(crate) fn op_tape_motion(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
        opcode: Opcode,
        attr: CommandAttributes,
        n: usize,
    ) -> Result<(), FatalError> {
        let pkt = self.pool.get(id);
        let (bc, modifiers) = (pkt.long(RW_BCL), pkt.modifiers());
        if let Some(status) = self.check_tape_motion(opcode, attr, n, modifiers, bc) {
            let flags = self.end_flags(n);
            let length = if opcode == Opcode::Reposition {
                POS_LNT
            } else {
                self.pool.get_mut(id).set_long(RW_BCL, 0);
                RW_LNT_T
            };
            return self.respond(ctx, bus, id, opcode.end_code(), flags, status, length);
        }
        if opcode == Opcode::Flush {
            let flags = self.end_flags(n);
            return self.respond(ctx, bus, id, opcode.end_code(), flags, Status::SUCCESS, RW_LNT_T);
        }
        event!(Level::DEBUG, "unit {n}: {opcode}, modifiers {modifiers:#06x}");
        self.units[n].current = Some(id);
        self.arm(ctx, TimerId::Unit(n));
        Ok(())
    }

    fn check_tape_motion(
        &self,
        opcode: Opcode,
        attr: CommandAttributes,
        n: usize,
        modifiers: u16,
        bc: u32,
    ) -> Option<Status> {
        let u = &self.units[n];
        if u.tape.serious_exception {
            return Some(Status::SERIOUS_EXCEPTION);
        }
        if let Some(status) = self.unit_unavailable(n) {
            return Some(status);
        }
        if attr.write {
            if let Some(status) = u.write_lock() {
                return Some(status);
            }
        }
        let rewinding = opcode == Opcode::Reposition && modifiers & md::RWD != 0;
        if u.tape.position_lost && !rewinding && opcode != Opcode::Flush {
            return Some(Status::POSITION_LOST);
        }
        let max_record = match u.drive {
            DriveType::Tape(t) => t.max_record,
            DriveType::Disk(_) => 0,
        };
        let data = matches!(
            opcode,
            Opcode::Read | Opcode::Write | Opcode::Compare | Opcode::Access
        );
        if data && (bc == 0 || bc > max_record) {
            return Some(Status::INVALID_BYTE_COUNT);
        }
        None
    }

    /// Carry out unit `n`'s motion command.
    pub(crate) fn tape_service(&mut self, ctx: &Context, bus: &mut dyn Bus, n: usize) -> Result<(), FatalError> {
        let Some(id) = self.units[n].current else {
            return Ok(());
        };
        let pkt = self.pool.get(id);
        let opcode = Opcode::from_code(pkt.opcode_byte());
        let modifiers = pkt.modifiers();
        let (bc, ba) = (pkt.long(RW_BCL), pkt.long(RW_BAL));
        let (records, marks) = (pkt.long(POS_RCL), pkt.long(POS_TMCL));

        let u = &mut self.units[n];
        let Some(Medium::Tape(tape)) = u.medium.as_mut() else {
            return self.complete_tape_motion(ctx, bus, n, EndFlags::NONE, Motion::ended(Status::NO_VOLUME));
        };
        let state = &mut u.tape;
        u.chunks += 1;
        let reverse = modifiers & md::REV != 0;
        let motion = match opcode {
            Some(op @ (Opcode::Read | Opcode::Access | Opcode::Compare)) => {
                let moved = if reverse {
                    tape.read_reverse()
                } else {
                    tape.read_forward()
                };
                match count_object(state, reverse, moved) {
                    Ok(Some(data)) => transfer_record(bus, op, reverse, data, ba, bc),
                    Ok(None) => Motion::ended(Status::TAPE_MARK),
                    Err(e) => Motion::ended(status_of(&e)),
                }
            }
            Some(Opcode::Write) => {
                let mut data = vec![0u8; bc as usize];
                match bus.read_block(ba, &mut data) {
                    0 => match count_object(state, false, tape.write_record(&data)) {
                        Ok(_) => Motion {
                            bytes: bc,
                            record_size: bc,
                            ..Motion::new()
                        },
                        Err(e) => Motion::ended(status_of(&e)),
                    },
                    missed => Motion {
                        host_error: Some(ba + (bc - missed as u32)),
                        ..Motion::ended(Status::NON_EXISTENT_MEMORY)
                    },
                }
            }
            Some(Opcode::WriteTapeMark) => match tape.write_mark() {
                Ok(()) => {
                    state.objects += 1;
                    state.after_tape_mark = true;
                    Motion::new()
                }
                Err(e) => Motion::ended(status_of(&e)),
            },
            Some(Opcode::Erase) => match tape.erase() {
                Ok(()) => Motion::new(),
                Err(e) => Motion::ended(status_of(&e)),
            },
            Some(Opcode::EraseGap) => Motion::new(),
            Some(Opcode::Reposition) => reposition(tape, state, modifiers, records, marks),
            _ => Motion::ended(Status::INVALID_OPCODE),
        };

        let mut flags = EndFlags::NONE;
        if let Some(address) = motion.host_error {
            event!(Level::WARN, "unit {n}: non-existent memory at {address:o}");
            flags = log_flag(self.log_host_bus_error(ctx, bus, id, n, address)?);
        } else if motion.status == Status::DRIVE_ERROR {
            event!(Level::WARN, "unit {n}: tape drive error, position lost");
            self.units[n].tape.position_lost = true;
            flags = log_flag(self.log_tape_transfer_error(ctx, bus, id, n, Status::DRIVE_ERROR)?);
        }
        self.complete_tape_motion(ctx, bus, n, flags, motion)
    }

    fn complete_tape_motion(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        n: usize,
        flags: EndFlags,
        motion: Motion,
    ) -> Result<(), FatalError> {
        let Some(id) = self.units[n].current.take() else {
            return Ok(());
        };
        if !motion.status.is_success() {
            self.units[n].tape.serious_exception = true;
        }
        let flags = flags.union(self.end_flags(n));
        let objects = self.units[n].tape.objects;
        let pkt = self.pool.get_mut(id);
        let code = pkt.opcode_byte();
        let length = if Opcode::from_code(code) == Some(Opcode::Reposition) {
            pkt.set_long(POS_RCL, motion.records);
            pkt.set_long(POS_TMCL, motion.marks);
            pkt.set_long(POS_POSL, objects);
            POS_LNT
        } else {
            pkt.set_long(RW_BCL, motion.bytes);
            pkt.set_long(RW_POSL, objects);
            pkt.set_long(RW_RSZL, motion.record_size);
            RW_LNT_T
        };
        self.respond(ctx, bus, id, code | OP_END, flags, motion.status, length)?;
        if !self.units[n].pending.is_empty() {
            self.arm(ctx, TimerId::Queue);
        }
        Ok(())
    }
}

/// Move (or compare) a record which has just been read.  A reverse
/// read delivers the record last byte first.
fn transfer_record(bus: &mut dyn Bus, op: Opcode, reverse: bool, mut data: Vec<u8>, ba: u32, bc: u32) -> Motion {
    let record_size = data.len() as u32;
    let wanted = record_size.min(bc);
    if reverse {
        data.reverse();
    }
    data.truncate(wanted as usize);
    let mut motion = Motion {
        bytes: wanted,
        record_size,
        ..Motion::new()
    };
    match op {
        Opcode::Read => {
            let missed = bus.write_block(ba, &data);
            if missed != 0 {
                motion.host_error = Some(ba + (wanted - missed as u32));
                motion.status = Status::NON_EXISTENT_MEMORY;
                return motion;
            }
        }
        Opcode::Compare => {
            let mut host = vec![0u8; data.len()];
            let missed = bus.read_block(ba, &mut host);
            if missed != 0 {
                motion.host_error = Some(ba + (wanted - missed as u32));
                motion.status = Status::NON_EXISTENT_MEMORY;
                return motion;
            }
            if host != data {
                motion.status = Status::COMPARE_ERROR;
                return motion;
            }
        }
        _ => (),
    }
    if record_size > bc {
        motion.status = Status::RECORD_TRUNCATED;
    }
    motion
}
