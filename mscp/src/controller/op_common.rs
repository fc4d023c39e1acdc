//! ## Commands common to disks and tapes
//!
//! - ABORT: [`Controller::op_abort`]
//! - GET COMMAND STATUS: [`Controller::op_get_command_status`]
//! - GET UNIT STATUS: [`Controller::op_get_unit_status`]
//! - SET CONTROLLER CHARACTERISTICS: [`Controller::op_set_controller_characteristics`]
//! - AVAILABLE: [`Controller::op_available`]
//! - ONLINE: [`Controller::op_online`]
//! - SET UNIT CHARACTERISTICS: [`Controller::op_set_unit_characteristics`]
//! - DETERMINE ACCESS PATHS, COMPARE CONTROLLER DATA, FLUSH:
//!   [`Controller::op_no_operation`]
//!
//! Every handler here finishes its command before it returns.
use tracing::{event, Level};

use base::opcode::OP_END;
use base::prelude::*;
use base::uqssp::header_ctc;

use super::Controller;
use crate::bus::Bus;
use crate::context::Context;
use crate::drive::DriveType;
use crate::fault::FatalError;
use crate::packet::PacketId;
use crate::timer::TimerId;

/// Host timeouts are extended by this many ticks.
const HOST_TIMEOUT_MARGIN: u16 = 2;

impl Controller {
    /// Turn packet `id` into a message: opcode (or error log format)
    /// and flags, status (or event code), length and header.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn finish_packet(
        &mut self,
        id: PacketId,
        opcode: u8,
        flags: EndFlags,
        status: Status,
        length: u16,
        typ: MessageType,
        cid: ConnectionId,
    ) {
        let pkt = self.pool.get_mut(id);
        pkt.set_word(RSP_OPF, u16::from_le_bytes([opcode, flags.bits()]));
        pkt.set_word(RSP_STS, status.bits());
        pkt.set_word(UQ_LNT, length);
        pkt.set_word(UQ_CTC, header_ctc(0, typ, cid));
    }

    /// Answer a command with an end message.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn respond(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
        opcode: u8,
        flags: EndFlags,
        status: Status,
        length: u16,
    ) -> Result<(), FatalError> {
        if !status.is_success() {
            event!(Level::DEBUG, "{id} (opcode {opcode:#04x}) ends with {status}");
        }
        let cid = self.connection();
        self.finish_packet(id, opcode, flags, status, length, MessageType::Sequential, cid);
        self.post_packet(ctx, bus, id, true)
    }

    /// End flags which describe the state of unit `n`.
    pub(crate) fn end_flags(&self, n: usize) -> EndFlags {
        let mut flags = EndFlags::NONE;
        if let Some(u) = self.units.get(n) {
            if u.tape.serious_exception {
                flags = flags.union(EndFlags::SERIOUS_EXCEPTION);
            }
            if u.tape.position_lost {
                flags = flags.union(EndFlags::POSITION_LOST);
            }
        }
        flags
    }

    /// Fill in the unit description shared by Online, Set Unit
    /// Characteristics and Get Unit Status.  With `all`, also the
    /// size (disk) or format (tape) fields of Online.
    pub(crate) fn put_unit_fields(&mut self, id: PacketId, n: usize, all: bool) {
        let u = &self.units[n];
        let pkt = self.pool.get_mut(id);
        let lu = u.number as u16;
        pkt.set_word(ONL_MLUN, lu);
        pkt.set_word(ONL_UFL, u.flags.bits());
        pkt.set_long(ONL_RSVL, 0);
        pkt.set_word(ONL_UIDA, lu);
        pkt.set_word(ONL_UIDB, 0);
        pkt.set_word(ONL_UIDC, 0);
        pkt.set_word(ONL_UIDD, u.drive.uid_class_model());
        pkt.set_long(ONL_MEDL, u.drive.media());
        if !all {
            return;
        }
        pkt.set_word(ONL_SHUN, 0);
        pkt.set_word(ONL_SHST, 0);
        match u.drive {
            DriveType::Disk(d) => {
                pkt.set_long(ONL_SIZL, d.blocks);
                pkt.set_long(ONL_VSNL, 0o1234 + u32::from(lu));
            }
            DriveType::Tape(t) => {
                pkt.set_word(TONL_FMT, t.format);
                pkt.set_word(TONL_SPD, 0);
                pkt.set_long(TONL_MAXL, t.max_record);
            }
        }
    }

    /// The status of a unit that a command addresses, if it cannot
    /// take commands which need the medium.
    pub(crate) fn unit_unavailable(&self, n: usize) -> Option<Status> {
        let u = &self.units[n];
        if !u.attached() {
            Some(Status::NO_VOLUME)
        } else if !u.online {
            Some(Status::AVAILABLE)
        } else {
            None
        }
    }

    /// Controller identifier: class 1 (mass storage controller) and
    /// the model.
    pub(crate) fn controller_id(&self) -> [u16; 4] {
        [0, 0, 0, (1 << 8) | u16::from(self.config.model)]
    }

    pub(crate) fn op_abort(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
    ) -> Result<(), FatalError> {
        let lu = self.packet_unit(id);
        let Some(n) = self.unit_index(lu) else {
            return self.respond(ctx, bus, id, Opcode::Abort.end_code(), EndFlags::NONE, Status::OFFLINE, ABO_LNT);
        };
        let target = self.pool.get(id).long(ABO_REFL);
        let unit = &mut self.units[n];
        let mut victim = None;
        if let Some(current) = unit.current {
            if self.pool.get(current).reference() == target {
                unit.current = None;
                self.timers.cancel(TimerId::Unit(n));
                victim = Some(current);
            }
        }
        if victim.is_none() {
            if let Some(found) = self.pool.find(&unit.pending, |p| p.reference() == target) {
                let mut pending = unit.pending;
                self.pool.remove(&mut pending, found);
                unit.pending = pending;
                victim = Some(found);
            }
        }
        let more_work = !self.units[n].pending.is_empty();
        if let Some(victim) = victim {
            event!(Level::DEBUG, "abort of {victim} (reference {target:#x}) on unit {n}");
            let opcode = self.pool.get(victim).opcode_byte() | OP_END;
            let flags = self.end_flags(n);
            self.respond(ctx, bus, victim, opcode, flags, Status::ABORTED, RSP_LNT)?;
            if more_work {
                self.arm(ctx, TimerId::Queue);
            }
        }
        self.respond(ctx, bus, id, Opcode::Abort.end_code(), EndFlags::NONE, Status::SUCCESS, ABO_LNT)
    }

    pub(crate) fn op_get_command_status(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
    ) -> Result<(), FatalError> {
        let lu = self.packet_unit(id);
        let target = self.pool.get(id).long(GCS_REFL);
        let protocol = self.config.protocol;
        let remaining = self
            .unit_index(lu)
            .and_then(|n| self.units[n].current)
            .map(|current| self.pool.get(current))
            .filter(|p| p.reference() == target)
            .filter(|p| {
                Opcode::from_code(p.opcode_byte())
                    .and_then(|op| op.attributes(protocol))
                    .is_some_and(|attr| attr.transfer)
            })
            .map(|p| match protocol {
                Protocol::Mscp => p.long(RW_WBCL),
                Protocol::Tmscp => p.long(RW_BCL),
            })
            .unwrap_or(0);
        self.pool.get_mut(id).set_long(GCS_STSL, remaining);
        self.respond(
            ctx,
            bus,
            id,
            Opcode::GetCommandStatus.end_code(),
            EndFlags::NONE,
            Status::SUCCESS,
            GCS_LNT,
        )
    }

    pub(crate) fn op_get_unit_status(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
    ) -> Result<(), FatalError> {
        let mut lu = self.packet_unit(id);
        if self.pool.get(id).modifiers() & md::NXU != 0 && self.unit_index(lu).is_none() {
            lu = 0;
            self.pool.get_mut(id).set_word(RSP_UN, lu);
        }
        let length = match self.config.protocol {
            Protocol::Mscp => GUS_LNT_D,
            Protocol::Tmscp => GUS_LNT_T,
        };
        let Some(n) = self.unit_index(lu) else {
            return self.respond(ctx, bus, id, Opcode::GetUnitStatus.end_code(), EndFlags::NONE, Status::OFFLINE, length);
        };
        let status = match self.unit_unavailable(n) {
            Some(Status::NO_VOLUME) => Status::NO_VOLUME,
            Some(_) => Status::AVAILABLE,
            None => Status::SUCCESS,
        };
        self.put_unit_fields(id, n, false);
        let drive = self.units[n].drive;
        let pkt = self.pool.get_mut(id);
        pkt.set_word(GUS_SHUN, lu);
        pkt.set_word(GUS_SHST, 0);
        match drive {
            DriveType::Disk(d) => {
                pkt.set_word(GUS_TRK, d.sectors);
                pkt.set_word(GUS_GRP, d.tracks_per_group);
                pkt.set_word(GUS_CYL, d.groups_per_cylinder);
                pkt.set_word(GUS_UVER, 0);
                pkt.set_word(GUS_RCTS, d.rct_size);
                pkt.set_word(GUS_RBSC, (1 << 8) | d.rbns);
            }
            DriveType::Tape(t) => {
                pkt.set_word(GUS_FMT, t.format);
                pkt.set_word(GUS_SPEED, 0);
                pkt.set_word(GUS_MENU, t.menu);
                pkt.set_word(GUS_CAP, 0);
                pkt.set_word(GUS_FVER, t.formatter_version);
            }
        }
        let flags = self.end_flags(n);
        self.respond(ctx, bus, id, Opcode::GetUnitStatus.end_code(), flags, status, length)
    }

    pub(crate) fn op_set_controller_characteristics(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
    ) -> Result<(), FatalError> {
        let pkt = self.pool.get(id);
        let (version, requested_flags, requested_timeout) =
            (pkt.word(SCC_MSV), pkt.word(SCC_CFL), pkt.word(SCC_TMO));
        let status = if version != 0 {
            event!(Level::WARN, "host asked for MSCP version {version}");
            for word in SCC_CFL..=SCC_MBCH {
                self.pool.get_mut(id).set_word(word, 0);
            }
            Status::INVALID_VERSION
        } else {
            self.flags = self.flags.updated_by_host(requested_flags);
            self.host_timeout = if requested_timeout == 0 {
                0
            } else {
                requested_timeout.saturating_add(HOST_TIMEOUT_MARGIN)
            };
            self.host_timer = self.host_timeout;
            event!(
                Level::DEBUG,
                "controller flags now {:#06x}, host timeout {}",
                self.flags.bits(),
                self.host_timeout
            );
            let [a, b, c, d] = self.controller_id();
            let flags = self.flags.bits();
            let timeout = self.config.controller_timeout;
            let version = u16::from(self.config.version);
            let pkt = self.pool.get_mut(id);
            pkt.set_word(SCC_CFL, flags);
            pkt.set_word(SCC_TMO, timeout);
            pkt.set_word(SCC_VER, version);
            pkt.set_word(SCC_CIDA, a);
            pkt.set_word(SCC_CIDB, b);
            pkt.set_word(SCC_CIDC, c);
            pkt.set_word(SCC_CIDD, d);
            pkt.set_long(SCC_MBCL, 0);
            Status::SUCCESS
        };
        self.respond(
            ctx,
            bus,
            id,
            Opcode::SetControllerCharacteristics.end_code(),
            EndFlags::NONE,
            status,
            SCC_LNT,
        )
    }

    pub(crate) fn op_available(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
        n: usize,
    ) -> Result<(), FatalError> {
        let modifiers = self.pool.get(id).modifiers();
        let protocol = self.config.protocol;
        let u = &mut self.units[n];
        let status = if u.tape.serious_exception {
            Status::SERIOUS_EXCEPTION
        } else {
            u.make_available();
            if let Some(crate::unit::Medium::Tape(tape)) = u.medium.as_mut() {
                tape.rewind();
            }
            u.tape.objects = 0;
            u.tape.after_tape_mark = false;
            u.tape.position_lost = false;
            if protocol == Protocol::Tmscp && modifiers & md::UNL != 0 && u.medium.take().is_some() {
                event!(Level::INFO, "unit {n} unloaded");
                u.flags = UnitFlags::NONE;
            }
            Status::SUCCESS
        };
        let flags = self.end_flags(n);
        self.respond(ctx, bus, id, Opcode::Available.end_code(), flags, status, AVL_LNT)
    }

    pub(crate) fn op_online(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
        n: usize,
    ) -> Result<(), FatalError> {
        let (requested, modifiers) = {
            let pkt = self.pool.get(id);
            (pkt.word(ONL_UFL), pkt.modifiers())
        };
        let settable = self.settable_flags();
        let u = &mut self.units[n];
        let status = if !u.attached() {
            Status::NO_VOLUME
        } else if u.online {
            Status::ALREADY_ONLINE
        } else {
            u.online = true;
            u.apply_host_flags(requested, modifiers, settable);
            if let Some(crate::unit::Medium::Tape(tape)) = u.medium.as_mut() {
                tape.rewind();
                u.tape = Default::default();
            }
            event!(Level::DEBUG, "unit {n} online, flags {:#06x}", u.flags.bits());
            Status::SUCCESS
        };
        self.put_unit_fields(id, n, true);
        self.pool.get_mut(id).set_word(ONL_SHUN, n as u16);
        let flags = self.end_flags(n);
        self.respond(ctx, bus, id, Opcode::Online.end_code(), flags, status, ONL_LNT)
    }

    pub(crate) fn op_set_unit_characteristics(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
        n: usize,
    ) -> Result<(), FatalError> {
        let (requested, modifiers) = {
            let pkt = self.pool.get(id);
            (pkt.word(ONL_UFL), pkt.modifiers())
        };
        let settable = self.settable_flags();
        let u = &mut self.units[n];
        let status = if u.attached() {
            u.apply_host_flags(requested, modifiers, settable);
            Status::SUCCESS
        } else {
            Status::NO_VOLUME
        };
        self.put_unit_fields(id, n, true);
        let flags = self.end_flags(n);
        self.respond(
            ctx,
            bus,
            id,
            Opcode::SetUnitCharacteristics.end_code(),
            flags,
            status,
            ONL_LNT,
        )
    }

    /// Commands which have nothing to do in an emulated drive, beyond
    /// reporting whether the unit is there.
    pub(crate) fn op_no_operation(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
        opcode: Opcode,
        n: usize,
    ) -> Result<(), FatalError> {
        let status = if self.units[n].attached() {
            Status::SUCCESS
        } else {
            Status::NO_VOLUME
        };
        let flags = self.end_flags(n);
        self.respond(ctx, bus, id, opcode.end_code(), flags, status, RSP_LNT)
    }

    fn settable_flags(&self) -> UnitFlags {
        match self.config.protocol {
            Protocol::Mscp => UnitFlags::HOST_SETTABLE_DISK,
            Protocol::Tmscp => UnitFlags::HOST_SETTABLE_TAPE,
        }
    }
}
