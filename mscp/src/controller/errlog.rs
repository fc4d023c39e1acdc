//! Messages the port sends without being asked: error log
//! datagrams, the last-fail message and unit attention messages.
use tracing::{event, Level};

use base::prelude::*;

use super::Controller;
use crate::bus::Bus;
use crate::context::Context;
use crate::fault::FatalError;
use crate::packet::PacketId;

/// Error log formats.
const FM_CNT: u8 = 0;
const FM_BAD: u8 = 1;
const FM_SDI: u8 = 3;
const FM_TAP: u8 = 5;

/// Error log flag: the sequence number was reset.
const LF_SNR: u8 = 0x01;

/// End flags for a command whose failure was (or was not) logged.
pub(crate) fn log_flag(logged: bool) -> EndFlags {
    if logged {
        EndFlags::ERROR_LOG
    } else {
        EndFlags::NONE
    }
}

impl Controller {
    /// Start an error log datagram describing the command `cmd` on
    /// unit `n`.  Returns `None` if the host has not asked for error
    /// logs.
    fn error_log_packet(&mut self, cmd: PacketId, n: usize) -> Result<Option<PacketId>, FatalError> {
        if !self.flags.contains(ControllerFlags::THIS_HOST_ERROR_LOG) {
            return Ok(None);
        }
        let id = self.pool.acquire().ok_or(FatalError::NoSuchResource)?;
        let reference = self.pool.get(cmd).reference();
        let sequence = self.log_sequence;
        self.log_sequence = self.log_sequence.wrapping_add(1);
        let [a, b, c, d] = self.controller_id();
        let version = u16::from(self.config.version);
        let pkt = self.pool.get_mut(id);
        pkt.set_long(ELP_REFL, reference);
        pkt.set_word(ELP_UN, n as u16);
        pkt.set_word(ELP_SEQ, sequence);
        pkt.set_word(ELP_CIDA, a);
        pkt.set_word(ELP_CIDB, b);
        pkt.set_word(ELP_CIDC, c);
        pkt.set_word(ELP_CIDD, d);
        pkt.set_word(ELP_VER, version);
        Ok(Some(id))
    }

    fn post_error_log(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
        format: u8,
        event_code: Status,
        length: u16,
    ) -> Result<(), FatalError> {
        let flags = if self.pool.get(id).word(ELP_SEQ) == 0 {
            LF_SNR
        } else {
            0
        };
        let cid = self.connection();
        self.finish_packet(
            id,
            format,
            EndFlags::from_bits(flags),
            event_code,
            length,
            MessageType::Datagram,
            cid,
        );
        event!(Level::DEBUG, "error log {id}: format {format}, event {event_code}");
        self.post_packet(ctx, bus, id, true)
    }

    /// Log a non-existent memory error at `address` during command
    /// `cmd`.  Returns whether a log was sent.
    pub(crate) fn log_host_bus_error(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        cmd: PacketId,
        n: usize,
        address: u32,
    ) -> Result<bool, FatalError> {
        let Some(id) = self.error_log_packet(cmd, n)? else {
            return Ok(false);
        };
        let pkt = self.pool.get_mut(id);
        pkt.set_word(HBE_RSV, 0);
        pkt.set_long(HBE_BADL, address);
        self.post_error_log(ctx, bus, id, FM_BAD, Status::NON_EXISTENT_MEMORY, HBE_LNT)?;
        Ok(true)
    }

    /// Log a disk transfer error at block `lbn`.
    pub(crate) fn log_disk_transfer_error(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        cmd: PacketId,
        n: usize,
        lbn: u32,
        status: Status,
    ) -> Result<bool, FatalError> {
        let Some(id) = self.error_log_packet(cmd, n)? else {
            return Ok(false);
        };
        let uid = self.units[n].drive.uid_class_model();
        let pkt = self.pool.get_mut(id);
        pkt.set_word(DTE_UIDA, n as u16);
        pkt.set_word(DTE_UIDB, 0);
        pkt.set_word(DTE_UIDC, 0);
        pkt.set_word(DTE_UIDD, uid);
        pkt.set_word(DTE_UVER, 0);
        pkt.set_word(DTE_RTRY, 0);
        pkt.set_long(DTE_VSNL, 0o1234 + n as u32);
        pkt.set_long(DTE_HDRL, lbn);
        self.post_error_log(ctx, bus, id, FM_SDI, status, DTE_LNT)?;
        Ok(true)
    }

    /// Log a tape transfer error at the unit's current position.
    pub(crate) fn log_tape_transfer_error(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        cmd: PacketId,
        n: usize,
        status: Status,
    ) -> Result<bool, FatalError> {
        let Some(id) = self.error_log_packet(cmd, n)? else {
            return Ok(false);
        };
        let u = &self.units[n];
        let uid = u.drive.uid_class_model();
        let (unit_version, formatter_version) = match u.drive {
            crate::drive::DriveType::Tape(t) => (t.unit_version, t.formatter_version),
            crate::drive::DriveType::Disk(_) => (0, 0),
        };
        let position = u.tape.objects;
        let pkt = self.pool.get_mut(id);
        pkt.set_word(TLE_UIDA, n as u16);
        pkt.set_word(TLE_UIDA + 1, 0);
        pkt.set_word(TLE_UIDA + 2, 0);
        pkt.set_word(TLE_UIDD, uid);
        pkt.set_word(TLE_UVER, unit_version);
        pkt.set_word(TLE_RTRY, 0);
        pkt.set_long(TLE_POSL, position);
        pkt.set_word(TLE_FVER, formatter_version);
        self.post_error_log(ctx, bus, id, FM_TAP, status, TLE_LNT)?;
        Ok(true)
    }

    /// Report the fatal error which stopped the port before it was
    /// last initialised.
    pub(crate) fn queue_last_fail(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        code: FatalCode,
    ) -> Result<(), FatalError> {
        let id = self.pool.acquire().ok_or(FatalError::NoSuchResource)?;
        let [a, b, c, d] = self.controller_id();
        let version = u16::from(self.config.version);
        let pkt = self.pool.get_mut(id);
        pkt.set_word(PLF_CIDA, a);
        pkt.set_word(PLF_CIDB, b);
        pkt.set_word(PLF_CIDC, c);
        pkt.set_word(PLF_CIDD, d);
        pkt.set_word(PLF_VER, version);
        pkt.set_word(PLF_ERR, code.code());
        self.finish_packet(
            id,
            FM_CNT,
            EndFlags::from_bits(LF_SNR),
            Status::CONTROLLER_ERROR,
            PLF_LNT,
            MessageType::Datagram,
            ConnectionId::Diagnostic,
        );
        event!(Level::INFO, "sending last-fail message for {code}");
        self.post_packet(ctx, bus, id, true)
    }

    /// Tell the host that unit `n` has become available, if it wants
    /// to know.
    pub(crate) fn send_attention(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        n: usize,
    ) -> Result<(), FatalError> {
        if !self.flags.contains(ControllerFlags::ATTENTION) {
            return Ok(());
        }
        let id = self.pool.acquire().ok_or(FatalError::NoSuchResource)?;
        self.pool.get_mut(id).set_word(RSP_UN, n as u16);
        self.put_unit_fields(id, n, false);
        let cid = self.connection();
        self.finish_packet(
            id,
            Opcode::AvailableAttention.code(),
            EndFlags::NONE,
            Status::SUCCESS,
            UNA_LNT,
            MessageType::Sequential,
            cid,
        );
        event!(Level::DEBUG, "unit {n} available attention");
        self.post_packet(ctx, bus, id, true)
    }
}
