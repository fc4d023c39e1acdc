//! ## Disk data transfer commands
//!
//! - ACCESS, COMPARE HOST DATA, ERASE, READ, WRITE:
//!   [`Controller::op_disk_data`]
//!
//! A transfer is validated when it is dispatched and then carried out
//! in chunks of at most `max_transfer` bytes, one chunk each time the
//! unit's timer fires.  The working byte count, buffer address and
//! block number in the command packet track the progress.
use tracing::{event, Level};

use base::opcode::OP_END;
use base::prelude::*;

use super::errlog::log_flag;
use super::Controller;
use crate::bus::Bus;
use crate::context::Context;
use crate::drive::{DriveType, BLOCK_BYTES};
use crate::fault::FatalError;
use crate::packet::PacketId;
use crate::timer::TimerId;
use crate::unit::Medium;

/// How one chunk of a transfer went.
enum Chunk {
    Done,
    /// Host memory did not respond at this address.
    HostError(u32),
    /// The backing store failed.
    DriveError,
    CompareError,
}

fn blocks_spanned(bytes: u32) -> u32 {
    bytes.div_ceil(BLOCK_BYTES)
}

impl Controller {
    pub(crate) fn op_disk_data(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
        opcode: Opcode,
        attr: CommandAttributes,
        n: usize,
    ) -> Result<(), FatalError> {
        let pkt = self.pool.get(id);
        let (bc, ba, lbn) = (pkt.long(RW_BCL), pkt.long(RW_BAL), pkt.long(RW_LBNL));
        if let Some(status) = self.check_disk_transfer(opcode, attr, n, ba, bc, lbn) {
            self.pool.get_mut(id).set_long(RW_BCL, 0);
            let flags = EndFlags::NONE;
            return self.respond(ctx, bus, id, opcode.end_code(), flags, status, RW_LNT_D);
        }
        let pkt = self.pool.get_mut(id);
        pkt.set_long(RW_WBCL, bc);
        pkt.set_long(RW_WBAL, ba);
        pkt.set_long(RW_WBLL, lbn);
        if bc == 0 {
            return self.respond(ctx, bus, id, opcode.end_code(), EndFlags::NONE, Status::SUCCESS, RW_LNT_D);
        }
        event!(Level::DEBUG, "unit {n}: {opcode} of {bc} bytes at block {lbn}, buffer {ba:o}");
        self.units[n].current = Some(id);
        self.arm(ctx, TimerId::Unit(n));
        Ok(())
    }

    fn check_disk_transfer(
        &self,
        opcode: Opcode,
        attr: CommandAttributes,
        n: usize,
        ba: u32,
        bc: u32,
        lbn: u32,
    ) -> Option<Status> {
        if let Some(status) = self.unit_unavailable(n) {
            return Some(status);
        }
        let u = &self.units[n];
        let uses_buffer = !matches!(opcode, Opcode::Access | Opcode::Erase);
        if uses_buffer && ba & 1 != 0 {
            return Some(Status::ODD_ADDRESS);
        }
        if bc & 1 != 0 {
            return Some(Status::ODD_BYTE_COUNT);
        }
        let DriveType::Disk(disk) = u.drive else {
            return Some(Status::INVALID_OPCODE);
        };
        if u64::from(lbn) + u64::from(blocks_spanned(bc)) > u64::from(disk.blocks) {
            return Some(Status::INVALID_LBN);
        }
        if attr.write {
            return u.write_lock();
        }
        None
    }

    /// Move the next chunk of unit `n`'s transfer.
    pub(crate) fn disk_transfer_chunk(&mut self, ctx: &Context, bus: &mut dyn Bus, n: usize) -> Result<(), FatalError> {
        let Some(id) = self.units[n].current else {
            return Ok(());
        };
        let pkt = self.pool.get(id);
        let opcode = Opcode::from_code(pkt.opcode_byte());
        let (wbc, wba, wbl) = (pkt.long(RW_WBCL), pkt.long(RW_WBAL), pkt.long(RW_WBLL));
        let chunk = wbc.min(self.config.max_transfer);
        let len = chunk as usize;

        let u = &mut self.units[n];
        let Some(Medium::Disk(disk)) = u.medium.as_mut() else {
            return self.complete_disk_transfer(ctx, bus, n, EndFlags::NONE, Status::NO_VOLUME);
        };
        u.chunks += 1;
        let mut data = vec![0u8; len];
        let outcome = match opcode {
            Some(Opcode::Read) => match disk.read(wbl, &mut data) {
                Err(_) => Chunk::DriveError,
                Ok(()) => match bus.write_block(wba, &data) {
                    0 => Chunk::Done,
                    missed => Chunk::HostError(wba + (len - missed) as u32),
                },
            },
            Some(Opcode::Write) => {
                let missed = bus.read_block(wba, &mut data);
                let good = len - missed;
                if good > 0 && disk.write(wbl, &data[..good]).is_err() {
                    Chunk::DriveError
                } else if missed != 0 {
                    Chunk::HostError(wba + good as u32)
                } else {
                    Chunk::Done
                }
            }
            Some(Opcode::Erase) => match disk.write(wbl, &data) {
                Ok(()) => Chunk::Done,
                Err(_) => Chunk::DriveError,
            },
            Some(Opcode::Access) => match disk.read(wbl, &mut data) {
                Ok(()) => Chunk::Done,
                Err(_) => Chunk::DriveError,
            },
            Some(Opcode::Compare) => match disk.read(wbl, &mut data) {
                Err(_) => Chunk::DriveError,
                Ok(()) => {
                    let mut host = vec![0u8; len];
                    match bus.read_block(wba, &mut host) {
                        0 if host == data => Chunk::Done,
                        0 => Chunk::CompareError,
                        missed => Chunk::HostError(wba + (len - missed) as u32),
                    }
                }
            },
            _ => Chunk::DriveError,
        };

        match outcome {
            Chunk::Done => {
                let remaining = wbc - chunk;
                let pkt = self.pool.get_mut(id);
                pkt.set_long(RW_WBCL, remaining);
                pkt.set_long(RW_WBAL, wba + chunk);
                pkt.set_long(RW_WBLL, wbl + blocks_spanned(chunk));
                event!(Level::TRACE, "unit {n}: moved {chunk} bytes, {remaining} to go");
                if remaining == 0 {
                    self.complete_disk_transfer(ctx, bus, n, EndFlags::NONE, Status::SUCCESS)
                } else {
                    self.arm(ctx, TimerId::Unit(n));
                    Ok(())
                }
            }
            Chunk::HostError(address) => {
                event!(Level::WARN, "unit {n}: non-existent memory at {address:o}");
                let flags = log_flag(self.log_host_bus_error(ctx, bus, id, n, address)?);
                self.complete_disk_transfer(ctx, bus, n, flags, Status::NON_EXISTENT_MEMORY)
            }
            Chunk::DriveError => {
                event!(Level::WARN, "unit {n}: backing store failed at block {wbl}");
                let flags = log_flag(self.log_disk_transfer_error(ctx, bus, id, n, wbl, Status::DRIVE_ERROR)?);
                self.complete_disk_transfer(ctx, bus, n, flags, Status::DRIVE_ERROR)
            }
            Chunk::CompareError => self.complete_disk_transfer(ctx, bus, n, EndFlags::NONE, Status::COMPARE_ERROR),
        }
    }

    /// End unit `n`'s transfer, reporting the bytes moved.
    fn complete_disk_transfer(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        n: usize,
        flags: EndFlags,
        status: Status,
    ) -> Result<(), FatalError> {
        let Some(id) = self.units[n].current.take() else {
            return Ok(());
        };
        let pkt = self.pool.get_mut(id);
        let moved = pkt.long(RW_BCL) - pkt.long(RW_WBCL);
        pkt.set_long(RW_BCL, moved);
        let opcode = pkt.opcode_byte() | OP_END;
        self.respond(ctx, bus, id, opcode, flags, status, RW_LNT_D)?;
        if !self.units[n].pending.is_empty() {
            self.arm(ctx, TimerId::Queue);
        }
        Ok(())
    }
}
