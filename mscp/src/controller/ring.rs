//! Ring I/O: descriptor and packet traffic between the port and the
//! rings in host memory.  Every host memory access here which fails
//! is fatal to the port.
use tracing::{event, Level};

use base::prelude::*;
use base::opcode::OP_END;
use base::uqssp::{COMM_CI, COMM_RI, DESCRIPTOR_BYTES, MAX_CREDIT_GRANT, UQ_M_CR};

use super::Controller;
use crate::bus::Bus;
use crate::context::Context;
use crate::fault::FatalError;
use crate::info::RingInfo;
use crate::packet::{PacketId, PACKET_BYTES};
use crate::timer::TimerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RingKind {
    Command,
    Response,
}

/// Geometry and current position of one descriptor ring.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Ring {
    pub(crate) base: u32,
    pub(crate) slots: u32,
    pub(crate) index: u32,
}

impl Ring {
    pub(crate) fn new(base: u32, slots: u32) -> Ring {
        Ring {
            base,
            slots,
            index: 0,
        }
    }

    pub(crate) fn current_address(&self) -> u32 {
        self.base + self.index * DESCRIPTOR_BYTES
    }

    pub(crate) fn previous_address(&self) -> u32 {
        let previous = (self.index + self.slots - 1) % self.slots;
        self.base + previous * DESCRIPTOR_BYTES
    }

    pub(crate) fn advance(&mut self) {
        self.index = (self.index + 1) % self.slots;
    }

    pub(crate) fn byte_length(&self) -> u32 {
        self.slots * DESCRIPTOR_BYTES
    }

    pub(crate) fn info(&self) -> RingInfo {
        RingInfo {
            base: self.base,
            slots: self.slots,
            index: self.index,
        }
    }
}

fn read_u32(bus: &mut dyn Bus, address: u32) -> Option<u32> {
    let mut buf = [0u8; 4];
    if bus.read_block(address, &mut buf) == 0 {
        Some(u32::from_le_bytes(buf))
    } else {
        None
    }
}

impl Controller {
    fn ring(&self, kind: RingKind) -> &Ring {
        match kind {
            RingKind::Command => &self.command_ring,
            RingKind::Response => &self.response_ring,
        }
    }

    fn ring_mut(&mut self, kind: RingKind) -> &mut Ring {
        match kind {
            RingKind::Command => &mut self.command_ring,
            RingKind::Response => &mut self.response_ring,
        }
    }

    pub(crate) fn get_descriptor(
        &mut self,
        bus: &mut dyn Bus,
        kind: RingKind,
    ) -> Result<Descriptor, FatalError> {
        let address = self.ring(kind).current_address();
        match read_u32(bus, address) {
            Some(bits) => {
                event!(Level::TRACE, "{kind:?} ring descriptor at {address:o} is {bits:#010x}");
                Ok(Descriptor::from_bits(bits))
            }
            None => Err(FatalError::QueueRead { address }),
        }
    }

    /// Hand the current slot back to the host and step to the next
    /// one.  If the host asked for an interrupt, it gets one when the
    /// ring was full from its point of view (the previous slot still
    /// belongs to the port) or has only one slot.
    pub(crate) fn put_descriptor(
        &mut self,
        bus: &mut dyn Bus,
        kind: RingKind,
        desc: Descriptor,
    ) -> Result<(), FatalError> {
        let ring = *self.ring(kind);
        let address = ring.current_address();
        let released = desc.released();
        if bus.write_block(address, &released.bits().to_le_bytes()) != 0 {
            return Err(FatalError::QueueWrite { address });
        }
        if desc.wants_interrupt() {
            let interrupt = if ring.slots <= 1 {
                true
            } else {
                let previous = ring.previous_address();
                match read_u32(bus, previous) {
                    Some(bits) => Descriptor::from_bits(bits).owned_by_port(),
                    None => return Err(FatalError::QueueRead { address: previous }),
                }
            };
            if interrupt {
                self.ring_interrupt(bus, kind)?;
            }
        }
        self.ring_mut(kind).advance();
        Ok(())
    }

    /// Set the ring's interrupt flag word in the communication area
    /// and interrupt the host.
    fn ring_interrupt(&mut self, bus: &mut dyn Bus, kind: RingKind) -> Result<(), FatalError> {
        let offset = match kind {
            RingKind::Command => COMM_CI,
            RingKind::Response => COMM_RI,
        };
        let address = self.comm.wrapping_add_signed(offset);
        if bus.write_block(address, &1u16.to_le_bytes()) != 0 {
            return Err(FatalError::QueueWrite { address });
        }
        self.interrupt(bus);
        Ok(())
    }

    pub(crate) fn interrupt(&mut self, bus: &mut dyn Bus) {
        let vector = self.vector();
        if vector != 0 {
            event!(Level::TRACE, "interrupt through vector {vector:o}");
            bus.raise_interrupt(vector);
        }
    }

    /// Take the next command from the command ring, if the host has
    /// put one there.
    pub(crate) fn fetch_packet(&mut self, bus: &mut dyn Bus) -> Result<Option<PacketId>, FatalError> {
        let desc = self.get_descriptor(bus, RingKind::Command)?;
        if !desc.owned_by_port() {
            return Ok(None);
        }
        let id = self.pool.acquire().ok_or(FatalError::NoSuchResource)?;
        let address = desc.address().wrapping_sub(HEADER_BYTES);
        let mut buf = [0u8; PACKET_BYTES];
        if bus.read_block(address, &mut buf) != 0 {
            self.pool.release(id);
            return Err(FatalError::PacketRead { address });
        }
        self.pool.get_mut(id).load(&buf);
        event!(
            Level::TRACE,
            "fetched {id} from {address:o}: opcode {}, unit {}",
            self.pool.get(id).opcode_byte(),
            self.pool.get(id).unit()
        );
        self.put_descriptor(bus, RingKind::Command, desc)?;
        Ok(Some(id))
    }

    /// Deliver a finished packet to the response ring.  If the host
    /// has no free response slot the packet waits on the response
    /// backlog (at its head when `at_tail` is false, for a packet
    /// which was already waiting).
    pub(crate) fn post_packet(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
        at_tail: bool,
    ) -> Result<(), FatalError> {
        let desc = self.get_descriptor(bus, RingKind::Response)?;
        if !desc.owned_by_port() {
            event!(Level::TRACE, "response ring full, {id} waits");
            let mut responses = self.responses;
            self.pool.enqueue(&mut responses, id, !at_tail);
            self.responses = responses;
            self.arm(ctx, TimerId::Queue);
            return Ok(());
        }
        let credits = self.grant_credits(id);
        let pkt = self.pool.get_mut(id);
        if let Some(granted) = credits {
            let ctc = pkt.word(UQ_CTC);
            pkt.set_word(UQ_CTC, (ctc & !UQ_M_CR) | (granted + 1));
        }
        let bytes = pkt.header_and_body(usize::from(pkt.length()));
        let address = desc.address().wrapping_sub(HEADER_BYTES);
        if bus.write_block(address, &bytes) != 0 {
            return Err(FatalError::PacketWrite { address });
        }
        event!(
            Level::TRACE,
            "posted {id} to {address:o}: opcode {:#04x}, status {}",
            self.pool.get(id).opcode_byte(),
            self.pool.get(id).status()
        );
        self.pool.release(id);
        self.host_activity();
        self.put_descriptor(bus, RingKind::Response, desc)
    }

    /// Credits carried by an end message.  Only sequential end
    /// messages carry them.
    fn grant_credits(&mut self, id: PacketId) -> Option<u16> {
        let pkt = self.pool.get(id);
        let is_end = pkt.opcode_byte() & OP_END != 0;
        if pkt.message_type() != MessageType::Sequential || !is_end {
            return None;
        }
        let granted = self.credits.min(MAX_CREDIT_GRANT);
        self.credits -= granted;
        Some(granted)
    }
}
