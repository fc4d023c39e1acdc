//! A minimal host-side port driver.
//!
//! [`HostPort`] plays the part of the operating system's class
//! driver: it owns the host memory and the simulated clock, lays out
//! a communication area and packet buffers, takes the port through
//! the initialisation handshake and exchanges packets with it over
//! the rings.
//!
//! Host memory layout, relative to [`HostPort::COMM`]:
//!
//! | Address                   | Contents                           |
//! | ------------------------- | ---------------------------------- |
//! | `COMM - 8 .. COMM`        | interrupt flag words               |
//! | `COMM ..`                 | response ring, then command ring   |
//! | `BUFFERS ..`              | one packet buffer per ring slot    |
//! | `DATA ..`                 | free for transfer buffers          |
use std::error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;
use base::uqssp::*;

use crate::bus::Memory;
use crate::clock::{BasicClock, Clock};
use crate::context::Context;
use crate::controller::{Controller, PortState, Register};
use crate::packet::{Packet, PACKET_BYTES};

/// Distance between successive packet buffers.
const BUFFER_STRIDE: u32 = 0x80;

/// How long [`HostPort::command`] waits for an end message.
const COMMAND_PATIENCE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// SA did not show the step bit we were waiting for.
    NotReady { expected: u16, sa: u16 },
    /// The port echoed the wrong half of the step 1 word.
    BadEcho { step: u8, sa: u16 },
    /// Every command ring slot still belongs to the port.
    RingFull,
    Timeout,
    /// The port has stopped with a fatal error.
    PortFailed { sa: u16 },
    /// The driver's own memory access failed.
    NoMemory { address: u32 },
}

impl Display for HostError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            HostError::NotReady { expected, sa } => {
                write!(f, "port not ready: expected SA bit {expected:#06x}, SA is {sa:#06x}")
            }
            HostError::BadEcho { step, sa } => {
                write!(f, "port echoed the wrong value at step {step}: SA is {sa:#06x}")
            }
            HostError::RingFull => f.write_str("command ring is full"),
            HostError::Timeout => f.write_str("timed out waiting for a response"),
            HostError::PortFailed { sa } => {
                write!(f, "port failed with fatal error {}", sa & !SA_ER)
            }
            HostError::NoMemory { address } => {
                write!(f, "host memory access failed at {address:#o}")
            }
        }
    }
}

impl error::Error for HostError {}

pub struct HostPort {
    pub controller: Controller,
    pub memory: Memory,
    clock: BasicClock,
    step1: u16,
    command_slots: u32,
    response_slots: u32,
    command_index: u32,
    response_index: u32,
    next_reference: u32,
    /// Messages which arrived while [`HostPort::command`] was waiting
    /// for an end message: error logs, attention messages and the
    /// like.
    pub unsolicited: Vec<Packet>,
}

impl HostPort {
    /// Base of the communication area (the response ring).
    pub const COMM: u32 = 0x1000;
    /// Packet buffers: command slots first, then response slots.
    pub const BUFFERS: u32 = 0x1800;
    /// The first address not used by the driver itself.
    pub const DATA: u32 = 0x10000;

    /// Interrupt vector the driver asks for.
    pub const VECTOR: u16 = 0o154;

    /// Attach `controller` to `memory_size` bytes of host memory.
    #[must_use]
    pub fn new(controller: Controller, memory_size: usize) -> HostPort {
        HostPort {
            controller,
            memory: Memory::new(memory_size),
            clock: BasicClock::new(),
            step1: 0,
            command_slots: 0,
            response_slots: 0,
            command_index: 0,
            response_index: 0,
            next_reference: 1,
            unsolicited: Vec::new(),
        }
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    fn context(&self) -> Context {
        Context::at(self.clock.now())
    }

    pub fn read_sa(&mut self) -> u16 {
        let ctx = self.context();
        self.controller
            .read_register(&ctx, &mut self.memory, Register::StatusAddress)
    }

    pub fn write_sa(&mut self, value: u16) {
        let ctx = self.context();
        self.controller
            .write_register(&ctx, &mut self.memory, Register::StatusAddress, value);
    }

    /// Read IP, which tells the port to look at the command ring.
    pub fn poll(&mut self) {
        let ctx = self.context();
        self.controller
            .read_register(&ctx, &mut self.memory, Register::InitPoll);
    }

    /// Write IP, which resets the port.
    pub fn reset(&mut self) {
        let ctx = self.context();
        self.controller
            .write_register(&ctx, &mut self.memory, Register::InitPoll, 0);
    }

    fn expect_step(&mut self, expected: u16) -> Result<u16, HostError> {
        let sa = self.read_sa();
        if sa & SA_ER != 0 {
            Err(HostError::PortFailed { sa })
        } else if sa & expected == 0 {
            Err(HostError::NotReady { expected, sa })
        } else {
            Ok(sa)
        }
    }

    fn command_buffer(&self, slot: u32) -> u32 {
        Self::BUFFERS + slot * BUFFER_STRIDE
    }

    fn response_buffer(&self, slot: u32) -> u32 {
        Self::BUFFERS + (self.command_slots + slot) * BUFFER_STRIDE
    }

    fn command_descriptor(&self, slot: u32) -> u32 {
        Self::COMM + self.response_slots * DESCRIPTOR_BYTES + slot * DESCRIPTOR_BYTES
    }

    fn response_descriptor(&self, slot: u32) -> u32 {
        Self::COMM + slot * DESCRIPTOR_BYTES
    }

    fn write_descriptor(&mut self, address: u32, desc: Descriptor) -> Result<(), HostError> {
        if self.memory.write_u32(address, desc.bits()) {
            Ok(())
        } else {
            Err(HostError::NoMemory { address })
        }
    }

    fn read_descriptor(&self, address: u32) -> Result<Descriptor, HostError> {
        self.memory
            .read_u32(address)
            .map(Descriptor::from_bits)
            .ok_or(HostError::NoMemory { address })
    }

    /// Give response slot `slot` (back) to the port.
    fn offer_response_slot(&mut self, slot: u32) -> Result<(), HostError> {
        let buffer = self.response_buffer(slot);
        if !self
            .memory
            .write_u16(buffer, (PACKET_BYTES as u32 - HEADER_BYTES) as u16)
        {
            return Err(HostError::NoMemory { address: buffer });
        }
        let desc = Descriptor::new(buffer + HEADER_BYTES, true, true);
        self.write_descriptor(self.response_descriptor(slot), desc)
    }

    /// Take the port through the four initialisation steps, with
    /// rings of `1 << command_log2` and `1 << response_log2` slots.
    /// With `last_fail` set, the port is asked to report the fatal
    /// error (if any) which stopped it last time.
    pub fn initialise(
        &mut self,
        command_log2: u16,
        response_log2: u16,
        last_fail: bool,
    ) -> Result<(), HostError> {
        self.reset();
        self.expect_step(SA_S1)?;

        self.step1 = SA_S1H_VL
            | ((command_log2 & 7) << 11)
            | ((response_log2 & 7) << 8)
            | SA_S1H_IE
            | (Self::VECTOR >> 2);
        self.command_slots = 1 << (command_log2 & 7);
        self.response_slots = 1 << (response_log2 & 7);
        self.command_index = 0;
        self.response_index = 0;
        self.write_sa(self.step1);

        let sa = self.expect_step(SA_S2)?;
        if sa & 0xFF != s2_echo(self.step1) {
            return Err(HostError::BadEcho { step: 2, sa });
        }
        let (comm_lo, comm_hi) = split_u32(Self::COMM);
        self.write_sa(comm_lo & SA_S2H_CLO);

        let sa = self.expect_step(SA_S3)?;
        if sa & 0xFF != s3_echo(self.step1) {
            return Err(HostError::BadEcho { step: 3, sa });
        }
        self.write_sa(comm_hi & SA_S3H_CHI);

        self.expect_step(SA_S4)?;
        for slot in 0..self.response_slots {
            self.offer_response_slot(slot)?;
        }
        self.write_sa(SA_S4H_GO | if last_fail { SA_S4H_LF } else { 0 });
        if self.controller.state() != PortState::Up {
            return Err(HostError::PortFailed { sa: self.read_sa() });
        }
        event!(
            Level::DEBUG,
            "host: port up with {} command and {} response slots",
            self.command_slots,
            self.response_slots
        );
        Ok(())
    }

    /// Put `pkt` on the command ring and poll.  The packet's command
    /// reference number is filled in and returned.
    pub fn submit(&mut self, mut pkt: Packet) -> Result<u32, HostError> {
        let slot = self.command_index;
        let address = self.command_descriptor(slot);
        if self.read_descriptor(address)?.owned_by_port() {
            return Err(HostError::RingFull);
        }
        let reference = self.next_reference;
        self.next_reference = self.next_reference.wrapping_add(1);
        pkt.set_reference(reference);
        let buffer = self.command_buffer(slot);
        if !self
            .memory
            .load(buffer, &pkt.header_and_body(usize::from(pkt.length())))
        {
            return Err(HostError::NoMemory { address: buffer });
        }
        self.write_descriptor(address, Descriptor::new(buffer + HEADER_BYTES, true, true))?;
        self.command_index = (slot + 1) % self.command_slots;
        self.poll();
        Ok(reference)
    }

    /// Take the next message from the response ring, if the port has
    /// delivered one, and give the slot back.
    pub fn collect(&mut self) -> Result<Option<Packet>, HostError> {
        let slot = self.response_index;
        let desc = self.read_descriptor(self.response_descriptor(slot))?;
        if desc.owned_by_port() {
            return Ok(None);
        }
        let address = desc.address() - HEADER_BYTES;
        let bytes = self
            .memory
            .dump(address, PACKET_BYTES)
            .ok_or(HostError::NoMemory { address })?;
        let mut pkt = Packet::default();
        pkt.load(&bytes);
        self.offer_response_slot(slot)?;
        self.response_index = (slot + 1) % self.response_slots;
        Ok(Some(pkt))
    }

    /// Advance the clock to the controller's next deadline and run
    /// everything due then.  Returns false if nothing was pending.
    pub fn step(&mut self) -> bool {
        match self.controller.next_deadline() {
            Some(when) => {
                self.clock.advance_to(when);
                let ctx = self.context();
                self.controller.service(&ctx, &mut self.memory);
                true
            }
            None => false,
        }
    }

    /// Run the controller until a message arrives on the response
    /// ring or `patience` of simulated time has gone by.
    pub fn wait_response(&mut self, patience: Duration) -> Result<Packet, HostError> {
        let give_up = self.clock.now() + patience;
        loop {
            if let Some(pkt) = self.collect()? {
                return Ok(pkt);
            }
            if self.controller.state() == PortState::Dead {
                return Err(HostError::PortFailed { sa: self.read_sa() });
            }
            if self.clock.now() > give_up || !self.step() {
                return Err(HostError::Timeout);
            }
        }
    }

    /// Wait for the next end message, setting other messages aside
    /// in [`HostPort::unsolicited`].
    pub fn wait_end(&mut self) -> Result<Packet, HostError> {
        loop {
            let pkt = self.wait_response(COMMAND_PATIENCE)?;
            let is_end = pkt.opcode_byte() & base::opcode::OP_END != 0;
            if is_end && pkt.message_type() == MessageType::Sequential {
                return Ok(pkt);
            }
            event!(
                Level::DEBUG,
                "host: set aside message {:#04x} of type {:?}",
                pkt.opcode_byte(),
                pkt.message_type()
            );
            self.unsolicited.push(pkt);
        }
    }

    /// Send one command and wait for its end message.
    pub fn command(&mut self, pkt: Packet) -> Result<Packet, HostError> {
        self.submit(pkt)?;
        self.wait_end()
    }

    /// A command packet for this port's protocol.
    #[must_use]
    pub fn packet(&self, opcode: Opcode, unit: u16, modifiers: u16) -> Packet {
        let cid = match self.controller.protocol() {
            Protocol::Mscp => ConnectionId::Mscp,
            Protocol::Tmscp => ConnectionId::Tmscp,
        };
        Packet::command(cid, opcode, unit, modifiers)
    }
}
