//! The port controller.
//!
//! The host talks to the controller through two 16-bit registers (see
//! [`Register`]) and through the communication area in its own
//! memory, which holds the command and response rings.  Everything
//! else (fetching commands, executing them, moving data, posting
//! responses) happens when the controller's timers are serviced by
//! [`Controller::service`].
//!
//! The work is divided between several files, each adding methods to
//! [`Controller`]:
//!
//! - `ring.rs`: descriptors, packet fetch and post, ring interrupts
//! - `init.rs`: the four-step initialisation handshake
//! - `dispatch.rs`: command validation and routing
//! - `engine.rs`: queue service and the other timer callbacks
//! - `op_common.rs`, `op_disk.rs`, `op_tape.rs`: command handlers
//! - `errlog.rs`: error log, attention and last-fail messages
use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;
use base::uqssp::{SA_ER, SA_S1, SA_S1C_DI, SA_S1C_MP, SA_S1C_OD, SA_S1C_Q22, SA_S1H_IE};

use crate::bus::Bus;
use crate::context::Context;
use crate::drive::{DriveType, RA81, TK50};
use crate::fault::{AttachError, FatalError};
use crate::info::{ControllerInfo, UnitInfo};
use crate::packet::{PacketId, PacketPool, PacketQueue};
use crate::store::{self, Backing, DiskImage, TapeImage};
use crate::timer::{TimerId, TimerQueue};
use crate::unit::{Medium, TapeState, Unit};

mod dispatch;
mod engine;
mod errlog;
mod init;
mod op_common;
mod op_disk;
mod op_tape;
mod ring;

#[cfg(test)]
mod tests;

use ring::Ring;

/// The two registers of a UQSSP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Register {
    /// IP: reads start polling, writes initialise the port.
    InitPoll,
    /// SA: status on read, initialisation parameters on write.
    StatusAddress,
}

impl Register {
    /// Decode a register from its word offset from the CSR address.
    #[must_use]
    pub fn from_offset(offset: u32) -> Option<Register> {
        match offset {
            0 => Some(Register::InitPoll),
            1 => Some(Register::StatusAddress),
            _ => None,
        }
    }
}

/// Port state, as driven by the initialisation handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PortState {
    Step1,
    /// Diagnostic wrap mode: SA echoes whatever the host writes.
    Step1Wrap,
    Step2,
    Step3,
    /// Purge/poll test: waiting for the host to write zero to SA.
    Step3PurgePollA,
    /// Purge/poll test: waiting for the host to read IP.
    Step3PurgePollB,
    Step4,
    Up,
    /// A fatal error stopped the port; only a write to IP restarts it.
    Dead,
}

impl Display for PortState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            PortState::Step1 => "step 1",
            PortState::Step1Wrap => "step 1 (wrap mode)",
            PortState::Step2 => "step 2",
            PortState::Step3 => "step 3",
            PortState::Step3PurgePollA => "step 3 (purge/poll, awaiting SA write)",
            PortState::Step3PurgePollB => "step 3 (purge/poll, awaiting IP read)",
            PortState::Step4 => "step 4",
            PortState::Up => "up",
            PortState::Dead => "dead",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub protocol: Protocol,
    /// One entry per unit.
    pub drives: Vec<DriveType>,
    /// Number of packets in the port's pool.
    pub packets: usize,
    /// Bus address of the IP register.
    pub csr: u32,
    /// Port model, shown in SA at step 4.
    pub model: u8,
    /// Microcode version, shown in SA at step 4.
    pub version: u8,
    /// Step 1 port capability bits.
    pub capabilities: u16,
    /// Delay before the queue service routine runs.
    pub queue_time: Duration,
    /// Delay between transfer chunks (and before a tape operation).
    pub transfer_time: Duration,
    /// Period of the host access timer.
    pub host_tick: Duration,
    /// Host timeout, in host ticks, before the host sets one.
    pub host_timeout: u16,
    /// The controller timeout reported by Set Controller Characteristics.
    pub controller_timeout: u16,
    /// Largest number of bytes moved in one transfer chunk.
    pub max_transfer: u32,
}

impl ControllerConfig {
    /// A Q-bus MSCP disk controller with four RA81 drives.
    #[must_use]
    pub fn disk() -> ControllerConfig {
        ControllerConfig {
            protocol: Protocol::Mscp,
            drives: vec![DriveType::Disk(&RA81); 4],
            packets: 32,
            csr: 0o17772150,
            model: 19,
            version: 3,
            capabilities: SA_S1C_Q22 | SA_S1C_DI | SA_S1C_OD | SA_S1C_MP,
            queue_time: Duration::from_micros(200),
            transfer_time: Duration::from_micros(500),
            host_tick: Duration::from_secs(1),
            host_timeout: 60,
            controller_timeout: 255,
            max_transfer: 1 << 16,
        }
    }

    /// A Q-bus TMSCP tape controller with four TK50 drives.
    #[must_use]
    pub fn tape() -> ControllerConfig {
        ControllerConfig {
            protocol: Protocol::Tmscp,
            drives: vec![DriveType::Tape(&TK50); 4],
            csr: 0o17774500,
            model: 3,
            version: 3,
            ..ControllerConfig::disk()
        }
    }

    #[must_use]
    pub fn with_drives(mut self, drives: Vec<DriveType>) -> ControllerConfig {
        self.drives = drives;
        self
    }
}

#[derive(Debug)]
pub struct Controller {
    config: ControllerConfig,
    state: PortState,
    sa: u16,
    /// The host's step 1 word: ring sizes, vector, interrupt enable.
    step1: u16,
    /// Address of the communication area (the response ring).
    comm: u32,
    purge_interrupt: bool,
    command_ring: Ring,
    response_ring: Ring,
    polling: bool,
    credits: u16,
    flags: ControllerFlags,
    host_timeout: u16,
    host_timer: u16,
    /// The most recent fatal error, reported by a last-fail message
    /// if the host asks for one.
    last_failure: Option<FatalCode>,
    pool: PacketPool,
    /// Responses waiting for a free response ring slot.
    responses: PacketQueue,
    units: Vec<Unit>,
    timers: TimerQueue,
    log_sequence: u16,
}

impl Controller {
    #[must_use]
    pub fn new(config: ControllerConfig) -> Controller {
        let units = config
            .drives
            .iter()
            .enumerate()
            .map(|(n, drive)| Unit::new(n, *drive))
            .collect();
        let mut controller = Controller {
            pool: PacketPool::new(config.packets),
            config,
            state: PortState::Step1,
            sa: 0,
            step1: 0,
            comm: 0,
            purge_interrupt: false,
            command_ring: Ring::default(),
            response_ring: Ring::default(),
            polling: false,
            credits: 0,
            flags: ControllerFlags::default(),
            host_timeout: 0,
            host_timer: 0,
            last_failure: None,
            responses: PacketQueue::default(),
            units,
            timers: TimerQueue::new(),
            log_sequence: 0,
        };
        controller.reset();
        controller
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.config.protocol
    }

    #[must_use]
    pub fn state(&self) -> PortState {
        self.state
    }

    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// The fatal error which most recently stopped the port, until the
    /// host next brings it up.
    #[must_use]
    pub fn last_failure(&self) -> Option<FatalCode> {
        self.last_failure
    }

    #[must_use]
    pub fn info(&self) -> ControllerInfo {
        ControllerInfo {
            protocol: self.config.protocol,
            csr: self.config.csr,
            state: self.state,
            sa: self.sa,
            last_failure: self.last_failure,
            vector: self.vector(),
            command_ring: self.command_ring.info(),
            response_ring: self.response_ring.info(),
            credits: self.credits,
            flags: self.flags,
            host_timeout: self.host_timeout,
            packets: self.pool.capacity(),
            packets_free: self.pool.free_count(),
            responses_queued: self.responses.len(),
            polling: self.polling,
            units: self.units.iter().map(UnitInfo::of).collect(),
        }
    }

    /// The connection this controller serves.
    fn connection(&self) -> ConnectionId {
        match self.config.protocol {
            Protocol::Mscp => ConnectionId::Mscp,
            Protocol::Tmscp => ConnectionId::Tmscp,
        }
    }

    fn vector(&self) -> u16 {
        base::uqssp::s1_vector(self.step1)
    }

    fn interrupts_enabled(&self) -> bool {
        self.step1 & SA_S1H_IE != 0
    }

    fn unit_index(&self, number: u16) -> Option<usize> {
        let n = usize::from(number);
        if n < self.units.len() {
            Some(n)
        } else {
            None
        }
    }

    pub fn read_register(&mut self, ctx: &Context, bus: &mut dyn Bus, reg: Register) -> u16 {
        match reg {
            Register::InitPoll => {
                if let Err(e) = self.read_ip(ctx, bus) {
                    self.set_fatal(e);
                }
                0
            }
            Register::StatusAddress => self.sa,
        }
    }

    pub fn write_register(&mut self, ctx: &Context, bus: &mut dyn Bus, reg: Register, value: u16) {
        match reg {
            Register::InitPoll => self.write_ip(),
            Register::StatusAddress => {
                if let Err(e) = self.write_sa(ctx, bus, value) {
                    self.set_fatal(e);
                }
            }
        }
    }

    /// Run every timer which is due at `ctx.simulated_time`.
    pub fn service(&mut self, ctx: &Context, bus: &mut dyn Bus) {
        while let Some(id) = self.timers.pop_due(ctx.simulated_time) {
            event!(Level::TRACE, "timer {id:?} fired at {:?}", ctx.simulated_time);
            let outcome = match id {
                TimerId::Queue => self.queue_service(ctx, bus),
                TimerId::Unit(n) => self.unit_service(ctx, bus, n),
                TimerId::HostClock => self.host_clock(ctx, bus),
            };
            if let Err(e) = outcome {
                self.set_fatal(e);
            }
        }
    }

    /// When [`Controller::service`] next has something to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    fn arm(&mut self, ctx: &Context, id: TimerId) {
        let delay = match id {
            TimerId::Queue => self.config.queue_time,
            TimerId::Unit(_) => self.config.transfer_time,
            TimerId::HostClock => self.config.host_tick,
        };
        self.timers.arm(id, ctx.simulated_time + delay);
    }

    /// Bus initialisation: discard all port state and return to step 1.
    /// Attached media stay attached but every unit becomes available.
    pub fn reset(&mut self) {
        event!(Level::DEBUG, "{} port reset", self.config.protocol);
        self.state = PortState::Step1;
        self.sa = SA_S1 | self.config.capabilities;
        self.step1 = 0;
        self.comm = 0;
        self.purge_interrupt = false;
        self.command_ring = Ring::default();
        self.response_ring = Ring::default();
        self.polling = false;
        self.credits = u16::try_from(self.config.packets / 2)
            .unwrap_or(u16::MAX)
            .saturating_sub(1);
        self.flags = match self.config.protocol {
            Protocol::Mscp => ControllerFlags::REPLICATE,
            Protocol::Tmscp => ControllerFlags::default(),
        };
        self.host_timeout = self.config.host_timeout;
        self.host_timer = self.host_timeout;
        self.pool.reset();
        self.responses = PacketQueue::default();
        for unit in &mut self.units {
            unit.current = None;
            unit.pending = PacketQueue::default();
            unit.attention_pending = false;
            unit.make_available();
            unit.tape = TapeState {
                objects: unit.tape.objects,
                ..TapeState::default()
            };
        }
        self.timers.clear();
        self.log_sequence = 0;
    }

    fn set_fatal(&mut self, error: FatalError) {
        event!(Level::ERROR, "{} port failed: {error}", self.config.protocol);
        let code = error.code();
        self.reset();
        self.state = PortState::Dead;
        self.sa = SA_ER | code.code();
        self.last_failure = Some(code);
    }

    /// Mount `image` on `unit`.  If the port is up, the host will be
    /// sent an attention message (if it has enabled them).
    pub fn attach(
        &mut self,
        unit: usize,
        image: Box<dyn Backing>,
        read_only: bool,
    ) -> Result<(), AttachError> {
        let protocol = self.config.protocol;
        let up = self.state == PortState::Up;
        let u = self.units.get_mut(unit).ok_or(AttachError::NoSuchUnit(unit))?;
        if u.attached() {
            return Err(AttachError::AlreadyAttached(unit));
        }
        let medium = match (protocol, u.drive) {
            (Protocol::Mscp, DriveType::Disk(_)) => Medium::Disk(DiskImage::new(image)),
            (Protocol::Tmscp, DriveType::Tape(_)) => Medium::Tape(TapeImage::new(image)),
            _ => return Err(AttachError::WrongMediaClass { unit, protocol }),
        };
        u.medium = Some(medium);
        u.online = false;
        u.flags = u.fixed_flags(protocol, read_only);
        u.tape = TapeState::default();
        u.chunks = 0;
        u.attention_pending = up;
        event!(
            Level::INFO,
            "unit {unit} ({}) attached{}",
            u.drive.name(),
            if read_only { ", read only" } else { "" }
        );
        Ok(())
    }

    pub fn attach_file(&mut self, unit: usize, path: &Path, read_only: bool) -> Result<(), AttachError> {
        let file = store::open_image(path, read_only)?;
        self.attach(unit, Box::new(file), read_only)
    }

    pub fn detach(&mut self, unit: usize) -> Result<(), AttachError> {
        let u = self.units.get_mut(unit).ok_or(AttachError::NoSuchUnit(unit))?;
        if u.medium.take().is_none() {
            return Err(AttachError::NotAttached(unit));
        }
        u.online = false;
        u.attention_pending = false;
        u.flags = UnitFlags::NONE;
        event!(Level::INFO, "unit {unit} detached");
        Ok(())
    }

    /// Packets on every list: free, response backlog, and each unit's
    /// current and pending work.
    #[cfg(test)]
    fn census(&self) -> usize {
        self.pool.free_count()
            + self.responses.len()
            + self
                .units
                .iter()
                .map(|u| usize::from(u.busy()) + u.pending.len())
                .sum::<usize>()
    }

    fn packet_unit(&self, id: PacketId) -> u16 {
        self.pool.get(id).unit()
    }
}
