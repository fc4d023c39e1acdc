//! The four-step initialisation handshake.
//!
//! The host drives the port through the steps by writing SA; after
//! each write the port answers with a new SA value which carries the
//! bit of the next step.  A write to IP throws everything away and
//! starts again at step 1.
use tracing::{event, Level};

use base::uqssp::*;

use super::{Controller, PortState, Ring};
use crate::bus::Bus;
use crate::context::Context;
use crate::fault::FatalError;
use crate::timer::TimerId;

impl Controller {
    pub(crate) fn write_ip(&mut self) {
        match self.state {
            PortState::Step3PurgePollA | PortState::Step3PurgePollB => {
                event!(Level::WARN, "ignoring IP write during the purge/poll test");
            }
            _ => self.reset(),
        }
    }

    pub(crate) fn read_ip(&mut self, ctx: &Context, bus: &mut dyn Bus) -> Result<(), FatalError> {
        match self.state {
            PortState::Step3PurgePollB => self.step4_init(bus),
            PortState::Up => {
                self.polling = true;
                self.arm(ctx, TimerId::Queue);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn write_sa(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        value: u16,
    ) -> Result<(), FatalError> {
        event!(Level::DEBUG, "SA write {value:#06x} in {}", self.state);
        match self.state {
            PortState::Step1 => {
                if value & SA_S1H_WR != 0 {
                    self.state = PortState::Step1Wrap;
                    self.sa = value;
                } else {
                    self.step1 = value;
                    self.state = PortState::Step2;
                    self.sa = SA_S2 | SA_S2C_PT | s2_echo(value);
                    self.init_interrupt(bus);
                }
            }
            PortState::Step1Wrap => {
                self.sa = value;
            }
            PortState::Step2 => {
                self.comm = u32::from(value & SA_S2H_CLO);
                self.purge_interrupt = value & SA_S2H_PI != 0;
                self.state = PortState::Step3;
                self.sa = SA_S3 | s3_echo(self.step1);
                self.init_interrupt(bus);
            }
            PortState::Step3 => {
                self.comm |= u32::from(value & SA_S3H_CHI) << 16;
                if value & SA_S3H_PP != 0 {
                    self.state = PortState::Step3PurgePollA;
                    self.sa = 0;
                } else {
                    self.step4_init(bus)?;
                }
            }
            PortState::Step3PurgePollA => {
                if value != 0 {
                    return Err(FatalError::PurgePollFailure { value });
                }
                self.state = PortState::Step3PurgePollB;
            }
            PortState::Step4 => {
                if value & SA_S4H_GO != 0 {
                    self.go(ctx, bus, value & SA_S4H_LF != 0)?;
                }
            }
            PortState::Step3PurgePollB | PortState::Up | PortState::Dead => {
                event!(Level::WARN, "ignoring SA write {value:#06x} in {}", self.state);
            }
        }
        Ok(())
    }

    fn init_interrupt(&mut self, bus: &mut dyn Bus) {
        if self.interrupts_enabled() {
            self.interrupt(bus);
        }
    }

    /// Lay out the rings and clear the communication area.
    fn step4_init(&mut self, bus: &mut dyn Bus) -> Result<(), FatalError> {
        self.response_ring = Ring::new(self.comm, s1_response_slots(self.step1));
        self.command_ring = Ring::new(
            self.comm + self.response_ring.byte_length(),
            s1_command_slots(self.step1),
        );
        let start = self
            .comm
            .wrapping_add_signed(if self.purge_interrupt { COMM_QQ } else { COMM_CI });
        let end = self.command_ring.base + self.command_ring.byte_length();
        let zeros = vec![0u8; end.wrapping_sub(start) as usize];
        if bus.write_block(start, &zeros) != 0 {
            return Err(FatalError::QueueWrite { address: start });
        }
        self.state = PortState::Step4;
        self.sa = SA_S4
            | ((u16::from(self.config.model) & SA_S4C_M_MOD) << SA_S4C_V_MOD)
            | (u16::from(self.config.version) & 0xF);
        event!(
            Level::DEBUG,
            "communication area at {:o}: {} command slots, {} response slots",
            self.comm,
            self.command_ring.slots,
            self.response_ring.slots
        );
        self.init_interrupt(bus);
        Ok(())
    }

    fn go(&mut self, ctx: &Context, bus: &mut dyn Bus, last_fail: bool) -> Result<(), FatalError> {
        self.state = PortState::Up;
        self.sa = 0;
        self.arm(ctx, TimerId::HostClock);
        event!(Level::INFO, "{} port is up", self.config.protocol);
        if let Some(code) = self.last_failure {
            if last_fail {
                self.queue_last_fail(ctx, bus, code)?;
            }
        }
        self.last_failure = None;
        Ok(())
    }
}
