//! Timer callbacks: queue service, unit service and the host clock.
use tracing::{event, span, Level};

use base::prelude::*;

use super::{Controller, PortState};
use crate::bus::Bus;
use crate::context::Context;
use crate::fault::FatalError;
use crate::timer::TimerId;

impl Controller {
    /// Run one round of queued work.  Each idle unit with pending
    /// commands starts the oldest of them (lowest unit number first).
    /// Only if no unit started anything is the command ring polled,
    /// and only if that found nothing does a waiting response get
    /// another try at the response ring.
    pub(crate) fn queue_service(&mut self, ctx: &Context, bus: &mut dyn Bus) -> Result<(), FatalError> {
        if self.state != PortState::Up {
            return Ok(());
        }
        let span = span!(Level::TRACE, "queue service", t = ?ctx.simulated_time);
        let _enter = span.enter();

        let mut worked = false;
        for n in 0..self.units.len() {
            if self.units[n].busy() {
                continue;
            }
            let mut pending = self.units[n].pending;
            let next = self.pool.dequeue(&mut pending);
            self.units[n].pending = pending;
            if let Some(id) = next {
                worked = true;
                self.dispatch(ctx, bus, id, false)?;
            }
        }

        if !worked && self.polling {
            match self.fetch_packet(bus)? {
                Some(id) => {
                    worked = true;
                    self.host_activity();
                    self.route(ctx, bus, id)?;
                }
                None => {
                    event!(Level::TRACE, "command ring empty, polling stops");
                    self.polling = false;
                }
            }
        }

        if !worked {
            let mut responses = self.responses;
            let next = self.pool.dequeue(&mut responses);
            self.responses = responses;
            if let Some(id) = next {
                worked = true;
                self.post_packet(ctx, bus, id, false)?;
            }
        }

        if worked {
            self.arm(ctx, TimerId::Queue);
        }
        Ok(())
    }

    pub(crate) fn unit_service(&mut self, ctx: &Context, bus: &mut dyn Bus, n: usize) -> Result<(), FatalError> {
        if n >= self.units.len() {
            return Ok(());
        }
        match self.config.protocol {
            Protocol::Mscp => self.disk_transfer_chunk(ctx, bus, n),
            Protocol::Tmscp => self.tape_service(ctx, bus, n),
        }
    }

    /// The once-per-tick host clock: deliver attention messages and
    /// watch for a host which has stopped servicing the port.
    pub(crate) fn host_clock(&mut self, ctx: &Context, bus: &mut dyn Bus) -> Result<(), FatalError> {
        if self.state != PortState::Up {
            return Ok(());
        }
        self.arm(ctx, TimerId::HostClock);
        for n in 0..self.units.len() {
            if std::mem::take(&mut self.units[n].attention_pending) {
                self.send_attention(ctx, bus, n)?;
            }
        }
        if self.host_timeout != 0 && self.pool.busy_count() > 0 {
            self.host_timer = self.host_timer.saturating_sub(1);
            if self.host_timer == 0 {
                return Err(FatalError::HostAccessTimeout);
            }
        }
        Ok(())
    }

    /// The host has touched the rings; restart its timeout.
    pub(crate) fn host_activity(&mut self) {
        self.host_timer = self.host_timeout;
    }
}
