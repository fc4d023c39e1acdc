//! Command validation and routing.
use tracing::{event, Level};

use base::opcode::OP_END;
use base::prelude::*;

use super::Controller;
use crate::bus::Bus;
use crate::context::Context;
use crate::fault::FatalError;
use crate::packet::PacketId;

impl Controller {
    /// Route a packet freshly fetched from the command ring according
    /// to its header.
    pub(crate) fn route(&mut self, ctx: &Context, bus: &mut dyn Bus, id: PacketId) -> Result<(), FatalError> {
        let pkt = self.pool.get(id);
        let message_type = pkt.message_type();
        if message_type != MessageType::Sequential {
            return Err(FatalError::PacketInterface { message_type });
        }
        let (cid, code) = (pkt.connection_id(), pkt.opcode_byte());
        if cid == self.connection() {
            self.dispatch(ctx, bus, id, true)
        } else if cid == ConnectionId::Dup {
            event!(Level::WARN, "DUP command rejected");
            self.respond(ctx, bus, id, code | OP_END, EndFlags::NONE, Status::INVALID_OPCODE, RSP_LNT)
        } else {
            Err(FatalError::InvalidConnectionId(cid))
        }
    }

    /// Validate a command and run it, or queue it behind the work
    /// already outstanding on its unit.  `fresh` is false for a
    /// command which is coming off a unit's pending queue.
    pub(crate) fn dispatch(
        &mut self,
        ctx: &Context,
        bus: &mut dyn Bus,
        id: PacketId,
        fresh: bool,
    ) -> Result<(), FatalError> {
        let protocol = self.config.protocol;
        let pkt = self.pool.get(id);
        let code = pkt.opcode_byte();
        let (flags, modifiers, lu) = (pkt.flags_byte(), pkt.modifiers(), pkt.unit());

        let decoded = Opcode::from_code(code).and_then(|op| op.attributes(protocol).map(|attr| (op, attr)));
        let (opcode, attr) = match decoded {
            None => return self.reject(ctx, bus, id, Status::INVALID_OPCODE),
            Some(_) if flags != 0 => return self.reject(ctx, bus, id, Status::INVALID_FLAGS),
            Some((_, attr)) if modifiers & !attr.modifiers != 0 => {
                return self.reject(ctx, bus, id, Status::INVALID_MODIFIERS)
            }
            Some(found) => found,
        };

        let unit = self.unit_index(lu);
        if let Some(n) = unit {
            if fresh && attr.sequential && self.units[n].has_work() {
                event!(Level::DEBUG, "{opcode} for unit {n} waits behind earlier work");
                let u = &mut self.units[n];
                let mut pending = u.pending;
                self.pool.enqueue(&mut pending, id, false);
                u.pending = pending;
                return Ok(());
            }
            if protocol == Protocol::Tmscp && modifiers & md::CSE != 0 {
                self.units[n].tape.serious_exception = false;
            }
        }
        event!(Level::DEBUG, "dispatching {opcode} ({id}) for unit {lu}");

        match opcode {
            Opcode::Abort => return self.op_abort(ctx, bus, id),
            Opcode::GetCommandStatus => return self.op_get_command_status(ctx, bus, id),
            Opcode::GetUnitStatus => return self.op_get_unit_status(ctx, bus, id),
            Opcode::SetControllerCharacteristics => {
                return self.op_set_controller_characteristics(ctx, bus, id)
            }
            _ => (),
        }

        let Some(n) = unit else {
            let flags = EndFlags::NONE;
            return self.respond(ctx, bus, id, opcode.end_code(), flags, Status::OFFLINE, RSP_LNT);
        };
        match opcode {
            Opcode::Available => self.op_available(ctx, bus, id, n),
            Opcode::Online => self.op_online(ctx, bus, id, n),
            Opcode::SetUnitCharacteristics => self.op_set_unit_characteristics(ctx, bus, id, n),
            Opcode::DetermineAccessPaths | Opcode::CompareControllerData => {
                self.op_no_operation(ctx, bus, id, opcode, n)
            }
            Opcode::Flush if protocol == Protocol::Mscp => self.op_no_operation(ctx, bus, id, opcode, n),
            _ => match protocol {
                Protocol::Mscp => self.op_disk_data(ctx, bus, id, opcode, attr, n),
                Protocol::Tmscp => self.op_tape_motion(ctx, bus, id, opcode, attr, n),
            },
        }
    }

    fn reject(&mut self, ctx: &Context, bus: &mut dyn Bus, id: PacketId, status: Status) -> Result<(), FatalError> {
        let pkt = self.pool.get(id);
        let (code, lu) = (pkt.opcode_byte(), pkt.unit());
        event!(Level::WARN, "rejecting command {code:#04x} on unit {lu}: {status}");
        self.respond(ctx, bus, id, code | OP_END, EndFlags::NONE, status, RSP_LNT)
    }
}
