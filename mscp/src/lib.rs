//! This crate emulates the UQSSP port of an MSCP disk controller or
//! a TMSCP tape controller: the initialisation handshake, the command
//! and response rings in host memory, the port's packet pool, command
//! dispatch, and the per-unit engines which move data between host
//! memory and the backing stores.
#![crate_name = "mscp"]

mod bus;
mod clock;
mod context;
mod controller;
pub mod drive;
mod fault;
pub mod host;
mod info;
mod packet;
pub mod store;
mod timer;
mod unit;

pub use bus::{Bus, Memory};
pub use clock::{BasicClock, Clock};
pub use context::Context;
pub use controller::{Controller, ControllerConfig, PortState, Register};
pub use drive::{DiskType, DriveType, TapeType};
pub use fault::{AttachError, FatalError};
pub use host::{HostError, HostPort};
pub use info::{ControllerInfo, RingInfo, UnitInfo};
pub use packet::{Packet, PacketId};
pub use timer::TimerId;
