//! The prelude exports the names which are needed by almost every
//! user of the protocol vocabulary.
pub use super::collections::pq::KeyedReversePriorityQueue;
pub use super::layout::*;
pub use super::opcode::{CommandAttributes, Opcode, Protocol};
pub use super::status::{md, ControllerFlags, EndFlags, Status, UnitFlags};
pub use super::uqssp::{ConnectionId, Descriptor, FatalCode, MessageType};
pub use super::{join_u32, split_u32};
