//! The `base` crate defines the MSCP/TMSCP protocol vocabulary which
//! is useful both to the port emulation and to host-side tooling.
//! The idea is that a tool which only needs to build or decode
//! message packets can depend on this crate without pulling in the
//! controller engine itself.

pub mod collections;
pub mod layout;
pub mod opcode;
pub mod prelude;
pub mod status;
pub mod uqssp;

/// Split a 32-bit value into the (low, high) pair of 16-bit words in
/// which it is carried inside a message packet.
#[must_use]
pub const fn split_u32(value: u32) -> (u16, u16) {
    ((value & 0xFFFF) as u16, (value >> 16) as u16)
}

/// Join a (low, high) pair of packet words into a 32-bit value.
#[must_use]
pub const fn join_u32(low: u16, high: u16) -> u32 {
    (low as u32) | ((high as u32) << 16)
}

#[test]
fn test_split_join_known_values() {
    assert_eq!(split_u32(0x0003_0D40), (0x0D40, 0x0003));
    assert_eq!(join_u32(0x0D40, 0x0003), 200_000);
    assert_eq!(split_u32(0), (0, 0));
    assert_eq!(join_u32(0xFFFF, 0xFFFF), u32::MAX);
}

#[cfg(test)]
mod split_proptests {
    use super::{join_u32, split_u32};
    use test_strategy::proptest;

    #[proptest]
    fn join_undoes_split(value: u32) {
        let (lo, hi) = split_u32(value);
        assert_eq!(join_u32(lo, hi), value);
    }

    #[proptest]
    fn split_undoes_join(lo: u16, hi: u16) {
        assert_eq!(split_u32(join_u32(lo, hi)), (lo, hi));
    }
}
