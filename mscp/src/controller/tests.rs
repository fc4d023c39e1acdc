use std::io::Cursor;
use std::time::Duration;

use base::prelude::*;
use base::uqssp::*;

use super::*;
use crate::host::{HostError, HostPort};
use crate::packet::Packet;

const MEMORY: usize = 0x80000;

fn blank() -> Box<dyn Backing> {
    Box::new(Cursor::new(Vec::new()))
}

fn patterned(len: usize) -> Box<dyn Backing> {
    let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    Box::new(Cursor::new(bytes))
}

fn port_with(config: ControllerConfig) -> HostPort {
    let mut port = HostPort::new(Controller::new(config), MEMORY);
    port.initialise(2, 2, false).expect("port should come up");
    port
}

fn disk_port() -> HostPort {
    port_with(ControllerConfig::disk())
}

fn tape_port() -> HostPort {
    port_with(ControllerConfig::tape())
}

fn bring_online(port: &mut HostPort, unit: u16) -> Packet {
    let pkt = port.packet(Opcode::Online, unit, 0);
    let rsp = port.command(pkt).expect("online should complete");
    assert_eq!(rsp.status(), Status::SUCCESS);
    rsp
}

fn transfer(port: &mut HostPort, opcode: Opcode, unit: u16, modifiers: u16, bc: u32, ba: u32, lbn: u32) -> Packet {
    let mut pkt = port.packet(opcode, unit, modifiers);
    pkt.set_long(RW_BCL, bc);
    pkt.set_long(RW_BAL, ba);
    pkt.set_long(RW_LBNL, lbn);
    port.command(pkt).expect("transfer should complete")
}

fn set_controller_flags(port: &mut HostPort, flags: ControllerFlags, timeout: u16) -> Packet {
    let mut pkt = port.packet(Opcode::SetControllerCharacteristics, 0, 0);
    pkt.set_word(SCC_CFL, flags.bits());
    pkt.set_word(SCC_TMO, timeout);
    port.command(pkt).expect("SCC should complete")
}

fn census_is_complete(c: &Controller) -> bool {
    c.census() == c.pool.capacity()
}

/// Run every timer which falls due up to and including `until`.
fn run_until(port: &mut HostPort, until: Duration) {
    while port.controller.next_deadline().is_some_and(|when| when <= until) {
        assert!(port.step());
    }
}

fn flag_word(port: &HostPort, offset: i32) -> Option<u16> {
    port.memory.read_u16(HostPort::COMM.wrapping_add_signed(offset))
}

fn clear_flag_word(port: &mut HostPort, offset: i32) {
    assert!(port.memory.write_u16(HostPort::COMM.wrapping_add_signed(offset), 0));
}

/// Step 1 word 0x0A00 has command ring log2 1 in bits 11..13 and
/// response ring log2 2 in bits 8..10, so the rings get 2 and 4
/// slots.  SA echoes the word's high byte (0x0A) at step 2 and its
/// low byte (0x00) at step 3.
#[test]
fn test_handshake_ring_sizes_and_echoes_follow_step1_word() {
    let mut port = HostPort::new(Controller::new(ControllerConfig::disk()), MEMORY);
    let caps = SA_S1C_Q22 | SA_S1C_DI | SA_S1C_OD | SA_S1C_MP;
    assert_eq!(port.read_sa(), SA_S1 | caps);
    assert_eq!(port.controller.state(), PortState::Step1);

    // Garbage around the communication area, to show what step 4 clears.
    assert!(port.memory.load(0x0FF8, &[0xFF; 0x24]));

    port.write_sa(0x0A00);
    assert_eq!(port.controller.state(), PortState::Step2);
    assert_eq!(port.read_sa(), SA_S2 | 0x0A);

    port.write_sa(0x1000);
    assert_eq!(port.controller.state(), PortState::Step3);
    assert_eq!(port.read_sa(), SA_S3);

    port.write_sa(0);
    assert_eq!(port.controller.state(), PortState::Step4);
    assert_eq!(port.read_sa(), SA_S4 | (19 << 4) | 3);
    let info = port.controller.info();
    assert_eq!(info.response_ring.base, 0x1000);
    assert_eq!(info.response_ring.slots, 4);
    assert_eq!(info.command_ring.base, 0x1010);
    assert_eq!(info.command_ring.slots, 2);
    // Without the purge interrupt only the two flag words are cleared.
    assert_eq!(port.memory.read_u16(0x0FF8), Some(0xFFFF));
    assert_eq!(port.memory.dump(0x0FFC, 0x1C), Some(vec![0; 0x1C]));
    assert_eq!(port.memory.read_u16(0x1018), Some(0xFFFF));

    port.write_sa(SA_S4H_GO);
    assert_eq!(port.controller.state(), PortState::Up);
    assert_eq!(port.read_sa(), 0);
    // Interrupts were never enabled.
    assert!(port.memory.interrupts().is_empty());
}

#[test]
fn test_initialisation_interrupts() {
    let port = disk_port();
    assert_eq!(port.memory.interrupts(), &[HostPort::VECTOR; 3]);
    assert_eq!(port.controller.info().vector, HostPort::VECTOR);
}

#[test]
fn test_response_interrupts_when_host_has_caught_up() {
    let mut port = disk_port();
    port.memory.take_interrupts();
    for _ in 0..3 {
        let rsp = port
            .command(port.packet(Opcode::GetUnitStatus, 0, 0))
            .expect("GUS");
        assert_eq!(rsp.opcode_byte(), Opcode::GetUnitStatus.end_code());
        // The previous response slot was already back with the port.
        assert_eq!(port.memory.take_interrupts(), vec![HostPort::VECTOR]);
        assert_eq!(flag_word(&port, COMM_RI), Some(1));
        assert_eq!(flag_word(&port, COMM_CI), Some(0));
        clear_flag_word(&mut port, COMM_RI);
    }
}

#[test]
fn test_no_response_interrupt_while_host_is_behind() {
    let mut port = disk_port();
    port.memory.take_interrupts();
    let first = port.submit(port.packet(Opcode::GetUnitStatus, 0, 0)).expect("submit");
    let second = port.submit(port.packet(Opcode::GetUnitStatus, 1, 0)).expect("submit");
    let until = port.now() + Duration::from_millis(1);
    run_until(&mut port, until);

    // Only the first of the two responses interrupts: the host had not
    // taken it when the second arrived.
    assert_eq!(port.memory.take_interrupts(), vec![HostPort::VECTOR]);
    let references: Vec<u32> = std::iter::from_fn(|| port.collect().expect("collect"))
        .map(|rsp| rsp.reference())
        .collect();
    assert_eq!(references, vec![first, second]);

    // With both slots handed back, the next response interrupts again.
    port.command(port.packet(Opcode::GetUnitStatus, 0, 0))
        .expect("GUS");
    assert_eq!(port.memory.take_interrupts(), vec![HostPort::VECTOR]);
}

#[test]
fn test_single_slot_rings_always_interrupt() {
    let mut port = HostPort::new(Controller::new(ControllerConfig::disk()), MEMORY);
    port.initialise(0, 0, false).expect("port should come up");
    assert_eq!(port.controller.info().command_ring.slots, 1);
    assert_eq!(port.controller.info().response_ring.slots, 1);
    port.memory.take_interrupts();
    for _ in 0..2 {
        port.command(port.packet(Opcode::GetUnitStatus, 0, 0))
            .expect("GUS");
        // One for the command slot coming back, one for the response.
        assert_eq!(port.memory.take_interrupts(), vec![HostPort::VECTOR; 2]);
        assert_eq!(flag_word(&port, COMM_CI), Some(1));
        assert_eq!(flag_word(&port, COMM_RI), Some(1));
        clear_flag_word(&mut port, COMM_CI);
        clear_flag_word(&mut port, COMM_RI);
    }
}

#[test]
fn test_wrap_mode_echoes_until_reset() {
    let mut port = HostPort::new(Controller::new(ControllerConfig::disk()), MEMORY);
    port.write_sa(SA_S1H_WR | 0x1234);
    assert_eq!(port.controller.state(), PortState::Step1Wrap);
    assert_eq!(port.read_sa(), SA_S1H_WR | 0x1234);
    port.write_sa(0x5555);
    assert_eq!(port.read_sa(), 0x5555);
    port.reset();
    assert_eq!(port.controller.state(), PortState::Step1);
    assert_eq!(port.read_sa() & SA_S1, SA_S1);
}

#[test]
fn test_purge_poll_test() {
    let mut port = HostPort::new(Controller::new(ControllerConfig::disk()), MEMORY);
    port.write_sa(0x8A00);
    port.write_sa(0x1000);
    port.write_sa(SA_S3H_PP);
    assert_eq!(port.controller.state(), PortState::Step3PurgePollA);
    assert_eq!(port.read_sa(), 0);

    port.reset();
    assert_eq!(port.controller.state(), PortState::Step3PurgePollA);

    port.write_sa(0);
    assert_eq!(port.controller.state(), PortState::Step3PurgePollB);
    port.write_sa(0x1234);
    assert_eq!(port.controller.state(), PortState::Step3PurgePollB);
    port.poll();
    assert_eq!(port.controller.state(), PortState::Step4);
    assert_eq!(port.read_sa() & SA_S4, SA_S4);
}

#[test]
fn test_purge_poll_failure_is_fatal() {
    let mut port = HostPort::new(Controller::new(ControllerConfig::disk()), MEMORY);
    port.write_sa(0x8A00);
    port.write_sa(0x1000);
    port.write_sa(SA_S3H_PP);
    port.write_sa(1);
    assert_eq!(port.controller.state(), PortState::Dead);
    assert_eq!(port.read_sa(), SA_ER | 15);
    assert_eq!(port.controller.last_failure(), Some(FatalCode::PurgePollFailure));
}

#[test]
fn test_online_twice() {
    let mut port = disk_port();
    port.controller.attach(0, blank(), false).expect("attach");
    let first = bring_online(&mut port, 0);
    let pkt = port.packet(Opcode::Online, 0, 0);
    let second = port.command(pkt).expect("second online");
    assert_eq!(second.status(), Status::ALREADY_ONLINE);
    assert_eq!(second.word(ONL_UFL), first.word(ONL_UFL));
    assert_eq!(second.long(ONL_SIZL), RA81.blocks);
    assert!(port.controller.units[0].online);
}

#[test]
fn test_credits_are_granted_with_end_messages() {
    let mut port = disk_port();
    let mut seen = Vec::new();
    for _ in 0..3 {
        let pkt = port.packet(Opcode::GetUnitStatus, 0, 0);
        seen.push(port.command(pkt).expect("GUS").credits());
    }
    // 15 to begin with: 14 granted, then the last one, then none.
    assert_eq!(seen, vec![15, 2, 1]);
}

#[test]
fn test_large_read_takes_four_chunks() {
    let mut port = disk_port();
    port.controller.attach(0, patterned(391 * 512), false).expect("attach");
    bring_online(&mut port, 0);

    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 200_000, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert_eq!(rsp.opcode_byte(), Opcode::Read.end_code());
    assert_eq!(rsp.long(RW_BCL), 200_000);
    assert_eq!(port.controller.units[0].chunks, 4);
    let expected: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
    assert_eq!(port.memory.dump(HostPort::DATA, 200_000), Some(expected));
    assert!(census_is_complete(&port.controller));
}

#[test]
fn test_command_status_of_transfer_in_progress() {
    let mut port = disk_port();
    port.controller.attach(0, blank(), false).expect("attach");
    bring_online(&mut port, 0);

    let mut read = port.packet(Opcode::Read, 0, 0);
    read.set_long(RW_BCL, 200_000);
    read.set_long(RW_BAL, HostPort::DATA);
    let reference = port.submit(read).expect("submit");
    while port.controller.units[0].chunks < 1 {
        assert!(port.step());
    }
    let mut gcs = port.packet(Opcode::GetCommandStatus, 0, 0);
    gcs.set_long(GCS_REFL, reference);
    let rsp = port.command(gcs).expect("GCS");
    assert_eq!(rsp.opcode_byte(), Opcode::GetCommandStatus.end_code());
    assert_eq!(rsp.long(GCS_STSL), 200_000 - 65_536);

    let rsp = port.wait_end().expect("read");
    assert_eq!(rsp.reference(), reference);
    assert_eq!(rsp.status(), Status::SUCCESS);
}

#[test]
fn test_zero_length_read() {
    let mut port = disk_port();
    port.controller.attach(0, blank(), false).expect("attach");
    bring_online(&mut port, 0);
    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 0, HostPort::DATA, 10);
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert_eq!(rsp.long(RW_BCL), 0);
    assert_eq!(port.controller.units[0].chunks, 0);
}

#[test]
fn test_transfer_validation() {
    let mut port = disk_port();
    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 512, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::NO_VOLUME);
    port.controller.attach(0, blank(), false).expect("attach");
    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 512, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::AVAILABLE);
    bring_online(&mut port, 0);

    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 512, HostPort::DATA + 1, 0);
    assert_eq!(rsp.status(), Status::ODD_ADDRESS);
    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 511, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::ODD_BYTE_COUNT);
    assert_eq!(rsp.long(RW_BCL), 0);
    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 1024, HostPort::DATA, RA81.blocks - 1);
    assert_eq!(rsp.status(), Status::INVALID_LBN);
    // Access doesn't touch the buffer, so its address may be odd.
    let rsp = transfer(&mut port, Opcode::Access, 0, 0, 512, HostPort::DATA + 1, 0);
    assert_eq!(rsp.status(), Status::SUCCESS);
    let rsp = transfer(&mut port, Opcode::Read, 9, 0, 512, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::OFFLINE);
}

#[test]
fn test_write_protected_disk() {
    let mut port = disk_port();
    port.controller.attach(1, blank(), true).expect("attach");
    bring_online(&mut port, 1);
    let rsp = transfer(&mut port, Opcode::Write, 1, 0, 512, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::HARDWARE_WRITE_LOCK);
    let rsp = transfer(&mut port, Opcode::Read, 1, 0, 512, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::SUCCESS);
}

#[test]
fn test_write_compare_and_erase() {
    let mut port = disk_port();
    port.controller.attach(0, blank(), false).expect("attach");
    bring_online(&mut port, 0);
    let data: Vec<u8> = (0..1024u32).map(|i| (i * 7) as u8).collect();
    assert!(port.memory.load(HostPort::DATA, &data));

    let rsp = transfer(&mut port, Opcode::Write, 0, 0, 1024, HostPort::DATA, 20);
    assert_eq!(rsp.status(), Status::SUCCESS);
    let rsp = transfer(&mut port, Opcode::Compare, 0, 0, 1024, HostPort::DATA, 20);
    assert_eq!(rsp.status(), Status::SUCCESS);
    let rsp = transfer(&mut port, Opcode::Compare, 0, 0, 1024, HostPort::DATA, 21);
    assert_eq!(rsp.status(), Status::COMPARE_ERROR);

    let rsp = transfer(&mut port, Opcode::Erase, 0, 0, 512, 0, 20);
    assert_eq!(rsp.status(), Status::SUCCESS);
    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 1024, HostPort::DATA + 0x1000, 20);
    assert_eq!(rsp.status(), Status::SUCCESS);
    let mut expected = vec![0u8; 512];
    expected.extend_from_slice(&data[512..]);
    assert_eq!(port.memory.dump(HostPort::DATA + 0x1000, 1024), Some(expected));
}

#[test]
fn test_file_backed_disk() {
    let dir = tempfile::tempdir().expect("temporary directory");
    let path = dir.path().join("ra81.dsk");
    let mut port = disk_port();
    port.controller.attach_file(0, &path, false).expect("attach file");
    bring_online(&mut port, 0);
    let data: Vec<u8> = (0..1024u32).map(|i| (i % 13) as u8).collect();
    assert!(port.memory.load(HostPort::DATA, &data));
    let rsp = transfer(&mut port, Opcode::Write, 0, 0, 1024, HostPort::DATA, 3);
    assert_eq!(rsp.status(), Status::SUCCESS);
    port.controller.detach(0).expect("detach");

    let contents = std::fs::read(&path).expect("image should exist");
    assert_eq!(contents.len(), 5 * 512);
    assert_eq!(&contents[3 * 512..], data.as_slice());
}

#[test]
fn test_attach_errors() {
    let mut port = disk_port();
    assert!(matches!(
        port.controller.attach(9, blank(), false),
        Err(AttachError::NoSuchUnit(9))
    ));
    port.controller.attach(0, blank(), false).expect("attach");
    assert!(matches!(
        port.controller.attach(0, blank(), false),
        Err(AttachError::AlreadyAttached(0))
    ));
    port.controller.detach(0).expect("detach");
    assert!(matches!(port.controller.detach(0), Err(AttachError::NotAttached(0))));

    let mut tapes = HostPort::new(
        Controller::new(ControllerConfig::tape().with_drives(vec![DriveType::Disk(&RA81)])),
        MEMORY,
    );
    assert!(matches!(
        tapes.controller.attach(0, blank(), false),
        Err(AttachError::WrongMediaClass { unit: 0, .. })
    ));
}

#[test]
fn test_abort_pending_command() {
    let mut port = disk_port();
    port.controller.attach(0, blank(), false).expect("attach");
    bring_online(&mut port, 0);

    let mut first = port.packet(Opcode::Read, 0, 0);
    first.set_long(RW_BCL, 200_000);
    first.set_long(RW_BAL, HostPort::DATA);
    let first = port.submit(first).expect("submit");
    let mut second = port.packet(Opcode::Read, 0, 0);
    second.set_long(RW_BCL, 512);
    second.set_long(RW_BAL, HostPort::DATA);
    let second = port.submit(second).expect("submit");
    let mut abort = port.packet(Opcode::Abort, 0, 0);
    abort.set_long(ABO_REFL, second);
    port.submit(abort).expect("submit");

    let rsp = port.wait_end().expect("aborted command");
    assert_eq!(rsp.reference(), second);
    assert_eq!(rsp.opcode_byte(), Opcode::Read.end_code());
    assert_eq!(rsp.status(), Status::ABORTED);
    let rsp = port.wait_end().expect("abort");
    assert_eq!(rsp.opcode_byte(), Opcode::Abort.end_code());
    assert_eq!(rsp.status(), Status::SUCCESS);
    let rsp = port.wait_end().expect("first read");
    assert_eq!(rsp.reference(), first);
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert!(port.controller.units[0].pending.is_empty());
    assert!(census_is_complete(&port.controller));
}

#[test]
fn test_abort_of_unknown_reference_succeeds() {
    let mut port = disk_port();
    let mut abort = port.packet(Opcode::Abort, 0, 0);
    abort.set_long(ABO_REFL, 0x1234_5678);
    let rsp = port.command(abort).expect("abort");
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert!(port.unsolicited.is_empty());
}

#[test]
fn test_pending_work_starts_in_unit_order() {
    let mut port = disk_port();
    let c = &mut port.controller;
    for unit in [3u16, 1] {
        let id = c.pool.acquire().expect("free packet");
        *c.pool.get_mut(id) = Packet::command(ConnectionId::Mscp, Opcode::Online, unit, 0);
        let n = usize::from(unit);
        let mut pending = c.units[n].pending;
        c.pool.enqueue(&mut pending, id, false);
        c.units[n].pending = pending;
    }
    let ctx = Context::at(port.now());
    port.controller
        .queue_service(&ctx, &mut port.memory)
        .expect("queue service");
    let units: Vec<u16> = std::iter::from_fn(|| port.collect().expect("collect"))
        .map(|rsp| rsp.unit())
        .collect();
    assert_eq!(units, vec![1, 3]);
    assert!(census_is_complete(&port.controller));
}

fn two_chunk_read(port: &HostPort, unit: u16, ba: u32, lbn: u32) -> Packet {
    let mut pkt = port.packet(Opcode::Read, unit, 0);
    pkt.set_long(RW_BCL, 2 << 16);
    pkt.set_long(RW_BAL, ba);
    pkt.set_long(RW_LBNL, lbn);
    pkt
}

#[test]
fn test_pending_work_starts_before_the_command_ring_is_polled() {
    let mut port = disk_port();
    for unit in [0, 1] {
        port.controller.attach(unit, blank(), false).expect("attach");
        bring_online(&mut port, unit as u16);
    }
    let until = port.now() + Duration::from_millis(1);
    run_until(&mut port, until);
    assert!(!port.controller.timers.is_armed(TimerId::Queue));
    let start = port.now();
    let at = |micros: u64| start + Duration::from_micros(micros);

    // The port takes one command per queue tick (every 200us) and
    // moves one 64KiB chunk per unit tick (every 500us).
    let a = port.submit(two_chunk_read(&port, 0, HostPort::DATA, 0)).expect("submit");
    let c = port.submit(two_chunk_read(&port, 1, HostPort::DATA + 0x40000, 0)).expect("submit");
    let d = port.submit(two_chunk_read(&port, 1, HostPort::DATA + 0x40000, 256)).expect("submit");
    let b = port.submit(two_chunk_read(&port, 0, HostPort::DATA + 0x20000, 256)).expect("submit");

    // All four fetched: A and C running, D and B waiting behind them.
    run_until(&mut port, at(1000));
    assert!(!port.controller.polling);
    for n in [0, 1] {
        assert!(port.controller.units[n].busy());
        assert!(!port.controller.units[n].pending.is_empty());
    }
    assert!(census_is_complete(&port.controller));

    // A finishes; unit 0 is idle with work pending.
    run_until(&mut port, at(1200));
    assert!(!port.controller.units[0].busy());
    let rsp = port.collect().expect("collect").expect("A should have ended");
    assert_eq!(rsp.reference(), a);

    // Another command arrives before the next queue tick.
    let gus_slot = port.controller.info().command_ring.base;
    let e = port.submit(port.packet(Opcode::GetUnitStatus, 0, 0)).expect("submit");
    let command_waiting = |port: &HostPort| {
        let bits = port.memory.read_u32(gus_slot).expect("descriptor");
        Descriptor::from_bits(bits).owned_by_port()
    };
    assert!(command_waiting(&port));

    // C finishes and the queue tick starts B and then D.  Work was
    // started, so the command ring is left alone on this tick.
    assert!(port.step());
    assert_eq!(port.now(), at(1400));
    for n in [0, 1] {
        assert!(port.controller.units[n].busy());
        assert!(port.controller.units[n].pending.is_empty());
    }
    assert!(command_waiting(&port));
    let rsp = port.collect().expect("collect").expect("C should have ended");
    assert_eq!(rsp.reference(), c);
    assert!(census_is_complete(&port.controller));

    // The next tick has no pending work to start, so it polls.
    assert!(port.step());
    assert_eq!(port.now(), at(1600));
    assert!(!command_waiting(&port));
    let rsp = port.collect().expect("collect").expect("GUS should have ended");
    assert_eq!(rsp.reference(), e);

    // B was started first, so it ends first.
    let ends: Vec<u32> = (0..2)
        .map(|_| port.wait_end().expect("transfer should end").reference())
        .collect();
    assert_eq!(ends, vec![b, d]);
    assert!(census_is_complete(&port.controller));
}

#[test]
fn test_get_unit_status_next_unit() {
    let mut port = disk_port();
    port.controller.attach(2, blank(), false).expect("attach");

    let rsp = port.command(port.packet(Opcode::GetUnitStatus, 7, 0)).expect("GUS");
    assert_eq!(rsp.status(), Status::OFFLINE);

    let rsp = port
        .command(port.packet(Opcode::GetUnitStatus, 7, md::NXU))
        .expect("GUS");
    assert_eq!(rsp.unit(), 0);
    assert_eq!(rsp.status(), Status::NO_VOLUME);
    assert_eq!(rsp.opcode_byte(), Opcode::GetUnitStatus.end_code());

    let rsp = port
        .command(port.packet(Opcode::GetUnitStatus, 2, md::NXU))
        .expect("GUS");
    assert_eq!(rsp.unit(), 2);
    assert_eq!(rsp.status(), Status::AVAILABLE);
    assert_eq!(rsp.word(GUS_TRK), RA81.sectors);
    assert_eq!(rsp.word(GUS_RBSC), (1 << 8) | RA81.rbns);
}

#[test]
fn test_set_controller_characteristics() {
    let mut port = disk_port();
    let rsp = set_controller_flags(&mut port, ControllerFlags::ATTENTION, 30);
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert_eq!(rsp.word(SCC_CIDD), (1 << 8) | 19);
    assert_eq!(rsp.word(SCC_VER), 3);
    assert_eq!(rsp.word(SCC_TMO), 255);
    assert_eq!(
        rsp.word(SCC_CFL),
        ControllerFlags::REPLICATE.bits() | ControllerFlags::ATTENTION.bits()
    );
    assert_eq!(port.controller.info().host_timeout, 32);

    let mut pkt = port.packet(Opcode::SetControllerCharacteristics, 0, 0);
    pkt.set_word(SCC_MSV, 1);
    pkt.set_word(SCC_CFL, 0xFFFF);
    pkt.set_word(SCC_TMO, 7);
    let rsp = port.command(pkt).expect("SCC");
    assert_eq!(rsp.status(), Status::INVALID_VERSION);
    for word in SCC_CFL..=SCC_MBCH {
        assert_eq!(rsp.word(word), 0, "word {word} should be cleared");
    }
    assert_eq!(port.controller.info().host_timeout, 32);
}

#[test]
fn test_invalid_commands() {
    let mut port = disk_port();

    let mut pkt = port.packet(Opcode::GetUnitStatus, 0, 0);
    pkt.set_word(CMD_OPC, 0x7E);
    let rsp = port.command(pkt).expect("bad opcode");
    assert_eq!(rsp.status(), Status::INVALID_OPCODE);
    assert_eq!(rsp.opcode_byte(), 0x7E | 0x80);

    let rsp = port.command(port.packet(Opcode::Reposition, 0, 0)).expect("tape opcode");
    assert_eq!(rsp.status(), Status::INVALID_OPCODE);

    let mut pkt = port.packet(Opcode::GetUnitStatus, 0, 0);
    pkt.set_word(CMD_OPC, u16::from(Opcode::GetUnitStatus.code()) | 0x0100);
    let rsp = port.command(pkt).expect("bad flags");
    assert_eq!(rsp.status(), Status::INVALID_FLAGS);

    let rsp = port.command(port.packet(Opcode::Abort, 0, md::EXP)).expect("bad modifiers");
    assert_eq!(rsp.status(), Status::INVALID_MODIFIERS);
    assert_eq!(port.controller.state(), PortState::Up);
}

#[test]
fn test_dup_commands_are_refused() {
    let mut port = disk_port();
    let pkt = Packet::command(ConnectionId::Dup, Opcode::GetUnitStatus, 0, 0);
    let rsp = port.command(pkt).expect("DUP");
    assert_eq!(rsp.status(), Status::INVALID_OPCODE);
    assert_eq!(rsp.connection_id(), ConnectionId::Mscp);
    assert_eq!(port.controller.state(), PortState::Up);
}

#[test]
fn test_unknown_connection_is_fatal() {
    let mut port = disk_port();
    let pkt = Packet::command(ConnectionId::Other(9), Opcode::GetUnitStatus, 0, 0);
    let sa = SA_ER | FatalCode::InvalidConnectionId.code();
    assert_eq!(port.command(pkt), Err(HostError::PortFailed { sa }));
    assert_eq!(port.read_sa(), sa);
}

#[test]
fn test_datagram_command_is_fatal() {
    let mut port = disk_port();
    let mut pkt = port.packet(Opcode::GetUnitStatus, 0, 0);
    pkt.set_word(UQ_CTC, header_ctc(0, MessageType::Datagram, ConnectionId::Mscp));
    let sa = SA_ER | FatalCode::PacketInterfaceError.code();
    assert_eq!(port.command(pkt), Err(HostError::PortFailed { sa }));
}

#[test]
fn test_descriptor_write_fault_and_last_fail() {
    let mut port = disk_port();
    // The command ring follows the four response descriptors.
    let ring = HostPort::COMM + 16;
    port.memory.fail_writes(ring..ring + 16);
    let sa = SA_ER | FatalCode::QueueWriteError.code();
    let pkt = port.packet(Opcode::GetUnitStatus, 0, 0);
    assert_eq!(port.command(pkt), Err(HostError::PortFailed { sa }));
    assert_eq!(port.controller.state(), PortState::Dead);
    assert_eq!(port.controller.last_failure(), Some(FatalCode::QueueWriteError));
    assert!(census_is_complete(&port.controller));

    port.memory.clear_faults();
    port.initialise(2, 2, true).expect("port should come back");
    assert_eq!(port.controller.last_failure(), None);
    let rsp = port
        .wait_response(Duration::from_secs(1))
        .expect("last-fail message");
    assert_eq!(rsp.message_type(), MessageType::Datagram);
    assert_eq!(rsp.connection_id(), ConnectionId::Diagnostic);
    assert_eq!(rsp.status(), Status::CONTROLLER_ERROR);
    assert_eq!(rsp.word(PLF_ERR), FatalCode::QueueWriteError.code());
    assert_eq!(rsp.word(PLF_CIDD), (1 << 8) | 19);
}

#[test]
fn test_last_fail_not_sent_unless_asked() {
    let mut port = disk_port();
    port.write_sa(0x1234);
    port.memory.fail_writes(HostPort::COMM + 16..HostPort::COMM + 32);
    assert!(port.command(port.packet(Opcode::GetUnitStatus, 0, 0)).is_err());
    port.memory.clear_faults();
    port.initialise(2, 2, false).expect("port should come back");
    assert_eq!(port.controller.last_failure(), None);
    assert!(port.collect().expect("collect").is_none());
}

#[test]
fn test_host_timeout() {
    let mut port = HostPort::new(Controller::new(ControllerConfig::disk()), MEMORY);
    port.initialise(2, 0, false).expect("port should come up");
    set_controller_flags(&mut port, ControllerFlags::default(), 1);
    let start = port.now();

    // Nobody collects the responses, so the second one has nowhere
    // to go.
    port.submit(port.packet(Opcode::GetUnitStatus, 0, 0)).expect("submit");
    port.submit(port.packet(Opcode::GetUnitStatus, 1, 0)).expect("submit");
    while port.controller.state() == PortState::Up && port.now() < start + Duration::from_secs(10) {
        assert!(port.step());
    }
    assert_eq!(port.controller.state(), PortState::Dead);
    assert_eq!(port.controller.last_failure(), Some(FatalCode::HostAccessTimeout));
    assert!(port.now() >= start + Duration::from_secs(2));
}

#[test]
fn test_no_host_timeout_while_idle() {
    let mut port = disk_port();
    set_controller_flags(&mut port, ControllerFlags::default(), 1);
    let start = port.now();
    while port.now() < start + Duration::from_secs(10) {
        assert!(port.step());
    }
    assert_eq!(port.controller.state(), PortState::Up);
}

#[test]
fn test_attention_on_attach() {
    let mut port = disk_port();
    set_controller_flags(&mut port, ControllerFlags::ATTENTION, 0);
    port.controller.attach(1, blank(), false).expect("attach");
    let msg = port
        .wait_response(Duration::from_secs(2))
        .expect("attention message");
    assert_eq!(msg.opcode_byte(), Opcode::AvailableAttention.code());
    assert_eq!(msg.message_type(), MessageType::Sequential);
    assert_eq!(msg.unit(), 1);
    assert!(!port.controller.units[1].attention_pending);
}

#[test]
fn test_no_attention_unless_enabled() {
    let mut port = disk_port();
    port.controller.attach(1, blank(), false).expect("attach");
    assert_eq!(port.wait_response(Duration::from_secs(2)), Err(HostError::Timeout));
    assert!(!port.controller.units[1].attention_pending);
}

#[test]
fn test_host_bus_error_is_logged() {
    let mut port = disk_port();
    set_controller_flags(&mut port, ControllerFlags::THIS_HOST_ERROR_LOG, 0);
    port.controller.attach(0, blank(), false).expect("attach");
    bring_online(&mut port, 0);
    port.memory.fail_writes(HostPort::DATA..HostPort::DATA + 512);

    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 1024, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::NON_EXISTENT_MEMORY);
    assert!(rsp.end_flags().contains(EndFlags::ERROR_LOG));
    assert_eq!(rsp.long(RW_BCL), 0);

    assert_eq!(port.unsolicited.len(), 1);
    let log = &port.unsolicited[0];
    assert_eq!(log.message_type(), MessageType::Datagram);
    assert_eq!(log.opcode_byte(), 1);
    assert_eq!(log.flags_byte(), 1);
    assert_eq!(log.status(), Status::NON_EXISTENT_MEMORY);
    assert_eq!(log.long(HBE_BADL), HostPort::DATA);
    assert_eq!(log.long(ELP_REFL), rsp.reference());
    assert_eq!(log.word(ELP_SEQ), 0);
}

#[test]
fn test_host_bus_error_without_logging() {
    let mut port = disk_port();
    port.controller.attach(0, blank(), false).expect("attach");
    bring_online(&mut port, 0);
    port.memory.add_nxm(HostPort::DATA + 512..HostPort::DATA + 1024);
    let rsp = transfer(&mut port, Opcode::Write, 0, 0, 1024, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::NON_EXISTENT_MEMORY);
    assert!(!rsp.end_flags().contains(EndFlags::ERROR_LOG));
    assert!(port.unsolicited.is_empty());
}

#[test]
fn test_reset_discards_work() {
    let mut port = disk_port();
    port.controller.attach(0, blank(), false).expect("attach");
    bring_online(&mut port, 0);
    let mut read = port.packet(Opcode::Read, 0, 0);
    read.set_long(RW_BCL, 200_000);
    read.set_long(RW_BAL, HostPort::DATA);
    port.submit(read).expect("submit");
    while !port.controller.units[0].busy() {
        assert!(port.step());
    }
    port.reset();
    let info = port.controller.info();
    assert_eq!(info.state, PortState::Step1);
    assert_eq!(info.packets_free, info.packets);
    assert!(info.units.iter().all(|u| !u.busy && !u.online));
    assert!(info.units[0].attached);
    assert_eq!(port.controller.next_deadline(), None);
}

#[test]
fn test_info_snapshot() {
    let mut port = tape_port();
    port.controller.attach(2, blank(), false).expect("attach");
    let info = port.controller.info();
    assert_eq!(info.protocol, Protocol::Tmscp);
    assert_eq!(info.csr, 0o17774500);
    assert_eq!(info.state, PortState::Up);
    assert_eq!(info.packets, 32);
    assert_eq!(info.units.len(), 4);
    assert_eq!(info.units[2].drive, "TK50");
    assert!(info.units[2].attached);
    assert_eq!(info.units[2].tape_position, Some(0));
    assert_eq!(info.units[1].tape_position, None);
    assert_eq!(port.controller.unit_count(), 4);
}

#[test]
fn test_register_offsets() {
    assert_eq!(Register::from_offset(0), Some(Register::InitPoll));
    assert_eq!(Register::from_offset(1), Some(Register::StatusAddress));
    assert_eq!(Register::from_offset(2), None);
}

// Tape.

fn write_record(port: &mut HostPort, data: &[u8]) -> Packet {
    assert!(port.memory.load(HostPort::DATA, data));
    transfer(port, Opcode::Write, 0, 0, data.len() as u32, HostPort::DATA, 0)
}

fn write_mark(port: &mut HostPort) -> Packet {
    port.command(port.packet(Opcode::WriteTapeMark, 0, 0))
        .expect("write tape mark")
}

fn reposition(port: &mut HostPort, modifiers: u16, records: u32, marks: u32) -> Packet {
    let mut pkt = port.packet(Opcode::Reposition, 0, modifiers);
    pkt.set_long(POS_RCL, records);
    pkt.set_long(POS_TMCL, marks);
    port.command(pkt).expect("reposition")
}

fn loaded_tape_port() -> HostPort {
    let mut port = tape_port();
    port.controller.attach(0, blank(), false).expect("attach");
    bring_online(&mut port, 0);
    port
}

#[test]
fn test_tape_write_and_read_back() {
    let mut port = loaded_tape_port();
    let rsp = write_record(&mut port, b"hello, tape!");
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert_eq!(rsp.long(RW_BCL), 12);
    assert_eq!(rsp.long(RW_POSL), 1);
    let long: Vec<u8> = (0..100u8).collect();
    write_record(&mut port, &long);
    let rsp = write_mark(&mut port);
    assert_eq!(rsp.status(), Status::SUCCESS);

    let rsp = reposition(&mut port, md::RWD, 0, 0);
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert_eq!(rsp.long(POS_POSL), 0);

    let buffer = HostPort::DATA + 0x1000;
    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 512, buffer, 0);
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert_eq!(rsp.long(RW_BCL), 12);
    assert_eq!(rsp.long(RW_RSZL), 12);
    assert_eq!(rsp.long(RW_POSL), 1);
    assert_eq!(port.memory.dump(buffer, 12), Some(b"hello, tape!".to_vec()));

    // A short read truncates the record.
    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 10, buffer, 0);
    assert_eq!(rsp.status(), Status::RECORD_TRUNCATED);
    assert_eq!(rsp.long(RW_BCL), 10);
    assert_eq!(rsp.long(RW_RSZL), 100);
    assert!(rsp.end_flags().contains(EndFlags::SERIOUS_EXCEPTION));
}

#[test]
fn test_tape_reverse_read() {
    let mut port = loaded_tape_port();
    write_record(&mut port, b"abcdef");
    let buffer = HostPort::DATA + 0x1000;
    let rsp = transfer(&mut port, Opcode::Read, 0, md::REV, 512, buffer, 0);
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert_eq!(rsp.long(RW_BCL), 6);
    assert_eq!(rsp.long(RW_POSL), 0);
    assert_eq!(port.memory.dump(buffer, 6), Some(b"fedcba".to_vec()));
}

#[test]
fn test_tape_mark_sets_serious_exception() {
    let mut port = loaded_tape_port();
    write_record(&mut port, b"data");
    write_mark(&mut port);
    reposition(&mut port, md::RWD, 0, 0);

    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 512, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::SUCCESS);
    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 512, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::TAPE_MARK);
    assert!(rsp.end_flags().contains(EndFlags::SERIOUS_EXCEPTION));
    assert_eq!(rsp.long(RW_POSL), 2);

    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 512, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::SERIOUS_EXCEPTION);
    assert_eq!(rsp.long(RW_BCL), 0);

    let rsp = reposition(&mut port, md::RWD | md::CSE, 0, 0);
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert!(!rsp.end_flags().contains(EndFlags::SERIOUS_EXCEPTION));
    assert!(!port.controller.units[0].tape.serious_exception);
}

#[test]
fn test_available_refused_during_serious_exception() {
    let mut port = loaded_tape_port();
    write_mark(&mut port);
    reposition(&mut port, md::RWD, 0, 0);
    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 512, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::TAPE_MARK);

    let rsp = port.command(port.packet(Opcode::Available, 0, 0)).expect("available");
    assert_eq!(rsp.status(), Status::SERIOUS_EXCEPTION);
    let rsp = port
        .command(port.packet(Opcode::Available, 0, md::CSE | md::UNL))
        .expect("available");
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert!(!port.controller.units[0].attached());
}

#[test]
fn test_reposition_counts() {
    let mut port = loaded_tape_port();
    for record in [b"one.", b"two.", b"thr."] {
        write_record(&mut port, record);
    }
    write_mark(&mut port);
    write_record(&mut port, b"four");
    reposition(&mut port, md::RWD, 0, 0);

    let rsp = reposition(&mut port, 0, 2, 0);
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert_eq!(rsp.long(POS_RCL), 2);
    assert_eq!(rsp.long(POS_POSL), 2);

    let rsp = reposition(&mut port, 0, 0, 1);
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert_eq!(rsp.long(POS_TMCL), 1);
    assert_eq!(rsp.long(POS_POSL), 4);

    let rsp = reposition(&mut port, md::REV | md::OBC, 3, 0);
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert_eq!(rsp.long(POS_RCL), 3);
    assert_eq!(rsp.long(POS_POSL), 1);

    // Skipping records stops at a tape mark.
    reposition(&mut port, md::RWD, 0, 0);
    let rsp = reposition(&mut port, 0, 5, 0);
    assert_eq!(rsp.status(), Status::TAPE_MARK);
    assert_eq!(rsp.long(POS_RCL), 3);
}

#[test]
fn test_leot_detection() {
    let mut port = loaded_tape_port();
    write_record(&mut port, b"data");
    write_mark(&mut port);
    write_mark(&mut port);
    reposition(&mut port, md::RWD, 0, 0);

    let rsp = reposition(&mut port, md::DLE, 0, 5);
    assert_eq!(rsp.status(), Status::LEOT_DETECTED);
    assert_eq!(rsp.long(POS_TMCL), 2);
    assert_eq!(rsp.long(POS_POSL), 3);
    assert!(rsp.end_flags().contains(EndFlags::SERIOUS_EXCEPTION));
}

#[test]
fn test_tape_write_protect_and_byte_counts() {
    let mut port = tape_port();
    port.controller.attach(0, blank(), true).expect("attach");
    bring_online(&mut port, 0);
    let rsp = transfer(&mut port, Opcode::Write, 0, 0, 4, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::HARDWARE_WRITE_LOCK);
    let rsp = write_mark(&mut port);
    assert_eq!(rsp.status(), Status::HARDWARE_WRITE_LOCK);
    let rsp = transfer(&mut port, Opcode::Read, 0, 0, 0, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::INVALID_BYTE_COUNT);
    let rsp = transfer(&mut port, Opcode::Read, 0, 0, TK50.max_record + 2, HostPort::DATA, 0);
    assert_eq!(rsp.status(), Status::INVALID_BYTE_COUNT);
    // Refused commands don't put the unit into serious exception.
    assert!(!port.controller.units[0].tape.serious_exception);
}

#[test]
fn test_tape_flush_and_erase_gap() {
    let mut port = loaded_tape_port();
    let rsp = port.command(port.packet(Opcode::Flush, 0, 0)).expect("flush");
    assert_eq!(rsp.status(), Status::SUCCESS);
    let rsp = port.command(port.packet(Opcode::EraseGap, 0, 0)).expect("erase gap");
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert_eq!(port.controller.units[0].tape.objects, 0);
}

#[test]
fn test_tape_command_on_disk_opcode() {
    let mut port = loaded_tape_port();
    let rsp = port
        .command(port.packet(Opcode::CompareControllerData, 0, 0))
        .expect("CCD");
    assert_eq!(rsp.status(), Status::INVALID_OPCODE);
    let rsp = port
        .command(port.packet(Opcode::GetUnitStatus, 0, 0))
        .expect("GUS");
    assert_eq!(rsp.status(), Status::SUCCESS);
    assert_eq!(rsp.word(GUS_FMT), TK50.format);
    assert_eq!(rsp.word(GUS_FVER), TK50.formatter_version);
}
