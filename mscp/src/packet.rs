//! Message packets and the port's fixed pool of them.
//!
//! Every packet the controller handles (commands fetched from the
//! host, responses, error log and attention messages) lives in one
//! slot of the [`PacketPool`].  At any moment each slot is on exactly
//! one list: the free list, a unit's current work slot, a unit's
//! pending queue, or the response backlog.  Lists are threaded
//! through the pool by slot index, so moving a packet between lists
//! never allocates.
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use base::prelude::*;
use base::uqssp::{header_ctc, UQ_M_CR};

/// Size of a packet buffer in host memory, including its header.
pub(crate) const PACKET_BYTES: usize = PACKET_WORDS * 2;

/// Identifies a slot in the packet pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PacketId(usize);

impl PacketId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for PacketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "pkt{}", self.0)
    }
}

/// A message packet: the two header words (length, and
/// credits/type/connection) followed by the message body, indexed by
/// word offset as laid out in [`base::layout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    words: [u16; PACKET_WORDS],
}

impl Default for Packet {
    fn default() -> Packet {
        Packet {
            words: [0; PACKET_WORDS],
        }
    }
}

impl Packet {
    /// A command packet header for `opcode` addressed to `unit`.
    #[must_use]
    pub fn command(cid: ConnectionId, opcode: Opcode, unit: u16, modifiers: u16) -> Packet {
        let mut pkt = Packet::default();
        pkt.set_word(UQ_LNT, 36);
        pkt.set_word(UQ_CTC, header_ctc(0, MessageType::Sequential, cid));
        pkt.set_word(CMD_UN, unit);
        pkt.set_word(CMD_OPC, u16::from(opcode.code()));
        pkt.set_word(CMD_MOD, modifiers);
        pkt
    }

    #[must_use]
    pub fn word(&self, offset: usize) -> u16 {
        self.words[offset]
    }

    pub fn set_word(&mut self, offset: usize, value: u16) {
        self.words[offset] = value;
    }

    /// A 32-bit field whose low half is at `lo` and high half at
    /// `lo + 1`.
    #[must_use]
    pub fn long(&self, lo: usize) -> u32 {
        join_u32(self.words[lo], self.words[lo + 1])
    }

    pub fn set_long(&mut self, lo: usize, value: u32) {
        let (l, h) = split_u32(value);
        self.words[lo] = l;
        self.words[lo + 1] = h;
    }

    /// Message length in bytes, not counting the header.
    #[must_use]
    pub fn length(&self) -> u16 {
        self.words[UQ_LNT]
    }

    #[must_use]
    pub fn message_type(&self) -> MessageType {
        MessageType::from_header(self.words[UQ_CTC])
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId::from_header(self.words[UQ_CTC])
    }

    #[must_use]
    pub fn credits(&self) -> u16 {
        self.words[UQ_CTC] & UQ_M_CR
    }

    #[must_use]
    pub fn reference(&self) -> u32 {
        self.long(CMD_REFL)
    }

    pub fn set_reference(&mut self, reference: u32) {
        self.set_long(CMD_REFL, reference);
    }

    #[must_use]
    pub fn unit(&self) -> u16 {
        self.words[CMD_UN]
    }

    /// The opcode byte of a command (or of an end message, including
    /// the end bit).
    #[must_use]
    pub fn opcode_byte(&self) -> u8 {
        self.words[CMD_OPC].to_le_bytes()[0]
    }

    /// Command flags (commands) or end flags (responses).
    #[must_use]
    pub fn flags_byte(&self) -> u8 {
        self.words[CMD_OPC].to_le_bytes()[1]
    }

    #[must_use]
    pub fn modifiers(&self) -> u16 {
        self.words[CMD_MOD]
    }

    #[must_use]
    pub fn status(&self) -> Status {
        Status::from_bits(self.words[RSP_STS])
    }

    #[must_use]
    pub fn end_flags(&self) -> EndFlags {
        EndFlags::from_bits(self.flags_byte())
    }

    /// Overwrite the packet with `buf`, which holds the header and
    /// body in host byte order.  Missing trailing bytes read as zero.
    pub fn load(&mut self, buf: &[u8]) {
        for (i, w) in self.words.iter_mut().enumerate() {
            let lo = buf.get(2 * i).copied().unwrap_or(0);
            let hi = buf.get(2 * i + 1).copied().unwrap_or(0);
            *w = u16::from_le_bytes([lo, hi]);
        }
    }

    /// Serialise the header and the first `len` bytes of the body.
    #[must_use]
    pub fn header_and_body(&self, len: usize) -> Vec<u8> {
        let total = (len + HEADER_BYTES as usize).min(PACKET_BYTES);
        let mut out = Vec::with_capacity(total);
        for w in &self.words {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out.truncate(total);
        out
    }
}

/// A singly-linked list of packets, threaded through the pool.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PacketQueue {
    head: Option<PacketId>,
    tail: Option<PacketId>,
    len: usize,
}

impl PacketQueue {
    pub(crate) fn head(&self) -> Option<PacketId> {
        self.head
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug)]
pub(crate) struct PacketPool {
    packets: Vec<Packet>,
    links: Vec<Option<PacketId>>,
    free: PacketQueue,
}

impl PacketPool {
    pub(crate) fn new(size: usize) -> PacketPool {
        let mut pool = PacketPool {
            packets: vec![Packet::default(); size],
            links: vec![None; size],
            free: PacketQueue::default(),
        };
        pool.reset();
        pool
    }

    /// Put every packet back on the free list, lowest index first.
    pub(crate) fn reset(&mut self) {
        let mut free = PacketQueue::default();
        for i in 0..self.packets.len() {
            self.append(&mut free, PacketId(i), false);
        }
        self.free = free;
    }

    pub(crate) fn capacity(&self) -> usize {
        self.packets.len()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn busy_count(&self) -> usize {
        self.capacity() - self.free_count()
    }

    /// Take the packet at the head of the free list.  Its contents are
    /// cleared.
    pub(crate) fn acquire(&mut self) -> Option<PacketId> {
        let mut free = self.free;
        let id = self.dequeue(&mut free);
        self.free = free;
        if let Some(id) = id {
            self.packets[id.0] = Packet::default();
        }
        id
    }

    /// Return a packet to the head of the free list.
    pub(crate) fn release(&mut self, id: PacketId) {
        let mut free = self.free;
        self.enqueue(&mut free, id, true);
        self.free = free;
    }

    pub(crate) fn get(&self, id: PacketId) -> &Packet {
        &self.packets[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: PacketId) -> &mut Packet {
        &mut self.packets[id.0]
    }

    fn append(&mut self, queue: &mut PacketQueue, id: PacketId, at_head: bool) {
        if at_head {
            self.links[id.0] = queue.head;
            queue.head = Some(id);
            if queue.tail.is_none() {
                queue.tail = Some(id);
            }
        } else {
            self.links[id.0] = None;
            match queue.tail {
                Some(t) => self.links[t.0] = Some(id),
                None => queue.head = Some(id),
            }
            queue.tail = Some(id);
        }
        queue.len += 1;
    }

    pub(crate) fn enqueue(&mut self, queue: &mut PacketQueue, id: PacketId, at_head: bool) {
        self.append(queue, id, at_head);
    }

    pub(crate) fn dequeue(&mut self, queue: &mut PacketQueue) -> Option<PacketId> {
        let id = queue.head?;
        queue.head = self.links[id.0].take();
        if queue.head.is_none() {
            queue.tail = None;
        }
        queue.len -= 1;
        Some(id)
    }

    /// Unlink `id` from wherever it sits in `queue`.  Returns false if
    /// it is not on the queue.
    pub(crate) fn remove(&mut self, queue: &mut PacketQueue, id: PacketId) -> bool {
        let mut prev: Option<PacketId> = None;
        let mut cur = queue.head;
        while let Some(c) = cur {
            if c == id {
                let next = self.links[c.0].take();
                match prev {
                    Some(p) => self.links[p.0] = next,
                    None => queue.head = next,
                }
                if queue.tail == Some(c) {
                    queue.tail = prev;
                }
                queue.len -= 1;
                return true;
            }
            prev = cur;
            cur = self.links[c.0];
        }
        false
    }

    pub(crate) fn iter<'a>(&'a self, queue: &PacketQueue) -> impl Iterator<Item = PacketId> + 'a {
        let mut cur = queue.head;
        std::iter::from_fn(move || {
            let c = cur?;
            cur = self.links[c.0];
            Some(c)
        })
    }

    /// The first packet on `queue` for which `pred` holds.
    pub(crate) fn find<F>(&self, queue: &PacketQueue, pred: F) -> Option<PacketId>
    where
        F: Fn(&Packet) -> bool,
    {
        self.iter(queue).find(|id| pred(self.get(*id)))
    }
}
