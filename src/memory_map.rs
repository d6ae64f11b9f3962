use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use serde::{Deserialize, Serialize};

// Physical memory map
pub const MM_RDRAM_DRAM: u32 = 0x0000_0000;
pub const MM_RDRAM_REGS: u32 = 0x03f0_0000;
pub const MM_RSP_MEM: u32 = 0x0400_0000;
pub const MM_RSP_REGS: u32 = 0x0404_0000;
pub const MM_RSP_REGS2: u32 = 0x0408_0000;
pub const MM_DPC_REGS: u32 = 0x0410_0000;
pub const MM_DPS_REGS: u32 = 0x0420_0000;
pub const MM_MI_REGS: u32 = 0x0430_0000;
pub const MM_VI_REGS: u32 = 0x0440_0000;
pub const MM_AI_REGS: u32 = 0x0450_0000;
pub const MM_PI_REGS: u32 = 0x0460_0000;
pub const MM_RI_REGS: u32 = 0x0470_0000;
pub const MM_SI_REGS: u32 = 0x0480_0000;
pub const MM_DOM2_ADDR1: u32 = 0x0500_0000;
pub const MM_DD_REGS: u32 = 0x0500_0000;
pub const MM_DD_ROM: u32 = 0x0600_0000;
pub const MM_DOM2_ADDR2: u32 = 0x0800_0000;
pub const MM_CART_ROM: u32 = 0x1000_0000;
pub const MM_IS_VIEWER: u32 = 0x13ff_0000;
pub const MM_PIF_MEM: u32 = 0x1fc0_0000;
pub const MM_CART_DOM3: u32 = 0x1fd0_0000;

// Slot identities inside the ordered range list
pub const SLOT_BACKGROUND: usize = 0;
pub const SLOT_RDRAM: usize = 1;
pub const SLOT_RDRAM_REGS: usize = 2;
pub const SLOT_RSP_MEM: usize = 3;
pub const SLOT_RSP_REGS: usize = 4;
pub const SLOT_RSP_REGS2: usize = 5;
pub const SLOT_DPC_REGS: usize = 6;
pub const SLOT_DPS_REGS: usize = 7;
pub const SLOT_MI_REGS: usize = 8;
pub const SLOT_VI_REGS: usize = 9;
pub const SLOT_AI_REGS: usize = 10;
pub const SLOT_PI_REGS: usize = 11;
pub const SLOT_RI_REGS: usize = 12;
pub const SLOT_SI_REGS: usize = 13;
pub const SLOT_DD_REGS: usize = 14;
pub const SLOT_DD_ROM: usize = 15;
pub const SLOT_CART_DOM2: usize = 16;
pub const SLOT_IS_VIEWER: usize = 17;
pub const SLOT_CART_ROM: usize = 18;
pub const SLOT_PIF: usize = 19;
pub const SLOT_COUNT: usize = 20;

/// Returns the inclusive `(begin, end)` bounds of a window starting at `base`
/// whose offsets fit in `mask`.
pub const fn window(base: u32, mask: u32) -> (u32, u32) {
    (base, base | mask)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    Rdram,
    RdramRegs,
    RspMem,
    RspRegs,
    DpRegs,
    MiRegs,
    ViRegs,
    AiRegs,
    PiRegs,
    RiRegs,
    SiRegs,
    FlashStatus,
    Rom,
    DiskRegs,
    DiskRom,
    Pif,
    IsViewer,
    Unmapped,
}

pub type ReadFn = Rc<dyn Fn(u32) -> u32>;
pub type WriteFn = Rc<dyn Fn(u32, u32, u32)>;

/// A read/write pair bound to a device context. The context is held weakly:
/// the owning device keeps subsystems alive, the map only refers to them.
#[derive(Clone)]
pub struct MemHandler {
    name: &'static str,
    read: ReadFn,
    write: WriteFn,
}

impl MemHandler {
    pub fn new(
        name: &'static str,
        read: impl Fn(u32) -> u32 + 'static,
        write: impl Fn(u32, u32, u32) + 'static,
    ) -> Self {
        Self {
            name,
            read: Rc::new(read),
            write: Rc::new(write),
        }
    }

    /// Binds a pair of methods of `T` to a shared context.
    pub fn bind<T: 'static>(
        name: &'static str,
        context: &Rc<RefCell<T>>,
        read: fn(&mut T, u32) -> u32,
        write: fn(&mut T, u32, u32, u32),
    ) -> Self {
        let rctx: Weak<RefCell<T>> = Rc::downgrade(context);
        let wctx = rctx.clone();
        Self::new(
            name,
            move |address| match rctx.upgrade() {
                Some(ctx) => read(&mut ctx.borrow_mut(), address),
                None => read_open_bus(address),
            },
            move |address, value, mask| {
                if let Some(ctx) = wctx.upgrade() {
                    write(&mut ctx.borrow_mut(), address, value, mask);
                }
            },
        )
    }

    pub fn open_bus() -> Self {
        Self::new("open_bus", read_open_bus, write_open_bus)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn read(&self, address: u32) -> u32 {
        (self.read)(address)
    }

    #[inline]
    pub fn write(&self, address: u32, value: u32, mask: u32) {
        (self.write)(address, value, mask)
    }
}

impl fmt::Debug for MemHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemHandler").field(&self.name).finish()
    }
}

/// Floating bus value: the low half of the address mirrored in both halves.
pub fn read_open_bus(address: u32) -> u32 {
    let value = address & 0xffff;
    value | (value << 16)
}

pub fn write_open_bus(_address: u32, _value: u32, _mask: u32) {}

/// Host memory backing a range, for zero-copy exposure to a frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRegion {
    pub ptr: *mut u8,
    pub len: usize,
    pub flags: u32,
}

#[derive(Debug, Clone)]
pub struct AddressRange {
    pub begin: u32,
    pub end: u32,
    pub kind: MemoryKind,
    pub handler: MemHandler,
    pub host: Option<HostRegion>,
}

impl AddressRange {
    pub fn new(begin: u32, end: u32, kind: MemoryKind, handler: MemHandler) -> Self {
        assert!(
            begin <= end,
            "address range {:#010x}-{:#010x} is inverted",
            begin,
            end
        );
        Self {
            begin,
            end,
            kind,
            handler,
            host: None,
        }
    }

    pub fn unmapped(begin: u32, end: u32) -> Self {
        Self::new(begin, end, MemoryKind::Unmapped, MemHandler::open_bus())
    }

    pub fn with_host(mut self, ptr: *mut u8, len: usize, flags: u32) -> Self {
        self.host = Some(HostRegion { ptr, len, flags });
        self
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.begin && address <= self.end
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#010X} - {:#010X} {:?} ({})",
            self.begin,
            self.end,
            self.kind,
            self.handler.name()
        )
    }
}

/// The ordered slot list, mutable until frozen.
#[derive(Debug)]
pub struct MemoryMapBuilder {
    slots: Vec<Option<AddressRange>>,
}

impl MemoryMapBuilder {
    /// Starts a map whose background slot covers the whole address space with
    /// the open bus.
    pub fn new() -> Self {
        let mut slots = vec![None; SLOT_COUNT];
        slots[SLOT_BACKGROUND] = Some(AddressRange::unmapped(0x0000_0000, 0xffff_ffff));
        Self { slots }
    }

    pub fn set(&mut self, slot: usize, range: AddressRange) -> &mut Self {
        assert!(
            self.slots[slot].is_none(),
            "memory map slot {} is already populated",
            slot
        );
        self.slots[slot] = Some(range);
        self
    }

    /// Overwrites a populated slot in place, keeping its position in the
    /// precedence order.
    pub fn replace(&mut self, slot: usize, range: AddressRange) -> &mut Self {
        match &self.slots[slot] {
            Some(old) => tracing::debug!("[MAP] slot {} {} replaced by {}", slot, old, range),
            None => panic!("memory map slot {} replaced before being populated", slot),
        }
        self.slots[slot] = Some(range);
        self
    }

    pub fn slot(&self, slot: usize) -> Option<&AddressRange> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn slot_mut(&mut self, slot: usize) -> Option<&mut AddressRange> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn freeze(self) -> MemoryMap {
        MemoryMap::new(self.slots)
    }
}

impl Default for MemoryMapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A contiguous run of addresses owned by one slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Segment {
    pub begin: u32,
    pub end: u32,
    pub slot: usize,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#010X} - {:#010X} (slot {})",
            self.begin, self.end, self.slot
        )
    }
}

/// Frozen address range table: the slot list plus the partition of the
/// 32-bit space it resolves to.
#[derive(Debug)]
pub struct MemoryMap {
    slots: Vec<Option<AddressRange>>,
    segments: Vec<Segment>,
}

impl MemoryMap {
    fn new(slots: Vec<Option<AddressRange>>) -> Self {
        assert!(
            matches!(&slots[SLOT_BACKGROUND], Some(r) if r.begin == 0 && r.end == u32::MAX),
            "the background slot must cover the whole address space"
        );

        let mut segments = Vec::new();
        for (slot, range) in slots.iter().enumerate() {
            if let Some(range) = range {
                paint(&mut segments, Segment {
                    begin: range.begin,
                    end: range.end,
                    slot,
                });
            }
        }

        let map = Self { slots, segments };
        map.assert_partition();
        tracing::debug!("[MAP] frozen with {} segments", map.segments.len());
        map
    }

    fn assert_partition(&self) {
        let mut next: u64 = 0;
        for segment in &self.segments {
            assert_eq!(
                segment.begin as u64, next,
                "memory map has a gap or overlap at {}",
                segment
            );
            next = segment.end as u64 + 1;
        }
        assert_eq!(next, 1 << 32, "memory map does not reach the top of the address space");
    }

    pub fn segment_index(&self, address: u32) -> usize {
        // segments are sorted and cover everything, so the partition point is
        // always at least one
        self.segments.partition_point(|s| s.begin <= address) - 1
    }

    pub fn segment(&self, index: usize) -> &Segment {
        &self.segments[index]
    }

    /// Resolves `address` to the range that owns it.
    pub fn lookup(&self, address: u32) -> &AddressRange {
        let segment = &self.segments[self.segment_index(address)];
        self.range(segment.slot)
    }

    pub fn range(&self, slot: usize) -> &AddressRange {
        match &self.slots[slot] {
            Some(range) => range,
            None => panic!("segment refers to empty slot {}", slot),
        }
    }

    pub fn slot(&self, slot: usize) -> Option<&AddressRange> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Populated slots in precedence order.
    pub fn ranges(&self) -> impl Iterator<Item = (usize, &AddressRange)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (i, r)))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn print_memory_map(&self) {
        for segment in &self.segments {
            println!("{} {}", segment, self.range(segment.slot));
        }
    }
}

/// Paints `new` over a sorted disjoint segment list, splitting or trimming the
/// segments it covers.
fn paint(segments: &mut Vec<Segment>, new: Segment) {
    let mut out = Vec::with_capacity(segments.len() + 2);
    for s in segments.drain(..) {
        if s.end < new.begin || s.begin > new.end {
            out.push(s);
            continue;
        }
        if s.begin < new.begin {
            out.push(Segment {
                end: new.begin - 1,
                ..s
            });
        }
        if s.end > new.end {
            out.push(Segment {
                begin: new.end + 1,
                ..s
            });
        }
    }
    let at = out.partition_point(|s| s.begin < new.begin);
    out.insert(at, new);
    *segments = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Regs {
        value: u32,
    }

    fn regs_read(regs: &mut Regs, _address: u32) -> u32 {
        regs.value
    }

    fn regs_write(regs: &mut Regs, _address: u32, value: u32, mask: u32) {
        crate::mmio::masked_write(&mut regs.value, value, mask);
    }

    #[test]
    fn test_open_bus_value() {
        assert_eq!(read_open_bus(0x0500_1234), 0x1234_1234);
        assert_eq!(read_open_bus(0xffff_ffff), 0xffff_ffff);
        assert_eq!(read_open_bus(0x0001_0000), 0);
    }

    #[test]
    fn test_empty_map_is_open_bus() {
        let map = MemoryMapBuilder::new().freeze();
        assert_eq!(map.segments().len(), 1);
        assert_eq!(map.lookup(0x8000_0000).kind, MemoryKind::Unmapped);
        assert_eq!(map.lookup(0x8000_abcd).handler.read(0x8000_abcd), 0xabcd_abcd);
    }

    #[test]
    fn test_later_slots_take_precedence() {
        let regs = Rc::new(RefCell::new(Regs { value: 7 }));
        let mut builder = MemoryMapBuilder::new();
        let (begin, end) = window(MM_CART_ROM, 0x3ff_ffff);
        let (vb, ve) = window(MM_IS_VIEWER, 0xfff);
        builder.set(
            SLOT_IS_VIEWER,
            AddressRange::new(vb, ve, MemoryKind::IsViewer, MemHandler::open_bus()),
        );
        builder.set(
            SLOT_CART_ROM,
            AddressRange::new(
                begin,
                end,
                MemoryKind::Rom,
                MemHandler::bind("regs", &regs, regs_read, regs_write),
            ),
        );
        let map = builder.freeze();

        assert_eq!(map.lookup(MM_IS_VIEWER + 0x14).kind, MemoryKind::Rom);
        assert_eq!(map.lookup(MM_CART_ROM).handler.read(MM_CART_ROM), 7);
        assert_eq!(map.lookup(end + 1).kind, MemoryKind::Unmapped);
        assert_eq!(map.lookup(begin - 1).kind, MemoryKind::Unmapped);
        assert_eq!(map.segments().len(), 3);
    }

    #[test]
    fn test_replace_keeps_slot_identity() {
        let mut builder = MemoryMapBuilder::new();
        let (begin, end) = window(MM_DOM2_ADDR1, 0xff_ffff);
        builder.set(SLOT_DD_REGS, AddressRange::unmapped(begin, end));
        builder.replace(
            SLOT_DD_REGS,
            AddressRange::new(begin, end, MemoryKind::DiskRegs, MemHandler::open_bus()),
        );
        let map = builder.freeze();
        assert_eq!(map.slot(SLOT_DD_REGS).unwrap().kind, MemoryKind::DiskRegs);
        assert_eq!(map.lookup(MM_DD_REGS).kind, MemoryKind::DiskRegs);
    }

    #[test]
    #[should_panic(expected = "already populated")]
    fn test_set_twice_panics() {
        let mut builder = MemoryMapBuilder::new();
        builder.set(SLOT_PIF, AddressRange::unmapped(MM_PIF_MEM, MM_PIF_MEM | 0xffff));
        builder.set(SLOT_PIF, AddressRange::unmapped(MM_PIF_MEM, MM_PIF_MEM | 0xffff));
    }

    #[test]
    fn test_dropped_context_falls_back_to_open_bus() {
        let regs = Rc::new(RefCell::new(Regs { value: 1 }));
        let handler = MemHandler::bind("regs", &regs, regs_read, regs_write);
        handler.write(0, 5, 0xffff_ffff);
        assert_eq!(handler.read(0x10), 5);
        drop(regs);
        assert_eq!(handler.read(0x10), 0x0010_0010);
    }

    #[test]
    fn test_paint_top_of_address_space() {
        let mut builder = MemoryMapBuilder::new();
        builder.set(
            SLOT_PIF,
            AddressRange::new(0xffff_0000, 0xffff_ffff, MemoryKind::Pif, MemHandler::open_bus()),
        );
        let map = builder.freeze();
        assert_eq!(map.lookup(0xffff_ffff).kind, MemoryKind::Pif);
        assert_eq!(map.lookup(0xfffe_ffff).kind, MemoryKind::Unmapped);
    }
}
