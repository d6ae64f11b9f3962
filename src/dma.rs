use std::{cell::RefCell, fmt, rc::Rc};

use crate::{
    memory_map::{
        MemoryKind, MemoryMap, MM_CART_DOM3, MM_CART_ROM, MM_DOM2_ADDR1, MM_DOM2_ADDR2,
        SLOT_CART_DOM2, SLOT_CART_ROM, SLOT_DD_REGS,
    },
    rdram::Rdram,
};

/// Block transfer between RDRAM and media:
/// `(rdram, dram_addr, cart_addr, length) -> bytes transferred`.
pub type DmaFn = Rc<dyn Fn(&mut Rdram, u32, u32, u32) -> u32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmaTargetKind {
    CartDom3,
    CartRom,
    CartDom2,
    Disk,
}

impl DmaTargetKind {
    /// PI bus domain whose timing registers apply to the transfer.
    pub fn domain(self) -> usize {
        match self {
            DmaTargetKind::CartDom3 | DmaTargetKind::CartRom => 1,
            DmaTargetKind::CartDom2 | DmaTargetKind::Disk => 2,
        }
    }
}

/// A `(context, dma_read, dma_write)` binding for one media window.
///
/// `dma_read` moves RDRAM to the media, `dma_write` moves the media to RDRAM,
/// following the PI register naming.
#[derive(Clone)]
pub struct DmaHandler {
    kind: DmaTargetKind,
    read: DmaFn,
    write: DmaFn,
}

impl DmaHandler {
    pub fn new(
        kind: DmaTargetKind,
        read: impl Fn(&mut Rdram, u32, u32, u32) -> u32 + 'static,
        write: impl Fn(&mut Rdram, u32, u32, u32) -> u32 + 'static,
    ) -> Self {
        Self {
            kind,
            read: Rc::new(read),
            write: Rc::new(write),
        }
    }

    pub fn bind<T: 'static>(
        kind: DmaTargetKind,
        context: &Rc<RefCell<T>>,
        read: fn(&mut T, &mut Rdram, u32, u32, u32) -> u32,
        write: fn(&mut T, &mut Rdram, u32, u32, u32) -> u32,
    ) -> Self {
        let rctx = Rc::downgrade(context);
        let wctx = rctx.clone();
        Self::new(
            kind,
            move |rdram, dram_addr, cart_addr, length| match rctx.upgrade() {
                Some(ctx) => read(&mut ctx.borrow_mut(), rdram, dram_addr, cart_addr, length),
                None => 0,
            },
            move |rdram, dram_addr, cart_addr, length| match wctx.upgrade() {
                Some(ctx) => write(&mut ctx.borrow_mut(), rdram, dram_addr, cart_addr, length),
                None => 0,
            },
        )
    }

    pub fn kind(&self) -> DmaTargetKind {
        self.kind
    }

    pub fn dma_read(&self, rdram: &mut Rdram, dram_addr: u32, cart_addr: u32, length: u32) -> u32 {
        (self.read)(rdram, dram_addr, cart_addr, length)
    }

    pub fn dma_write(&self, rdram: &mut Rdram, dram_addr: u32, cart_addr: u32, length: u32) -> u32 {
        (self.write)(rdram, dram_addr, cart_addr, length)
    }
}

impl fmt::Debug for DmaHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DmaHandler").field(&self.kind).finish()
    }
}

#[derive(Debug, Clone)]
pub struct DmaWindow {
    pub threshold: u32,
    pub handler: DmaHandler,
}

impl DmaWindow {
    pub fn new(threshold: u32, handler: DmaHandler) -> Self {
        Self { threshold, handler }
    }
}

/// Selects which media owns a PI transfer by descending threshold.
#[derive(Debug, Clone)]
pub struct DmaResolver {
    windows: Vec<DmaWindow>,
}

impl DmaResolver {
    pub fn new(mut windows: Vec<DmaWindow>) -> Self {
        windows.sort_by(|a, b| b.threshold.cmp(&a.threshold));
        for pair in windows.windows(2) {
            assert_ne!(
                pair[0].threshold, pair[1].threshold,
                "duplicate DMA threshold {:#010x}",
                pair[0].threshold
            );
        }
        Self { windows }
    }

    /// Standard cartridge layout: dom3, cart ROM, dom2 save and, when a disk
    /// drive is plugged, its register and ROM windows.
    pub fn standard(
        cart_dom3: DmaHandler,
        cart_rom: DmaHandler,
        cart_dom2: DmaHandler,
        disk: Option<DmaHandler>,
    ) -> Self {
        let mut windows = vec![
            DmaWindow::new(MM_CART_DOM3, cart_dom3),
            DmaWindow::new(MM_CART_ROM, cart_rom),
            DmaWindow::new(MM_DOM2_ADDR2, cart_dom2),
        ];
        if let Some(disk) = disk {
            windows.push(DmaWindow::new(MM_DOM2_ADDR1, disk));
        }
        Self::new(windows)
    }

    /// Returns the handler of the highest window at or below `address`, or
    /// `None` when no DMA is possible for that target.
    pub fn resolve(&self, address: u32) -> Option<&DmaHandler> {
        self.windows
            .iter()
            .find(|w| address >= w.threshold)
            .map(|w| &w.handler)
    }

    pub fn windows(&self) -> &[DmaWindow] {
        &self.windows
    }

    /// Asserts that every threshold starts the memory map slot serving the same
    /// media, so word accesses and block transfers agree on the layout.
    pub fn check_against(&self, map: &MemoryMap) {
        for window in &self.windows {
            let kind = window.handler.kind();
            let expected = match kind {
                DmaTargetKind::CartRom => map.slot(SLOT_CART_ROM).map(|r| (r.begin, r.kind)),
                DmaTargetKind::CartDom2 => map.slot(SLOT_CART_DOM2).map(|r| (r.begin, r.kind)),
                DmaTargetKind::Disk => map.slot(SLOT_DD_REGS).map(|r| (r.begin, r.kind)),
                DmaTargetKind::CartDom3 => {
                    // dom3 is only reachable by DMA
                    let range = map.lookup(window.threshold);
                    assert_eq!(
                        range.kind,
                        MemoryKind::Unmapped,
                        "cart dom3 threshold {:#010x} overlaps {}",
                        window.threshold,
                        range
                    );
                    continue;
                }
            };
            match expected {
                Some((begin, range_kind)) => {
                    assert_eq!(
                        begin, window.threshold,
                        "{:?} DMA threshold disagrees with the memory map",
                        kind
                    );
                    if kind == DmaTargetKind::Disk {
                        assert_eq!(
                            range_kind,
                            MemoryKind::DiskRegs,
                            "disk DMA window without disk registers in the memory map"
                        );
                    }
                }
                None => tracing::debug!(
                    "[DMA] {:?} window at {:#010x} has no memory map slot",
                    kind,
                    window.threshold
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_map::{window, AddressRange, MemHandler, MemoryMapBuilder};

    fn handler(kind: DmaTargetKind) -> DmaHandler {
        DmaHandler::new(kind, |_, _, _, len| len, |_, _, _, len| len)
    }

    fn resolver(with_disk: bool) -> DmaResolver {
        DmaResolver::standard(
            handler(DmaTargetKind::CartDom3),
            handler(DmaTargetKind::CartRom),
            handler(DmaTargetKind::CartDom2),
            with_disk.then(|| handler(DmaTargetKind::Disk)),
        )
    }

    #[test]
    fn test_descending_resolution() {
        let resolver = resolver(true);
        let kind = |addr| resolver.resolve(addr).map(DmaHandler::kind);

        assert_eq!(kind(0x1fd0_0000), Some(DmaTargetKind::CartDom3));
        assert_eq!(kind(0x7fff_ffff), Some(DmaTargetKind::CartDom3));
        assert_eq!(kind(0x1fcf_ffff), Some(DmaTargetKind::CartRom));
        assert_eq!(kind(0x1000_0000), Some(DmaTargetKind::CartRom));
        assert_eq!(kind(0x0fff_ffff), Some(DmaTargetKind::CartDom2));
        assert_eq!(kind(0x0800_0000), Some(DmaTargetKind::CartDom2));
        assert_eq!(kind(0x07ff_ffff), Some(DmaTargetKind::Disk));
        assert_eq!(kind(0x0600_0000), Some(DmaTargetKind::Disk));
        assert_eq!(kind(0x0500_0000), Some(DmaTargetKind::Disk));
        assert_eq!(kind(0x04ff_ffff), None);
    }

    #[test]
    fn test_no_disk_window_without_drive() {
        let resolver = resolver(false);
        assert!(resolver.resolve(0x0500_0000).is_none());
        assert!(resolver.resolve(0x0000_0000).is_none());
        assert_eq!(resolver.windows().len(), 3);
    }

    #[test]
    fn test_domains() {
        assert_eq!(DmaTargetKind::CartRom.domain(), 1);
        assert_eq!(DmaTargetKind::CartDom2.domain(), 2);
    }

    #[test]
    #[should_panic(expected = "disagrees with the memory map")]
    fn test_check_against_detects_mismatch() {
        let mut builder = MemoryMapBuilder::new();
        let (begin, end) = window(0x0900_0000, 0x1ffff);
        builder.set(
            SLOT_CART_DOM2,
            AddressRange::new(begin, end, MemoryKind::FlashStatus, MemHandler::open_bus()),
        );
        resolver(false).check_against(&builder.freeze());
    }
}
