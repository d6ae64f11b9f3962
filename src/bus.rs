use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use crate::memory_map::{AddressRange, MemoryMap, Segment};

/// Debugger hooks invoked before accesses to watched segments.
pub trait BreakpointHook {
    fn on_read(&mut self, address: u32);
    fn on_write(&mut self, address: u32, value: u32, mask: u32);
}

/// Dispatches CPU-visible physical accesses through the frozen memory map.
///
/// All accesses are 32-bit words; narrower accesses are expressed with a lane
/// mask so handlers never need a read-modify-write from the caller.
///
/// Breakpoints and watched segments can change through a shared reference,
/// including from a hook or interrupt handler while the CPU runs.
pub struct Bus {
    map: MemoryMap,
    watched: Vec<Cell<bool>>,
    breakpoints: RefCell<Option<Rc<RefCell<dyn BreakpointHook>>>>,
}

impl Bus {
    pub fn new(map: MemoryMap) -> Self {
        let watched = map.segments().iter().map(|_| Cell::new(false)).collect();
        Self {
            map,
            watched,
            breakpoints: RefCell::new(None),
        }
    }

    pub fn map(&self) -> &MemoryMap {
        &self.map
    }

    pub fn lookup(&self, address: u32) -> &AddressRange {
        self.map.lookup(address)
    }

    pub fn read_word(&self, address: u32) -> u32 {
        let index = self.map.segment_index(address);
        if let Some(hook) = self.hook_for(index) {
            hook.borrow_mut().on_read(address);
        }
        let range = self.map.range(self.map.segment(index).slot);
        let value = range.handler.read(address);
        tracing::trace!("[BUS] read {:#010X} = {:#010X} ({:?})", address, value, range.kind);
        value
    }

    pub fn write_word(&self, address: u32, value: u32, mask: u32) {
        let index = self.map.segment_index(address);
        if let Some(hook) = self.hook_for(index) {
            hook.borrow_mut().on_write(address, value, mask);
        }
        let range = self.map.range(self.map.segment(index).slot);
        tracing::trace!(
            "[BUS] write {:#010X} = {:#010X} mask {:#010X} ({:?})",
            address,
            value,
            mask,
            range.kind
        );
        range.handler.write(address, value, mask);
    }

    pub fn read_u32(&self, address: u32) -> u32 {
        self.read_word(address & !3)
    }

    pub fn read_u16(&self, address: u32) -> u16 {
        let shift = 8 * (2 - (address & 2));
        (self.read_word(address & !3) >> shift) as u16
    }

    pub fn read_u8(&self, address: u32) -> u8 {
        let shift = 8 * (3 - (address & 3));
        (self.read_word(address & !3) >> shift) as u8
    }

    pub fn write_u32(&self, address: u32, value: u32) {
        self.write_word(address & !3, value, 0xffff_ffff);
    }

    pub fn write_u16(&self, address: u32, value: u16) {
        let shift = 8 * (2 - (address & 2));
        self.write_word(address & !3, (value as u32) << shift, 0xffff << shift);
    }

    pub fn write_u8(&self, address: u32, value: u8) {
        let shift = 8 * (3 - (address & 3));
        self.write_word(address & !3, (value as u32) << shift, 0xff << shift);
    }

    pub fn write_block(&self, start_addr: u32, data: &[u8]) {
        let mut addr = start_addr;
        for &byte in data {
            self.write_u8(addr, byte);
            addr = addr.wrapping_add(1);
        }
    }

    fn hook_for(&self, index: usize) -> Option<Rc<RefCell<dyn BreakpointHook>>> {
        if self.watched[index].get() {
            self.breakpoints.borrow().clone()
        } else {
            None
        }
    }

    /// Routes accesses to watched segments through `hook` first.
    pub fn attach_breakpoints(&self, hook: Rc<RefCell<dyn BreakpointHook>>) {
        *self.breakpoints.borrow_mut() = Some(hook);
    }

    pub fn detach_breakpoints(&self) {
        *self.breakpoints.borrow_mut() = None;
        self.unwatch_all();
    }

    /// Marks every segment intersecting `begin..=end` as watched.
    pub fn watch(&self, begin: u32, end: u32) {
        let first = self.map.segment_index(begin);
        let last = self.map.segment_index(end);
        for watched in &self.watched[first..=last] {
            watched.set(true);
        }
    }

    pub fn unwatch_all(&self) {
        self.watched.iter().for_each(|w| w.set(false));
    }

    pub fn watched_segments(&self) -> impl Iterator<Item = &Segment> {
        self.map
            .segments()
            .iter()
            .zip(&self.watched)
            .filter(|(_, w)| w.get())
            .map(|(s, _)| s)
    }
}
