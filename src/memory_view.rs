use crate::{
    cpu::{R4300_KSEG0, R4300_KSEG1},
    memory_map::{MemoryKind, MemoryMap},
    pif::{PIF_RAM_SIZE, PIF_ROM_SIZE},
};

pub const MEMDESC_CONST: u32 = 1 << 0;
pub const MEMDESC_BIGENDIAN: u32 = 1 << 1;
pub const MEMDESC_SYSTEM_RAM: u32 = 1 << 2;

const KSEG0_SELECT: u32 = 0x2000_0000;
const KSEG0_DISCONNECT: u32 = 0xc000_0000;

/// One host-visible window over emulated memory, in the layout expected by
/// frontends that map memory for cheats and achievements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDescriptor {
    pub ptr: *mut u8,
    pub start: u32,
    pub len: usize,
    pub flags: u32,
    pub select: u32,
    pub disconnect: u32,
    pub kind: MemoryKind,
}

impl MemoryDescriptor {
    fn uncached(ptr: *mut u8, begin: u32, len: usize, flags: u32, kind: MemoryKind) -> Self {
        Self {
            ptr,
            start: R4300_KSEG1 | begin,
            len,
            flags,
            select: 0,
            disconnect: 0,
            kind,
        }
    }

    pub fn end(&self) -> u32 {
        self.start + (self.len as u32).saturating_sub(1)
    }
}

/// Describes every range of `map` that has host memory behind it.
///
/// RDRAM is reachable through both the cached and the uncached segment. The
/// PIF range is split so its boot ROM can be exposed read-only; `pif_ram`
/// points at the 64-byte RAM that follows it.
pub fn export(map: &MemoryMap, pif_ram: *mut u8) -> Vec<MemoryDescriptor> {
    let mut descs = Vec::new();
    for (_, range) in map.ranges() {
        let Some(host) = range.host else {
            continue;
        };
        match range.kind {
            MemoryKind::Rdram => {
                descs.push(MemoryDescriptor {
                    ptr: host.ptr,
                    start: R4300_KSEG0 | range.begin,
                    len: host.len,
                    flags: host.flags,
                    select: KSEG0_SELECT,
                    disconnect: KSEG0_DISCONNECT,
                    kind: range.kind,
                });
                descs.push(MemoryDescriptor::uncached(
                    host.ptr,
                    range.begin,
                    host.len,
                    host.flags,
                    range.kind,
                ));
            }
            MemoryKind::Pif => {
                descs.push(MemoryDescriptor::uncached(
                    host.ptr,
                    range.begin,
                    PIF_ROM_SIZE,
                    MEMDESC_CONST,
                    range.kind,
                ));
                descs.push(MemoryDescriptor::uncached(
                    pif_ram,
                    range.begin + PIF_ROM_SIZE as u32,
                    PIF_RAM_SIZE,
                    0,
                    range.kind,
                ));
            }
            kind => descs.push(MemoryDescriptor::uncached(
                host.ptr,
                range.begin,
                host.len,
                host.flags,
                kind,
            )),
        }
    }
    tracing::debug!("[MEMVIEW] exported {} descriptors", descs.len());
    descs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_map::{
        window, AddressRange, MemHandler, MemoryMapBuilder, MM_PIF_MEM, MM_RDRAM_DRAM, SLOT_PIF,
        SLOT_RDRAM,
    };

    #[test]
    fn test_rdram_and_pif_are_split() {
        let mut dram = vec![0u8; 0x1000];
        let mut pif_rom = vec![0u8; PIF_ROM_SIZE];
        let mut pif_ram = [0u8; PIF_RAM_SIZE];

        let mut builder = MemoryMapBuilder::new();
        let (begin, end) = window(MM_RDRAM_DRAM, 0x3ef_ffff);
        builder.set(
            SLOT_RDRAM,
            AddressRange::new(begin, end, MemoryKind::Rdram, MemHandler::open_bus()).with_host(
                dram.as_mut_ptr(),
                dram.len(),
                MEMDESC_SYSTEM_RAM,
            ),
        );
        let (begin, end) = window(MM_PIF_MEM, 0xffff);
        builder.set(
            SLOT_PIF,
            AddressRange::new(begin, end, MemoryKind::Pif, MemHandler::open_bus()).with_host(
                pif_rom.as_mut_ptr(),
                PIF_ROM_SIZE,
                MEMDESC_CONST,
            ),
        );
        let descs = export(&builder.freeze(), pif_ram.as_mut_ptr());

        assert_eq!(descs.len(), 4);
        assert_eq!(descs[0].start, 0x8000_0000);
        assert_eq!(descs[0].select, 0x2000_0000);
        assert_eq!(descs[0].disconnect, 0xc000_0000);
        assert_eq!(descs[1].start, 0xa000_0000);
        assert_eq!(descs[1].select, 0);
        assert_eq!(descs[1].len, 0x1000);
        assert_eq!(descs[2].start, 0xbfc0_0000);
        assert_eq!(descs[2].flags, MEMDESC_CONST);
        assert_eq!(descs[3].start, 0xbfc0_07c0);
        assert_eq!(descs[3].len, 0x40);
        assert_eq!(descs[3].ptr, pif_ram.as_mut_ptr());
        assert_eq!(descs[3].end(), 0xbfc0_07ff);
    }

    #[test]
    fn test_ranges_without_host_are_skipped() {
        let map = MemoryMapBuilder::new().freeze();
        assert!(export(&map, std::ptr::null_mut()).is_empty());
    }
}
