use crate::mmio::{masked_write, RegisterBank};

pub const RDRAM_MAX_SIZE: usize = 0x80_0000;
pub const RDRAM_REGS_COUNT: usize = 10;

/// Main memory, stored as big-endian words.
#[derive(Debug, Clone, PartialEq)]
pub struct Rdram {
    pub dram: Vec<u32>,
    pub regs: RegisterBank<RDRAM_REGS_COUNT>,
}

impl Rdram {
    pub fn new(dram_size: usize) -> Self {
        assert!(
            dram_size > 0 && dram_size <= RDRAM_MAX_SIZE && dram_size % 4 == 0,
            "invalid RDRAM size {:#x}",
            dram_size
        );
        Self {
            dram: vec![0; dram_size / 4],
            regs: RegisterBank::new(),
        }
    }

    pub fn poweron(&mut self) {
        self.regs.clear();
    }

    pub fn size(&self) -> usize {
        self.dram.len() * 4
    }

    fn word_index(&self, address: u32) -> Option<usize> {
        let index = ((address & 0x03ff_ffff) >> 2) as usize;
        (index < self.dram.len()).then_some(index)
    }

    pub fn read_dram(&mut self, address: u32) -> u32 {
        match self.word_index(address) {
            Some(index) => self.dram[index],
            None => 0,
        }
    }

    pub fn write_dram(&mut self, address: u32, value: u32, mask: u32) {
        if let Some(index) = self.word_index(address) {
            masked_write(&mut self.dram[index], value, mask);
        }
    }

    pub fn read_regs(&mut self, address: u32) -> u32 {
        self.regs.read(address)
    }

    pub fn write_regs(&mut self, address: u32, value: u32, mask: u32) {
        self.regs.write(address, value, mask);
    }

    pub fn read_u8(&self, address: u32) -> u8 {
        match self.word_index(address) {
            Some(index) => (self.dram[index] >> (8 * (3 - (address & 3)))) as u8,
            None => 0,
        }
    }

    pub fn write_u8(&mut self, address: u32, value: u8) {
        if let Some(index) = self.word_index(address) {
            let shift = 8 * (3 - (address & 3));
            masked_write(&mut self.dram[index], (value as u32) << shift, 0xff << shift);
        }
    }

    /// Copies `data` into RDRAM starting at `address`, clipping at the end of
    /// memory.
    pub fn write_bytes(&mut self, address: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.write_u8(address.wrapping_add(i as u32), *byte);
        }
    }

    pub fn read_bytes(&self, address: u32, length: usize) -> Vec<u8> {
        (0..length)
            .map(|i| self.read_u8(address.wrapping_add(i as u32)))
            .collect()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.dram.as_mut_ptr() as *mut u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dram_word_and_bytes() {
        let mut rdram = Rdram::new(0x1000);
        rdram.write_dram(0x10, 0xAABB_CCDD, 0xffff_ffff);
        assert_eq!(rdram.read_dram(0x10), 0xAABB_CCDD);
        assert_eq!(rdram.read_u8(0x11), 0xBB);

        rdram.write_bytes(0x20, &[1, 2, 3, 4, 5]);
        assert_eq!(rdram.read_dram(0x20), 0x0102_0304);
        assert_eq!(rdram.read_bytes(0x23, 2), vec![4, 5]);
    }

    #[test]
    fn test_out_of_range_access() {
        let mut rdram = Rdram::new(0x1000);
        rdram.write_dram(0x2000, 1, 0xffff_ffff);
        assert_eq!(rdram.read_dram(0x2000), 0);
        assert_eq!(rdram.size(), 0x1000);
    }

    #[test]
    #[should_panic(expected = "invalid RDRAM size")]
    fn test_zero_size_panics() {
        Rdram::new(0);
    }
}
