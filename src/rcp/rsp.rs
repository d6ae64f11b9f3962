use std::{cell::RefCell, rc::Weak};

use crate::{
    cpu::Cp0,
    interrupt::InterruptKind,
    mmio::{read_be_word, reg_index, write_be_word, RegisterBank},
    rcp::{
        mi::{MiController, MI_INTR_SP},
        ri::{rdram_of, RiController},
    },
};

pub const SP_MEM_SIZE: usize = 0x2000;
pub const SP_DMEM_SIZE: usize = 0x1000;

pub const SP_MEM_ADDR_REG: usize = 0;
pub const SP_DRAM_ADDR_REG: usize = 1;
pub const SP_RD_LEN_REG: usize = 2;
pub const SP_WR_LEN_REG: usize = 3;
pub const SP_STATUS_REG: usize = 4;
pub const SP_DMA_FULL_REG: usize = 5;
pub const SP_DMA_BUSY_REG: usize = 6;
pub const SP_SEMAPHORE_REG: usize = 7;
pub const SP_REGS_COUNT: usize = 8;

pub const SP_PC_REG: usize = 0;
pub const SP_IBIST_REG: usize = 1;
pub const SP_REGS2_COUNT: usize = 2;

pub const SP_STATUS_HALT: u32 = 0x0001;
pub const SP_STATUS_BROKE: u32 = 0x0002;
pub const SP_STATUS_DMA_BUSY: u32 = 0x0004;
pub const SP_STATUS_DMA_FULL: u32 = 0x0008;
pub const SP_STATUS_SSTEP: u32 = 0x0020;
pub const SP_STATUS_INTR_BREAK: u32 = 0x0040;
const SP_STATUS_SIG0: u32 = 0x0080;

/// Cycles between releasing the RSP and the end of its task
pub const SP_TASK_DURATION: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpDma {
    /// RDRAM to SP memory
    Read,
    /// SP memory to RDRAM
    Write,
}

/// Signal processor: DMEM/IMEM, its DMA engine and the halt/break handshake.
/// Microcode is not executed; a released RSP reports its task done after a
/// fixed delay.
#[derive(Debug)]
pub struct RspCore {
    mem: Vec<u8>,
    pub regs: RegisterBank<SP_REGS_COUNT>,
    pub regs2: RegisterBank<SP_REGS2_COUNT>,
    mi: Weak<RefCell<MiController>>,
    ri: Weak<RefCell<RiController>>,
    cp0: Weak<RefCell<Cp0>>,
}

impl RspCore {
    pub fn new(
        mi: Weak<RefCell<MiController>>,
        ri: Weak<RefCell<RiController>>,
        cp0: Weak<RefCell<Cp0>>,
    ) -> Self {
        Self {
            mem: vec![0; SP_MEM_SIZE],
            regs: RegisterBank::new(),
            regs2: RegisterBank::new(),
            mi,
            ri,
            cp0,
        }
    }

    pub fn poweron(&mut self) {
        self.mem.fill(0);
        self.regs.clear();
        self.regs2.clear();
        self.regs.set(SP_STATUS_REG, SP_STATUS_HALT);
    }

    pub fn mem(&self) -> &[u8] {
        &self.mem
    }

    pub fn mem_as_mut_ptr(&mut self) -> *mut u8 {
        self.mem.as_mut_ptr()
    }

    /// Copies `data` into DMEM/IMEM at `offset`, clipped to the memory.
    pub fn load_mem(&mut self, offset: usize, data: &[u8]) {
        let end = (offset + data.len()).min(SP_MEM_SIZE);
        if offset < end {
            self.mem[offset..end].copy_from_slice(&data[..end - offset]);
        }
    }

    fn schedule(&self, kind: InterruptKind, delay: u64) {
        if let Some(cp0) = self.cp0.upgrade() {
            cp0.borrow_mut().add_interrupt_event(kind, delay);
        }
    }

    fn dma(&mut self, direction: SpDma, len_reg: u32) {
        let length = ((len_reg & 0xfff) | 7) + 1;
        let count = ((len_reg >> 12) & 0xff) + 1;
        let skip = (len_reg >> 20) & 0xff8;
        let mut mem_addr = (self.regs.get(SP_MEM_ADDR_REG) & 0x1ff8) as usize;
        let mut dram_addr = self.regs.get(SP_DRAM_ADDR_REG) & 0x00ff_fff8;

        let Some(rdram) = rdram_of(&self.ri) else {
            return;
        };
        let mut rdram = rdram.borrow_mut();
        // transfers wrap within the selected DMEM or IMEM bank
        let bank = mem_addr & SP_DMEM_SIZE;
        for _ in 0..count {
            for _ in 0..length {
                let offset = bank | (mem_addr & (SP_DMEM_SIZE - 1));
                match direction {
                    SpDma::Read => self.mem[offset] = rdram.read_u8(dram_addr),
                    SpDma::Write => rdram.write_u8(dram_addr, self.mem[offset]),
                }
                mem_addr += 1;
                dram_addr += 1;
            }
            dram_addr += skip;
        }
        tracing::trace!(
            "[RSP] {:?} dma {}x{:#X} skip {:#X}",
            direction,
            count,
            length,
            skip
        );

        self.regs.set(SP_MEM_ADDR_REG, (bank | (mem_addr & (SP_DMEM_SIZE - 1))) as u32);
        self.regs.set(SP_DRAM_ADDR_REG, dram_addr);
        self.regs.set_bits(SP_STATUS_REG, SP_STATUS_DMA_BUSY);
        self.regs.set(SP_DMA_BUSY_REG, 1);
        self.schedule(InterruptKind::SpDma, (count * length) as u64 / 8);
    }

    pub fn read_mem(&mut self, address: u32) -> u32 {
        read_be_word(&self.mem, (address & 0x1ffc) as usize)
    }

    pub fn write_mem(&mut self, address: u32, value: u32, mask: u32) {
        write_be_word(&mut self.mem, (address & 0x1ffc) as usize, value, mask);
    }

    pub fn read_regs(&mut self, address: u32) -> u32 {
        match reg_index(address) {
            SP_SEMAPHORE_REG => {
                let value = self.regs.get(SP_SEMAPHORE_REG);
                self.regs.set(SP_SEMAPHORE_REG, 1);
                value
            }
            _ => self.regs.read(address),
        }
    }

    pub fn write_regs(&mut self, address: u32, value: u32, mask: u32) {
        match reg_index(address) {
            SP_RD_LEN_REG => {
                self.regs.write(address, value, mask);
                self.dma(SpDma::Read, self.regs.get(SP_RD_LEN_REG));
            }
            SP_WR_LEN_REG => {
                self.regs.write(address, value, mask);
                self.dma(SpDma::Write, self.regs.get(SP_WR_LEN_REG));
            }
            SP_STATUS_REG => self.update_status(value & mask),
            SP_DMA_FULL_REG | SP_DMA_BUSY_REG => {}
            SP_SEMAPHORE_REG => self.regs.set(SP_SEMAPHORE_REG, 0),
            _ => {
                self.regs.write(address, value, mask);
            }
        }
    }

    fn update_status(&mut self, w: u32) {
        let was_halted = self.regs.get(SP_STATUS_REG) & SP_STATUS_HALT != 0;
        // (clear bit, set bit, status bit) triples in write order
        let pairs = [
            (0x0000_0001, 0x0000_0002, SP_STATUS_HALT),
            (0x0000_0020, 0x0000_0040, SP_STATUS_SSTEP),
            (0x0000_0080, 0x0000_0100, SP_STATUS_INTR_BREAK),
        ];
        for (clear, set, bit) in pairs {
            if w & clear != 0 && w & set == 0 {
                self.regs.clear_bits(SP_STATUS_REG, bit);
            }
            if w & set != 0 && w & clear == 0 {
                self.regs.set_bits(SP_STATUS_REG, bit);
            }
        }
        if w & 0x0000_0004 != 0 {
            self.regs.clear_bits(SP_STATUS_REG, SP_STATUS_BROKE);
        }
        for sig in 0..8 {
            let clear = 0x200 << (sig * 2);
            let set = 0x400 << (sig * 2);
            if w & clear != 0 && w & set == 0 {
                self.regs.clear_bits(SP_STATUS_REG, SP_STATUS_SIG0 << sig);
            }
            if w & set != 0 && w & clear == 0 {
                self.regs.set_bits(SP_STATUS_REG, SP_STATUS_SIG0 << sig);
            }
        }

        if let Some(mi) = self.mi.upgrade() {
            if w & 0x08 != 0 && w & 0x10 == 0 {
                mi.borrow_mut().clear_rcp_interrupt(MI_INTR_SP);
            }
            if w & 0x10 != 0 && w & 0x08 == 0 {
                mi.borrow_mut().raise_rcp_interrupt(MI_INTR_SP);
            }
        }

        let halted = self.regs.get(SP_STATUS_REG) & SP_STATUS_HALT != 0;
        if was_halted && !halted {
            tracing::debug!("[RSP] task started at pc {:#05X}", self.regs2.get(SP_PC_REG));
            self.schedule(InterruptKind::Sp, SP_TASK_DURATION);
        }
    }

    pub fn read_regs2(&mut self, address: u32) -> u32 {
        self.regs2.read(address)
    }

    pub fn write_regs2(&mut self, address: u32, value: u32, mask: u32) {
        match reg_index(address) {
            SP_PC_REG => {
                self.regs2.write(address, value & 0xffc, mask);
            }
            _ => {
                self.regs2.write(address, value, mask);
            }
        }
    }

    /// End of a released task: the RSP halts on a break.
    pub fn interrupt_event(&mut self) {
        self.regs
            .set_bits(SP_STATUS_REG, SP_STATUS_HALT | SP_STATUS_BROKE);
        if self.regs.get(SP_STATUS_REG) & SP_STATUS_INTR_BREAK != 0 {
            if let Some(mi) = self.mi.upgrade() {
                mi.borrow_mut().raise_rcp_interrupt(MI_INTR_SP);
            }
        }
    }

    pub fn end_of_dma_event(&mut self) {
        self.regs
            .clear_bits(SP_STATUS_REG, SP_STATUS_DMA_BUSY | SP_STATUS_DMA_FULL);
        self.regs.set(SP_DMA_BUSY_REG, 0);
        self.regs.set(SP_DMA_FULL_REG, 0);
    }
}
