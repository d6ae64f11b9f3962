use std::{cell::RefCell, rc::Weak};

use crate::{
    cpu::{Cp0, CP0_CAUSE_IP2},
    mmio::RegisterBank,
};

pub const MI_INIT_MODE_REG: usize = 0;
pub const MI_VERSION_REG: usize = 1;
pub const MI_INTR_REG: usize = 2;
pub const MI_INTR_MASK_REG: usize = 3;
pub const MI_REGS_COUNT: usize = 4;

pub const MI_INTR_SP: u32 = 0x01;
pub const MI_INTR_SI: u32 = 0x02;
pub const MI_INTR_AI: u32 = 0x04;
pub const MI_INTR_VI: u32 = 0x08;
pub const MI_INTR_PI: u32 = 0x10;
pub const MI_INTR_DP: u32 = 0x20;

const MI_VERSION: u32 = 0x0202_0102;
const MI_INIT_MODE_CLEAR_DP: u32 = 0x0800;

/// MIPS interface: collects RCP interrupts and drives the CPU's IP2 line.
#[derive(Debug)]
pub struct MiController {
    pub regs: RegisterBank<MI_REGS_COUNT>,
    cp0: Weak<RefCell<Cp0>>,
}

impl MiController {
    pub fn new(cp0: Weak<RefCell<Cp0>>) -> Self {
        Self {
            regs: RegisterBank::new(),
            cp0,
        }
    }

    pub fn poweron(&mut self) {
        self.regs.clear();
        self.regs.set(MI_VERSION_REG, MI_VERSION);
    }

    pub fn pending(&self) -> u32 {
        self.regs.get(MI_INTR_REG) & self.regs.get(MI_INTR_MASK_REG)
    }

    fn update_interrupt_line(&self) {
        if let Some(cp0) = self.cp0.upgrade() {
            cp0.borrow_mut()
                .set_interrupt_line(CP0_CAUSE_IP2, self.pending() != 0);
        }
    }

    pub fn raise_rcp_interrupt(&mut self, bits: u32) {
        self.regs.set_bits(MI_INTR_REG, bits);
        tracing::trace!("[MI] raise {:02X} intr={:02X}", bits, self.regs.get(MI_INTR_REG));
        self.update_interrupt_line();
    }

    pub fn clear_rcp_interrupt(&mut self, bits: u32) {
        self.regs.clear_bits(MI_INTR_REG, bits);
        self.update_interrupt_line();
    }

    pub fn read_regs(&mut self, address: u32) -> u32 {
        self.regs.read(address)
    }

    pub fn write_regs(&mut self, address: u32, value: u32, mask: u32) {
        let value = value & mask;
        match crate::mmio::reg_index(address) {
            MI_INIT_MODE_REG => {
                self.regs.set(MI_INIT_MODE_REG, value & 0x7f);
                if value & MI_INIT_MODE_CLEAR_DP != 0 {
                    self.clear_rcp_interrupt(MI_INTR_DP);
                }
            }
            MI_INTR_MASK_REG => {
                // each source has a (clear, set) bit pair, lowest source first
                let mut intr_mask = self.regs.get(MI_INTR_MASK_REG);
                for source in 0..6 {
                    let pair = (value >> (source * 2)) & 0x3;
                    match pair {
                        0x1 => intr_mask &= !(1 << source),
                        0x2 => intr_mask |= 1 << source,
                        _ => {}
                    }
                }
                self.regs.set(MI_INTR_MASK_REG, intr_mask);
                self.update_interrupt_line();
            }
            reg => {
                tracing::trace!("[MI] ignored write to reg {} = {:08X}", reg, value);
            }
        }
    }
}
