use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use crate::{mmio::RegisterBank, rdram::Rdram};

pub const RI_MODE_REG: usize = 0;
pub const RI_CONFIG_REG: usize = 1;
pub const RI_SELECT_REG: usize = 3;
pub const RI_REFRESH_REG: usize = 4;
pub const RI_REGS_COUNT: usize = 8;

/// RDRAM interface. DMA engines reach main memory through it.
#[derive(Debug)]
pub struct RiController {
    pub regs: RegisterBank<RI_REGS_COUNT>,
    rdram: Weak<RefCell<Rdram>>,
}

impl RiController {
    pub fn new(rdram: Weak<RefCell<Rdram>>) -> Self {
        Self {
            regs: RegisterBank::new(),
            rdram,
        }
    }

    pub fn poweron(&mut self) {
        self.regs.clear();
    }

    pub fn rdram(&self) -> Option<Rc<RefCell<Rdram>>> {
        self.rdram.upgrade()
    }

    pub fn read_regs(&mut self, address: u32) -> u32 {
        self.regs.read(address)
    }

    pub fn write_regs(&mut self, address: u32, value: u32, mask: u32) {
        self.regs.write(address, value, mask);
    }
}

/// Resolves main memory through an RI back-reference.
pub(crate) fn rdram_of(ri: &Weak<RefCell<RiController>>) -> Option<Rc<RefCell<Rdram>>> {
    ri.upgrade().and_then(|ri| ri.borrow().rdram())
}
