use std::{cell::RefCell, rc::Weak};

use crate::{
    cpu::Cp0,
    interrupt::InterruptKind,
    mmio::{reg_index, RegisterBank},
    pif::{Pif, PIF_RAM_SIZE},
    rcp::{
        mi::{MiController, MI_INTR_SI},
        ri::{rdram_of, RiController},
    },
};

pub const SI_DRAM_ADDR_REG: usize = 0;
pub const SI_PIF_ADDR_RD64B_REG: usize = 1;
pub const SI_PIF_ADDR_WR64B_REG: usize = 4;
pub const SI_STATUS_REG: usize = 6;
pub const SI_REGS_COUNT: usize = 7;

pub const SI_STATUS_DMA_BUSY: u32 = 0x0001;
pub const SI_STATUS_INTERRUPT: u32 = 0x1000;

/// Default cycles between an SI DMA kick-off and its completion interrupt
pub const DEFAULT_SI_DMA_DURATION: u32 = 0x900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SiDma {
    /// PIF RAM to RDRAM
    PifToDram,
    /// RDRAM to PIF RAM
    DramToPif,
}

/// Serial interface: moves the 64-byte PIF RAM block to and from RDRAM.
#[derive(Debug)]
pub struct SiController {
    pub regs: RegisterBank<SI_REGS_COUNT>,
    dma_duration: u32,
    mi: Weak<RefCell<MiController>>,
    ri: Weak<RefCell<RiController>>,
    pif: Weak<RefCell<Pif>>,
    cp0: Weak<RefCell<Cp0>>,
}

impl SiController {
    pub fn new(
        dma_duration: u32,
        mi: Weak<RefCell<MiController>>,
        ri: Weak<RefCell<RiController>>,
        pif: Weak<RefCell<Pif>>,
        cp0: Weak<RefCell<Cp0>>,
    ) -> Self {
        Self {
            regs: RegisterBank::new(),
            dma_duration,
            mi,
            ri,
            pif,
            cp0,
        }
    }

    pub fn poweron(&mut self) {
        self.regs.clear();
    }

    fn dma(&mut self, direction: SiDma) {
        let dram_addr = self.regs.get(SI_DRAM_ADDR_REG) & 0x00ff_fff8;
        let (Some(rdram), Some(pif)) = (rdram_of(&self.ri), self.pif.upgrade()) else {
            return;
        };

        match direction {
            SiDma::PifToDram => {
                let mut pif = pif.borrow_mut();
                pif.process_commands();
                rdram.borrow_mut().write_bytes(dram_addr, pif.ram());
            }
            SiDma::DramToPif => {
                let block = rdram.borrow().read_bytes(dram_addr, PIF_RAM_SIZE);
                pif.borrow_mut().ram_mut().copy_from_slice(&block);
            }
        }
        tracing::trace!("[SI] {:?} dram {:#010X}", direction, dram_addr);

        self.regs.set_bits(SI_STATUS_REG, SI_STATUS_DMA_BUSY);
        if let Some(cp0) = self.cp0.upgrade() {
            cp0.borrow_mut()
                .add_interrupt_event(InterruptKind::Si, self.dma_duration as u64);
        }
    }

    pub fn read_regs(&mut self, address: u32) -> u32 {
        self.regs.read(address)
    }

    pub fn write_regs(&mut self, address: u32, value: u32, mask: u32) {
        match reg_index(address) {
            SI_PIF_ADDR_RD64B_REG => {
                self.regs.write(address, value, mask);
                self.dma(SiDma::PifToDram);
            }
            SI_PIF_ADDR_WR64B_REG => {
                self.regs.write(address, value, mask);
                self.dma(SiDma::DramToPif);
            }
            SI_STATUS_REG => {
                self.regs.clear_bits(SI_STATUS_REG, SI_STATUS_INTERRUPT);
                if let Some(mi) = self.mi.upgrade() {
                    mi.borrow_mut().clear_rcp_interrupt(MI_INTR_SI);
                }
            }
            _ => {
                self.regs.write(address, value, mask);
            }
        }
    }

    pub fn end_of_dma_event(&mut self) {
        self.regs.clear_bits(SI_STATUS_REG, SI_STATUS_DMA_BUSY);
        self.regs.set_bits(SI_STATUS_REG, SI_STATUS_INTERRUPT);
        if let Some(mi) = self.mi.upgrade() {
            mi.borrow_mut().raise_rcp_interrupt(MI_INTR_SI);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{rcp::mi::MI_INTR_REG, rdram::Rdram};

    #[test]
    fn test_write_then_read_block() {
        let cp0 = Rc::new(RefCell::new(Cp0::new()));
        let mi = Rc::new(RefCell::new(MiController::new(Rc::downgrade(&cp0))));
        let rdram = Rc::new(RefCell::new(Rdram::new(0x1000)));
        let ri = Rc::new(RefCell::new(RiController::new(Rc::downgrade(&rdram))));
        let pif = Rc::new(RefCell::new(Pif::new(Vec::new(), Rc::downgrade(&cp0))));
        let mut si = SiController::new(
            DEFAULT_SI_DMA_DURATION,
            Rc::downgrade(&mi),
            Rc::downgrade(&ri),
            Rc::downgrade(&pif),
            Rc::downgrade(&cp0),
        );

        // a lone end-of-block marker survives the exchange
        let mut block = [0u8; PIF_RAM_SIZE];
        block[0] = 0xfe;
        rdram.borrow_mut().write_bytes(0x100, &block);

        si.write_regs(0x0480_0000, 0x100, 0xffff_ffff);
        si.write_regs(0x0480_0010, 0x1fc0_07c0, 0xffff_ffff);
        assert_eq!(pif.borrow().ram()[0], 0xfe);
        assert_ne!(si.regs.get(SI_STATUS_REG) & SI_STATUS_DMA_BUSY, 0);
        assert!(cp0.borrow().scheduler.is_pending(InterruptKind::Si));

        si.end_of_dma_event();
        assert_eq!(si.regs.get(SI_STATUS_REG), SI_STATUS_INTERRUPT);
        assert_ne!(mi.borrow().regs.get(MI_INTR_REG) & MI_INTR_SI, 0);

        si.write_regs(0x0480_0000, 0x200, 0xffff_ffff);
        si.write_regs(0x0480_0004, 0x1fc0_07c0, 0xffff_ffff);
        assert_eq!(rdram.borrow().read_u8(0x200), 0xfe);

        si.write_regs(0x0480_0018, 0, 0xffff_ffff);
        assert_eq!(si.regs.get(SI_STATUS_REG) & SI_STATUS_INTERRUPT, 0);
        assert_eq!(mi.borrow().regs.get(MI_INTR_REG) & MI_INTR_SI, 0);
    }
}
