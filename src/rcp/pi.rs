use std::{cell::RefCell, rc::Weak};

use crate::{
    cpu::Cp0,
    dma::DmaResolver,
    interrupt::InterruptKind,
    mmio::{reg_index, RegisterBank},
    rcp::{
        mi::{MiController, MI_INTR_PI},
        ri::{rdram_of, RiController},
    },
};

pub const PI_DRAM_ADDR_REG: usize = 0;
pub const PI_CART_ADDR_REG: usize = 1;
pub const PI_RD_LEN_REG: usize = 2;
pub const PI_WR_LEN_REG: usize = 3;
pub const PI_STATUS_REG: usize = 4;
pub const PI_BSD_DOM1_LAT_REG: usize = 5;
pub const PI_BSD_DOM1_PWD_REG: usize = 6;
pub const PI_BSD_DOM1_PGS_REG: usize = 7;
pub const PI_BSD_DOM1_RLS_REG: usize = 8;
pub const PI_BSD_DOM2_LAT_REG: usize = 9;
pub const PI_BSD_DOM2_PWD_REG: usize = 10;
pub const PI_BSD_DOM2_PGS_REG: usize = 11;
pub const PI_BSD_DOM2_RLS_REG: usize = 12;
pub const PI_REGS_COUNT: usize = 13;

pub const PI_STATUS_DMA_BUSY: u32 = 0x01;
pub const PI_STATUS_IO_BUSY: u32 = 0x02;
pub const PI_STATUS_ERROR: u32 = 0x04;
pub const PI_STATUS_INTERRUPT: u32 = 0x08;

const PI_STATUS_WR_RESET: u32 = 0x01;
const PI_STATUS_WR_CLR_INTR: u32 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// RDRAM to cartridge
    Read,
    /// Cartridge to RDRAM
    Write,
}

/// Peripheral interface: cartridge and disk DMA engine.
#[derive(Debug)]
pub struct PiController {
    pub regs: RegisterBank<PI_REGS_COUNT>,
    dma: DmaResolver,
    mi: Weak<RefCell<MiController>>,
    ri: Weak<RefCell<RiController>>,
    cp0: Weak<RefCell<Cp0>>,
}

impl PiController {
    pub fn new(
        dma: DmaResolver,
        mi: Weak<RefCell<MiController>>,
        ri: Weak<RefCell<RiController>>,
        cp0: Weak<RefCell<Cp0>>,
    ) -> Self {
        Self {
            regs: RegisterBank::new(),
            dma,
            mi,
            ri,
            cp0,
        }
    }

    pub fn poweron(&mut self) {
        self.regs.clear();
    }

    pub fn dma_resolver(&self) -> &DmaResolver {
        &self.dma
    }

    /// Bus cycles for `length` bytes on `domain`, converted to CPU cycles.
    pub fn calculate_cycles(&self, domain: usize, length: u32) -> u64 {
        let (lat, pwd, pgs, rls) = if domain == 1 {
            (
                PI_BSD_DOM1_LAT_REG,
                PI_BSD_DOM1_PWD_REG,
                PI_BSD_DOM1_PGS_REG,
                PI_BSD_DOM1_RLS_REG,
            )
        } else {
            (
                PI_BSD_DOM2_LAT_REG,
                PI_BSD_DOM2_PWD_REG,
                PI_BSD_DOM2_PGS_REG,
                PI_BSD_DOM2_RLS_REG,
            )
        };
        let latency = self.regs.get(lat) as u64 + 1;
        let pulse_width = self.regs.get(pwd) as u64 + 1;
        let release = self.regs.get(rls) as u64 + 1;
        let page_size = 1u64 << ((self.regs.get(pgs) & 0xf) + 2);

        let length = length as u64;
        let pages = (length + page_size - 1) / page_size;
        let cycles = (14 + latency) * pages + (pulse_width + release) * (length / 2) + 5 * pages;
        cycles * 3 / 2
    }

    fn dma(&mut self, direction: Direction, length: u32) {
        let dram_addr = self.regs.get(PI_DRAM_ADDR_REG) & 0x00ff_fffe;
        let cart_addr = self.regs.get(PI_CART_ADDR_REG) & !1;

        let Some(handler) = self.dma.resolve(cart_addr) else {
            tracing::warn!(
                "[PI] no DMA target for cart address {:#010X}, {:?} of {:#X} bytes skipped",
                cart_addr,
                direction,
                length
            );
            return;
        };
        let Some(rdram) = rdram_of(&self.ri) else {
            return;
        };

        let transferred = {
            let mut rdram = rdram.borrow_mut();
            match direction {
                Direction::Read => handler.dma_read(&mut rdram, dram_addr, cart_addr, length),
                Direction::Write => handler.dma_write(&mut rdram, dram_addr, cart_addr, length),
            }
        };
        let cycles = self.calculate_cycles(handler.kind().domain(), transferred);
        tracing::debug!(
            "[PI] {:?} {:?} dram {:#010X} cart {:#010X} len {:#X} in {} cycles",
            direction,
            handler.kind(),
            dram_addr,
            cart_addr,
            transferred,
            cycles
        );

        // dom3 reaches the top of the address space, the next address wraps
        self.regs.set(PI_DRAM_ADDR_REG, dram_addr.wrapping_add(length).wrapping_add(7) & !7);
        self.regs.set(PI_CART_ADDR_REG, cart_addr.wrapping_add(length).wrapping_add(1) & !1);
        self.regs.set_bits(PI_STATUS_REG, PI_STATUS_DMA_BUSY);

        if let Some(cp0) = self.cp0.upgrade() {
            cp0.borrow_mut().add_interrupt_event(InterruptKind::Pi, cycles);
        }
    }

    pub fn read_regs(&mut self, address: u32) -> u32 {
        self.regs.read(address)
    }

    pub fn write_regs(&mut self, address: u32, value: u32, mask: u32) {
        match reg_index(address) {
            PI_RD_LEN_REG => {
                self.regs.write(address, value, mask);
                let length = (self.regs.get(PI_RD_LEN_REG) & 0x00ff_ffff) + 1;
                self.dma(Direction::Read, length);
            }
            PI_WR_LEN_REG => {
                self.regs.write(address, value, mask);
                let length = (self.regs.get(PI_WR_LEN_REG) & 0x00ff_ffff) + 1;
                self.dma(Direction::Write, length);
            }
            PI_STATUS_REG => {
                let value = value & mask;
                if value & PI_STATUS_WR_RESET != 0 {
                    self.regs.clear_bits(PI_STATUS_REG, PI_STATUS_DMA_BUSY | PI_STATUS_ERROR);
                }
                if value & PI_STATUS_WR_CLR_INTR != 0 {
                    self.regs.clear_bits(PI_STATUS_REG, PI_STATUS_INTERRUPT);
                    if let Some(mi) = self.mi.upgrade() {
                        mi.borrow_mut().clear_rcp_interrupt(MI_INTR_PI);
                    }
                }
            }
            PI_BSD_DOM1_LAT_REG..=PI_BSD_DOM2_RLS_REG => {
                self.regs.write(address, value & 0xff, mask);
            }
            _ => {
                self.regs.write(address, value, mask);
            }
        }
    }

    pub fn end_of_dma_event(&mut self) {
        self.regs
            .clear_bits(PI_STATUS_REG, PI_STATUS_DMA_BUSY | PI_STATUS_IO_BUSY);
        self.regs.set_bits(PI_STATUS_REG, PI_STATUS_INTERRUPT);
        if let Some(mi) = self.mi.upgrade() {
            mi.borrow_mut().raise_rcp_interrupt(MI_INTR_PI);
        }
    }
}
