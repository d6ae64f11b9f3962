use std::{cell::RefCell, rc::Weak};

use crate::{
    cpu::Cp0,
    interrupt::InterruptKind,
    mmio::{reg_index, RegisterBank},
    rcp::mi::{MiController, MI_INTR_VI},
};

pub const VI_STATUS_REG: usize = 0;
pub const VI_ORIGIN_REG: usize = 1;
pub const VI_WIDTH_REG: usize = 2;
pub const VI_V_INTR_REG: usize = 3;
pub const VI_CURRENT_REG: usize = 4;
pub const VI_BURST_REG: usize = 5;
pub const VI_V_SYNC_REG: usize = 6;
pub const VI_REGS_COUNT: usize = 14;

/// Half-lines per field, 10 bits wide
const VI_V_SYNC_MASK: u32 = 0x3ff;

pub const VI_CLOCK_NTSC: u32 = 48_681_812;
pub const VI_CLOCK_PAL: u32 = 49_656_530;
pub const VI_CLOCK_MPAL: u32 = 48_628_316;

/// Vertical interrupt period used until software programs V_SYNC
pub const VI_INITIAL_DELAY: u32 = 5000;

/// Video interface: paces the whole machine with its vertical interrupt.
#[derive(Debug)]
pub struct ViController {
    pub regs: RegisterBank<VI_REGS_COUNT>,
    clock: u32,
    expected_refresh_rate: u32,
    count_per_scanline: u32,
    delay: u32,
    field: u32,
    mi: Weak<RefCell<MiController>>,
    cp0: Weak<RefCell<Cp0>>,
}

impl ViController {
    pub fn new(
        clock: u32,
        expected_refresh_rate: u32,
        mi: Weak<RefCell<MiController>>,
        cp0: Weak<RefCell<Cp0>>,
    ) -> Self {
        assert!(
            clock > 0 && expected_refresh_rate > 0,
            "VI clock and refresh rate must be non-zero"
        );
        Self {
            regs: RegisterBank::new(),
            clock,
            expected_refresh_rate,
            count_per_scanline: 0,
            delay: VI_INITIAL_DELAY,
            field: 0,
            mi,
            cp0,
        }
    }

    pub fn poweron(&mut self) {
        self.regs.clear();
        self.count_per_scanline = 0;
        self.delay = VI_INITIAL_DELAY;
        self.field = 0;
        self.schedule_next();
    }

    pub fn clock(&self) -> u32 {
        self.clock
    }

    pub fn expected_refresh_rate(&self) -> u32 {
        self.expected_refresh_rate
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }

    pub fn field(&self) -> u32 {
        self.field
    }

    /// Queues the next vertical interrupt one frame from now.
    pub fn schedule_next(&self) {
        if let Some(cp0) = self.cp0.upgrade() {
            cp0.borrow_mut()
                .add_interrupt_event(InterruptKind::Vi, self.delay as u64);
        }
    }

    pub fn read_regs(&mut self, address: u32) -> u32 {
        self.regs.read(address)
    }

    pub fn write_regs(&mut self, address: u32, value: u32, mask: u32) {
        match reg_index(address) {
            VI_CURRENT_REG => {
                if let Some(mi) = self.mi.upgrade() {
                    mi.borrow_mut().clear_rcp_interrupt(MI_INTR_VI);
                }
            }
            VI_V_SYNC_REG => {
                let old = self.regs.get(VI_V_SYNC_REG);
                self.regs.write(address, value, mask);
                let v_sync = self.regs.get(VI_V_SYNC_REG) & VI_V_SYNC_MASK;
                self.regs.set(VI_V_SYNC_REG, v_sync);
                if v_sync != old {
                    let lines = v_sync + 1;
                    self.count_per_scanline = (self.clock / self.expected_refresh_rate) / lines;
                    // a frame always ends at least one cycle later
                    self.delay = (lines * self.count_per_scanline).max(1);
                    tracing::debug!(
                        "[VI] v_sync={} count_per_scanline={} delay={}",
                        v_sync,
                        self.count_per_scanline,
                        self.delay
                    );
                }
            }
            _ => {
                self.regs.write(address, value, mask);
            }
        }
    }

    pub fn vertical_interrupt_event(&mut self) {
        // interlaced modes alternate fields
        if self.regs.get(VI_STATUS_REG) & 0x40 != 0 {
            self.field ^= 1;
        } else {
            self.field = 0;
        }
        self.schedule_next();
        if let Some(mi) = self.mi.upgrade() {
            mi.borrow_mut().raise_rcp_interrupt(MI_INTR_VI);
        }
    }
}
