use std::{cell::RefCell, rc::Weak};

use crate::{
    cpu::Cp0,
    interrupt::InterruptKind,
    mmio::{read_be_word, reg_index, RegisterBank},
    rcp::{
        mi::{MiController, MI_INTR_DP},
        ri::{rdram_of, RiController},
        rsp::RspCore,
    },
};

pub const DPC_START_REG: usize = 0;
pub const DPC_END_REG: usize = 1;
pub const DPC_CURRENT_REG: usize = 2;
pub const DPC_STATUS_REG: usize = 3;
pub const DPC_CLOCK_REG: usize = 4;
pub const DPC_BUFBUSY_REG: usize = 5;
pub const DPC_PIPEBUSY_REG: usize = 6;
pub const DPC_TMEM_REG: usize = 7;
pub const DPC_REGS_COUNT: usize = 8;

pub const DPS_REGS_COUNT: usize = 4;

pub const DPC_STATUS_XBUS_DMEM_DMA: u32 = 0x001;
pub const DPC_STATUS_FREEZE: u32 = 0x002;
pub const DPC_STATUS_FLUSH: u32 = 0x004;
pub const DPC_STATUS_PIPE_BUSY: u32 = 0x020;
pub const DPC_STATUS_CMD_BUSY: u32 = 0x040;
pub const DPC_STATUS_CBUF_READY: u32 = 0x080;

const RDP_CMD_SYNC_FULL: u32 = 0x29;
const RDP_CMD_SIZE: u32 = 8;

/// Cycles between a full sync reaching the RDP and its interrupt
pub const DP_INTERRUPT_DELAY: u64 = 4000;

/// Display processor command interface. The command list is scanned for a
/// full sync, which completes the frame with a DP interrupt; rasterization
/// is left to a graphics backend.
#[derive(Debug)]
pub struct RdpCore {
    pub dpc_regs: RegisterBank<DPC_REGS_COUNT>,
    pub dps_regs: RegisterBank<DPS_REGS_COUNT>,
    mi: Weak<RefCell<MiController>>,
    ri: Weak<RefCell<RiController>>,
    rsp: Weak<RefCell<RspCore>>,
    cp0: Weak<RefCell<Cp0>>,
}

impl RdpCore {
    pub fn new(
        mi: Weak<RefCell<MiController>>,
        ri: Weak<RefCell<RiController>>,
        rsp: Weak<RefCell<RspCore>>,
        cp0: Weak<RefCell<Cp0>>,
    ) -> Self {
        Self {
            dpc_regs: RegisterBank::new(),
            dps_regs: RegisterBank::new(),
            mi,
            ri,
            rsp,
            cp0,
        }
    }

    pub fn poweron(&mut self) {
        self.dpc_regs.clear();
        self.dps_regs.clear();
        self.dpc_regs.set(DPC_STATUS_REG, DPC_STATUS_CBUF_READY);
    }

    fn command_word(&self, address: u32) -> u32 {
        if self.dpc_regs.get(DPC_STATUS_REG) & DPC_STATUS_XBUS_DMEM_DMA != 0 {
            match self.rsp.upgrade() {
                Some(rsp) => read_be_word(rsp.borrow().mem(), (address & 0xff8) as usize),
                None => 0,
            }
        } else {
            match rdram_of(&self.ri) {
                Some(rdram) => rdram.borrow_mut().read_dram(address),
                None => 0,
            }
        }
    }

    /// Consumes the list between CURRENT and END.
    fn process_list(&mut self) {
        let end = self.dpc_regs.get(DPC_END_REG);
        let mut current = self.dpc_regs.get(DPC_CURRENT_REG);
        let mut full_sync = false;
        while current < end {
            let command = (self.command_word(current) >> 24) & 0x3f;
            if command == RDP_CMD_SYNC_FULL {
                full_sync = true;
            }
            current += RDP_CMD_SIZE;
        }
        self.dpc_regs.set(DPC_CURRENT_REG, end);

        if full_sync {
            self.dpc_regs
                .set_bits(DPC_STATUS_REG, DPC_STATUS_PIPE_BUSY | DPC_STATUS_CMD_BUSY);
            if let Some(cp0) = self.cp0.upgrade() {
                cp0.borrow_mut()
                    .add_interrupt_event(InterruptKind::Dp, DP_INTERRUPT_DELAY);
            }
        }
    }

    pub fn read_dpc_regs(&mut self, address: u32) -> u32 {
        self.dpc_regs.read(address)
    }

    pub fn write_dpc_regs(&mut self, address: u32, value: u32, mask: u32) {
        let value = value & mask;
        match reg_index(address) {
            DPC_START_REG => {
                self.dpc_regs.set(DPC_START_REG, value & 0x00ff_fff8);
                self.dpc_regs.set(DPC_CURRENT_REG, value & 0x00ff_fff8);
            }
            DPC_END_REG => {
                self.dpc_regs.set(DPC_END_REG, value & 0x00ff_fff8);
                if self.dpc_regs.get(DPC_STATUS_REG) & DPC_STATUS_FREEZE == 0 {
                    self.process_list();
                }
            }
            DPC_STATUS_REG => self.update_status(value),
            reg => {
                tracing::trace!("[RDP] ignored write to DPC reg {} = {:08X}", reg, value);
            }
        }
    }

    fn update_status(&mut self, w: u32) {
        let pairs = [
            (0x001, 0x002, DPC_STATUS_XBUS_DMEM_DMA),
            (0x004, 0x008, DPC_STATUS_FREEZE),
            (0x010, 0x020, DPC_STATUS_FLUSH),
        ];
        for (clear, set, bit) in pairs {
            if w & clear != 0 {
                self.dpc_regs.clear_bits(DPC_STATUS_REG, bit);
            }
            if w & set != 0 {
                self.dpc_regs.set_bits(DPC_STATUS_REG, bit);
            }
        }
        if w & 0x040 != 0 {
            self.dpc_regs.set(DPC_TMEM_REG, 0);
        }
        if w & 0x080 != 0 {
            self.dpc_regs.set(DPC_PIPEBUSY_REG, 0);
        }
        if w & 0x100 != 0 {
            self.dpc_regs.set(DPC_BUFBUSY_REG, 0);
        }
        if w & 0x200 != 0 {
            self.dpc_regs.set(DPC_CLOCK_REG, 0);
        }
        // unfreezing resumes a pending list
        if w & 0x004 != 0 && self.dpc_regs.get(DPC_CURRENT_REG) < self.dpc_regs.get(DPC_END_REG) {
            self.process_list();
        }
    }

    pub fn read_dps_regs(&mut self, address: u32) -> u32 {
        self.dps_regs.read(address)
    }

    pub fn write_dps_regs(&mut self, address: u32, value: u32, mask: u32) {
        self.dps_regs.write(address, value, mask);
    }

    pub fn interrupt_event(&mut self) {
        self.dpc_regs
            .clear_bits(DPC_STATUS_REG, DPC_STATUS_PIPE_BUSY | DPC_STATUS_CMD_BUSY);
        if let Some(mi) = self.mi.upgrade() {
            mi.borrow_mut().raise_rcp_interrupt(MI_INTR_DP);
        }
    }
}
