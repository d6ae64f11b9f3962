use std::{cell::RefCell, rc::Weak};

use derivative::Derivative;

use crate::{
    cpu::Cp0,
    interrupt::InterruptKind,
    mmio::{reg_index, RegisterBank},
    rcp::{
        mi::{MiController, MI_INTR_AI},
        ri::{rdram_of, RiController},
        vi::ViController,
    },
};

pub const AI_DRAM_ADDR_REG: usize = 0;
pub const AI_LEN_REG: usize = 1;
pub const AI_CONTROL_REG: usize = 2;
pub const AI_STATUS_REG: usize = 3;
pub const AI_DACRATE_REG: usize = 4;
pub const AI_BITRATE_REG: usize = 5;
pub const AI_REGS_COUNT: usize = 6;

pub const AI_STATUS_BUSY: u32 = 0x4000_0000;
pub const AI_STATUS_FULL: u32 = 0x8000_0000;

const BYTES_PER_SAMPLE: u64 = 4;

/// DAC rate divider, 14 bits wide
const AI_DACRATE_MASK: u32 = 0x3fff;

/// Host audio sink fed by the AI DMA engine.
pub trait AudioOut {
    fn set_frequency(&mut self, frequency: u32);
    fn push_samples(&mut self, samples: &[u8]);
}

/// Discards every sample.
#[derive(Debug, Default)]
pub struct NullAudio;

impl AudioOut for NullAudio {
    fn set_frequency(&mut self, _frequency: u32) {}
    fn push_samples(&mut self, _samples: &[u8]) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct AiDma {
    address: u32,
    length: u32,
    duration: u64,
}

/// Audio interface: a two-entry DMA queue draining RDRAM into [AudioOut].
#[derive(Derivative)]
#[derivative(Debug)]
pub struct AiController {
    pub regs: RegisterBank<AI_REGS_COUNT>,
    fifo: [Option<AiDma>; 2],
    end_cycle: u64,
    dma_modifier: f32,
    #[derivative(Debug = "ignore")]
    audio: Box<dyn AudioOut>,
    mi: Weak<RefCell<MiController>>,
    ri: Weak<RefCell<RiController>>,
    vi: Weak<RefCell<ViController>>,
    cp0: Weak<RefCell<Cp0>>,
}

impl AiController {
    pub fn new(
        audio: Box<dyn AudioOut>,
        dma_modifier: f32,
        mi: Weak<RefCell<MiController>>,
        ri: Weak<RefCell<RiController>>,
        vi: Weak<RefCell<ViController>>,
        cp0: Weak<RefCell<Cp0>>,
    ) -> Self {
        Self {
            regs: RegisterBank::new(),
            fifo: [None; 2],
            end_cycle: 0,
            dma_modifier,
            audio,
            mi,
            ri,
            vi,
            cp0,
        }
    }

    pub fn poweron(&mut self) {
        self.regs.clear();
        self.fifo = [None; 2];
        self.end_cycle = 0;
    }

    fn now(&self) -> u64 {
        self.cp0.upgrade().map(|cp0| cp0.borrow().now()).unwrap_or(0)
    }

    fn dma_duration(&self, length: u32) -> u64 {
        let Some(vi) = self.vi.upgrade() else {
            return 0;
        };
        let vi = vi.borrow();
        let divider = (self.regs.get(AI_DACRATE_REG) & AI_DACRATE_MASK) + 1;
        let samples_per_sec = (vi.clock() / divider) as u64;
        if samples_per_sec == 0 {
            return 0;
        }
        let cycles = length as u64 * (vi.delay() as u64 * vi.expected_refresh_rate() as u64)
            / (BYTES_PER_SAMPLE * samples_per_sec);
        (cycles as f64 * self.dma_modifier as f64) as u64
    }

    fn start_dma(&mut self, dma: AiDma) {
        if let Some(rdram) = rdram_of(&self.ri) {
            let samples = rdram.borrow().read_bytes(dma.address, dma.length as usize);
            self.audio.push_samples(&samples);
        }
        self.end_cycle = self.now() + dma.duration;
        tracing::debug!(
            "[AI] dma {:#010X} len {:#X} for {} cycles",
            dma.address,
            dma.length,
            dma.duration
        );
        if let Some(cp0) = self.cp0.upgrade() {
            cp0.borrow_mut()
                .add_interrupt_event(InterruptKind::Ai, dma.duration);
        }
    }

    fn fifo_push(&mut self) {
        let dma = AiDma {
            address: self.regs.get(AI_DRAM_ADDR_REG) & 0x00ff_fff8,
            length: self.regs.get(AI_LEN_REG) & 0x0003_fff8,
            duration: self.dma_duration(self.regs.get(AI_LEN_REG) & 0x0003_fff8),
        };

        if self.fifo[0].is_some() {
            self.fifo[1] = Some(dma);
            self.regs.set_bits(AI_STATUS_REG, AI_STATUS_FULL);
        } else {
            self.fifo[0] = Some(dma);
            self.regs.set_bits(AI_STATUS_REG, AI_STATUS_BUSY);
            self.start_dma(dma);
        }
    }

    /// Bytes left in the running transfer, interpolated on virtual time.
    fn remaining_length(&self) -> u32 {
        match self.fifo[0] {
            Some(dma) if dma.duration > 0 => {
                let left = self.end_cycle.saturating_sub(self.now());
                ((dma.length as u64 * left) / dma.duration) as u32 & !7
            }
            _ => 0,
        }
    }

    pub fn read_regs(&mut self, address: u32) -> u32 {
        match reg_index(address) {
            AI_LEN_REG => self.remaining_length(),
            _ => self.regs.read(address),
        }
    }

    pub fn write_regs(&mut self, address: u32, value: u32, mask: u32) {
        match reg_index(address) {
            AI_LEN_REG => {
                self.regs.write(address, value, mask);
                self.fifo_push();
            }
            AI_STATUS_REG => {
                if let Some(mi) = self.mi.upgrade() {
                    mi.borrow_mut().clear_rcp_interrupt(MI_INTR_AI);
                }
            }
            AI_DACRATE_REG => {
                let old = self.regs.get(AI_DACRATE_REG);
                self.regs.write(address, value, mask);
                let dacrate = self.regs.get(AI_DACRATE_REG) & AI_DACRATE_MASK;
                self.regs.set(AI_DACRATE_REG, dacrate);
                if dacrate != old {
                    if let Some(vi) = self.vi.upgrade() {
                        let frequency = vi.borrow().clock() / (1 + dacrate);
                        tracing::debug!("[AI] frequency {} Hz", frequency);
                        self.audio.set_frequency(frequency);
                    }
                }
            }
            _ => {
                self.regs.write(address, value, mask);
            }
        }
    }

    pub fn end_of_dma_event(&mut self) {
        self.fifo[0] = self.fifo[1].take();
        self.regs.clear_bits(AI_STATUS_REG, AI_STATUS_FULL);
        match self.fifo[0] {
            Some(next) => self.start_dma(next),
            None => self.regs.clear_bits(AI_STATUS_REG, AI_STATUS_BUSY),
        }
        if let Some(mi) = self.mi.upgrade() {
            mi.borrow_mut().raise_rcp_interrupt(MI_INTR_AI);
        }
    }

    pub fn is_busy(&self) -> bool {
        self.fifo[0].is_some()
    }
}
