use std::{
    cell::RefCell,
    fmt,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    bus::Bus,
    interrupt::{InterruptKind, InterruptTable},
    scheduler::Scheduler,
};

pub const R4300_KSEG0: u32 = 0x8000_0000;
pub const R4300_KSEG1: u32 = 0xa000_0000;

/// Entry point of IPL3 once copied into RSP DMEM
pub const IPL3_ENTRY: u32 = 0xa400_0040;

// cp0 register indices
pub const CP0_COUNT_REG: usize = 9;
pub const CP0_COMPARE_REG: usize = 11;
pub const CP0_STATUS_REG: usize = 12;
pub const CP0_CAUSE_REG: usize = 13;
pub const CP0_EPC_REG: usize = 14;
pub const CP0_ERROREPC_REG: usize = 30;

pub const CP0_STATUS_IE: u32 = 0x0000_0001;
pub const CP0_STATUS_EXL: u32 = 0x0000_0002;
pub const CP0_STATUS_ERL: u32 = 0x0000_0004;
pub const CP0_STATUS_IM4: u32 = 0x0000_1000;
pub const CP0_STATUS_SR: u32 = 0x0010_0000;
pub const CP0_STATUS_TS: u32 = 0x0020_0000;
pub const CP0_STATUS_BEV: u32 = 0x0040_0000;

pub const CP0_CAUSE_IP2: u32 = 0x0000_0400;
pub const CP0_CAUSE_IP3: u32 = 0x0000_0800;
pub const CP0_CAUSE_IP4: u32 = 0x0000_1000;
pub const CP0_CAUSE_IP7: u32 = 0x0000_8000;
pub const CP0_CAUSE_EXCCODE_MASK: u32 = 0x0000_007c;

const COUNT_PERIOD: u64 = 1 << 32;
const SPECIAL_PERIOD: u64 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuMode {
    PureInterpreter,
    #[default]
    CachedInterpreter,
    Dynarec,
}

/// Coprocessor 0: the interrupt-facing CPU state and the event queue.
#[derive(Debug)]
pub struct Cp0 {
    pub regs: [u32; 32],
    pub scheduler: Scheduler,
    pending_exception: bool,
}

impl Default for Cp0 {
    fn default() -> Self {
        Self::new()
    }
}

impl Cp0 {
    pub fn new() -> Self {
        Self {
            regs: [0; 32],
            scheduler: Scheduler::new(),
            pending_exception: false,
        }
    }

    pub fn poweron(&mut self) {
        self.regs = [0; 32];
        self.regs[CP0_STATUS_REG] = 0x3400_0000;
        self.pending_exception = false;
        self.scheduler.reset();
        self.init_interrupt();
    }

    /// Empties the queue and seeds the count-wrap bookkeeping event.
    pub fn init_interrupt(&mut self) {
        self.scheduler.clear_events();
        let next = (self.count() & 0x8000_0000) ^ 0x8000_0000;
        let delay = next.wrapping_sub(self.count()) as u64;
        self.scheduler.add_event(InterruptKind::Special, delay);
    }

    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    pub fn count(&self) -> u32 {
        self.scheduler.now() as u32
    }

    pub fn add_interrupt_event(&mut self, kind: InterruptKind, delay: u64) {
        self.scheduler.add_event(kind, delay);
    }

    /// Programs the timer compare register and reschedules the compare event.
    pub fn set_compare(&mut self, value: u32) {
        self.regs[CP0_COMPARE_REG] = value;
        self.regs[CP0_CAUSE_REG] &= !CP0_CAUSE_IP7;
        let delta = value.wrapping_sub(self.count()) as u64;
        self.scheduler.remove_event(InterruptKind::Compare);
        self.scheduler
            .add_event(InterruptKind::Compare, if delta == 0 { COUNT_PERIOD } else { delta });
    }

    /// Drives an external interrupt line and queues a check at the current time.
    pub fn set_interrupt_line(&mut self, ip: u32, asserted: bool) {
        if asserted {
            self.regs[CP0_CAUSE_REG] |= ip;
        } else {
            self.regs[CP0_CAUSE_REG] &= !ip;
        }
        self.scheduler.add_event(InterruptKind::Check, 0);
    }

    pub fn raise_interrupt(&mut self, ip: u32) {
        self.regs[CP0_CAUSE_REG] = (self.regs[CP0_CAUSE_REG] | ip) & !CP0_CAUSE_EXCCODE_MASK;
        self.check_interrupts();
    }

    pub fn clear_interrupt(&mut self, ip: u32) {
        self.regs[CP0_CAUSE_REG] &= !ip;
    }

    /// Latches a pending exception when an unmasked interrupt is asserted and
    /// the CPU accepts interrupts.
    pub fn check_interrupts(&mut self) {
        let status = self.regs[CP0_STATUS_REG];
        let cause = self.regs[CP0_CAUSE_REG];
        let unmasked = status & cause & 0xff00 != 0;
        let enabled = status & (CP0_STATUS_IE | CP0_STATUS_EXL | CP0_STATUS_ERL) == CP0_STATUS_IE;
        if unmasked && enabled {
            self.pending_exception = true;
        }
    }

    /// Consumed by the execution core before its next instruction.
    pub fn take_pending_exception(&mut self) -> bool {
        std::mem::take(&mut self.pending_exception)
    }

    pub fn compare_int_handler(&mut self) {
        self.scheduler.add_event(InterruptKind::Compare, COUNT_PERIOD);
        self.raise_interrupt(CP0_CAUSE_IP7);
    }

    pub fn check_int_handler(&mut self) {
        self.check_interrupts();
    }

    pub fn special_int_handler(&mut self) {
        self.scheduler.add_event(InterruptKind::Special, SPECIAL_PERIOD);
    }
}

/// The instruction-level CPU implementation driven by [R4300].
///
/// Implementations must not hold a borrow of `cp0` across a bus access: memory
/// mapped controllers raise interrupts through it.
pub trait ExecutionCore {
    fn poweron(&mut self, start_address: u32);

    /// Executes one instruction and returns the number of operations retired.
    fn step(&mut self, bus: &Bus, cp0: &RefCell<Cp0>) -> u32;

    fn pc(&self) -> u32;

    fn jump_to(&mut self, address: u32);
}

/// An execution core that retires one operation per step without fetching,
/// for running the device headless.
#[derive(Debug, Default)]
pub struct IdleCore {
    pc: u32,
}

impl ExecutionCore for IdleCore {
    fn poweron(&mut self, start_address: u32) {
        self.pc = start_address;
    }

    fn step(&mut self, _bus: &Bus, cp0: &RefCell<Cp0>) -> u32 {
        cp0.borrow_mut().take_pending_exception();
        1
    }

    fn pc(&self) -> u32 {
        self.pc
    }

    fn jump_to(&mut self, address: u32) {
        self.pc = address;
    }
}

/// Requests the CPU observes at its next interrupt boundary. Shared with the
/// host, possibly across threads.
#[derive(Debug, Clone, Default)]
pub struct RunFlags {
    stop: Arc<AtomicBool>,
    reset_hard_job: Arc<AtomicBool>,
}

impl RunFlags {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn request_hard_reset(&self) {
        self.reset_hard_job.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn hard_reset_requested(&self) -> bool {
        self.reset_hard_job.load(Ordering::SeqCst)
    }

    fn take_stop(&self) -> bool {
        self.stop.swap(false, Ordering::SeqCst)
    }

    fn take_hard_reset(&self) -> bool {
        self.reset_hard_job.swap(false, Ordering::SeqCst)
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct R4300 {
    cp0: Rc<RefCell<Cp0>>,
    flags: RunFlags,
    #[derivative(Debug = "ignore")]
    core: Box<dyn ExecutionCore>,
    mode: CpuMode,
    start_address: u32,
    count_per_op: u32,
    count_per_op_denom_pot: u32,
}

impl R4300 {
    pub fn new(
        core: Box<dyn ExecutionCore>,
        mode: CpuMode,
        count_per_op: u32,
        count_per_op_denom_pot: u32,
        start_address: u32,
    ) -> Self {
        assert!(count_per_op > 0, "count_per_op must be non-zero");
        Self {
            cp0: Rc::new(RefCell::new(Cp0::new())),
            flags: RunFlags::default(),
            core,
            mode,
            start_address,
            count_per_op,
            count_per_op_denom_pot,
        }
    }

    pub fn cp0(&self) -> &Rc<RefCell<Cp0>> {
        &self.cp0
    }

    pub fn flags(&self) -> &RunFlags {
        &self.flags
    }

    pub fn mode(&self) -> CpuMode {
        self.mode
    }

    pub fn pc(&self) -> u32 {
        self.core.pc()
    }

    pub fn jump_to(&mut self, address: u32) {
        self.core.jump_to(address);
    }

    pub fn poweron(&mut self) {
        self.cp0.borrow_mut().poweron();
        self.core.poweron(self.start_address);
    }

    fn ops_to_count(&self, ops: u32) -> u64 {
        (ops as u64 * self.count_per_op as u64) >> self.count_per_op_denom_pot
    }

    /// Executes until a stop request is consumed at an interrupt boundary.
    ///
    /// No borrow of `this` or of cp0 is held while interrupt handlers run, so
    /// handlers may power the CPU on or redirect it.
    pub fn run(this: &Rc<RefCell<Self>>, bus: &Bus, interrupts: &InterruptTable) {
        let (cp0, flags) = {
            let cpu = this.borrow();
            (cpu.cp0.clone(), cpu.flags.clone())
        };
        tracing::info!("[CPU] running in {:?} mode", this.borrow().mode);

        loop {
            let count = {
                let mut cpu = this.borrow_mut();
                let ops = cpu.core.step(bus, &cp0);
                cpu.ops_to_count(ops)
            };

            let due = {
                let mut cp0 = cp0.borrow_mut();
                cp0.scheduler.advance(count);
                cp0.scheduler.event_due()
            };

            if due && !Self::gen_interrupt(&cp0, &flags, interrupts) {
                break;
            }
        }

        tracing::info!(
            "[CPU] stopped at pc {:#010X}, count {}",
            this.borrow().pc(),
            cp0.borrow().now()
        );
    }

    /// Services an interrupt boundary. Returns false when execution must stop.
    fn gen_interrupt(cp0: &RefCell<Cp0>, flags: &RunFlags, interrupts: &InterruptTable) -> bool {
        if flags.take_stop() {
            return false;
        }

        if flags.take_hard_reset() {
            interrupts.fire(InterruptKind::ResetHard);
            return true;
        }

        loop {
            let event = cp0.borrow_mut().scheduler.pop_due();
            match event {
                Some(event) => interrupts.fire(event.kind),
                None => break,
            }
        }
        true
    }
}

impl fmt::Display for Cp0 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "count: {:#010X} compare: {:#010X} status: {:#010X} cause: {:#010X}",
            self.count(),
            self.regs[CP0_COMPARE_REG],
            self.regs[CP0_STATUS_REG],
            self.regs[CP0_CAUSE_REG]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poweron_seeds_special_event() {
        let mut cp0 = Cp0::new();
        cp0.poweron();
        let events: Vec<_> = cp0.scheduler.pending().copied().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, InterruptKind::Special);
        assert_eq!(events[0].cycle, 0x8000_0000);
    }

    #[test]
    fn test_compare_reschedules() {
        let mut cp0 = Cp0::new();
        cp0.scheduler.advance(100);
        cp0.set_compare(150);
        let compare = cp0
            .scheduler
            .pending()
            .find(|e| e.kind == InterruptKind::Compare)
            .copied()
            .unwrap();
        assert_eq!(compare.cycle, 150);

        cp0.set_compare(200);
        assert_eq!(
            cp0.scheduler
                .pending()
                .filter(|e| e.kind == InterruptKind::Compare)
                .count(),
            1
        );
    }

    #[test]
    fn test_interrupt_acceptance() {
        let mut cp0 = Cp0::new();
        cp0.regs[CP0_STATUS_REG] = CP0_STATUS_IE | 0x0400;
        cp0.raise_interrupt(CP0_CAUSE_IP2);
        assert!(cp0.take_pending_exception());
        assert!(!cp0.take_pending_exception());

        // masked while in exception level
        cp0.regs[CP0_STATUS_REG] |= CP0_STATUS_EXL;
        cp0.raise_interrupt(CP0_CAUSE_IP2);
        assert!(!cp0.take_pending_exception());
    }

    #[test]
    fn test_interrupt_line_queues_check() {
        let mut cp0 = Cp0::new();
        cp0.set_interrupt_line(CP0_CAUSE_IP2, true);
        assert_eq!(cp0.regs[CP0_CAUSE_REG] & CP0_CAUSE_IP2, CP0_CAUSE_IP2);
        assert!(cp0.scheduler.is_pending(InterruptKind::Check));
        cp0.set_interrupt_line(CP0_CAUSE_IP2, false);
        assert_eq!(cp0.regs[CP0_CAUSE_REG] & CP0_CAUSE_IP2, 0);
    }

    #[test]
    fn test_ops_scaling() {
        let cpu = R4300::new(Box::<IdleCore>::default(), CpuMode::PureInterpreter, 3, 1, 0);
        assert_eq!(cpu.ops_to_count(4), 6);
    }

    #[test]
    fn test_flags_are_consumed_once() {
        let flags = RunFlags::default();
        flags.request_stop();
        assert!(flags.stop_requested());
        assert!(flags.take_stop());
        assert!(!flags.take_stop());
    }
}
