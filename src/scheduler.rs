use std::collections::VecDeque;

use crate::interrupt::InterruptKind;

/// Scheduled event with timing information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub cycle: u64,
    pub kind: InterruptKind,
}

/// Virtual-time interrupt queue.
///
/// Events are kept sorted by their due cycle; events due at the same cycle fire
/// in the order they were added.
#[derive(Debug, Default)]
pub struct Scheduler {
    /// Virtual cycles elapsed since power on
    now: u64,

    events: VecDeque<ScheduledEvent>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every pending event and rewinds virtual time.
    pub fn reset(&mut self) {
        self.now = 0;
        self.events.clear();
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn advance(&mut self, cycles: u64) {
        self.now += cycles;
    }

    /// Schedules `kind` to fire `delay` cycles from now.
    pub fn add_event(&mut self, kind: InterruptKind, delay: u64) {
        self.add_event_at(kind, self.now + delay);
    }

    pub fn add_event_at(&mut self, kind: InterruptKind, cycle: u64) {
        let at = self.events.partition_point(|e| e.cycle <= cycle);
        tracing::trace!("[SCHED] {:?} at {} (now {})", kind, cycle, self.now);
        self.events.insert(at, ScheduledEvent { cycle, kind });
    }

    /// Removes every pending event of `kind`.
    pub fn remove_event(&mut self, kind: InterruptKind) {
        self.events.retain(|e| e.kind != kind);
    }

    pub fn next_event_cycle(&self) -> Option<u64> {
        self.events.front().map(|e| e.cycle)
    }

    pub fn event_due(&self) -> bool {
        matches!(self.next_event_cycle(), Some(cycle) if cycle <= self.now)
    }

    /// Pops the earliest event if it is due.
    pub fn pop_due(&mut self) -> Option<ScheduledEvent> {
        if self.event_due() {
            self.events.pop_front()
        } else {
            None
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &ScheduledEvent> {
        self.events.iter()
    }

    pub fn is_pending(&self, kind: InterruptKind) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_sorted_by_cycle() {
        let mut sched = Scheduler::new();
        sched.add_event(InterruptKind::Nmi, 100);
        sched.add_event(InterruptKind::Vi, 10);
        sched.add_event(InterruptKind::Pi, 50);

        let kinds: Vec<_> = sched.pending().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![InterruptKind::Vi, InterruptKind::Pi, InterruptKind::Nmi]
        );
        assert_eq!(sched.next_event_cycle(), Some(10));
    }

    #[test]
    fn test_same_cycle_is_fifo() {
        let mut sched = Scheduler::new();
        sched.add_event(InterruptKind::Hw2, 0);
        sched.add_event(InterruptKind::Si, 0);
        assert_eq!(sched.pop_due().map(|e| e.kind), Some(InterruptKind::Hw2));
        assert_eq!(sched.pop_due().map(|e| e.kind), Some(InterruptKind::Si));
        assert_eq!(sched.pop_due(), None);
    }

    #[test]
    fn test_pop_due_respects_time() {
        let mut sched = Scheduler::new();
        sched.add_event(InterruptKind::Vi, 5000);
        assert!(!sched.event_due());
        sched.advance(4999);
        assert_eq!(sched.pop_due(), None);
        sched.advance(1);
        assert_eq!(
            sched.pop_due(),
            Some(ScheduledEvent {
                cycle: 5000,
                kind: InterruptKind::Vi
            })
        );
    }

    #[test]
    fn test_remove_and_reset() {
        let mut sched = Scheduler::new();
        sched.advance(10);
        sched.add_event(InterruptKind::Compare, 5);
        sched.add_event(InterruptKind::Vi, 5);
        sched.remove_event(InterruptKind::Compare);
        assert!(!sched.is_pending(InterruptKind::Compare));
        assert!(sched.is_pending(InterruptKind::Vi));

        sched.reset();
        assert_eq!(sched.now(), 0);
        assert_eq!(sched.pending().count(), 0);
    }
}
