use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use serde::{Deserialize, Serialize};

/// Interrupt sources, in the order the scheduler indexes the binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InterruptKind {
    Vi,
    Compare,
    Check,
    Si,
    Pi,
    Special,
    Ai,
    Sp,
    Dp,
    Hw2,
    Nmi,
    ResetHard,
    SpDma,
    DdMecha,
    DdBm,
    DdDrive,
}

impl InterruptKind {
    pub const COUNT: usize = 16;

    pub const ALL: [InterruptKind; Self::COUNT] = [
        InterruptKind::Vi,
        InterruptKind::Compare,
        InterruptKind::Check,
        InterruptKind::Si,
        InterruptKind::Pi,
        InterruptKind::Special,
        InterruptKind::Ai,
        InterruptKind::Sp,
        InterruptKind::Dp,
        InterruptKind::Hw2,
        InterruptKind::Nmi,
        InterruptKind::ResetHard,
        InterruptKind::SpDma,
        InterruptKind::DdMecha,
        InterruptKind::DdBm,
        InterruptKind::DdDrive,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A callback bound to the context that services one interrupt source.
#[derive(Clone)]
pub struct InterruptHandler {
    context: &'static str,
    callback: Rc<dyn Fn()>,
}

impl InterruptHandler {
    pub fn new(context: &'static str, callback: impl Fn() + 'static) -> Self {
        Self {
            context,
            callback: Rc::new(callback),
        }
    }

    pub fn bind<T: 'static>(
        context: &'static str,
        target: &Rc<RefCell<T>>,
        callback: fn(&mut T),
    ) -> Self {
        let target = Rc::downgrade(target);
        Self::new(context, move || {
            if let Some(target) = target.upgrade() {
                callback(&mut target.borrow_mut());
            }
        })
    }

    /// Binds a callback whose context has interior mutability of its own.
    pub fn bind_weak<T: 'static>(
        context: &'static str,
        target: Weak<T>,
        callback: fn(&T),
    ) -> Self {
        Self::new(context, move || {
            if let Some(target) = target.upgrade() {
                callback(&target);
            }
        })
    }

    /// A source with no hardware behind it in this configuration.
    pub fn unbound(context: &'static str) -> Self {
        Self::new(context, || {})
    }

    pub fn context(&self) -> &'static str {
        self.context
    }

    pub fn fire(&self) {
        (self.callback)()
    }
}

impl fmt::Debug for InterruptHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InterruptHandler").field(&self.context).finish()
    }
}

/// Passive association between interrupt sources and their handlers. Built
/// once, after every referenced subsystem exists.
#[derive(Debug)]
pub struct InterruptTable {
    handlers: [InterruptHandler; InterruptKind::COUNT],
}

impl InterruptTable {
    pub fn new(handlers: [InterruptHandler; InterruptKind::COUNT]) -> Self {
        Self { handlers }
    }

    pub fn lookup(&self, kind: InterruptKind) -> &InterruptHandler {
        &self.handlers[kind.index()]
    }

    pub fn fire(&self, kind: InterruptKind) {
        let handler = self.lookup(kind);
        tracing::trace!("[INT] {:?} -> {}", kind, handler.context());
        handler.fire();
    }
}
