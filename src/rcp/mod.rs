//! Reality Co-Processor interface controllers.
//!
//! Each controller exposes the register semantics the device core depends on:
//! raising interrupts through the MIPS interface, kicking off DMA and
//! scheduling the matching end-of-transfer event. The processors behind the
//! registers are external.

pub mod ai;
pub mod mi;
pub mod pi;
pub mod rdp;
pub mod ri;
pub mod rsp;
pub mod si;
pub mod vi;

pub use ai::{AiController, AudioOut, NullAudio};
pub use mi::MiController;
pub use pi::PiController;
pub use rdp::RdpCore;
pub use ri::RiController;
pub use rsp::RspCore;
pub use si::SiController;
pub use vi::ViController;
