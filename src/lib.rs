pub mod bus;
pub mod cart;
pub mod config;
pub mod cpu;
pub mod dd;
pub mod device;
pub mod dma;
pub mod error;
pub mod interrupt;
pub mod is_viewer;
pub mod joybus;
pub mod memory_map;
pub mod memory_view;
pub mod mmio;
pub mod pif;
pub mod rcp;
pub mod rdram;
pub mod scheduler;
pub mod storage;

pub use bus::{BreakpointHook, Bus};
pub use config::{Backends, DeviceConfig, MediaImages};
pub use cpu::{Cp0, CpuMode, ExecutionCore, IdleCore, RunFlags, R4300};
pub use device::{Device, DeviceState};
pub use error::ConfigError;
pub use interrupt::{InterruptKind, InterruptTable};
pub use memory_map::{AddressRange, MemHandler, MemoryKind, MemoryMap, MemoryMapBuilder};
pub use memory_view::MemoryDescriptor;

use tracing_subscriber::EnvFilter;

/// Installs a formatted log subscriber filtered by `RUST_LOG`, defaulting to
/// `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Loads the images named by `config` and builds a device around them with
/// the default backends.
pub fn load_device(config: &DeviceConfig) -> anyhow::Result<std::rc::Rc<Device>> {
    config.validate()?;
    let media = MediaImages::load(config)?;
    let backends = Backends::for_config(config)?;
    Ok(Device::init(config, backends, media))
}
