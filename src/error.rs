use thiserror::Error;

/// Invalid device parameters, reported before any subsystem is built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("RDRAM size must be non-zero")]
    ZeroRdram,

    #[error("RDRAM size {0:#x} exceeds the {1:#x} byte window")]
    RdramTooLarge(usize, usize),

    #[error("RDRAM size {0:#x} is not word aligned")]
    UnalignedRdram(usize),

    #[error("count_per_op must be non-zero")]
    ZeroCountPerOp,

    #[error("VI clock and expected refresh rate must be non-zero")]
    ZeroViTiming,

    #[error("unknown EEPROM size {0:#x}")]
    UnknownEepromSize(usize),

    #[error("{name} image of {size:#x} bytes exceeds {max:#x}")]
    ImageTooLarge {
        name: &'static str,
        size: usize,
        max: usize,
    },
}
