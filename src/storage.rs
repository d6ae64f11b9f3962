use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use time::OffsetDateTime;

/// Byte storage behind a save memory or a disk image.
pub trait StorageBackend {
    fn data(&self) -> &[u8];
    fn data_mut(&mut self) -> &mut [u8];

    /// Persists pending modifications.
    fn save(&mut self) -> anyhow::Result<()>;
}

/// Storage living only for the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStorage {
    data: Vec<u8>,
}

impl MemoryStorage {
    pub fn new(size: usize) -> Self {
        Self::with_fill(size, 0)
    }

    /// Erased flash and EEPROM read back as all ones.
    pub fn with_fill(size: usize, fill: u8) -> Self {
        Self {
            data: vec![fill; size],
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl StorageBackend for MemoryStorage {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn save(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Storage mirrored to a file on `save`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    data: Vec<u8>,
}

impl FileStorage {
    /// Loads `path`, or starts from `size` bytes of `fill` when it does not
    /// exist yet. The image is resized to `size`.
    pub fn open(path: impl AsRef<Path>, size: usize, fill: u8) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut data = if path.exists() {
            fs::read(&path).with_context(|| format!("reading save file {}", path.display()))?
        } else {
            Vec::new()
        };
        data.resize(size, fill);
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileStorage {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn save(&mut self) -> anyhow::Result<()> {
        fs::write(&self.path, &self.data)
            .with_context(|| format!("writing save file {}", self.path.display()))
    }
}

/// Wall clock source for the cartridge and disk real-time clocks.
pub trait ClockBackend {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockBackend for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl ClockBackend for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

/// Packs a value below 100 as two BCD digits.
pub fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}
