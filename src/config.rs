use std::{fs, path::PathBuf};

use anyhow::Context;
use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    cart::{
        AfRtc, Cartridge, Dom2Save, Eeprom, EepromType, FlashRam, FlashramType, SaveType,
        FLASHRAM_SIZE, SRAM_SIZE,
    },
    cpu::{CpuMode, ExecutionCore, IdleCore, IPL3_ENTRY},
    error::ConfigError,
    joybus::{Controller, JoybusDevice, NoInput, Pak},
    pif::{GAME_CONTROLLERS_COUNT, PIF_ROM_SIZE},
    rcp::{ai::AudioOut, si::DEFAULT_SI_DMA_DURATION, vi::VI_CLOCK_NTSC, NullAudio},
    rdram::RDRAM_MAX_SIZE,
    storage::{ClockBackend, FileStorage, MemoryStorage, StorageBackend, SystemClock},
};

pub const CART_ROM_MAX_SIZE: usize = 0x0400_0000;
pub const DD_ROM_MAX_SIZE: usize = 0x0200_0000;
pub const DISK_MAX_SIZE: usize = 0x0400_0000;

/// Device parameters, as read from a JSON file. Missing fields take the
/// retail console defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub cpu_mode: CpuMode,
    pub count_per_op: u32,
    pub count_per_op_denom_pot: u32,
    pub start_address: u32,
    pub dma_modifier: f32,
    pub si_dma_duration: u32,
    pub dram_size: usize,
    pub vi_clock: u32,
    pub expected_refresh_rate: u32,
    pub save_type: SaveType,
    pub eeprom_size: usize,
    pub flashram_type: FlashramType,
    pub af_rtc: bool,
    pub pif_rom: Option<PathBuf>,
    pub rom: Option<PathBuf>,
    pub dd_rom: Option<PathBuf>,
    pub disk: Option<PathBuf>,
    pub save_path: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            cpu_mode: CpuMode::default(),
            count_per_op: 2,
            count_per_op_denom_pot: 0,
            start_address: IPL3_ENTRY,
            dma_modifier: 1.0,
            si_dma_duration: DEFAULT_SI_DMA_DURATION,
            dram_size: RDRAM_MAX_SIZE,
            vi_clock: VI_CLOCK_NTSC,
            expected_refresh_rate: 60,
            save_type: SaveType::default(),
            eeprom_size: EepromType::Kbit4.size(),
            flashram_type: FlashramType::default(),
            af_rtc: false,
            pif_rom: None,
            rom: None,
            dd_rom: None,
            disk: None,
            save_path: None,
        }
    }
}

impl DeviceConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("parsing device config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("serializing device config")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dram_size == 0 {
            return Err(ConfigError::ZeroRdram);
        }
        if self.dram_size > RDRAM_MAX_SIZE {
            return Err(ConfigError::RdramTooLarge(self.dram_size, RDRAM_MAX_SIZE));
        }
        if self.dram_size % 4 != 0 {
            return Err(ConfigError::UnalignedRdram(self.dram_size));
        }
        if self.count_per_op == 0 {
            return Err(ConfigError::ZeroCountPerOp);
        }
        if self.vi_clock == 0 || self.expected_refresh_rate == 0 {
            return Err(ConfigError::ZeroViTiming);
        }
        self.eeprom_type()?;
        Ok(())
    }

    pub fn eeprom_type(&self) -> Result<EepromType, ConfigError> {
        EepromType::from_size(self.eeprom_size)
            .ok_or(ConfigError::UnknownEepromSize(self.eeprom_size))
    }

    /// Size and erased value of the save memory selected by `save_type`.
    pub fn save_geometry(&self) -> Option<(usize, u8)> {
        match self.save_type {
            SaveType::None => None,
            SaveType::Eeprom => Some((self.eeprom_type().map_or(0x200, |t| t.size()), 0xff)),
            SaveType::Sram => Some((SRAM_SIZE, 0)),
            SaveType::FlashRam => Some((FLASHRAM_SIZE, 0xff)),
        }
    }
}

/// Raw images the device is built from. Empty vectors stand for absent media.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaImages {
    pub pif_rom: Vec<u8>,
    pub rom: Vec<u8>,
    pub dd_rom: Vec<u8>,
    pub disk: Option<Vec<u8>>,
}

/// Reads one image, or nothing when no path is configured.
fn read_image(path: &Option<PathBuf>, name: &'static str, max: usize) -> anyhow::Result<Vec<u8>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let data =
        fs::read(path).with_context(|| format!("reading {} image {}", name, path.display()))?;
    if data.len() > max {
        return Err(ConfigError::ImageTooLarge {
            name,
            size: data.len(),
            max,
        })
        .with_context(|| format!("loading {}", path.display()));
    }
    tracing::info!("[CONFIG] {} image {} ({} bytes)", name, path.display(), data.len());
    Ok(data)
}

impl MediaImages {
    /// Reads every image named by `config`.
    pub fn load(config: &DeviceConfig) -> anyhow::Result<Self> {
        let images = Self {
            pif_rom: read_image(&config.pif_rom, "PIF ROM", PIF_ROM_SIZE)?,
            rom: read_image(&config.rom, "cartridge ROM", CART_ROM_MAX_SIZE)?,
            dd_rom: read_image(&config.dd_rom, "disk drive ROM", DD_ROM_MAX_SIZE)?,
            disk: match &config.disk {
                Some(_) => Some(read_image(&config.disk, "disk", DISK_MAX_SIZE)?),
                None => None,
            },
        };
        Ok(images)
    }
}

/// Host side collaborators plugged into the device at init.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Backends {
    #[derivative(Debug = "ignore")]
    pub core: Box<dyn ExecutionCore>,
    #[derivative(Debug = "ignore")]
    pub audio: Box<dyn AudioOut>,
    #[derivative(Debug = "ignore")]
    pub controllers: [Option<Box<dyn JoybusDevice>>; GAME_CONTROLLERS_COUNT],
    #[derivative(Debug = "ignore")]
    pub save: Option<Box<dyn StorageBackend>>,
    #[derivative(Debug = "ignore")]
    pub disk: Option<Box<dyn StorageBackend>>,
    #[derivative(Debug = "ignore")]
    pub cart_clock: Box<dyn ClockBackend>,
    #[derivative(Debug = "ignore")]
    pub dd_clock: Box<dyn ClockBackend>,
}

impl Default for Backends {
    /// A headless console: idle CPU, silent audio and one controller with
    /// nothing pressed.
    fn default() -> Self {
        let mut controllers: [Option<Box<dyn JoybusDevice>>; GAME_CONTROLLERS_COUNT] =
            std::array::from_fn(|_| None);
        controllers[0] = Some(Box::new(Controller::new(Box::new(NoInput), Pak::None)));
        Self {
            core: Box::<IdleCore>::default(),
            audio: Box::new(NullAudio),
            controllers,
            save: None,
            disk: None,
            cart_clock: Box::new(SystemClock),
            dd_clock: Box::new(SystemClock),
        }
    }
}

impl Backends {
    /// Default backends with the save memory mirrored to `config.save_path`.
    pub fn for_config(config: &DeviceConfig) -> anyhow::Result<Self> {
        let mut backends = Self::default();
        if let (Some(path), Some((size, fill))) = (&config.save_path, config.save_geometry()) {
            backends.save = Some(Box::new(FileStorage::open(path, size, fill)?));
        }
        Ok(backends)
    }

    pub fn with_core(mut self, core: Box<dyn ExecutionCore>) -> Self {
        self.core = core;
        self
    }

    pub fn with_controller(mut self, channel: usize, device: Box<dyn JoybusDevice>) -> Self {
        self.controllers[channel] = Some(device);
        self
    }

    pub fn with_save(mut self, save: Box<dyn StorageBackend>) -> Self {
        self.save = Some(save);
        self
    }
}

/// Builds the cartridge save hardware selected by `config`, on top of `save`
/// or a session-only memory when none is given.
pub(crate) fn build_cartridge(
    config: &DeviceConfig,
    save: Option<Box<dyn StorageBackend>>,
    clock: Box<dyn ClockBackend>,
) -> Cartridge {
    let storage = |size: usize, fill: u8, save: Option<Box<dyn StorageBackend>>| {
        save.unwrap_or_else(|| {
            Box::new(MemoryStorage::with_fill(size, fill)) as Box<dyn StorageBackend>
        })
    };
    let eeprom_type = config.eeprom_type().unwrap_or_default();

    let (dom2, eeprom) = match config.save_type {
        SaveType::None => (Dom2Save::Sram(storage(SRAM_SIZE, 0, None)), None),
        SaveType::Eeprom => (
            Dom2Save::Sram(storage(SRAM_SIZE, 0, None)),
            Some(Eeprom::new(eeprom_type, storage(eeprom_type.size(), 0xff, save))),
        ),
        SaveType::Sram => (Dom2Save::Sram(storage(SRAM_SIZE, 0, save)), None),
        SaveType::FlashRam => (
            Dom2Save::FlashRam(FlashRam::new(
                config.flashram_type,
                storage(FLASHRAM_SIZE, 0xff, save),
            )),
            None,
        ),
    };
    let af_rtc = config.af_rtc.then(|| AfRtc::new(clock));
    tracing::debug!(
        "[CONFIG] cartridge save {:?}, af-rtc {}",
        config.save_type,
        config.af_rtc
    );
    Cartridge::new(dom2, eeprom, af_rtc)
}
