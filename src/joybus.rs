use derivative::Derivative;

pub const JCMD_STATUS: u8 = 0x00;
pub const JCMD_CONTROLLER_READ: u8 = 0x01;
pub const JCMD_PAK_READ: u8 = 0x02;
pub const JCMD_PAK_WRITE: u8 = 0x03;
pub const JCMD_EEPROM_READ: u8 = 0x04;
pub const JCMD_EEPROM_WRITE: u8 = 0x05;
pub const JCMD_AF_RTC_STATUS: u8 = 0x06;
pub const JCMD_AF_RTC_READ: u8 = 0x07;
pub const JCMD_AF_RTC_WRITE: u8 = 0x08;
pub const JCMD_RESET: u8 = 0xff;

pub const JDT_JOY_ABS_COUNTERS: u16 = 0x0500;
pub const JDT_JOY_REL_COUNTERS: u16 = 0x0200;

const PAK_CHUNK_SIZE: usize = 0x20;
pub const MEMPAK_SIZE: usize = 0x8000;

/// Optional power-on capability of a joybus device.
pub trait PowerOnHook {
    fn poweron(&mut self);
}

/// A device answering joybus command frames on one PIF channel.
pub trait JoybusDevice {
    /// Handles one frame. Returns false when nothing answered, which the PIF
    /// reports as "no device" in the rx length byte.
    fn process(&mut self, tx: &[u8], rx: &mut [u8]) -> bool;

    fn poweron_hook(&mut self) -> Option<&mut dyn PowerOnHook> {
        None
    }
}

/// Host side source of controller state, as the 32-bit button/stick word
/// `buttons << 16 | x << 8 | y`.
pub trait InputBackend {
    fn poll(&mut self) -> u32;
}

/// Reports nothing pressed.
#[derive(Debug, Default)]
pub struct NoInput;

impl InputBackend for NoInput {
    fn poll(&mut self) -> u32 {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pak {
    None,
    Mem(Vec<u8>),
    Rumble { rumbling: bool },
}

impl Pak {
    pub fn mempak() -> Self {
        Pak::Mem(vec![0; MEMPAK_SIZE])
    }

    fn status(&self) -> u8 {
        match self {
            Pak::None => 0x02,
            _ => 0x01,
        }
    }
}

/// CRC of a pak data chunk, as returned after every pak read and write.
pub fn pak_data_crc(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for i in 0..=data.len() {
        for bit in (0..8).rev() {
            let xor_tap = if crc & 0x80 != 0 { 0x85 } else { 0x00 };
            crc <<= 1;
            if i < data.len() && data[i] & (1 << bit) != 0 {
                crc |= 1;
            }
            crc ^= xor_tap;
        }
    }
    crc
}

/// A standard controller with an optional accessory pak.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Controller {
    #[derivative(Debug = "ignore")]
    input: Box<dyn InputBackend>,
    pak: Pak,
}

impl Controller {
    pub fn new(input: Box<dyn InputBackend>, pak: Pak) -> Self {
        Self { input, pak }
    }

    pub fn pak(&self) -> &Pak {
        &self.pak
    }

    fn pak_read(&mut self, address: u16, data: &mut [u8]) {
        let offset = (address & 0xffe0) as usize;
        match &self.pak {
            Pak::Mem(mem) => {
                for (i, byte) in data.iter_mut().enumerate() {
                    *byte = mem.get(offset + i).copied().unwrap_or(0);
                }
            }
            Pak::Rumble { .. } if (0x8000..0x9000).contains(&offset) => data.fill(0x80),
            _ => data.fill(0),
        }
    }

    fn pak_write(&mut self, address: u16, data: &[u8]) {
        let offset = (address & 0xffe0) as usize;
        match &mut self.pak {
            Pak::Mem(mem) => {
                for (i, byte) in data.iter().enumerate() {
                    if let Some(dst) = mem.get_mut(offset + i) {
                        *dst = *byte;
                    }
                }
            }
            Pak::Rumble { rumbling } if offset == 0xc000 => {
                *rumbling = data[0] & 1 != 0;
                tracing::trace!("[JOYBUS] rumble {}", rumbling);
            }
            _ => {}
        }
    }
}

impl JoybusDevice for Controller {
    fn process(&mut self, tx: &[u8], rx: &mut [u8]) -> bool {
        let Some(&cmd) = tx.first() else {
            return false;
        };
        match cmd {
            JCMD_STATUS | JCMD_RESET if rx.len() >= 3 => {
                rx[..2].copy_from_slice(&JDT_JOY_ABS_COUNTERS.to_be_bytes());
                rx[2] = self.pak.status();
            }
            JCMD_CONTROLLER_READ if rx.len() >= 4 => {
                rx[..4].copy_from_slice(&self.input.poll().to_be_bytes());
            }
            JCMD_PAK_READ if tx.len() >= 3 && rx.len() > PAK_CHUNK_SIZE => {
                let address = u16::from_be_bytes([tx[1], tx[2]]);
                self.pak_read(address, &mut rx[..PAK_CHUNK_SIZE]);
                rx[PAK_CHUNK_SIZE] = pak_data_crc(&rx[..PAK_CHUNK_SIZE]);
            }
            JCMD_PAK_WRITE if tx.len() >= 3 + PAK_CHUNK_SIZE && !rx.is_empty() => {
                let address = u16::from_be_bytes([tx[1], tx[2]]);
                let data = &tx[3..3 + PAK_CHUNK_SIZE];
                self.pak_write(address, data);
                rx[0] = pak_data_crc(data);
            }
            _ => {
                tracing::warn!("[JOYBUS] unsupported controller command {:02X}", cmd);
            }
        }
        true
    }

    fn poweron_hook(&mut self) -> Option<&mut dyn PowerOnHook> {
        Some(self)
    }
}

impl PowerOnHook for Controller {
    fn poweron(&mut self) {
        if let Pak::Rumble { rumbling } = &mut self.pak {
            *rumbling = false;
        }
    }
}

/// A mouse: relative counters and no accessory slot.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Mouse {
    #[derivative(Debug = "ignore")]
    input: Box<dyn InputBackend>,
}

impl Mouse {
    pub fn new(input: Box<dyn InputBackend>) -> Self {
        Self { input }
    }
}

impl JoybusDevice for Mouse {
    fn process(&mut self, tx: &[u8], rx: &mut [u8]) -> bool {
        match tx.first().copied() {
            Some(JCMD_STATUS | JCMD_RESET) if rx.len() >= 3 => {
                rx[..2].copy_from_slice(&JDT_JOY_REL_COUNTERS.to_be_bytes());
                rx[2] = 0;
                true
            }
            Some(JCMD_CONTROLLER_READ) if rx.len() >= 4 => {
                rx[..4].copy_from_slice(&self.input.poll().to_be_bytes());
                true
            }
            _ => false,
        }
    }
}
