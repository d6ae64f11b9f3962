use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    joybus::{
        JoybusDevice, JCMD_AF_RTC_READ, JCMD_AF_RTC_STATUS, JCMD_AF_RTC_WRITE,
        JCMD_EEPROM_READ, JCMD_EEPROM_WRITE, JCMD_RESET, JCMD_STATUS,
    },
    memory_map::{read_open_bus, MM_CART_ROM, MM_DOM2_ADDR2},
    mmio::{read_be_word, write_be_word},
    rdram::Rdram,
    storage::{to_bcd, ClockBackend, StorageBackend},
};

/// Offset of the header media format byte
pub const CART_MEDIA_BYTE: usize = 0x3b;
pub const CART_MEDIA_COMBO: u8 = b'C';

pub const SRAM_SIZE: usize = 0x8000;
pub const FLASHRAM_SIZE: usize = 0x20000;
const FLASHRAM_PAGE_SIZE: usize = 0x80;
const FLASHRAM_SECTOR_SIZE: usize = 0x4000;
const FLASHRAM_SILICON_ID: u32 = 0x1111_8001;

const EEPROM_BLOCK_SIZE: usize = 8;

/// Cartridge ROM with the write latch real carts exhibit.
#[derive(Debug, Clone, Default)]
pub struct CartRom {
    rom: Vec<u8>,
    last_write: u32,
    rom_written: bool,
}

impl CartRom {
    pub fn new(rom: Vec<u8>) -> Self {
        Self {
            rom,
            ..Default::default()
        }
    }

    pub fn poweron(&mut self) {
        self.last_write = 0;
        self.rom_written = false;
    }

    pub fn size(&self) -> usize {
        self.rom.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.rom
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.rom.as_mut_ptr()
    }

    /// Header media byte; `C` marks a cartridge that pairs with a disk.
    pub fn media_byte(&self) -> Option<u8> {
        self.rom.get(CART_MEDIA_BYTE).copied()
    }

    pub fn read_rom(&mut self, address: u32) -> u32 {
        // the first read after a write returns the written value
        if std::mem::take(&mut self.rom_written) {
            return self.last_write;
        }
        let offset = (address.wrapping_sub(MM_CART_ROM) & 0x03ff_fffc) as usize;
        read_be_word(&self.rom, offset)
    }

    pub fn write_rom(&mut self, address: u32, value: u32, mask: u32) {
        tracing::trace!("[CART] ROM write {:#010X} = {:08X}", address, value);
        self.last_write = value & mask;
        self.rom_written = true;
    }

    pub fn dma_read(
        &mut self,
        _rdram: &mut Rdram,
        _dram_addr: u32,
        cart_addr: u32,
        length: u32,
    ) -> u32 {
        tracing::warn!("[CART] DMA write to ROM at {:#010X} ignored", cart_addr);
        length
    }

    pub fn dma_write(
        &mut self,
        rdram: &mut Rdram,
        dram_addr: u32,
        cart_addr: u32,
        length: u32,
    ) -> u32 {
        let offset = (cart_addr.wrapping_sub(MM_CART_ROM) & 0x03ff_ffff) as usize;
        let end = (offset + length as usize).min(self.rom.len());
        if let Some(data) = self.rom.get(offset..end) {
            rdram.write_bytes(dram_addr, data);
        }
        length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EepromType {
    #[default]
    Kbit4,
    Kbit16,
}

impl EepromType {
    pub fn from_size(size: usize) -> Option<Self> {
        match size {
            0x200 => Some(EepromType::Kbit4),
            0x800 => Some(EepromType::Kbit16),
            _ => None,
        }
    }

    pub fn size(self) -> usize {
        match self {
            EepromType::Kbit4 => 0x200,
            EepromType::Kbit16 => 0x800,
        }
    }

    fn id(self) -> u16 {
        match self {
            EepromType::Kbit4 => 0x8000,
            EepromType::Kbit16 => 0xc000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashramType {
    Mx29l0000,
    #[default]
    Mx29l1100,
    Mx29l1101,
    Mn63f81mpn,
}

impl FlashramType {
    fn id(self) -> u32 {
        match self {
            FlashramType::Mx29l0000 => 0x00c2_0000,
            FlashramType::Mx29l1100 => 0x00c2_001e,
            FlashramType::Mx29l1101 => 0x00c2_001d,
            FlashramType::Mn63f81mpn => 0x0032_00f1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveType {
    None,
    #[default]
    Eeprom,
    Sram,
    FlashRam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlashMode {
    ReadArray,
    ReadSiliconId,
    Status,
    SectorErase,
    ChipErase,
    PageProgram,
}

/// Flash save memory behind a command/status register pair.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FlashRam {
    kind: FlashramType,
    mode: FlashMode,
    status: u32,
    erase_page: usize,
    program_page: usize,
    page_buf: [u8; FLASHRAM_PAGE_SIZE],
    #[derivative(Debug = "ignore")]
    storage: Box<dyn StorageBackend>,
}

impl FlashRam {
    pub fn new(kind: FlashramType, storage: Box<dyn StorageBackend>) -> Self {
        Self {
            kind,
            mode: FlashMode::ReadArray,
            status: 0,
            erase_page: 0,
            program_page: 0,
            page_buf: [0xff; FLASHRAM_PAGE_SIZE],
            storage,
        }
    }

    fn poweron(&mut self) {
        self.mode = FlashMode::ReadArray;
        self.status = 0;
    }

    fn silicon_id(&self) -> u64 {
        ((FLASHRAM_SILICON_ID as u64) << 32) | self.kind.id() as u64
    }

    fn command(&mut self, command: u32) {
        match command >> 24 {
            0x4b => {
                self.mode = FlashMode::SectorErase;
                self.erase_page = (command & 0xff80) as usize;
            }
            0x3c => self.mode = FlashMode::ChipErase,
            0x78 => {
                self.status = (self.status & !0xff) | 0x08;
            }
            0xa5 => {
                self.program_page = (command & 0xffff) as usize;
                self.status = (self.status & !0xff) | 0x04;
            }
            0xb4 => self.mode = FlashMode::PageProgram,
            0xd2 => self.execute(),
            0xe1 => {
                self.mode = FlashMode::Status;
                self.status |= 0x01;
            }
            0xf0 => {
                self.mode = FlashMode::ReadArray;
                self.status = 0;
            }
            0x99 => self.mode = FlashMode::ReadSiliconId,
            other => tracing::warn!("[FLASHRAM] unknown command {:02X}", other),
        }
    }

    fn execute(&mut self) {
        let data = self.storage.data_mut();
        match self.mode {
            FlashMode::SectorErase => {
                let start = self.erase_page * FLASHRAM_PAGE_SIZE;
                let end = (start + FLASHRAM_SECTOR_SIZE).min(data.len());
                if start < end {
                    data[start..end].fill(0xff);
                }
            }
            FlashMode::ChipErase => data.fill(0xff),
            FlashMode::PageProgram => {
                let start = self.program_page * FLASHRAM_PAGE_SIZE;
                if let Some(dst) = data.get_mut(start..start + FLASHRAM_PAGE_SIZE) {
                    dst.copy_from_slice(&self.page_buf);
                }
            }
            mode => tracing::warn!("[FLASHRAM] execute in {:?} mode", mode),
        }
        if let Err(err) = self.storage.save() {
            tracing::warn!("[FLASHRAM] save failed: {:#}", err);
        }
    }

    fn read_status(&self) -> u32 {
        self.status
    }

    fn dma_to_dram(&mut self, rdram: &mut Rdram, dram_addr: u32, cart_addr: u32, length: u32) {
        match self.mode {
            FlashMode::Status | FlashMode::ReadSiliconId => {
                let id = self.silicon_id().to_be_bytes();
                let bytes = if self.mode == FlashMode::Status {
                    [
                        0,
                        0,
                        0,
                        0,
                        (self.status >> 24) as u8,
                        (self.status >> 16) as u8,
                        (self.status >> 8) as u8,
                        self.status as u8,
                    ]
                } else {
                    id
                };
                rdram.write_bytes(dram_addr, &bytes[..(length as usize).min(8)]);
            }
            FlashMode::ReadArray => {
                // the flash array is addressed by halfwords
                let offset = ((cart_addr.wrapping_sub(MM_DOM2_ADDR2) & 0x1ffff) * 2) as usize;
                let data = self.storage.data();
                let end = (offset + length as usize).min(data.len());
                if offset < end {
                    rdram.write_bytes(dram_addr, &data[offset..end]);
                }
            }
            mode => tracing::warn!("[FLASHRAM] DMA read in {:?} mode", mode),
        }
    }

    fn dma_from_dram(&mut self, rdram: &Rdram, dram_addr: u32, length: u32) {
        if self.mode == FlashMode::PageProgram {
            let len = (length as usize).min(FLASHRAM_PAGE_SIZE);
            self.page_buf[..len].copy_from_slice(&rdram.read_bytes(dram_addr, len));
        } else {
            tracing::warn!("[FLASHRAM] DMA write in {:?} mode", self.mode);
        }
    }
}

/// Serial EEPROM answering on the cartridge joybus channel.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Eeprom {
    kind: EepromType,
    #[derivative(Debug = "ignore")]
    storage: Box<dyn StorageBackend>,
}

impl Eeprom {
    pub fn new(kind: EepromType, storage: Box<dyn StorageBackend>) -> Self {
        Self { kind, storage }
    }

    fn process(&mut self, tx: &[u8], rx: &mut [u8]) -> bool {
        match tx.first().copied() {
            Some(JCMD_STATUS | JCMD_RESET) if rx.len() >= 3 => {
                rx[..2].copy_from_slice(&self.kind.id().to_be_bytes());
                rx[2] = 0;
                true
            }
            Some(JCMD_EEPROM_READ) if tx.len() >= 2 && rx.len() >= EEPROM_BLOCK_SIZE => {
                let offset = tx[1] as usize * EEPROM_BLOCK_SIZE;
                let data = self.storage.data();
                for (i, byte) in rx[..EEPROM_BLOCK_SIZE].iter_mut().enumerate() {
                    *byte = data.get(offset + i).copied().unwrap_or(0xff);
                }
                true
            }
            Some(JCMD_EEPROM_WRITE) if tx.len() >= 2 + EEPROM_BLOCK_SIZE => {
                let offset = tx[1] as usize * EEPROM_BLOCK_SIZE;
                if let Some(dst) = self
                    .storage
                    .data_mut()
                    .get_mut(offset..offset + EEPROM_BLOCK_SIZE)
                {
                    dst.copy_from_slice(&tx[2..2 + EEPROM_BLOCK_SIZE]);
                }
                if let Err(err) = self.storage.save() {
                    tracing::warn!("[EEPROM] save failed: {:#}", err);
                }
                if let Some(status) = rx.first_mut() {
                    *status = 0;
                }
                true
            }
            _ => false,
        }
    }
}

/// Real-time clock found on a few cartridges, sharing the EEPROM channel.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct AfRtc {
    control: u16,
    #[derivative(Debug = "ignore")]
    clock: Box<dyn ClockBackend>,
}

impl AfRtc {
    pub fn new(clock: Box<dyn ClockBackend>) -> Self {
        Self {
            control: 0x0200,
            clock,
        }
    }

    fn poweron(&mut self) {
        self.control = 0x0200;
    }

    fn process(&mut self, tx: &[u8], rx: &mut [u8]) -> bool {
        match tx.first().copied() {
            Some(JCMD_AF_RTC_STATUS) if rx.len() >= 3 => {
                rx[..3].copy_from_slice(&[0x00, 0x10, 0x00]);
                true
            }
            Some(JCMD_AF_RTC_READ) if tx.len() >= 2 && rx.len() >= 9 => {
                match tx[1] {
                    0 => {
                        rx[..2].copy_from_slice(&self.control.to_le_bytes());
                        rx[2..8].fill(0);
                    }
                    2 => {
                        let now = self.clock.now();
                        rx[0] = to_bcd(now.second());
                        rx[1] = to_bcd(now.minute());
                        rx[2] = to_bcd(now.hour()) | 0x80;
                        rx[3] = to_bcd(now.day());
                        rx[4] = now.weekday().number_days_from_sunday();
                        rx[5] = to_bcd(now.month() as u8);
                        rx[6] = to_bcd(now.year().rem_euclid(100) as u8);
                        rx[7] = ((now.year() - 1900) / 100) as u8;
                    }
                    block => {
                        tracing::warn!("[AF-RTC] read of block {}", block);
                        rx[..8].fill(0);
                    }
                }
                rx[8] = 0;
                true
            }
            Some(JCMD_AF_RTC_WRITE) if tx.len() >= 10 && !rx.is_empty() => {
                if tx[1] == 0 {
                    self.control = u16::from_le_bytes([tx[2], tx[3]]);
                }
                rx[0] = 0;
                true
            }
            _ => false,
        }
    }
}

/// Save memory on the second PI domain.
#[derive(Derivative)]
#[derivative(Debug)]
pub enum Dom2Save {
    Sram(#[derivative(Debug = "ignore")] Box<dyn StorageBackend>),
    FlashRam(FlashRam),
}

/// Everything on the cartridge besides its ROM: save memories and the
/// joybus endpoint.
#[derive(Debug)]
pub struct Cartridge {
    dom2: Dom2Save,
    eeprom: Option<Eeprom>,
    af_rtc: Option<AfRtc>,
}

impl Cartridge {
    pub fn new(dom2: Dom2Save, eeprom: Option<Eeprom>, af_rtc: Option<AfRtc>) -> Self {
        Self {
            dom2,
            eeprom,
            af_rtc,
        }
    }

    pub fn poweron(&mut self) {
        if let Dom2Save::FlashRam(flash) = &mut self.dom2 {
            flash.poweron();
        }
        if let Some(rtc) = &mut self.af_rtc {
            rtc.poweron();
        }
    }

    /// Host buffer behind the dom2 window: the SRAM, or the FlashRAM array.
    pub fn save_as_mut_ptr(&mut self) -> (*mut u8, usize) {
        let data = match &mut self.dom2 {
            Dom2Save::Sram(sram) => sram.data_mut(),
            Dom2Save::FlashRam(flash) => flash.storage.data_mut(),
        };
        (data.as_mut_ptr(), data.len())
    }

    fn sram_offset(address: u32) -> usize {
        (address.wrapping_sub(MM_DOM2_ADDR2) & (SRAM_SIZE as u32 - 1)) as usize
    }

    pub fn read_dom2(&mut self, address: u32) -> u32 {
        match &self.dom2 {
            Dom2Save::Sram(sram) => read_be_word(sram.data(), Self::sram_offset(address) & !3),
            Dom2Save::FlashRam(flash) => {
                if address & 0x1ffff == 0 {
                    flash.read_status()
                } else {
                    read_open_bus(address)
                }
            }
        }
    }

    pub fn write_dom2(&mut self, address: u32, value: u32, mask: u32) {
        match &mut self.dom2 {
            Dom2Save::Sram(sram) => {
                write_be_word(sram.data_mut(), Self::sram_offset(address) & !3, value, mask);
            }
            Dom2Save::FlashRam(flash) => {
                if address & 0x1ffff == 0x10000 {
                    flash.command(value & mask);
                }
            }
        }
    }

    pub fn dom2_dma_read(
        &mut self,
        rdram: &mut Rdram,
        dram_addr: u32,
        cart_addr: u32,
        length: u32,
    ) -> u32 {
        match &mut self.dom2 {
            Dom2Save::Sram(sram) => {
                let offset = Self::sram_offset(cart_addr);
                let end = (offset + length as usize).min(SRAM_SIZE).min(sram.data().len());
                if offset < end {
                    let data = rdram.read_bytes(dram_addr, end - offset);
                    sram.data_mut()[offset..end].copy_from_slice(&data);
                }
                if let Err(err) = sram.save() {
                    tracing::warn!("[SRAM] save failed: {:#}", err);
                }
            }
            Dom2Save::FlashRam(flash) => flash.dma_from_dram(rdram, dram_addr, length),
        }
        length
    }

    pub fn dom2_dma_write(
        &mut self,
        rdram: &mut Rdram,
        dram_addr: u32,
        cart_addr: u32,
        length: u32,
    ) -> u32 {
        match &mut self.dom2 {
            Dom2Save::Sram(sram) => {
                let offset = Self::sram_offset(cart_addr);
                let data = sram.data();
                let end = (offset + length as usize).min(data.len());
                if offset < end {
                    rdram.write_bytes(dram_addr, &data[offset..end]);
                }
            }
            Dom2Save::FlashRam(flash) => flash.dma_to_dram(rdram, dram_addr, cart_addr, length),
        }
        length
    }

    pub fn dom3_dma_read(
        &mut self,
        _rdram: &mut Rdram,
        _dram_addr: u32,
        cart_addr: u32,
        length: u32,
    ) -> u32 {
        tracing::debug!("[CART] DMA to dom3 {:#010X} ignored", cart_addr);
        length
    }

    /// Nothing drives dom3: the transfer picks up the floating bus.
    pub fn dom3_dma_write(
        &mut self,
        rdram: &mut Rdram,
        dram_addr: u32,
        cart_addr: u32,
        length: u32,
    ) -> u32 {
        for i in (0..length).step_by(4) {
            let word = read_open_bus(cart_addr.wrapping_add(i)).to_be_bytes();
            let n = (length - i).min(4) as usize;
            rdram.write_bytes(dram_addr.wrapping_add(i), &word[..n]);
        }
        length
    }

    pub fn process_joybus(&mut self, tx: &[u8], rx: &mut [u8]) -> bool {
        if let Some(eeprom) = &mut self.eeprom {
            if eeprom.process(tx, rx) {
                return true;
            }
        }
        match &mut self.af_rtc {
            Some(rtc) => rtc.process(tx, rx),
            None => false,
        }
    }
}

/// Plugs the cartridge into its PIF channel without owning it.
#[derive(Debug, Clone)]
pub struct CartJoybus(Weak<RefCell<Cartridge>>);

impl CartJoybus {
    pub fn new(cart: &Rc<RefCell<Cartridge>>) -> Self {
        Self(Rc::downgrade(cart))
    }
}

impl JoybusDevice for CartJoybus {
    fn process(&mut self, tx: &[u8], rx: &mut [u8]) -> bool {
        match self.0.upgrade() {
            Some(cart) => cart.borrow_mut().process_joybus(tx, rx),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::storage::{FixedClock, MemoryStorage};

    fn sram_cart() -> Cartridge {
        Cartridge::new(Dom2Save::Sram(Box::new(MemoryStorage::new(SRAM_SIZE))), None, None)
    }

    #[test]
    fn test_rom_read_and_write_latch() {
        let mut rom = CartRom::new(vec![0x80, 0x37, 0x12, 0x40, 0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(rom.read_rom(0x1000_0004), 0xAABB_CCDD);

        rom.write_rom(0x1000_0000, 0x1234_5678, 0xffff_ffff);
        assert_eq!(rom.read_rom(0x1000_0000), 0x1234_5678);
        assert_eq!(rom.read_rom(0x1000_0000), 0x8037_1240);
    }

    #[test]
    fn test_rom_dma_clips_at_end() {
        let mut rom = CartRom::new(vec![1, 2, 3, 4]);
        let mut rdram = Rdram::new(0x100);
        assert_eq!(rom.dma_write(&mut rdram, 0x10, 0x1000_0002, 8), 8);
        assert_eq!(rdram.read_bytes(0x10, 3), vec![3, 4, 0]);
    }

    #[test]
    fn test_media_byte() {
        let mut image = vec![0u8; 0x40];
        image[CART_MEDIA_BYTE] = b'C';
        assert_eq!(CartRom::new(image).media_byte(), Some(CART_MEDIA_COMBO));
        assert_eq!(CartRom::new(Vec::new()).media_byte(), None);
    }

    #[test]
    fn test_sram_word_and_dma() {
        let mut cart = sram_cart();
        cart.write_dom2(0x0800_0010, 0xCAFE_BABE, 0xffff_ffff);
        assert_eq!(cart.read_dom2(0x0800_0010), 0xCAFE_BABE);

        let mut rdram = Rdram::new(0x100);
        cart.dom2_dma_write(&mut rdram, 0x20, 0x0800_0010, 4);
        assert_eq!(rdram.read_dram(0x20), 0xCAFE_BABE);

        rdram.write_dram(0x40, 0x0102_0304, 0xffff_ffff);
        cart.dom2_dma_read(&mut rdram, 0x40, 0x0800_0100, 4);
        assert_eq!(cart.read_dom2(0x0800_0100), 0x0102_0304);
    }

    #[test]
    fn test_save_buffer_exposed_for_host() {
        let mut cart = sram_cart();
        cart.write_dom2(0x0800_0010, 0xCAFE_BABE, 0xffff_ffff);
        let (ptr, len) = cart.save_as_mut_ptr();
        assert_eq!(len, SRAM_SIZE);
        assert_eq!(unsafe { *ptr.add(0x10) }, 0xCA);

        let flash = FlashRam::new(
            FlashramType::Mx29l1100,
            Box::new(MemoryStorage::with_fill(FLASHRAM_SIZE, 0xff)),
        );
        let mut cart = Cartridge::new(Dom2Save::FlashRam(flash), None, None);
        let (ptr, len) = cart.save_as_mut_ptr();
        assert_eq!(len, FLASHRAM_SIZE);
        assert_eq!(unsafe { *ptr }, 0xff);
    }

    #[test]
    fn test_flashram_program_and_status() {
        let flash = FlashRam::new(
            FlashramType::Mx29l1100,
            Box::new(MemoryStorage::with_fill(FLASHRAM_SIZE, 0xff)),
        );
        let mut cart = Cartridge::new(Dom2Save::FlashRam(flash), None, None);
        let mut rdram = Rdram::new(0x400);
        rdram.write_bytes(0x100, &[0x5a; FLASHRAM_PAGE_SIZE]);

        // load the page buffer, then program page 1
        cart.write_dom2(0x0801_0000, 0xb400_0000, 0xffff_ffff);
        cart.dom2_dma_read(&mut rdram, 0x100, 0x0800_0000, FLASHRAM_PAGE_SIZE as u32);
        cart.write_dom2(0x0801_0000, 0xa500_0001, 0xffff_ffff);
        cart.write_dom2(0x0801_0000, 0xd200_0000, 0xffff_ffff);

        cart.write_dom2(0x0801_0000, 0xf000_0000, 0xffff_ffff);
        cart.dom2_dma_write(&mut rdram, 0x200, 0x0800_0040, 4);
        assert_eq!(rdram.read_bytes(0x200, 4), vec![0x5a; 4]);

        cart.write_dom2(0x0801_0000, 0xe100_0000, 0xffff_ffff);
        assert_eq!(cart.read_dom2(0x0800_0000) & 0x01, 0x01);
    }

    #[test]
    fn test_eeprom_over_joybus() {
        let eeprom = Eeprom::new(EepromType::Kbit16, Box::new(MemoryStorage::new(0x800)));
        let cart = Rc::new(RefCell::new(Cartridge::new(
            Dom2Save::Sram(Box::new(MemoryStorage::new(SRAM_SIZE))),
            Some(eeprom),
            None,
        )));
        let mut endpoint = CartJoybus::new(&cart);

        let mut rx = [0u8; 3];
        assert!(endpoint.process(&[JCMD_STATUS], &mut rx));
        assert_eq!(rx, [0xc0, 0x00, 0x00]);

        let tx = [JCMD_EEPROM_WRITE, 3, 1, 2, 3, 4, 5, 6, 7, 8];
        let mut rx = [0xffu8; 1];
        assert!(endpoint.process(&tx, &mut rx));
        assert_eq!(rx[0], 0);

        let mut rx = [0u8; 8];
        assert!(endpoint.process(&[JCMD_EEPROM_READ, 3], &mut rx));
        assert_eq!(rx, [1, 2, 3, 4, 5, 6, 7, 8]);

        assert!(!endpoint.process(&[JCMD_AF_RTC_STATUS], &mut [0u8; 3]));
    }

    #[test]
    fn test_af_rtc_time_block() {
        let rtc = AfRtc::new(Box::new(FixedClock(datetime!(2001-03-21 12:34:56 UTC))));
        let mut cart = Cartridge::new(
            Dom2Save::Sram(Box::new(MemoryStorage::new(SRAM_SIZE))),
            None,
            Some(rtc),
        );
        let mut rx = [0u8; 9];
        assert!(cart.process_joybus(&[JCMD_AF_RTC_READ, 2], &mut rx));
        assert_eq!(rx, [0x56, 0x34, 0x92, 0x21, 3, 0x03, 0x01, 1, 0]);
    }

    #[test]
    fn test_dom3_dma_reads_floating_bus() {
        let mut cart = sram_cart();
        let mut rdram = Rdram::new(0x100);
        cart.dom3_dma_write(&mut rdram, 0, 0x1fd0_1234, 4);
        assert_eq!(rdram.read_dram(0), 0x1234_1234);
    }
}
