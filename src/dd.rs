use std::{cell::RefCell, rc::Weak};

use derivative::Derivative;

use crate::{
    cpu::{Cp0, CP0_CAUSE_IP3},
    interrupt::InterruptKind,
    memory_map::{read_open_bus, MM_DD_REGS, MM_DD_ROM},
    mmio::{read_be_word, write_be_word, RegisterBank},
    rdram::Rdram,
    storage::{to_bcd, ClockBackend, StorageBackend},
};

// ASIC register offsets within the register window
pub const ASIC_DATA: u32 = 0x500;
pub const ASIC_MISC_REG: u32 = 0x504;
pub const ASIC_CMD_STATUS: u32 = 0x508;
pub const ASIC_CUR_TK: u32 = 0x50c;
pub const ASIC_BM_STATUS_CTL: u32 = 0x510;
pub const ASIC_ERR_SECTOR: u32 = 0x514;
pub const ASIC_SEQ_STATUS_CTL: u32 = 0x518;
pub const ASIC_CUR_SECTOR: u32 = 0x51c;
pub const ASIC_HARD_RESET: u32 = 0x520;
pub const ASIC_HOST_SECBYTE: u32 = 0x528;
pub const ASIC_SEC_BYTE: u32 = 0x530;
pub const ASIC_ID_REG: u32 = 0x540;
const ASIC_LAST_REG: u32 = 0x548;
pub const DD_ASIC_REGS_COUNT: usize = ((ASIC_LAST_REG - ASIC_DATA) / 4 + 1) as usize;

const C2_BUFFER: u32 = 0x000;
const C2_BUFFER_SIZE: usize = 0x400;
const SECTOR_BUFFER: u32 = 0x400;
const SECTOR_BUFFER_SIZE: usize = 0x100;

pub const DD_STATUS_DATA_RQ: u32 = 0x4000_0000;
pub const DD_STATUS_BM_INT: u32 = 0x0400_0000;
pub const DD_STATUS_MECHA_INT: u32 = 0x0200_0000;
pub const DD_STATUS_DISK_PRES: u32 = 0x0100_0000;
pub const DD_STATUS_RST_STATE: u32 = 0x0040_0000;
pub const DD_STATUS_MTR_N_SPIN: u32 = 0x0010_0000;
pub const DD_STATUS_DISK_CHNG: u32 = 0x0001_0000;

const DD_BM_CTL_START: u32 = 0x8000_0000;
const DD_BM_CTL_MNGRMODE: u32 = 0x4000_0000;
const DD_BM_CTL_RESET: u32 = 0x1000_0000;
const DD_BM_CTL_MECHA_RST: u32 = 0x0100_0000;

const DD_ASIC_ID: u32 = 0x0003_0000;
const SECTORS_PER_BLOCK: u32 = 85;

/// Cycles between a drive command and its completion interrupt
pub const DD_MECHA_DELAY: u64 = 10_000;
/// Cycles to move one sector through the buffer manager
pub const DD_BM_DELAY: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DdCommand {
    SeekRead,
    SeekWrite,
    Recalibrate,
    Sleep,
    Start,
    SetStandby,
    SetSleep,
    ClearDiskChange,
    ClearResetState,
    ReadVersion,
    SetDiskType,
    RequestStatus,
    Standby,
    IndexLockRetry,
    SetRtcYearMonth,
    SetRtcDayHour,
    SetRtcMinuteSecond,
    ReadRtcYearMonth,
    ReadRtcDayHour,
    ReadRtcMinuteSecond,
    Unknown(u32),
}

impl From<u32> for DdCommand {
    fn from(cmd: u32) -> Self {
        match cmd {
            0x01 => DdCommand::SeekRead,
            0x02 => DdCommand::SeekWrite,
            0x03 => DdCommand::Recalibrate,
            0x04 => DdCommand::Sleep,
            0x05 => DdCommand::Start,
            0x06 => DdCommand::SetStandby,
            0x07 => DdCommand::SetSleep,
            0x08 => DdCommand::ClearDiskChange,
            0x09 => DdCommand::ClearResetState,
            0x0a => DdCommand::ReadVersion,
            0x0b => DdCommand::SetDiskType,
            0x0c => DdCommand::RequestStatus,
            0x0d => DdCommand::Standby,
            0x0e => DdCommand::IndexLockRetry,
            0x0f => DdCommand::SetRtcYearMonth,
            0x10 => DdCommand::SetRtcDayHour,
            0x11 => DdCommand::SetRtcMinuteSecond,
            0x12 => DdCommand::ReadRtcYearMonth,
            0x13 => DdCommand::ReadRtcDayHour,
            0x14 => DdCommand::ReadRtcMinuteSecond,
            other => DdCommand::Unknown(other),
        }
    }
}

/// Calendar time latched by the drive, in BCD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtcLatch {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl RtcLatch {
    fn from_clock(clock: &dyn ClockBackend) -> Self {
        let now = clock.now();
        Self {
            year: to_bcd(now.year().rem_euclid(100) as u8),
            month: to_bcd(now.month() as u8),
            day: to_bcd(now.day()),
            hour: to_bcd(now.hour()),
            minute: to_bcd(now.minute()),
            second: to_bcd(now.second()),
        }
    }
}

/// 64DD disk drive: ASIC registers, IPL ROM, sector buffers and the RTC.
///
/// Disk images are addressed linearly by `(track, head, sector)`.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct DiskDrive {
    pub regs: RegisterBank<DD_ASIC_REGS_COUNT>,
    #[derivative(Debug = "ignore")]
    c2_buf: [u8; C2_BUFFER_SIZE],
    #[derivative(Debug = "ignore")]
    sector_buf: [u8; SECTOR_BUFFER_SIZE],
    #[derivative(Debug = "ignore")]
    rom: Vec<u8>,
    #[derivative(Debug = "ignore")]
    disk: Option<Box<dyn StorageBackend>>,
    #[derivative(Debug = "ignore")]
    clock: Box<dyn ClockBackend>,
    rtc: RtcLatch,
    bm_write: bool,
    cp0: Weak<RefCell<Cp0>>,
}

impl DiskDrive {
    pub fn new(
        rom: Vec<u8>,
        disk: Option<Box<dyn StorageBackend>>,
        clock: Box<dyn ClockBackend>,
        cp0: Weak<RefCell<Cp0>>,
    ) -> Self {
        Self {
            regs: RegisterBank::new(),
            c2_buf: [0; C2_BUFFER_SIZE],
            sector_buf: [0; SECTOR_BUFFER_SIZE],
            rom,
            disk,
            clock,
            rtc: RtcLatch::default(),
            bm_write: false,
            cp0,
        }
    }

    pub fn poweron(&mut self) {
        self.regs.clear();
        self.c2_buf.fill(0);
        self.sector_buf.fill(0);
        self.bm_write = false;
        self.rtc = RtcLatch::from_clock(self.clock.as_ref());
        self.regs.set(asic_index(ASIC_ID_REG), DD_ASIC_ID);

        let mut status = DD_STATUS_RST_STATE;
        if self.disk.is_some() {
            status |= DD_STATUS_DISK_PRES;
        }
        self.set_status(status);
    }

    pub fn rom_size(&self) -> usize {
        self.rom.len()
    }

    pub fn rom_as_mut_ptr(&mut self) -> *mut u8 {
        self.rom.as_mut_ptr()
    }

    pub fn rtc(&self) -> RtcLatch {
        self.rtc
    }

    pub fn has_disk(&self) -> bool {
        self.disk.is_some()
    }

    pub fn status(&self) -> u32 {
        self.regs.get(asic_index(ASIC_CMD_STATUS))
    }

    fn set_status(&mut self, status: u32) {
        self.regs.set(asic_index(ASIC_CMD_STATUS), status);
    }

    fn raise(&mut self, bits: u32) {
        self.set_status(self.status() | bits);
        if let Some(cp0) = self.cp0.upgrade() {
            cp0.borrow_mut().raise_interrupt(CP0_CAUSE_IP3);
        }
    }

    fn acknowledge(&mut self, bits: u32) {
        self.set_status(self.status() & !bits);
        if self.status() & (DD_STATUS_MECHA_INT | DD_STATUS_BM_INT) == 0 {
            if let Some(cp0) = self.cp0.upgrade() {
                cp0.borrow_mut().clear_interrupt(CP0_CAUSE_IP3);
            }
        }
    }

    fn schedule(&self, kind: InterruptKind, delay: u64) {
        if let Some(cp0) = self.cp0.upgrade() {
            cp0.borrow_mut().add_interrupt_event(kind, delay);
        }
    }

    fn data(&self) -> u32 {
        self.regs.get(asic_index(ASIC_DATA))
    }

    fn set_data(&mut self, value: u32) {
        self.regs.set(asic_index(ASIC_DATA), value);
    }

    fn command(&mut self, cmd: DdCommand) {
        self.acknowledge(DD_STATUS_MECHA_INT);
        tracing::debug!("[DD] command {:?} data {:08X}", cmd, self.data());
        let data = self.data() >> 16;
        match cmd {
            DdCommand::SeekRead | DdCommand::SeekWrite => {
                self.regs.set(asic_index(ASIC_CUR_TK), data | 0x6000_0000);
                self.bm_write = cmd == DdCommand::SeekWrite;
            }
            DdCommand::Recalibrate => self.regs.set(asic_index(ASIC_CUR_TK), 0x6000_0000),
            DdCommand::Sleep | DdCommand::SetSleep => {
                self.set_status(self.status() | DD_STATUS_MTR_N_SPIN);
            }
            DdCommand::Start | DdCommand::Standby | DdCommand::SetStandby => {
                self.set_status(self.status() & !DD_STATUS_MTR_N_SPIN);
            }
            DdCommand::ClearDiskChange => self.set_status(self.status() & !DD_STATUS_DISK_CHNG),
            DdCommand::ClearResetState => self.set_status(self.status() & !DD_STATUS_RST_STATE),
            DdCommand::ReadVersion => self.set_data(0x0114_0000),
            DdCommand::SetRtcYearMonth => {
                self.rtc.year = (data >> 8) as u8;
                self.rtc.month = data as u8;
            }
            DdCommand::SetRtcDayHour => {
                self.rtc.day = (data >> 8) as u8;
                self.rtc.hour = data as u8;
            }
            DdCommand::SetRtcMinuteSecond => {
                self.rtc.minute = (data >> 8) as u8;
                self.rtc.second = data as u8;
            }
            DdCommand::ReadRtcYearMonth => {
                self.set_data(((self.rtc.year as u32) << 24) | ((self.rtc.month as u32) << 16));
            }
            DdCommand::ReadRtcDayHour => {
                self.set_data(((self.rtc.day as u32) << 24) | ((self.rtc.hour as u32) << 16));
            }
            DdCommand::ReadRtcMinuteSecond => {
                self.set_data(((self.rtc.minute as u32) << 24) | ((self.rtc.second as u32) << 16));
            }
            DdCommand::SetDiskType | DdCommand::RequestStatus | DdCommand::IndexLockRetry => {}
            DdCommand::Unknown(cmd) => tracing::warn!("[DD] unknown command {:02X}", cmd),
        }
        self.schedule(InterruptKind::DdMecha, DD_MECHA_DELAY);
    }

    fn sector_size(&self) -> usize {
        ((self.regs.get(asic_index(ASIC_HOST_SECBYTE)) >> 16) & 0xff) as usize + 1
    }

    fn current_sector(&self) -> u32 {
        (self.regs.get(asic_index(ASIC_CUR_SECTOR)) >> 16) & 0xff
    }

    fn set_current_sector(&mut self, sector: u32) {
        self.regs.set(asic_index(ASIC_CUR_SECTOR), sector << 16);
    }

    fn disk_offset(&self) -> usize {
        let tk = self.regs.get(asic_index(ASIC_CUR_TK));
        let track = ((tk >> 16) & 0xfff) as usize;
        let head = ((tk >> 28) & 0x1) as usize;
        ((track * 2 + head) * SECTORS_PER_BLOCK as usize * 2 + self.current_sector() as usize)
            * self.sector_size()
    }

    fn bm_control(&mut self, ctl: u32) {
        if ctl & DD_BM_CTL_MECHA_RST != 0 {
            self.acknowledge(DD_STATUS_MECHA_INT);
        }
        if ctl & DD_BM_CTL_RESET != 0 {
            self.acknowledge(DD_STATUS_BM_INT | DD_STATUS_DATA_RQ);
            self.set_current_sector(0);
        }
        if ctl & DD_BM_CTL_START != 0 {
            // managed mode starts at the second block
            let first = if ctl & DD_BM_CTL_MNGRMODE != 0 { SECTORS_PER_BLOCK } else { 0 };
            self.set_current_sector(first.max((ctl >> 16) & 0xff));
            self.schedule(InterruptKind::DdBm, DD_BM_DELAY);
        }
        self.regs.set(asic_index(ASIC_BM_STATUS_CTL), ctl);
    }

    pub fn read_regs(&mut self, address: u32) -> u32 {
        let offset = address.wrapping_sub(MM_DD_REGS) & 0x00ff_ffff;
        match offset {
            C2_BUFFER..=0x3ff => read_be_word(&self.c2_buf, (offset & 0x3fc) as usize),
            SECTOR_BUFFER..=0x4ff => read_be_word(&self.sector_buf, (offset & 0xfc) as usize),
            ASIC_DATA..=ASIC_LAST_REG => self.regs.get(asic_index(offset)),
            _ => {
                tracing::trace!("[DD] read of unknown register {:#010X}", address);
                read_open_bus(address)
            }
        }
    }

    pub fn write_regs(&mut self, address: u32, value: u32, mask: u32) {
        let offset = address.wrapping_sub(MM_DD_REGS) & 0x00ff_ffff;
        let value = value & mask;
        match offset {
            C2_BUFFER..=0x3ff => {
                write_be_word(&mut self.c2_buf, (offset & 0x3fc) as usize, value, mask)
            }
            SECTOR_BUFFER..=0x4ff => {
                write_be_word(&mut self.sector_buf, (offset & 0xfc) as usize, value, mask)
            }
            ASIC_CMD_STATUS => self.command(DdCommand::from((value >> 16) & 0xff)),
            ASIC_BM_STATUS_CTL => self.bm_control(value),
            ASIC_HARD_RESET => {
                if value == 0xaaaa_0000 {
                    tracing::debug!("[DD] hard reset");
                    self.set_status(self.status() | DD_STATUS_RST_STATE);
                }
            }
            ASIC_DATA..=ASIC_LAST_REG => self.regs.set(asic_index(offset), value),
            _ => tracing::warn!("[DD] ignored write to {:#010X} = {:08X}", address, value),
        }
    }

    pub fn read_rom(&mut self, address: u32) -> u32 {
        read_be_word(&self.rom, address.wrapping_sub(MM_DD_ROM) as usize & !3)
    }

    pub fn write_rom(&mut self, address: u32, value: u32, _mask: u32) {
        tracing::warn!("[DD] ignored ROM write {:#010X} = {:08X}", address, value);
    }

    /// RDRAM to the sector buffer.
    pub fn dma_read(
        &mut self,
        rdram: &mut Rdram,
        dram_addr: u32,
        cart_addr: u32,
        length: u32,
    ) -> u32 {
        let offset = cart_addr.wrapping_sub(MM_DD_REGS);
        if (SECTOR_BUFFER..SECTOR_BUFFER + SECTOR_BUFFER_SIZE as u32).contains(&offset) {
            let start = (offset - SECTOR_BUFFER) as usize;
            let len = (length as usize).min(SECTOR_BUFFER_SIZE - start);
            let data = rdram.read_bytes(dram_addr, len);
            self.sector_buf[start..start + len].copy_from_slice(&data);
            if self.bm_write {
                self.schedule(InterruptKind::DdBm, DD_BM_DELAY);
            }
        } else {
            tracing::warn!("[DD] DMA to {:#010X} ignored", cart_addr);
        }
        length
    }

    /// IPL ROM, C2 or sector buffer to RDRAM.
    pub fn dma_write(
        &mut self,
        rdram: &mut Rdram,
        dram_addr: u32,
        cart_addr: u32,
        length: u32,
    ) -> u32 {
        let source: &[u8] = if cart_addr >= MM_DD_ROM {
            let start = (cart_addr - MM_DD_ROM) as usize;
            self.rom.get(start..).unwrap_or_default()
        } else {
            let offset = cart_addr.wrapping_sub(MM_DD_REGS) as usize;
            if offset < C2_BUFFER_SIZE {
                &self.c2_buf[offset..]
            } else if offset < SECTOR_BUFFER as usize + SECTOR_BUFFER_SIZE {
                &self.sector_buf[offset - SECTOR_BUFFER as usize..]
            } else {
                &[]
            }
        };
        let len = (length as usize).min(source.len());
        rdram.write_bytes(dram_addr, &source[..len]);

        let reading_sectors = cart_addr < MM_DD_ROM && !self.bm_write;
        if reading_sectors && self.current_sector() < SECTORS_PER_BLOCK * 2 {
            self.schedule(InterruptKind::DdBm, DD_BM_DELAY);
        }
        length
    }

    pub fn mecha_int_handler(&mut self) {
        self.raise(DD_STATUS_MECHA_INT);
    }

    /// One sector moved through the buffer manager.
    pub fn bm_int_handler(&mut self) {
        let offset = self.disk_offset();
        let size = self.sector_size().min(SECTOR_BUFFER_SIZE);
        if let Some(disk) = self.disk.as_mut() {
            if self.bm_write {
                if let Some(dst) = disk.data_mut().get_mut(offset..offset + size) {
                    dst.copy_from_slice(&self.sector_buf[..size]);
                }
                if let Err(err) = disk.save() {
                    tracing::warn!("[DD] disk save failed: {:#}", err);
                }
            } else {
                let data = disk.data();
                for (i, byte) in self.sector_buf[..size].iter_mut().enumerate() {
                    *byte = data.get(offset + i).copied().unwrap_or(0);
                }
            }
        }
        self.set_current_sector(self.current_sector() + 1);
        let data_rq = if self.bm_write { 0 } else { DD_STATUS_DATA_RQ };
        self.raise(DD_STATUS_BM_INT | data_rq);
    }

    /// Disk inserted while running.
    pub fn dv_int_handler(&mut self) {
        self.raise(DD_STATUS_DISK_PRES | DD_STATUS_DISK_CHNG);
    }
}

fn asic_index(offset: u32) -> usize {
    ((offset - ASIC_DATA) >> 2) as usize
}
