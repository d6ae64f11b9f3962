use std::{cell::RefCell, rc::Weak};

use derivative::Derivative;

use crate::{
    cpu::{
        Cp0, CP0_CAUSE_IP4, CP0_STATUS_IM4, CP0_STATUS_REG, CP0_STATUS_SR, CP0_STATUS_TS,
    },
    joybus::JoybusDevice,
    mmio::{read_be_word, write_be_word},
};

pub const PIF_ROM_SIZE: usize = 0x7c0;
pub const PIF_RAM_SIZE: usize = 0x40;

pub const PIF_CHANNELS_COUNT: usize = 5;
pub const GAME_CONTROLLERS_COUNT: usize = 4;
pub const CART_CHANNEL: usize = 4;

/// IPL3 location and length within a boot image
pub const IPL3_OFFSET: usize = 0x40;
pub const IPL3_SIZE: usize = 0xfc0;

const PIF_CMD_OFFSET: usize = PIF_RAM_SIZE - 1;
const PIF_CMD_PROCESS: u8 = 0x01;
const PIF_CMD_CLEAR: u8 = 0x08;

const JOYBUS_SKIP: u8 = 0xff;
const JOYBUS_END: u8 = 0xfe;
const JOYBUS_RESET_CHANNEL: u8 = 0xfd;
const JOYBUS_NEXT_CHANNEL: u8 = 0x00;
const JOYBUS_NO_DEVICE: u8 = 0x80;

/// Peripheral interface chip: boot ROM, the 64-byte command RAM and the
/// joybus channels it drives.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Pif {
    rom: Vec<u8>,
    ram: [u8; PIF_RAM_SIZE],
    ipl3: Vec<u8>,
    #[derivative(Debug = "ignore")]
    channels: [Option<Box<dyn JoybusDevice>>; PIF_CHANNELS_COUNT],
    cp0: Weak<RefCell<Cp0>>,
}

impl Pif {
    pub fn new(mut rom: Vec<u8>, cp0: Weak<RefCell<Cp0>>) -> Self {
        rom.resize(PIF_ROM_SIZE, 0);
        Self {
            rom,
            ram: [0; PIF_RAM_SIZE],
            ipl3: vec![0; IPL3_SIZE],
            channels: std::array::from_fn(|_| None),
            cp0,
        }
    }

    /// Takes IPL3 from the boot image the console starts from.
    pub fn with_ipl3(mut self, boot_image: &[u8]) -> Self {
        let end = boot_image.len().min(IPL3_OFFSET + IPL3_SIZE);
        let mut ipl3 = boot_image.get(IPL3_OFFSET..end).unwrap_or_default().to_vec();
        ipl3.resize(IPL3_SIZE, 0);
        self.ipl3 = ipl3;
        self
    }

    pub fn plug(&mut self, channel: usize, device: Box<dyn JoybusDevice>) {
        assert!(channel < PIF_CHANNELS_COUNT, "no PIF channel {}", channel);
        self.channels[channel] = Some(device);
    }

    pub fn channel_mut(&mut self, channel: usize) -> Option<&mut (dyn JoybusDevice + 'static)> {
        self.channels.get_mut(channel)?.as_deref_mut()
    }

    pub fn poweron(&mut self) {
        self.ram = [0; PIF_RAM_SIZE];
    }

    pub fn ipl3(&self) -> &[u8] {
        &self.ipl3
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    pub fn rom_as_mut_ptr(&mut self) -> *mut u8 {
        self.rom.as_mut_ptr()
    }

    pub fn ram_as_mut_ptr(&mut self) -> *mut u8 {
        self.ram.as_mut_ptr()
    }

    pub fn read_mem(&mut self, address: u32) -> u32 {
        let offset = (address & 0xfffc) as usize;
        if offset < PIF_ROM_SIZE {
            read_be_word(&self.rom, offset)
        } else if offset < PIF_ROM_SIZE + PIF_RAM_SIZE {
            read_be_word(&self.ram, offset - PIF_ROM_SIZE)
        } else {
            tracing::trace!("[PIF] read past RAM at {:#010X}", address);
            0
        }
    }

    pub fn write_mem(&mut self, address: u32, value: u32, mask: u32) {
        let offset = (address & 0xfffc) as usize;
        if !(PIF_ROM_SIZE..PIF_ROM_SIZE + PIF_RAM_SIZE).contains(&offset) {
            tracing::warn!("[PIF] ignored write to {:#010X} = {:08X}", address, value);
            return;
        }
        write_be_word(&mut self.ram, offset - PIF_ROM_SIZE, value, mask);
        if self.ram[PIF_CMD_OFFSET] & PIF_CMD_CLEAR != 0 {
            self.ram[PIF_CMD_OFFSET] = 0;
        }
    }

    /// Runs the pending joybus command block, when the command byte asks for
    /// it, leaving the responses in RAM.
    pub fn process_commands(&mut self) {
        if self.ram[PIF_CMD_OFFSET] & PIF_CMD_PROCESS == 0 {
            return;
        }

        let mut i = 0;
        let mut channel = 0;
        while i < PIF_CMD_OFFSET && channel < PIF_CHANNELS_COUNT {
            match self.ram[i] {
                JOYBUS_END => break,
                JOYBUS_SKIP | JOYBUS_RESET_CHANNEL => i += 1,
                JOYBUS_NEXT_CHANNEL => {
                    channel += 1;
                    i += 1;
                }
                tx_len => {
                    let tx_len = (tx_len & 0x3f) as usize;
                    let Some(&rx_byte) = self.ram.get(i + 1) else {
                        break;
                    };
                    let rx_len = (rx_byte & 0x3f) as usize;
                    let tx_start = i + 2;
                    let rx_start = tx_start + tx_len;
                    let next = rx_start + rx_len;
                    if next > PIF_CMD_OFFSET {
                        tracing::warn!("[PIF] command frame overruns RAM at {}", i);
                        break;
                    }

                    let (head, rx) = self.ram.split_at_mut(rx_start);
                    let tx = &head[tx_start..];
                    let answered = match self.channels[channel].as_deref_mut() {
                        Some(device) => device.process(tx, &mut rx[..rx_len]),
                        None => false,
                    };
                    if !answered {
                        self.ram[i + 1] |= JOYBUS_NO_DEVICE;
                    }
                    i = next;
                    channel += 1;
                }
            }
        }
        self.ram[PIF_CMD_OFFSET] &= !PIF_CMD_PROCESS;
    }

    /// Pre-NMI notification of a pending reset.
    pub fn hw2_int_handler(&mut self) {
        let Some(cp0) = self.cp0.upgrade() else {
            return;
        };
        let mut cp0 = cp0.borrow_mut();
        let status = cp0.regs[CP0_STATUS_REG];
        cp0.regs[CP0_STATUS_REG] =
            (status & !(CP0_STATUS_SR | CP0_STATUS_TS | 0x0008_0000)) | CP0_STATUS_IM4;
        cp0.raise_interrupt(CP0_CAUSE_IP4);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        cpu::CP0_CAUSE_REG,
        joybus::{Controller, NoInput, Pak},
    };

    fn pif() -> (Rc<RefCell<Cp0>>, Pif) {
        let cp0 = Rc::new(RefCell::new(Cp0::new()));
        let pif = Pif::new(Vec::new(), Rc::downgrade(&cp0));
        (cp0, pif)
    }

    #[test]
    fn test_rom_and_ram_windows() {
        let cp0 = Rc::new(RefCell::new(Cp0::new()));
        let mut pif = Pif::new(vec![0x12, 0x34, 0x56, 0x78], Rc::downgrade(&cp0));
        assert_eq!(pif.read_mem(0x1fc0_0000), 0x1234_5678);

        pif.write_mem(0x1fc0_07c4, 0xAABB_CCDD, 0xffff_ffff);
        assert_eq!(pif.read_mem(0x1fc0_07c4), 0xAABB_CCDD);
        assert_eq!(pif.ram()[4..8], [0xAA, 0xBB, 0xCC, 0xDD]);

        // ROM is read-only
        pif.write_mem(0x1fc0_0000, 0, 0xffff_ffff);
        assert_eq!(pif.read_mem(0x1fc0_0000), 0x1234_5678);
    }

    #[test]
    fn test_command_block_with_and_without_devices() {
        let (_cp0, mut pif) = pif();
        pif.plug(0, Box::new(Controller::new(Box::new(NoInput), Pak::None)));

        // channel 0: status; channel 1: status, nothing plugged
        let block = [
            0x01, 0x03, 0x00, 0xff, 0xff, 0xff, //
            0x01, 0x03, 0x00, 0xff, 0xff, 0xff, //
            0xfe,
        ];
        pif.ram_mut()[..block.len()].copy_from_slice(&block);
        pif.ram_mut()[PIF_CMD_OFFSET] = PIF_CMD_PROCESS;
        pif.process_commands();

        let ram = pif.ram();
        assert_eq!(ram[3..6], [0x05, 0x00, 0x02]);
        assert_eq!(ram[7], 0x03 | JOYBUS_NO_DEVICE);
        assert_eq!(ram[PIF_CMD_OFFSET], 0);
    }

    #[test]
    fn test_next_channel_marker() {
        let (_cp0, mut pif) = pif();
        pif.plug(2, Box::new(Controller::new(Box::new(NoInput), Pak::mempak())));
        let block = [0x00, 0x00, 0x01, 0x03, 0x00, 0xff, 0xff, 0xff, 0xfe];
        pif.ram_mut()[..block.len()].copy_from_slice(&block);
        pif.ram_mut()[PIF_CMD_OFFSET] = PIF_CMD_PROCESS;
        pif.process_commands();
        assert_eq!(pif.ram()[5..8], [0x05, 0x00, 0x01]);
    }

    #[test]
    fn test_ipl3_taken_from_boot_image() {
        let (_cp0, pif) = pif();
        let mut image = vec![0u8; 0x1000];
        image[0x40] = 0x3c;
        image[0xfff] = 0x99;
        let pif = pif.with_ipl3(&image);
        assert_eq!(pif.ipl3().len(), IPL3_SIZE);
        assert_eq!(pif.ipl3()[0], 0x3c);
        assert_eq!(pif.ipl3()[IPL3_SIZE - 1], 0x99);
    }

    #[test]
    fn test_hw2_raises_ip4() {
        let (cp0, mut pif) = pif();
        pif.hw2_int_handler();
        let cp0 = cp0.borrow();
        assert_ne!(cp0.regs[CP0_STATUS_REG] & CP0_STATUS_IM4, 0);
        assert_ne!(cp0.regs[CP0_CAUSE_REG] & CP0_CAUSE_IP4, 0);
    }
}
