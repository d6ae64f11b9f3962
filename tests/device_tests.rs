use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use n64device::{
    cart::CART_MEDIA_BYTE,
    cpu::{
        CP0_ERROREPC_REG, CP0_STATUS_BEV, CP0_STATUS_ERL, CP0_STATUS_REG, CP0_STATUS_SR,
        IPL3_ENTRY,
    },
    dma::DmaTargetKind,
    joybus::{InputBackend, JoybusDevice, Mouse, PowerOnHook},
    memory_map::*,
    memory_view::{MEMDESC_CONST, MEMDESC_SYSTEM_RAM},
    pif::CART_CHANNEL,
    rcp::{
        ai::AI_STATUS_REG,
        mi::{MI_INTR_PI, MI_INTR_REG, MI_INTR_SI, MI_VERSION_REG},
        pi::{PI_STATUS_DMA_BUSY, PI_STATUS_INTERRUPT, PI_STATUS_REG},
        rsp::{SP_STATUS_HALT, SP_STATUS_REG},
        si::{SI_STATUS_INTERRUPT, SI_STATUS_REG},
    },
    storage::FixedClock,
    Backends, BreakpointHook, Bus, Cp0, Device, DeviceConfig, DeviceState, ExecutionCore,
    InterruptKind, MediaImages, RunFlags,
};

#[cfg(test)]
#[ctor::ctor]
fn init() {
    let fmt_subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
        .expect("Unable to set global tracing subscriber");
}

type Script = Box<dyn FnMut(u64, &Bus, &RunFlags)>;

#[derive(Debug, Default)]
struct CoreLog {
    poweron: Vec<u32>,
    steps: u64,
}

/// Retires one operation per step, advancing the PC by one instruction and
/// running a test script against the bus.
struct ScriptCore {
    pc: u32,
    script: Script,
    flags: Rc<RefCell<Option<RunFlags>>>,
    log: Rc<RefCell<CoreLog>>,
}

impl ExecutionCore for ScriptCore {
    fn poweron(&mut self, start_address: u32) {
        self.pc = start_address;
        self.log.borrow_mut().poweron.push(start_address);
    }

    fn step(&mut self, bus: &Bus, cp0: &RefCell<Cp0>) -> u32 {
        self.pc = self.pc.wrapping_add(4);
        let step = {
            let mut log = self.log.borrow_mut();
            log.steps += 1;
            log.steps
        };
        if let Some(flags) = self.flags.borrow().as_ref() {
            (self.script)(step, bus, flags);
        }
        cp0.borrow_mut().take_pending_exception();
        1
    }

    fn pc(&self) -> u32 {
        self.pc
    }

    fn jump_to(&mut self, address: u32) {
        self.pc = address;
    }
}

struct Harness {
    device: Rc<Device>,
    log: Rc<RefCell<CoreLog>>,
}

fn harness(
    config: DeviceConfig,
    media: MediaImages,
    script: impl FnMut(u64, &Bus, &RunFlags) + 'static,
) -> Harness {
    let flags = Rc::new(RefCell::new(None));
    let log = Rc::new(RefCell::new(CoreLog::default()));
    let core = ScriptCore {
        pc: 0,
        script: Box::new(script),
        flags: flags.clone(),
        log: log.clone(),
    };
    let device = Device::init(&config, Backends::default().with_core(Box::new(core)), media);
    *flags.borrow_mut() = Some(device.run_flags());
    Harness { device, log }
}

fn small_config() -> DeviceConfig {
    DeviceConfig {
        dram_size: 0x40_0000,
        ..Default::default()
    }
}

/// A cartridge image with a recognizable header, IPL3 and payload.
fn test_rom(size: usize) -> Vec<u8> {
    let mut rom: Vec<u8> = (0..size).map(|i| (i * 7) as u8).collect();
    rom[..4].copy_from_slice(&0x8037_1240u32.to_be_bytes());
    rom[CART_MEDIA_BYTE] = b'N';
    rom
}

fn cart_media(size: usize) -> MediaImages {
    MediaImages {
        rom: test_rom(size),
        ..Default::default()
    }
}

fn idle_device(media: MediaImages) -> Rc<Device> {
    Device::init(&small_config(), Backends::default(), media)
}

#[test]
fn test_memory_map_partition() {
    let device = idle_device(cart_media(0x1000));
    let bus = device.bus();
    let segments = bus.map().segments();

    assert_eq!(segments.first().unwrap().begin, 0);
    assert_eq!(segments.last().unwrap().end, u32::MAX);
    for pair in segments.windows(2) {
        assert_eq!(pair[0].end as u64 + 1, pair[1].begin as u64);
    }

    let expected = [
        (0x0000_0000, MemoryKind::Rdram),
        (0x03ef_ffff, MemoryKind::Rdram),
        (0x03f0_0000, MemoryKind::RdramRegs),
        (0x0400_0000, MemoryKind::RspMem),
        (0x0404_0000, MemoryKind::RspRegs),
        (0x0408_0000, MemoryKind::RspRegs),
        (0x0410_0000, MemoryKind::DpRegs),
        (0x0420_0000, MemoryKind::DpRegs),
        (0x0430_0000, MemoryKind::MiRegs),
        (0x0440_0000, MemoryKind::ViRegs),
        (0x0450_0000, MemoryKind::AiRegs),
        (0x0460_0000, MemoryKind::PiRegs),
        (0x0470_0000, MemoryKind::RiRegs),
        (0x0480_0000, MemoryKind::SiRegs),
        (0x0490_0000, MemoryKind::Unmapped),
        (0x0500_0000, MemoryKind::Unmapped),
        (0x0600_0000, MemoryKind::Unmapped),
        (0x0800_0000, MemoryKind::FlashStatus),
        (0x0802_0000, MemoryKind::Unmapped),
        (0x1000_0000, MemoryKind::Rom),
        (0x1000_0fff, MemoryKind::Rom),
        (0x1000_1000, MemoryKind::Unmapped),
        (0x13ff_0000, MemoryKind::IsViewer),
        (0x1fc0_0000, MemoryKind::Pif),
        (0x1fd0_0000, MemoryKind::Unmapped),
        (0xffff_ffff, MemoryKind::Unmapped),
    ];
    for (address, kind) in expected {
        assert_eq!(bus.lookup(address).kind, kind, "at {:#010x}", address);
    }
}

#[test]
fn test_open_bus_reads() {
    let device = idle_device(cart_media(0x1000));
    let bus = device.bus();
    assert_eq!(bus.read_u32(0x0500_1234), 0x1234_1234);
    assert_eq!(bus.read_u32(0x1fd0_8000), 0x8000_8000);
    bus.write_u32(0x0500_1234, 0xdead_beef);
    assert_eq!(bus.read_u32(0x0500_1234), 0x1234_1234);
}

#[test]
fn test_bus_reaches_controllers() {
    let device = idle_device(cart_media(0x1000));
    device.poweron();
    let bus = device.bus();

    bus.write_u32(0x0000_0100, 0x1122_3344);
    bus.write_u8(0x0000_0101, 0xaa);
    assert_eq!(bus.read_u32(0x0000_0100), 0x11aa_3344);
    assert_eq!(bus.read_u16(0x0000_0102), 0x3344);

    assert_eq!(bus.read_u32(MM_MI_REGS + 4), 0x0202_0102);
    assert_eq!(bus.read_u32(MM_CART_ROM), 0x8037_1240);
    assert_eq!(bus.read_u8(MM_CART_ROM + CART_MEDIA_BYTE as u32), b'N');
}

#[test]
fn test_is_viewer_log_port() {
    let device = idle_device(cart_media(0x1000));
    let bus = device.bus();
    assert_eq!(bus.lookup(MM_IS_VIEWER + 0x14).kind, MemoryKind::IsViewer);

    bus.write_u32(MM_IS_VIEWER + 0x20, u32::from_be_bytes(*b"ok\nx"));
    bus.write_u32(MM_IS_VIEWER + 0x14, 4);
    assert_eq!(device.is_viewer().borrow().pending_text(), "x");
}

#[test]
fn test_is_viewer_shadowed_by_64mib_rom() {
    let device = idle_device(cart_media(0x400_0000));
    let bus = device.bus();
    assert_eq!(bus.lookup(MM_IS_VIEWER + 0x14).kind, MemoryKind::Rom);
    assert_eq!(bus.lookup(0x13ff_ffff).kind, MemoryKind::Rom);
    assert_eq!(bus.lookup(0x1400_0000).kind, MemoryKind::Unmapped);
}

#[test]
fn test_disk_drive_patches_slots() {
    let media = MediaImages {
        rom: test_rom(0x1000),
        dd_rom: vec![0; 0x40_0000],
        ..Default::default()
    };
    let device = idle_device(media);
    let bus = device.bus();

    assert_eq!(bus.lookup(0x0500_0500).kind, MemoryKind::DiskRegs);
    assert_eq!(bus.lookup(0x0600_0000).kind, MemoryKind::DiskRom);
    assert_eq!(bus.lookup(0x063f_ffff).kind, MemoryKind::DiskRom);
    assert_eq!(bus.lookup(0x0640_0000).kind, MemoryKind::Unmapped);
    assert_eq!(bus.map().slot(SLOT_DD_REGS).unwrap().handler.name(), "dd_regs");
    assert_eq!(bus.map().slot(SLOT_DD_ROM).unwrap().handler.name(), "dd_rom");
}

#[test]
fn test_dma_resolution() {
    let media = MediaImages {
        rom: test_rom(0x1000),
        dd_rom: vec![0; 0x1000],
        ..Default::default()
    };
    let with_dd = idle_device(media);
    let without_dd = idle_device(cart_media(0x1000));

    let kind = |device: &Device, address: u32| {
        device
            .pi()
            .borrow()
            .dma_resolver()
            .resolve(address)
            .map(|h| h.kind())
    };
    assert_eq!(kind(&with_dd, 0x1fd0_0000), Some(DmaTargetKind::CartDom3));
    assert_eq!(kind(&with_dd, 0x1fcf_ffff), Some(DmaTargetKind::CartRom));
    assert_eq!(kind(&with_dd, 0x1000_0000), Some(DmaTargetKind::CartRom));
    assert_eq!(kind(&with_dd, 0x0800_0000), Some(DmaTargetKind::CartDom2));
    assert_eq!(kind(&with_dd, 0x0500_0000), Some(DmaTargetKind::Disk));
    assert_eq!(kind(&with_dd, 0x04ff_ffff), None);
    assert_eq!(kind(&without_dd, 0x0500_0000), None);
    assert_eq!(kind(&without_dd, 0x0800_0000), Some(DmaTargetKind::CartDom2));
}

#[test]
fn test_interrupt_bindings() {
    let device = idle_device(cart_media(0x1000));
    let contexts: Vec<_> = InterruptKind::ALL
        .iter()
        .map(|&kind| device.interrupts().lookup(kind).context())
        .collect();
    assert_eq!(
        contexts,
        [
            "vi", "r4300", "r4300", "si", "pi", "cp0", "ai", "sp", "dp", "pif", "device",
            "device", "sp", "dd", "dd", "dd"
        ]
    );
}

#[test]
fn test_run_until_stop_and_restart() {
    let h = harness(small_config(), cart_media(0x1000), |step, _bus, flags| {
        if step == 10 || step == 3000 {
            flags.request_stop();
        }
    });
    assert_eq!(h.device.state(), DeviceState::Initialized);
    h.device.poweron();
    assert_eq!(h.device.state(), DeviceState::PoweredOn);

    // the stop lands on the first vertical interrupt, 5000 cycles in
    h.device.run();
    assert_eq!(h.device.state(), DeviceState::Stopped);
    assert_eq!(h.log.borrow().steps, 2500);
    assert_eq!(h.device.cp0().borrow().now(), 5000);

    h.device.run();
    assert_eq!(h.device.state(), DeviceState::Stopped);
    assert_eq!(h.log.borrow().steps, 5001);
    assert_eq!(h.device.cp0().borrow().now(), 10002);
}

#[test]
fn test_stop_from_another_thread() {
    let h = harness(small_config(), cart_media(0x1000), |_, _, _| {});
    h.device.poweron();
    let flags = h.device.run_flags();
    std::thread::spawn(move || flags.request_stop())
        .join()
        .unwrap();
    h.device.run();
    assert_eq!(h.device.state(), DeviceState::Stopped);
}

#[test]
fn test_hard_reset_at_next_boundary() {
    let rom = test_rom(0x2000);
    let ipl3_word = u32::from_be_bytes(rom[0x40..0x44].try_into().unwrap());
    let media = MediaImages {
        rom,
        ..Default::default()
    };
    let h = harness(small_config(), media, |step, bus, flags| match step {
        // a new V_SYNC changes the frame length until the reset
        1 => bus.write_u32(MM_VI_REGS + 0x18, 0x20d),
        2 => flags.request_hard_reset(),
        3000 => flags.request_stop(),
        _ => {}
    });
    h.device.poweron();
    h.device.run();

    let log = h.log.borrow();
    assert_eq!(log.poweron.len(), 2);
    // reset at the cycle 5000 boundary rewinds the count, the stop then
    // lands on the next vertical interrupt
    assert_eq!(log.steps, 5000);
    assert_eq!(h.device.cp0().borrow().now(), 5000);
    assert_eq!(h.device.vi().borrow().delay(), 5000);
    assert!(!h.device.run_flags().hard_reset_requested());

    let rsp = h.device.rsp().borrow();
    assert_eq!(u32::from_be_bytes(rsp.mem()[0x40..0x44].try_into().unwrap()), ipl3_word);
    assert_eq!(h.device.r4300().borrow().pc(), IPL3_ENTRY + 4 * 2500);
}

#[test]
fn test_soft_reset_delivers_nmi() {
    let config = DeviceConfig {
        count_per_op: 1000,
        ..small_config()
    };
    let h = harness(config, cart_media(0x1000), |step, _bus, flags| {
        if step == 60_000 {
            flags.request_stop();
        }
    });
    h.device.poweron();
    h.device.ai().borrow_mut().regs.set(AI_STATUS_REG, 0x4000_0000);
    h.device.soft_reset();
    h.device.run();

    let cp0 = h.device.cp0().borrow();
    let status = cp0.regs[CP0_STATUS_REG];
    assert_eq!(
        status & (CP0_STATUS_ERL | CP0_STATUS_BEV | CP0_STATUS_SR),
        CP0_STATUS_ERL | CP0_STATUS_BEV | CP0_STATUS_SR
    );
    assert_eq!(status & 0x1000, 0x1000, "IM4 set by the pre-NMI interrupt");
    assert_eq!(cp0.regs[CP0_ERROREPC_REG], IPL3_ENTRY + 4 * 50_000);
    assert!(cp0.now() < 50_000_000);
    assert_eq!(h.device.ai().borrow().regs.get(AI_STATUS_REG), 0);
    assert_eq!(h.log.borrow().poweron.len(), 1);
}

#[test]
fn test_pi_dma_end_to_end() {
    let rom = test_rom(0x2000);
    let payload = rom[0x1000..0x1100].to_vec();
    let media = MediaImages {
        rom,
        ..Default::default()
    };
    let h = harness(small_config(), media, |_, bus, flags| {
        if bus.read_u32(MM_MI_REGS + 8) & MI_INTR_PI != 0 {
            flags.request_stop();
        }
    });
    h.device.poweron();
    h.device.execute_boot_rom();

    {
        let bus = h.device.bus();
        bus.write_u32(MM_PI_REGS, 0x2000);
        bus.write_u32(MM_PI_REGS + 4, MM_CART_ROM + 0x1000);
        bus.write_u32(MM_PI_REGS + 0xc, 0xff);
    }
    assert_eq!(h.device.rdram().borrow().read_bytes(0x2000, 0x100), payload);
    assert!(h.device.cp0().borrow().scheduler.is_pending(InterruptKind::Pi));
    assert_ne!(h.device.pi().borrow().regs.get(PI_STATUS_REG) & PI_STATUS_DMA_BUSY, 0);

    h.device.run();
    let status = h.device.pi().borrow().regs.get(PI_STATUS_REG);
    assert_eq!(status & PI_STATUS_DMA_BUSY, 0);
    assert_ne!(status & PI_STATUS_INTERRUPT, 0);

    h.device.bus().write_u32(MM_PI_REGS + 0x10, 0x2);
    assert_eq!(h.device.mi().borrow().regs.get(MI_INTR_REG) & MI_INTR_PI, 0);
}

#[test]
fn test_si_joybus_exchange() {
    let h = harness(small_config(), cart_media(0x1000), |_, bus, flags| {
        if bus.read_u32(MM_MI_REGS + 8) & MI_INTR_SI != 0 {
            flags.request_stop();
        }
    });
    h.device.poweron();

    // status request to channel 0, nothing on channel 1, then end
    let mut block = [0u8; 0x40];
    block[..9].copy_from_slice(&[0x01, 0x03, 0x00, 0xff, 0xff, 0xff, 0x01, 0x03, 0x00]);
    block[9..12].copy_from_slice(&[0xff, 0xff, 0xff]);
    block[12] = 0xfe;
    block[0x3f] = 0x01;
    h.device.rdram().borrow_mut().write_bytes(0x100, &block);

    {
        let bus = h.device.bus();
        bus.write_u32(MM_SI_REGS, 0x100);
        bus.write_u32(MM_SI_REGS + 0x10, MM_PIF_MEM + 0x7c0);
        bus.write_u32(MM_SI_REGS, 0x200);
        bus.write_u32(MM_SI_REGS + 0x04, MM_PIF_MEM + 0x7c0);
    }
    let response = h.device.rdram().borrow().read_bytes(0x200, 0x40);
    assert_eq!(&response[..6], &[0x01, 0x03, 0x00, 0x05, 0x00, 0x02]);
    assert_eq!(response[7], 0x83, "empty channel flags no device");
    assert_eq!(response[0x3f] & 0x01, 0);

    h.device.run();
    assert_ne!(h.device.si().borrow().regs.get(SI_STATUS_REG) & SI_STATUS_INTERRUPT, 0);
}

struct CountingPad {
    poweron: Rc<Cell<u32>>,
}

impl JoybusDevice for CountingPad {
    fn process(&mut self, _tx: &[u8], _rx: &mut [u8]) -> bool {
        true
    }

    fn poweron_hook(&mut self) -> Option<&mut dyn PowerOnHook> {
        Some(self)
    }
}

impl PowerOnHook for CountingPad {
    fn poweron(&mut self) {
        self.poweron.set(self.poweron.get() + 1);
    }
}

struct Still;

impl InputBackend for Still {
    fn poll(&mut self) -> u32 {
        0
    }
}

#[test]
fn test_poweron_visits_controller_hooks() {
    let count = Rc::new(Cell::new(0));
    let backends = Backends::default()
        .with_controller(
            1,
            Box::new(CountingPad {
                poweron: count.clone(),
            }),
        )
        .with_controller(2, Box::new(Mouse::new(Box::new(Still))));
    let device = Device::init(&small_config(), backends, cart_media(0x1000));

    device.poweron();
    assert_eq!(count.get(), 1);
    device.poweron();
    assert_eq!(count.get(), 2);
}

fn counting_pad(count: &Rc<Cell<u32>>) -> Box<dyn JoybusDevice> {
    Box::new(CountingPad {
        poweron: count.clone(),
    })
}

#[test]
fn test_poweron_visits_every_subsystem() {
    let pad = Rc::new(Cell::new(0));
    let cart_pad = Rc::new(Cell::new(0));
    let backends = Backends {
        dd_clock: Box::new(FixedClock(time::macros::datetime!(2024-05-06 07:08:09 UTC))),
        ..Backends::default().with_controller(3, counting_pad(&pad))
    };
    let media = MediaImages {
        rom: test_rom(0x1000),
        dd_rom: vec![0; 0x1000],
        ..Default::default()
    };
    let device = Device::init(&small_config(), backends, media);
    device.pif().borrow_mut().plug(CART_CHANNEL, counting_pad(&cart_pad));
    assert_eq!(device.dd().unwrap().borrow().rtc().year, 0);

    device.poweron();
    assert_eq!(device.mi().borrow().regs.get(MI_VERSION_REG), 0x0202_0102);
    let vi_events = device
        .cp0()
        .borrow()
        .scheduler
        .pending()
        .filter(|e| e.kind == InterruptKind::Vi)
        .count();
    assert_eq!(vi_events, 1);
    assert_ne!(device.rsp().borrow().regs.get(SP_STATUS_REG) & SP_STATUS_HALT, 0);
    assert_eq!(pad.get(), 1);
    assert_eq!(cart_pad.get(), 0, "the cartridge channel has no power-on hook");

    let rtc = device.dd().unwrap().borrow().rtc();
    assert_eq!((rtc.year, rtc.month, rtc.day), (0x24, 0x05, 0x06));
    assert_eq!((rtc.hour, rtc.minute, rtc.second), (0x07, 0x08, 0x09));

    let cart_only = idle_device(cart_media(0x1000));
    cart_only.poweron();
    assert!(cart_only.dd().is_none());
}

#[test]
fn test_memory_view_layout() {
    let media = MediaImages {
        rom: test_rom(0x1000),
        dd_rom: vec![0; 0x1000],
        ..Default::default()
    };
    let device = idle_device(media);
    let view = device.memory_view();

    assert_eq!(view[0].kind, MemoryKind::Rdram);
    assert_eq!(view[0].start, 0x8000_0000);
    assert_eq!(view[0].select, 0x2000_0000);
    assert_eq!(view[0].disconnect, 0xc000_0000);
    assert_eq!(view[0].len, 0x40_0000);
    assert_eq!(view[0].flags, MEMDESC_SYSTEM_RAM);
    assert_eq!(view[1].start, 0xa000_0000);
    assert_eq!(view[1].ptr, view[0].ptr);

    let find = |start: u32| view.iter().find(|d| d.start == start).unwrap();
    assert_eq!(find(0xb000_0000).kind, MemoryKind::Rom);
    assert_eq!(find(0xb000_0000).len, 0x1000);
    assert_eq!(find(0xb000_0000).flags, MEMDESC_CONST);
    assert_eq!(find(0xa600_0000).kind, MemoryKind::DiskRom);
    assert_eq!(find(0xa600_0000).flags, MEMDESC_CONST);
    assert_eq!(find(0xbfc0_0000).len, 0x7c0);
    assert_eq!(find(0xbfc0_0000).flags, MEMDESC_CONST);
    assert_eq!(find(0xbfc0_07c0).len, 0x40);
    assert_eq!(find(0xbfc0_07c0).flags, 0);
    assert_eq!(find(0xa430_0000).kind, MemoryKind::MiRegs);
    assert_eq!(find(0xa800_0000).kind, MemoryKind::FlashStatus);
    assert_eq!(find(0xa800_0000).len, 0x8000);
    assert_eq!(find(0xa800_0000).flags, 0);
    assert!(view.iter().all(|d| d.kind != MemoryKind::Unmapped));
}

#[derive(Default)]
struct Recorder {
    reads: Vec<u32>,
    writes: Vec<(u32, u32)>,
}

impl BreakpointHook for Recorder {
    fn on_read(&mut self, address: u32) {
        self.reads.push(address);
    }

    fn on_write(&mut self, address: u32, value: u32, _mask: u32) {
        self.writes.push((address, value));
    }
}

#[test]
fn test_breakpoints_on_watched_ranges() {
    let device = idle_device(cart_media(0x1000));
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    device.attach_breakpoints(recorder.clone());
    device.watch(MM_PIF_MEM, MM_PIF_MEM + 0xffff);

    let segments_before = device.bus().map().segments().len();
    {
        let bus = device.bus();
        bus.read_u32(0x0000_0010);
        bus.read_u32(MM_PIF_MEM + 0x7c0);
        bus.write_u32(MM_PIF_MEM + 0x7c4, 5);
        assert_eq!(bus.read_u32(MM_PIF_MEM + 0x7c4), 5);
    }
    assert_eq!(device.bus().map().segments().len(), segments_before);

    let recorder = recorder.borrow();
    assert_eq!(recorder.reads, vec![MM_PIF_MEM + 0x7c0, MM_PIF_MEM + 0x7c4]);
    assert_eq!(recorder.writes, vec![(MM_PIF_MEM + 0x7c4, 5)]);
}

#[test]
fn test_watch_while_running() {
    let device_cell: Rc<RefCell<Weak<Device>>> = Rc::new(RefCell::new(Weak::new()));
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    let script_device = device_cell.clone();
    let script_recorder = recorder.clone();
    let h = harness(small_config(), cart_media(0x1000), move |step, bus, flags| {
        match step {
            1 => {
                if let Some(device) = script_device.borrow().upgrade() {
                    device.attach_breakpoints(script_recorder.clone());
                    device.watch(MM_PIF_MEM, MM_PIF_MEM + 0xffff);
                }
            }
            2 => {
                bus.read_u32(MM_PIF_MEM + 0x7c0);
            }
            3 => flags.request_stop(),
            _ => {}
        }
    });
    *device_cell.borrow_mut() = Rc::downgrade(&h.device);

    h.device.poweron();
    h.device.run();
    assert_eq!(h.device.state(), DeviceState::Stopped);
    assert_eq!(recorder.borrow().reads, vec![MM_PIF_MEM + 0x7c0]);

    h.device.unwatch_all();
    h.device.bus().read_u32(MM_PIF_MEM + 0x7c0);
    assert_eq!(recorder.borrow().reads.len(), 1);
}
