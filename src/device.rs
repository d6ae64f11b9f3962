use std::{
    cell::{Cell, Ref, RefCell},
    rc::{Rc, Weak},
};

use derivative::Derivative;

use crate::{
    bus::{Bus, BreakpointHook},
    cart::{CartJoybus, CartRom, Cartridge, CART_MEDIA_BYTE, CART_MEDIA_COMBO},
    config::{build_cartridge, Backends, DeviceConfig, MediaImages},
    cpu::{
        Cp0, RunFlags, CP0_CAUSE_REG, CP0_ERROREPC_REG, CP0_STATUS_BEV, CP0_STATUS_ERL,
        CP0_STATUS_REG, CP0_STATUS_SR, CP0_STATUS_TS, IPL3_ENTRY, R4300,
    },
    dd::DiskDrive,
    dma::{DmaHandler, DmaResolver, DmaTargetKind},
    interrupt::{InterruptHandler, InterruptKind, InterruptTable},
    is_viewer::IsViewer,
    memory_map::*,
    memory_view::{self, MemoryDescriptor, MEMDESC_CONST, MEMDESC_SYSTEM_RAM},
    pif::{Pif, CART_CHANNEL, GAME_CONTROLLERS_COUNT, IPL3_OFFSET, PIF_ROM_SIZE},
    rcp::{
        ai::AI_STATUS_REG,
        pi::{
            PI_BSD_DOM1_LAT_REG, PI_BSD_DOM1_PGS_REG, PI_BSD_DOM1_PWD_REG, PI_BSD_DOM1_RLS_REG,
        },
        rsp::SP_MEM_SIZE,
        AiController, MiController, PiController, RdpCore, RiController, RspCore, SiController,
        ViController,
    },
    rdram::Rdram,
    storage::{MemoryStorage, StorageBackend},
};

/// Cycles between the reset button press and the NMI reaching the CPU
pub const NMI_DELAY: u64 = 50_000_000;

/// Where the boot code stores the RDRAM size for the game
const DRAM_SIZE_OFFSET: u32 = 0x318;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Initialized,
    PoweredOn,
    Running,
    Stopped,
}

fn shared<T>(value: T) -> Rc<RefCell<T>> {
    Rc::new(RefCell::new(value))
}

fn mapped<T: 'static>(
    base: u32,
    mask: u32,
    kind: MemoryKind,
    name: &'static str,
    context: &Rc<RefCell<T>>,
    read: fn(&mut T, u32) -> u32,
    write: fn(&mut T, u32, u32, u32),
) -> AddressRange {
    let (begin, end) = window(base, mask);
    AddressRange::new(begin, end, kind, MemHandler::bind(name, context, read, write))
}

/// The console: every subsystem, the memory map joining them and the
/// interrupt bindings driving them.
///
/// The device is the only strong owner of its subsystems. Siblings, memory
/// handlers and interrupt handlers refer to each other weakly.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Device {
    state: Cell<DeviceState>,
    boot_rom_base: u32,
    dram_size: usize,
    flags: RunFlags,
    #[derivative(Debug = "ignore")]
    bus: RefCell<Bus>,
    interrupts: InterruptTable,
    memory_view: Vec<MemoryDescriptor>,

    rdram: Rc<RefCell<Rdram>>,
    r4300: Rc<RefCell<R4300>>,
    cp0: Rc<RefCell<Cp0>>,
    mi: Rc<RefCell<MiController>>,
    ri: Rc<RefCell<RiController>>,
    vi: Rc<RefCell<ViController>>,
    rsp: Rc<RefCell<RspCore>>,
    rdp: Rc<RefCell<RdpCore>>,
    ai: Rc<RefCell<AiController>>,
    pi: Rc<RefCell<PiController>>,
    si: Rc<RefCell<SiController>>,
    pif: Rc<RefCell<Pif>>,
    cart_rom: Rc<RefCell<CartRom>>,
    cart: Rc<RefCell<Cartridge>>,
    dd: Option<Rc<RefCell<DiskDrive>>>,
    is_viewer: Rc<RefCell<IsViewer>>,
}

impl Device {
    /// Builds the console around the given media. Panics on an invalid
    /// configuration; call [DeviceConfig::validate] first to report it.
    pub fn init(config: &DeviceConfig, backends: Backends, media: MediaImages) -> Rc<Self> {
        if let Err(err) = config.validate() {
            panic!("invalid device configuration: {}", err);
        }
        Rc::new_cyclic(|this| Self::build(this, config, backends, media))
    }

    fn build(
        this: &Weak<Self>,
        config: &DeviceConfig,
        backends: Backends,
        media: MediaImages,
    ) -> Self {
        let Backends {
            core,
            audio,
            controllers,
            save,
            disk,
            cart_clock,
            dd_clock,
        } = backends;
        let MediaImages {
            pif_rom,
            rom,
            dd_rom,
            disk: disk_image,
        } = media;
        let rom_size = rom.len();
        let dd_rom_size = dd_rom.len();

        let rdram = shared(Rdram::new(config.dram_size));
        let r4300 = shared(R4300::new(
            core,
            config.cpu_mode,
            config.count_per_op,
            config.count_per_op_denom_pot,
            config.start_address,
        ));
        let (cp0, flags) = {
            let cpu = r4300.borrow();
            (cpu.cp0().clone(), cpu.flags().clone())
        };
        let cp0w = Rc::downgrade(&cp0);

        let mi = shared(MiController::new(cp0w.clone()));
        let ri = shared(RiController::new(Rc::downgrade(&rdram)));
        let vi = shared(ViController::new(
            config.vi_clock,
            config.expected_refresh_rate,
            Rc::downgrade(&mi),
            cp0w.clone(),
        ));
        let rsp = shared(RspCore::new(Rc::downgrade(&mi), Rc::downgrade(&ri), cp0w.clone()));
        let rdp = shared(RdpCore::new(
            Rc::downgrade(&mi),
            Rc::downgrade(&ri),
            Rc::downgrade(&rsp),
            cp0w.clone(),
        ));
        let ai = shared(AiController::new(
            audio,
            config.dma_modifier,
            Rc::downgrade(&mi),
            Rc::downgrade(&ri),
            Rc::downgrade(&vi),
            cp0w.clone(),
        ));

        // boot from the disk drive unless the cartridge is the one meant to
        // run alongside it
        let boot_from_disk = rom_size == 0
            || (dd_rom_size > 0 && rom.get(CART_MEDIA_BYTE).copied() != Some(CART_MEDIA_COMBO));
        let (boot_rom_base, boot_image) = if boot_from_disk {
            (MM_DD_ROM, dd_rom.as_slice())
        } else {
            (MM_CART_ROM, rom.as_slice())
        };
        tracing::info!(
            "[DEVICE] booting from {} at {:#010X}",
            if boot_from_disk { "disk drive ROM" } else { "cartridge ROM" },
            boot_rom_base
        );
        if boot_image.is_empty() {
            tracing::warn!("[DEVICE] no boot image, IPL3 will be blank");
        }
        let mut pif = Pif::new(pif_rom, cp0w.clone()).with_ipl3(boot_image);

        let cart = shared(build_cartridge(config, save, cart_clock));
        for (channel, device) in controllers.into_iter().enumerate() {
            if let Some(device) = device {
                pif.plug(channel, device);
            }
        }
        pif.plug(CART_CHANNEL, Box::new(CartJoybus::new(&cart)));
        let pif = shared(pif);

        let si = shared(SiController::new(
            config.si_dma_duration,
            Rc::downgrade(&mi),
            Rc::downgrade(&ri),
            Rc::downgrade(&pif),
            cp0w.clone(),
        ));
        let cart_rom = shared(CartRom::new(rom));
        let dd = (dd_rom_size > 0).then(|| {
            let disk = disk.or_else(|| {
                disk_image.map(|image| {
                    Box::new(MemoryStorage::from_bytes(image)) as Box<dyn StorageBackend>
                })
            });
            shared(DiskDrive::new(dd_rom, disk, dd_clock, cp0w.clone()))
        });
        let is_viewer = shared(IsViewer::new());

        let resolver = DmaResolver::standard(
            DmaHandler::bind(
                DmaTargetKind::CartDom3,
                &cart,
                Cartridge::dom3_dma_read,
                Cartridge::dom3_dma_write,
            ),
            DmaHandler::bind(
                DmaTargetKind::CartRom,
                &cart_rom,
                CartRom::dma_read,
                CartRom::dma_write,
            ),
            DmaHandler::bind(
                DmaTargetKind::CartDom2,
                &cart,
                Cartridge::dom2_dma_read,
                Cartridge::dom2_dma_write,
            ),
            dd.as_ref().map(|dd| {
                DmaHandler::bind(
                    DmaTargetKind::Disk,
                    dd,
                    DiskDrive::dma_read,
                    DiskDrive::dma_write,
                )
            }),
        );
        let pi = shared(PiController::new(
            resolver,
            Rc::downgrade(&mi),
            Rc::downgrade(&ri),
            cp0w.clone(),
        ));

        let mut builder = MemoryMapBuilder::new();
        {
            let dram_ptr = rdram.borrow_mut().as_mut_ptr();
            let regs_ptr = rdram.borrow_mut().regs.as_mut_ptr();
            let regs_len = rdram.borrow().regs.byte_len();
            builder
                .set(
                    SLOT_RDRAM,
                    mapped(
                        MM_RDRAM_DRAM,
                        0x3ef_ffff,
                        MemoryKind::Rdram,
                        "rdram_dram",
                        &rdram,
                        Rdram::read_dram,
                        Rdram::write_dram,
                    )
                    .with_host(dram_ptr, config.dram_size, MEMDESC_SYSTEM_RAM),
                )
                .set(
                    SLOT_RDRAM_REGS,
                    mapped(
                        MM_RDRAM_REGS,
                        0xf_ffff,
                        MemoryKind::RdramRegs,
                        "rdram_regs",
                        &rdram,
                        Rdram::read_regs,
                        Rdram::write_regs,
                    )
                    .with_host(regs_ptr, regs_len, 0),
                );
        }
        {
            let mut sp = rsp.borrow_mut();
            let mem_ptr = sp.mem_as_mut_ptr();
            let regs = (sp.regs.as_mut_ptr(), sp.regs.byte_len());
            let regs2 = (sp.regs2.as_mut_ptr(), sp.regs2.byte_len());
            drop(sp);
            builder
                .set(
                    SLOT_RSP_MEM,
                    mapped(
                        MM_RSP_MEM,
                        0xffff,
                        MemoryKind::RspMem,
                        "rsp_mem",
                        &rsp,
                        RspCore::read_mem,
                        RspCore::write_mem,
                    )
                    .with_host(mem_ptr, SP_MEM_SIZE, 0),
                )
                .set(
                    SLOT_RSP_REGS,
                    mapped(
                        MM_RSP_REGS,
                        0xffff,
                        MemoryKind::RspRegs,
                        "rsp_regs",
                        &rsp,
                        RspCore::read_regs,
                        RspCore::write_regs,
                    )
                    .with_host(regs.0, regs.1, 0),
                )
                .set(
                    SLOT_RSP_REGS2,
                    mapped(
                        MM_RSP_REGS2,
                        0xffff,
                        MemoryKind::RspRegs,
                        "rsp_regs2",
                        &rsp,
                        RspCore::read_regs2,
                        RspCore::write_regs2,
                    )
                    .with_host(regs2.0, regs2.1, 0),
                );
        }
        {
            let mut dp = rdp.borrow_mut();
            let dpc = (dp.dpc_regs.as_mut_ptr(), dp.dpc_regs.byte_len());
            let dps = (dp.dps_regs.as_mut_ptr(), dp.dps_regs.byte_len());
            drop(dp);
            builder
                .set(
                    SLOT_DPC_REGS,
                    mapped(
                        MM_DPC_REGS,
                        0xffff,
                        MemoryKind::DpRegs,
                        "dpc_regs",
                        &rdp,
                        RdpCore::read_dpc_regs,
                        RdpCore::write_dpc_regs,
                    )
                    .with_host(dpc.0, dpc.1, 0),
                )
                .set(
                    SLOT_DPS_REGS,
                    mapped(
                        MM_DPS_REGS,
                        0xffff,
                        MemoryKind::DpRegs,
                        "dps_regs",
                        &rdp,
                        RdpCore::read_dps_regs,
                        RdpCore::write_dps_regs,
                    )
                    .with_host(dps.0, dps.1, 0),
                );
        }

        macro_rules! map_regs {
            ($slot:expr, $base:expr, $kind:expr, $name:literal, $ctx:expr, $ty:ty) => {{
                let (ptr, len) = {
                    let mut ctx = $ctx.borrow_mut();
                    (ctx.regs.as_mut_ptr(), ctx.regs.byte_len())
                };
                builder.set(
                    $slot,
                    mapped(
                        $base,
                        0xffff,
                        $kind,
                        $name,
                        $ctx,
                        <$ty>::read_regs,
                        <$ty>::write_regs,
                    )
                    .with_host(ptr, len, 0),
                );
            }};
        }
        map_regs!(SLOT_MI_REGS, MM_MI_REGS, MemoryKind::MiRegs, "mi_regs", &mi, MiController);
        map_regs!(SLOT_VI_REGS, MM_VI_REGS, MemoryKind::ViRegs, "vi_regs", &vi, ViController);
        map_regs!(SLOT_AI_REGS, MM_AI_REGS, MemoryKind::AiRegs, "ai_regs", &ai, AiController);
        map_regs!(SLOT_PI_REGS, MM_PI_REGS, MemoryKind::PiRegs, "pi_regs", &pi, PiController);
        map_regs!(SLOT_RI_REGS, MM_RI_REGS, MemoryKind::RiRegs, "ri_regs", &ri, RiController);
        map_regs!(SLOT_SI_REGS, MM_SI_REGS, MemoryKind::SiRegs, "si_regs", &si, SiController);

        let (dd_regs_begin, dd_regs_end) = window(MM_DOM2_ADDR1, 0xff_ffff);
        let (dd_rom_begin, dd_rom_end) = window(MM_DD_ROM, 0x1ff_ffff);
        builder
            .set(SLOT_DD_REGS, AddressRange::unmapped(dd_regs_begin, dd_regs_end))
            .set(SLOT_DD_ROM, AddressRange::unmapped(dd_rom_begin, dd_rom_end));
        if let Some(dd) = &dd {
            let (regs_ptr, regs_len, rom_ptr) = {
                let mut drive = dd.borrow_mut();
                (drive.regs.as_mut_ptr(), drive.regs.byte_len(), drive.rom_as_mut_ptr())
            };
            builder
                .replace(
                    SLOT_DD_REGS,
                    mapped(
                        MM_DOM2_ADDR1,
                        0xff_ffff,
                        MemoryKind::DiskRegs,
                        "dd_regs",
                        dd,
                        DiskDrive::read_regs,
                        DiskDrive::write_regs,
                    )
                    .with_host(regs_ptr, regs_len, 0),
                )
                .replace(
                    SLOT_DD_ROM,
                    mapped(
                        MM_DD_ROM,
                        dd_rom_size as u32 - 1,
                        MemoryKind::DiskRom,
                        "dd_rom",
                        dd,
                        DiskDrive::read_rom,
                        DiskDrive::write_rom,
                    )
                    .with_host(rom_ptr, dd_rom_size, MEMDESC_CONST),
                );
            tracing::debug!("[DEVICE] disk drive mapped with a {:#x} byte ROM", dd_rom_size);
        }

        let (save_ptr, save_len) = cart.borrow_mut().save_as_mut_ptr();
        builder
            .set(
                SLOT_CART_DOM2,
                mapped(
                    MM_DOM2_ADDR2,
                    0x1_ffff,
                    MemoryKind::FlashStatus,
                    "cart_dom2",
                    &cart,
                    Cartridge::read_dom2,
                    Cartridge::write_dom2,
                )
                .with_host(save_ptr, save_len, 0),
            )
            .set(
                SLOT_IS_VIEWER,
                mapped(
                    MM_IS_VIEWER,
                    0xfff,
                    MemoryKind::IsViewer,
                    "is_viewer",
                    &is_viewer,
                    IsViewer::read,
                    IsViewer::write,
                ),
            );
        if rom_size > 0 {
            let rom_ptr = cart_rom.borrow_mut().as_mut_ptr();
            builder.set(
                SLOT_CART_ROM,
                mapped(
                    MM_CART_ROM,
                    rom_size as u32 - 1,
                    MemoryKind::Rom,
                    "cart_rom",
                    &cart_rom,
                    CartRom::read_rom,
                    CartRom::write_rom,
                )
                .with_host(rom_ptr, rom_size, MEMDESC_CONST),
            );
        }
        let (pif_rom_ptr, pif_ram_ptr) = {
            let mut pif = pif.borrow_mut();
            (pif.rom_as_mut_ptr(), pif.ram_as_mut_ptr())
        };
        builder.set(
            SLOT_PIF,
            mapped(
                MM_PIF_MEM,
                0xffff,
                MemoryKind::Pif,
                "pif_mem",
                &pif,
                Pif::read_mem,
                Pif::write_mem,
            )
            .with_host(pif_rom_ptr, PIF_ROM_SIZE, MEMDESC_CONST),
        );

        let bus = Bus::new(builder.freeze());
        pi.borrow().dma_resolver().check_against(bus.map());
        let memory_view = memory_view::export(bus.map(), pif_ram_ptr);

        let dd_handlers = match &dd {
            Some(dd) => [
                InterruptHandler::bind("dd", dd, DiskDrive::mecha_int_handler),
                InterruptHandler::bind("dd", dd, DiskDrive::bm_int_handler),
                InterruptHandler::bind("dd", dd, DiskDrive::dv_int_handler),
            ],
            None => [
                InterruptHandler::unbound("dd"),
                InterruptHandler::unbound("dd"),
                InterruptHandler::unbound("dd"),
            ],
        };
        let [dd_mecha, dd_bm, dd_dv] = dd_handlers;
        let interrupts = InterruptTable::new([
            InterruptHandler::bind("vi", &vi, ViController::vertical_interrupt_event),
            InterruptHandler::bind("r4300", &cp0, Cp0::compare_int_handler),
            InterruptHandler::bind("r4300", &cp0, Cp0::check_int_handler),
            InterruptHandler::bind("si", &si, SiController::end_of_dma_event),
            InterruptHandler::bind("pi", &pi, PiController::end_of_dma_event),
            InterruptHandler::bind("cp0", &cp0, Cp0::special_int_handler),
            InterruptHandler::bind("ai", &ai, AiController::end_of_dma_event),
            InterruptHandler::bind("sp", &rsp, RspCore::interrupt_event),
            InterruptHandler::bind("dp", &rdp, RdpCore::interrupt_event),
            InterruptHandler::bind("pif", &pif, Pif::hw2_int_handler),
            InterruptHandler::bind_weak("device", this.clone(), Self::nmi_int_handler),
            InterruptHandler::bind_weak("device", this.clone(), Self::reset_hard_int_handler),
            InterruptHandler::bind("sp", &rsp, RspCore::end_of_dma_event),
            dd_mecha,
            dd_bm,
            dd_dv,
        ]);

        tracing::info!(
            "[DEVICE] initialized: {:#x} bytes RDRAM, {:#x} byte ROM, disk drive {}",
            config.dram_size,
            rom_size,
            if dd.is_some() { "present" } else { "absent" }
        );

        Self {
            state: Cell::new(DeviceState::Initialized),
            boot_rom_base,
            dram_size: config.dram_size,
            flags,
            bus: RefCell::new(bus),
            interrupts,
            memory_view,
            rdram,
            r4300,
            cp0,
            mi,
            ri,
            vi,
            rsp,
            rdp,
            ai,
            pi,
            si,
            pif,
            cart_rom,
            cart,
            dd,
            is_viewer,
        }
    }

    fn poweron_subsystems(&self) {
        self.rdram.borrow_mut().poweron();
        self.r4300.borrow_mut().poweron();
        self.rdp.borrow_mut().poweron();
        self.rsp.borrow_mut().poweron();
        self.ai.borrow_mut().poweron();
        self.mi.borrow_mut().poweron();
        self.pi.borrow_mut().poweron();
        self.ri.borrow_mut().poweron();
        self.si.borrow_mut().poweron();
        self.vi.borrow_mut().poweron();
        self.pif.borrow_mut().poweron();
        self.cart_rom.borrow_mut().poweron();
        self.cart.borrow_mut().poweron();
        self.is_viewer.borrow_mut().poweron();

        {
            let mut pif = self.pif.borrow_mut();
            for channel in 0..GAME_CONTROLLERS_COUNT {
                if let Some(hook) = pif.channel_mut(channel).and_then(|d| d.poweron_hook()) {
                    tracing::debug!("[DEVICE] powering on controller {}", channel);
                    hook.poweron();
                }
            }
        }

        if let Some(dd) = &self.dd {
            dd.borrow_mut().poweron();
        }
    }

    pub fn poweron(&self) {
        assert_ne!(
            self.state.get(),
            DeviceState::Running,
            "poweron while the device is running"
        );
        self.poweron_subsystems();
        self.state.set(DeviceState::PoweredOn);
        tracing::info!("[DEVICE] powered on");
    }

    /// Does what the PIF boot ROM leaves behind: IPL3 in RSP DMEM, the PI
    /// domain 1 timings from the boot image header, the RDRAM size where the
    /// game looks for it, and the CPU at the IPL3 entry point.
    pub fn execute_boot_rom(&self) {
        let ipl3 = self.pif.borrow().ipl3().to_vec();
        self.rsp.borrow_mut().load_mem(IPL3_OFFSET, &ipl3);

        let header = self.bus.borrow().read_u32(self.boot_rom_base);
        {
            let mut pi = self.pi.borrow_mut();
            pi.regs.set(PI_BSD_DOM1_LAT_REG, header & 0xff);
            pi.regs.set(PI_BSD_DOM1_PWD_REG, (header >> 8) & 0xff);
            pi.regs.set(PI_BSD_DOM1_PGS_REG, (header >> 16) & 0x0f);
            pi.regs.set(PI_BSD_DOM1_RLS_REG, (header >> 20) & 0x03);
        }
        self.rdram
            .borrow_mut()
            .write_dram(DRAM_SIZE_OFFSET, self.dram_size as u32, 0xffff_ffff);

        self.r4300.borrow_mut().jump_to(IPL3_ENTRY);
        tracing::debug!("[DEVICE] boot ROM done, jumping to {:#010X}", IPL3_ENTRY);
    }

    /// Runs the CPU until [Device::stop] takes effect.
    pub fn run(&self) {
        assert!(
            matches!(self.state.get(), DeviceState::PoweredOn | DeviceState::Stopped),
            "run called on a device in {:?} state",
            self.state.get()
        );
        self.state.set(DeviceState::Running);
        {
            let bus = self.bus.borrow();
            R4300::run(&self.r4300, &bus, &self.interrupts);
        }
        self.state.set(DeviceState::Stopped);
        tracing::info!("[DEVICE] stopped");
    }

    /// Asks the CPU to return from [Device::run] at its next interrupt
    /// boundary.
    pub fn stop(&self) {
        self.flags.request_stop();
    }

    /// Power cycles the console at the next interrupt boundary.
    pub fn hard_reset(&self) {
        tracing::info!("[DEVICE] hard reset requested");
        self.flags.request_hard_reset();
    }

    /// Presses the reset button: the PIF interrupt now, the NMI later.
    pub fn soft_reset(&self) {
        tracing::info!("[DEVICE] soft reset");
        let mut cp0 = self.cp0.borrow_mut();
        cp0.add_interrupt_event(InterruptKind::Hw2, 0);
        cp0.add_interrupt_event(InterruptKind::Nmi, NMI_DELAY);
    }

    fn nmi_int_handler(&self) {
        tracing::info!("[DEVICE] NMI");
        {
            let mut cp0 = self.cp0.borrow_mut();
            let status = cp0.regs[CP0_STATUS_REG];
            cp0.regs[CP0_STATUS_REG] = (status & !(CP0_STATUS_SR | CP0_STATUS_TS | 0x0008_0000))
                | CP0_STATUS_ERL
                | CP0_STATUS_BEV
                | CP0_STATUS_SR;
            cp0.regs[CP0_CAUSE_REG] = 0;
        }
        let old_pc = self.r4300.borrow().pc();

        self.execute_boot_rom();

        {
            let mut cp0 = self.cp0.borrow_mut();
            cp0.scheduler.reset();
            cp0.init_interrupt();
        }
        self.vi.borrow().schedule_next();
        self.ai.borrow_mut().regs.set(AI_STATUS_REG, 0);
        self.cp0.borrow_mut().regs[CP0_ERROREPC_REG] = old_pc;
    }

    fn reset_hard_int_handler(&self) {
        tracing::info!("[DEVICE] hard reset");
        self.poweron_subsystems();
        self.execute_boot_rom();
    }

    pub fn state(&self) -> DeviceState {
        self.state.get()
    }

    pub fn boot_rom_base(&self) -> u32 {
        self.boot_rom_base
    }

    /// Shared stop/reset requests, for a host thread to hold on to.
    pub fn run_flags(&self) -> RunFlags {
        self.flags.clone()
    }

    pub fn bus(&self) -> Ref<'_, Bus> {
        self.bus.borrow()
    }

    pub fn interrupts(&self) -> &InterruptTable {
        &self.interrupts
    }

    pub fn memory_view(&self) -> &[MemoryDescriptor] {
        &self.memory_view
    }

    /// Usable while the device runs, from a hook or interrupt handler.
    pub fn attach_breakpoints(&self, hook: Rc<RefCell<dyn BreakpointHook>>) {
        self.bus.borrow().attach_breakpoints(hook);
    }

    pub fn watch(&self, begin: u32, end: u32) {
        self.bus.borrow().watch(begin, end);
    }

    pub fn unwatch_all(&self) {
        self.bus.borrow().unwatch_all();
    }

    pub fn rdram(&self) -> &Rc<RefCell<Rdram>> {
        &self.rdram
    }

    pub fn r4300(&self) -> &Rc<RefCell<R4300>> {
        &self.r4300
    }

    pub fn cp0(&self) -> &Rc<RefCell<Cp0>> {
        &self.cp0
    }

    pub fn mi(&self) -> &Rc<RefCell<MiController>> {
        &self.mi
    }

    pub fn vi(&self) -> &Rc<RefCell<ViController>> {
        &self.vi
    }

    pub fn ai(&self) -> &Rc<RefCell<AiController>> {
        &self.ai
    }

    pub fn pi(&self) -> &Rc<RefCell<PiController>> {
        &self.pi
    }

    pub fn si(&self) -> &Rc<RefCell<SiController>> {
        &self.si
    }

    pub fn rsp(&self) -> &Rc<RefCell<RspCore>> {
        &self.rsp
    }

    pub fn rdp(&self) -> &Rc<RefCell<RdpCore>> {
        &self.rdp
    }

    pub fn pif(&self) -> &Rc<RefCell<Pif>> {
        &self.pif
    }

    pub fn cart_rom(&self) -> &Rc<RefCell<CartRom>> {
        &self.cart_rom
    }

    pub fn cart(&self) -> &Rc<RefCell<Cartridge>> {
        &self.cart
    }

    pub fn dd(&self) -> Option<&Rc<RefCell<DiskDrive>>> {
        self.dd.as_ref()
    }

    pub fn is_viewer(&self) -> &Rc<RefCell<IsViewer>> {
        &self.is_viewer
    }
}
