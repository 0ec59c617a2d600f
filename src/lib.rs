//! Core of a System/370 CPU emulator: instruction-execution engine, register
//! file, PSW, memory access with storage keys and DAT, interrupt controller,
//! timer facility, and the binary/hex-float/packed-decimal arithmetic units.
//! Channel I/O, the physical memory array, and the front end are external
//! collaborators (`IoSubsystem`, `MemoryStore`, the `s370emu` binary).

pub mod conversions;
pub mod decimal;
pub mod dispatch;
pub mod fixed;
pub mod float;
pub mod interrupt;
pub mod io;
pub mod memory;
pub mod psw;
pub mod registers;
pub mod step;
pub mod timer;
pub mod translation;

use interrupt::{InterruptClass, InterruptLatches, Irc};
use io::{IoSubsystem, NullIoSubsystem};
use log::{debug, warn};
use memory::Mal;
use psw::Psw;
use registers::Registers;
use step::StepInfo;
use timer::Timer;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IPL image {0} does not fit in configured memory")]
    ImageTooLarge(String),
    #[error("failed to read IPL image {0}: {1}")]
    Io(String, std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("memory size must be a positive number of kilobytes, got {0}")]
    InvalidMemorySize(i64),
}

/// The full architectural machine state (§3). Fields are public: per
/// §9's design note, CC/progMask/register-modification tracking are
/// deliberately-global CPU state and should not be hidden behind narrow
/// accessors in the hot path.
pub struct Cpu {
    pub psw: Psw,
    pub regs: Registers,
    pub mal: Mal,
    pub timer: Timer,
    pub latches: InterruptLatches,
    pub io: Box<dyn IoSubsystem>,
    /// Set by a handler that branched, so the stepper does not also advance
    /// IA by ILC*2 on top of the handler's own IA update.
    pub branch_taken: bool,
    pub halted: bool,
}

impl Cpu {
    pub fn new(mal: Mal) -> Self {
        Cpu {
            psw: Psw::new(),
            regs: Registers::new(),
            mal,
            timer: Timer::new(),
            latches: InterruptLatches::new(),
            io: Box::new(NullIoSubsystem),
            branch_taken: false,
            halted: false,
        }
    }

    pub fn attach_io(&mut self, io: Box<dyn IoSubsystem>) {
        self.io = io;
    }

    /// One pass of the stepper loop (§4.6): timer update, interrupt check,
    /// fetch/decode/dispatch, retire-or-trap. Returns `false` when the CPU
    /// should stop (wait state with nothing to wake it).
    pub fn step(&mut self) -> bool {
        self.update_timer();
        if self.serve_pending_interrupt() {
            return true;
        }
        if self.psw.wait && !self.latches.any_pending() {
            return false;
        }

        self.branch_taken = false;
        let (step_info, _length) = match dispatch::fetch_and_decode(self) {
            Ok(v) => v,
            Err(irc) => {
                self.raise_program_interrupt(irc, 0);
                return true;
            }
        };

        let irc = dispatch::execute(self, &step_info);
        if irc.is_trap() {
            warn!("program check {:?} at ia={:06x}", irc, self.psw.ia);
            self.raise_program_interrupt(irc, step_info.ilc);
        } else if !self.branch_taken {
            self.psw.ia = (self.psw.ia + step_info.ilc as u32 * 2) & 0x00ff_ffff;
        }
        true
    }

    fn update_timer(&mut self) {
        self.timer.update(&mut self.mal, &mut self.latches);
    }

    /// Checks pending conditions against PSW mask bits and, if one is both
    /// pending and unmasked, performs the interruption swap (§4.7). Highest
    /// priority first: machine-check, SVC, program, external, I/O, restart —
    /// only external/I/O/timer sources are modeled as asynchronous latches
    /// here, since program/SVC/machine-check arise synchronously from
    /// instruction execution.
    fn serve_pending_interrupt(&mut self) -> bool {
        if let Some(event) = self.io.poll_interrupt() {
            debug!("io interrupt from device {:#06x}", event.device_address);
            self.psw = interrupt::raise_io_interrupt(&mut self.mal, &mut self.psw, event.device_address);
            return true;
        }
        let external_enabled = self.psw.system_mask_set(psw::SystemMaskBit::ExternalEnable);
        if external_enabled && (self.latches.interval_timer || self.latches.clock_comparator || self.latches.cpu_timer || self.latches.external) {
            debug!("external interrupt, latches={:?}", self.latches);
            self.latches.interval_timer = false;
            self.latches.clock_comparator = false;
            self.latches.cpu_timer = false;
            self.latches.external = false;
            self.psw = interrupt::raise_external_interrupt(&mut self.mal, &mut self.psw, 0);
            return true;
        }
        false
    }

    fn raise_program_interrupt(&mut self, irc: Irc, ilc: u8) {
        self.psw = interrupt::raise_program_interrupt(&mut self.mal, &mut self.psw, irc, ilc, false);
    }

    pub fn raise_svc(&mut self, svc_number: u8, ilc: u8) {
        self.psw = interrupt::raise_svc_interrupt(&mut self.mal, &mut self.psw, svc_number, ilc);
    }
}

/// Low-storage preset used by IPL: the values the hardware expects in the
/// doubleword at 0x0 before restart, and the memory size to allocate.
/// Mirrors the teacher's `Configuration` (lib.rs) / `atari.rs` machine
/// preset, generalised from one hardcoded Atari ST layout to a named
/// `ipl_default()` constructor.
pub struct Configuration {
    pub memory_kb: usize,
    pub ipl_psw: Psw,
}

impl Configuration {
    pub fn ipl_default() -> Self {
        let mut psw = Psw::new();
        psw.ia = 0;
        Configuration { memory_kb: 16 * 1024, ipl_psw: psw }
    }

    pub fn with_memory_kb(mut self, kb: usize) -> Result<Self, ConfigError> {
        if kb == 0 {
            return Err(ConfigError::InvalidMemorySize(0));
        }
        self.memory_kb = kb;
        Ok(self)
    }
}

/// Top-level driver: owns the `Cpu` and the IPL image, matching the
/// teacher's `Emulator::run`/`load`/`new` shape (lib.rs).
pub struct Emulator {
    pub cpu: Cpu,
}

impl Emulator {
    pub fn new(config: Configuration) -> Self {
        let ram = memory::Ram::new(config.memory_kb * 1024);
        let mal = Mal::new(ram);
        let mut cpu = Cpu::new(mal);
        cpu.psw = config.ipl_psw;
        Emulator { cpu }
    }

    pub fn load_ipl_image(&mut self, bytes: &[u8], base_address: usize) -> Result<(), LoadError> {
        if base_address + bytes.len() > self.cpu.mal.size() {
            return Err(LoadError::ImageTooLarge(format!("{} bytes at {:#x}", bytes.len(), base_address)));
        }
        for (i, &b) in bytes.iter().enumerate() {
            self.cpu.mal.store_byte_raw(base_address + i, b);
        }
        Ok(())
    }

    pub fn run(&mut self) {
        loop {
            if !self.cpu.step() {
                break;
            }
            if self.cpu.halted {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_emulator_starts_at_ia_zero() {
        let emu = Emulator::new(Configuration::ipl_default());
        assert_eq!(emu.cpu.psw.ia, 0);
    }

    #[test]
    fn step_retires_ar_and_advances_ia() {
        let mut emu = Emulator::new(Configuration::ipl_default());
        emu.cpu.psw.ia = 0x400;
        emu.load_ipl_image(&[0x1A, 0x12], 0x400).unwrap();
        emu.cpu.regs.set_gpr(1, 5);
        emu.cpu.regs.set_gpr(2, 7);
        assert!(emu.cpu.step());
        assert_eq!(emu.cpu.regs.gpr(1), 12);
        assert_eq!(emu.cpu.psw.ia, 0x402);
    }
}
