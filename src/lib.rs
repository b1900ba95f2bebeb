use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
pub mod fields;
pub mod memory;
use memory::{System, PEND_ITIMER};
pub mod psa;
pub mod dat;
pub mod conversions;
pub mod processor;
use processor::{Cpu, Debugger};
pub mod parser;
pub mod instructions;
pub mod float;
pub mod decimal;
pub mod control;
pub mod xstore;
pub mod assist;
pub mod io;
pub mod sigp;
pub mod devices;
use devices::{Device, Signal};
use log::info;
use thiserror::Error;

/// Seconds between the TOD epoch (1900) and the host epoch (1970).
const TOD_EPOCH_OFFSET: u64 = 2_208_988_800;

/// Failures of the surrounding process; guest-visible faults never surface
/// here, they become program interruptions inside the core.
#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("cannot read core image {path}: {source}")]
    Image {
        path: String,
        source: std::io::Error,
    },
    #[error("core image does not fit the configured storage")]
    ImageTooBig,
    #[error("IPL PSW at absolute zero is invalid")]
    BadIplPsw,
    #[error("cannot spawn CPU thread: {0}")]
    CpuThread(std::io::Error),
}

pub struct Configuration {
    /// Main storage size in bytes.
    pub mainsize: usize,
    /// Expanded storage size in 4 KiB blocks.
    pub xpndsize: usize,
    pub numcpu: usize,
    /// Where the core image lands in absolute storage.
    pub load_address: u32,
    pub devices: Vec<Box<dyn Device>>,
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration {
            mainsize: 16 << 20,
            xpndsize: 0,
            numcpu: 1,
            load_address: 0,
            devices: Vec::new(),
        }
    }
}

pub struct Emulator {
    pub sys: Arc<System>,
    load_address: u32,
}

impl Emulator {
    pub fn new(config: Configuration) -> Emulator {
        let sys = Arc::new(System::new(config.mainsize, config.xpndsize, config.numcpu));
        {
            let mut devices = sys.devices.lock().unwrap_or_else(|e| e.into_inner());
            *devices = config.devices;
        }
        info!(
            "em390: {} KiB main, {} expanded blocks, {} CPU(s)",
            config.mainsize >> 10,
            config.xpndsize,
            config.numcpu
        );
        Emulator { sys, load_address: config.load_address }
    }

    fn load(&self, progname: &str) -> Result<(), EmulatorError> {
        let program = fs::read(progname).map_err(|source| EmulatorError::Image {
            path: progname.to_string(),
            source,
        })?;
        if self.load_address as usize + program.len() > self.sys.mainsize {
            return Err(EmulatorError::ImageTooBig);
        }
        self.sys.store_abs(self.load_address, &program);
        info!(
            "loaded {} bytes at {:08X}",
            program.len(),
            self.load_address
        );
        Ok(())
    }

    /// Load the core image, IPL CPU 0 from the PSW at absolute zero, and run
    /// until every CPU has entered a disabled wait. Secondary CPUs come up
    /// stopped and wait for a SIGP.
    pub fn run(&mut self, program: &str, debug: bool) -> Result<(), EmulatorError> {
        self.load(program)?;

        // TOD tick: advance the clock and the S/370 interval timers
        let timer = timer::Timer::new();
        let ticksys = Arc::clone(&self.sys);
        let _tick = timer.schedule_repeating(chrono::Duration::milliseconds(10), move || {
            tod_tick(&ticksys);
        });

        let mut handles = Vec::new();
        for n in 1..self.sys.numcpu {
            let sys = Arc::clone(&self.sys);
            let handle = thread::Builder::new()
                .name(format!("cpu{:04X}", n))
                .spawn(move || {
                    let mut cpu = Cpu::new(n as u16, sys);
                    cpu.stopped = true;
                    cpu.sys.cpus[n]
                        .state
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .stopped = true;
                    run_cpu(&mut cpu, false);
                })
                .map_err(EmulatorError::CpuThread)?;
            handles.push(handle);
        }

        let mut cpu = Cpu::new(0, Arc::clone(&self.sys));
        let mut iplpsw = [0u8; 8];
        self.sys.fetch_abs(psa::PSA_IPLPSW, &mut iplpsw);
        if cpu.psw.load(&iplpsw).is_err() {
            return Err(EmulatorError::BadIplPsw);
        }
        update_tod_clock(&self.sys);
        run_cpu(&mut cpu, debug);

        // a quit on the IPL CPU takes the configuration down
        for (n, slot) in self.sys.cpus.iter().enumerate() {
            if n != 0 {
                slot.raise(memory::PEND_STOP);
            }
        }
        Ok(())
    }
}

fn run_cpu(cpu: &mut Cpu, debug: bool) {
    let mut debugger = if debug { Some(Debugger::new()) } else { None };
    let mut idle = false;
    loop {
        if !idle {
            match cpu.clock_cycle() {
                Signal::Quit => break,
                _ => {}
            }
        } else {
            idle = false;
        }
        if let Some(dbg) = debugger.as_mut() {
            match dbg.update(cpu) {
                Signal::Quit => return,
                Signal::NoOp => idle = true,
                _ => {}
            }
        }
    }
    info!("CPU{:04X}: disabled wait, stopping", cpu.cpuad);
}

/// Pull the TOD clock forward from the host clock. The value is kept in the
/// internal form with bit 51 as one microsecond, pre-shifted right by one
/// byte; it never moves backwards.
pub fn update_tod_clock(sys: &System) -> u64 {
    let now = chrono::Utc::now();
    let micros = (now.timestamp() as u64 + TOD_EPOCH_OFFSET) * 1_000_000
        + now.timestamp_subsec_micros() as u64;
    let tod = micros << 4;
    let _todlock = sys.todlock.lock().unwrap_or_else(|e| e.into_inner());
    let old = sys.todclk.load(Ordering::Relaxed);
    if tod > old {
        sys.todclk.store(tod, Ordering::Relaxed);
        tod
    } else {
        old
    }
}

/// One 10ms timer tick: advance the TOD and decrement each online CPU's
/// interval timer at PSA+X'50'.
fn tod_tick(sys: &System) {
    update_tod_clock(sys);
    for slot in sys.cpus.iter() {
        let state = slot.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.online {
            continue;
        }
        let itimer_addr = state.prefix + psa::PSA_INTTIMER;
        drop(state);
        if sys.chkaddr(itimer_addr, 4).is_err() {
            continue;
        }
        let old = sys.fetch4_abs(itimer_addr) as i32;
        // three 300 Hz units per tick, carried in bit 23
        let new = old.wrapping_sub(0x300);
        sys.store4_abs(itimer_addr, new as u32);
        if old >= 0 && new < 0 {
            slot.raise(PEND_ITIMER);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tod_clock_is_monotonic() {
        let sys = System::new(0x10000, 0, 1);
        let first = update_tod_clock(&sys);
        let second = update_tod_clock(&sys);
        assert!(second >= first);
        assert!(first > 0);
        // forced regression is ignored
        sys.todclk.store(u64::MAX, Ordering::Relaxed);
        assert_eq!(update_tod_clock(&sys), u64::MAX);
    }

    #[test]
    fn interval_timer_decrements_and_raises() {
        let sys = System::new(0x10000, 0, 1);
        sys.cpus[0].state.lock().unwrap().online = true;
        sys.store4_abs(psa::PSA_INTTIMER, 0x100);
        tod_tick(&sys);
        assert_eq!(sys.fetch4_abs(psa::PSA_INTTIMER), 0x100u32.wrapping_sub(0x300));
        assert_ne!(
            sys.cpus[0].pending.load(Ordering::SeqCst) & PEND_ITIMER,
            0
        );
    }
}
