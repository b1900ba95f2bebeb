// This is the place for the basic processor implementation: the per-CPU
// register context, the fetch-decode-execute loop, interruption delivery and
// the program-check path. Addressing and operand access live in the dat
// module, the opcode tables in the parser module.

use crate::dat::{Cr0, TlbEntry, TLB_SIZE};
use crate::devices::Signal;
use crate::fields::{Cc, Exception};
use crate::memory::{
    System, PEND_CLKC, PEND_EMERSIG, PEND_EXTCALL, PEND_INTKEY, PEND_ITIMER, PEND_PTIMER,
    PEND_PTLB, PEND_RESTART, PEND_START, PEND_STOP,
};
use crate::parser;
use crate::psa;
use log::{error, trace};
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::io::prelude::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use termion::{clear, color, cursor};

/// Internal form of the program status word.
#[derive(Debug, Clone)]
pub struct Psw {
    pub sysmask: u8,
    /// Bits 0-3 = key, 4-7 = zeroes.
    pub pkey: u8,
    pub ecmode: bool,
    pub mach: bool,
    pub wait: bool,
    pub prob: bool,
    pub armode: bool,
    pub space: bool,
    /// false = 24-bit, true = 31-bit.
    pub amode: bool,
    pub fomask: bool,
    pub domask: bool,
    pub eumask: bool,
    pub sgmask: bool,
    pub cc: Cc,
    pub ilc: u8,
    pub intcode: u16,
    pub ia: u32,
}

pub const PSW_PERMODE: u8 = 0x40;
pub const PSW_DATMODE: u8 = 0x04;
pub const PSW_IOMASK: u8 = 0x02;
pub const PSW_EXTMASK: u8 = 0x01;

impl Psw {
    pub fn new() -> Psw {
        Psw {
            sysmask: 0,
            pkey: 0,
            ecmode: false,
            mach: false,
            wait: false,
            prob: false,
            armode: false,
            space: false,
            amode: false,
            fomask: false,
            domask: false,
            eumask: false,
            sgmask: false,
            cc: Cc::Equal,
            ilc: 0,
            intcode: 0,
            ia: 0,
        }
    }

    /// The wrap mask of the current addressing mode.
    #[inline]
    pub fn amode_mask(&self) -> u32 {
        if self.amode {
            0x7FFF_FFFF
        } else {
            0x00FF_FFFF
        }
    }

    /// DAT is effective only in EC mode with the DAT bit on.
    #[inline]
    pub fn real_mode(&self) -> bool {
        !self.ecmode || self.sysmask & PSW_DATMODE == 0
    }

    /// Advance the instruction address by an ILC, keeping it inside the
    /// current AMODE.
    #[inline]
    pub fn advance(&mut self, ilc: u8) {
        self.ilc = ilc;
        self.ia = self.ia.wrapping_add(ilc as u32) & self.amode_mask();
    }

    pub fn primary_space_mode(&self) -> bool {
        !self.space && !self.armode
    }

    pub fn secondary_space_mode(&self) -> bool {
        self.space && !self.armode
    }

    pub fn access_register_mode(&self) -> bool {
        !self.space && self.armode
    }

    pub fn home_space_mode(&self) -> bool {
        self.space && self.armode
    }

    /// Encode into the architectural 8-byte form.
    pub fn store(&self) -> [u8; 8] {
        let mut b = [0u8; 8];
        b[0] = self.sysmask;
        b[1] = (self.pkey & 0xF0)
            | if self.ecmode { 0x08 } else { 0 }
            | if self.mach { 0x04 } else { 0 }
            | if self.wait { 0x02 } else { 0 }
            | if self.prob { 0x01 } else { 0 };
        if self.ecmode {
            b[2] = (if self.space { 0x80 } else { 0 })
                | (if self.armode { 0x40 } else { 0 })
                | ((self.cc as u8) << 4)
                | (if self.fomask { 0x08 } else { 0 })
                | (if self.domask { 0x04 } else { 0 })
                | (if self.eumask { 0x02 } else { 0 })
                | (if self.sgmask { 0x01 } else { 0 });
            b[3] = 0;
            let ia = self.ia & 0x7FFF_FFFF;
            b[4] = (if self.amode { 0x80 } else { 0 }) | (ia >> 24) as u8;
            b[5] = (ia >> 16) as u8;
            b[6] = (ia >> 8) as u8;
            b[7] = ia as u8;
        } else {
            b[2] = (self.intcode >> 8) as u8;
            b[3] = self.intcode as u8;
            b[4] = ((self.ilc / 2) << 6)
                | ((self.cc as u8) << 4)
                | (if self.fomask { 0x08 } else { 0 })
                | (if self.domask { 0x04 } else { 0 })
                | (if self.eumask { 0x02 } else { 0 })
                | (if self.sgmask { 0x01 } else { 0 });
            b[5] = (self.ia >> 16) as u8;
            b[6] = (self.ia >> 8) as u8;
            b[7] = self.ia as u8;
        }
        b
    }

    /// Decode from the architectural 8-byte form; specification exception
    /// on reserved bits.
    pub fn load(&mut self, b: &[u8]) -> Result<(), Exception> {
        self.sysmask = b[0];
        self.pkey = b[1] & 0xF0;
        self.ecmode = b[1] & 0x08 != 0;
        self.mach = b[1] & 0x04 != 0;
        self.wait = b[1] & 0x02 != 0;
        self.prob = b[1] & 0x01 != 0;
        if self.ecmode {
            if b[0] & 0xB8 != 0 || b[3] != 0 {
                return Err(Exception::Specification);
            }
            self.space = b[2] & 0x80 != 0;
            self.armode = b[2] & 0x40 != 0;
            self.cc = Cc::from_bits(b[2] >> 4);
            self.fomask = b[2] & 0x08 != 0;
            self.domask = b[2] & 0x04 != 0;
            self.eumask = b[2] & 0x02 != 0;
            self.sgmask = b[2] & 0x01 != 0;
            self.amode = b[4] & 0x80 != 0;
            self.ia = ((b[4] as u32 & 0x7F) << 24)
                | ((b[5] as u32) << 16)
                | ((b[6] as u32) << 8)
                | b[7] as u32;
        } else {
            self.space = false;
            self.armode = false;
            self.intcode = ((b[2] as u16) << 8) | b[3] as u16;
            self.ilc = (b[4] >> 6) * 2;
            self.cc = Cc::from_bits(b[4] >> 4);
            self.fomask = b[4] & 0x08 != 0;
            self.domask = b[4] & 0x04 != 0;
            self.eumask = b[4] & 0x02 != 0;
            self.sgmask = b[4] & 0x01 != 0;
            self.amode = false;
            self.ia = ((b[5] as u32) << 16) | ((b[6] as u32) << 8) | b[7] as u32;
        }
        if self.ia & 1 != 0 {
            return Err(Exception::Specification);
        }
        Ok(())
    }
}

/// Per-CPU register context. Owned by exactly one CPU thread; everything
/// shared lives behind the system block.
pub struct Cpu {
    pub gpr: [u32; 16],
    pub ar: [u32; 16],
    pub cr: [u32; 16],
    /// Floating point registers as word pairs; register numbers 0, 2, 4, 6
    /// index the even words.
    pub fpr: [u32; 8],
    pub psw: Psw,
    pub prefix: u32,
    pub cpuad: u16,
    /// CPU timer, decremented as the TOD clock advances.
    pub ptimer: i64,
    pub clkc: u64,
    pub todoffset: u64,
    /// TOD programmable field for STCKE.
    pub todpr: u16,
    pub tlb: [TlbEntry; TLB_SIZE],
    /// Effective address of the last EXECUTE target; relative branches
    /// executed via EX use it as their base.
    pub et: u32,
    /// Translation exception address for the PSA.
    pub tea: u32,
    pub excarid: u8,
    pub stopped: bool,
    last_tod: u64,
    pub sys: Arc<System>,
}

impl Cpu {
    pub fn new(cpuad: u16, sys: Arc<System>) -> Cpu {
        {
            let slot = &sys.cpus[cpuad as usize];
            let mut state = slot.state.lock().unwrap_or_else(|e| e.into_inner());
            state.online = true;
            state.stopped = false;
            state.prefix = 0;
        }
        Cpu {
            gpr: [0; 16],
            ar: [0; 16],
            cr: [0; 16],
            fpr: [0; 8],
            psw: Psw::new(),
            prefix: 0,
            cpuad,
            ptimer: 0,
            clkc: 0,
            todoffset: 0,
            todpr: 0,
            tlb: [TlbEntry::invalid(); TLB_SIZE],
            et: 0,
            tea: 0,
            excarid: 0,
            stopped: false,
            last_tod: 0,
            sys,
        }
    }

    /// Register as address: full 31 bits in 31-bit mode, low 24 preserved
    /// into the high byte in 24-bit mode.
    pub fn set_gr_a(&mut self, r: usize, addr: u32) {
        if self.psw.amode {
            self.gpr[r] = addr & 0x7FFF_FFFF;
        } else {
            self.gpr[r] = (self.gpr[r] & 0xFF00_0000) | (addr & 0x00FF_FFFF);
        }
    }

    /// Bits 8-31 of a register, the 24-bit length/address fields of the
    /// long instructions.
    pub fn gr_la24(&self, r: usize) -> u32 {
        self.gpr[r] & 0x00FF_FFFF
    }

    pub fn set_gr_la24(&mut self, r: usize, value: u32) {
        self.gpr[r] = (self.gpr[r] & 0xFF00_0000) | (value & 0x00FF_FFFF);
    }

    /// One trip through the evaluation loop: deliver anything pending, then
    /// fetch and execute a single instruction.
    pub fn clock_cycle(&mut self) -> Signal {
        let pending = self.sys.cpus[self.cpuad as usize].pending.load(Ordering::SeqCst);
        if pending != 0 {
            if let Some(sig) = self.handle_pending(pending) {
                return sig;
            }
        }
        self.update_timers();

        if self.stopped {
            std::thread::sleep(std::time::Duration::from_millis(1));
            return Signal::NoOp;
        }

        if self.psw.wait {
            // A wait PSW with no enabled interruption source never wakes up.
            if self.psw.sysmask & (PSW_IOMASK | PSW_EXTMASK) == 0 && !self.psw.mach {
                return Signal::Quit;
            }
            if self.deliver_io_interrupt() {
                return Signal::Ok;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
            return Signal::NoOp;
        }

        if self.deliver_io_interrupt() {
            return Signal::Ok;
        }

        let inst = match self.instfetch() {
            Ok(inst) => inst,
            Err(ex) => {
                self.program_interrupt(ex);
                return Signal::Ok;
            }
        };
        if let Err(ex) = parser::execute_instruction(&inst, false, self) {
            self.program_interrupt(ex);
        }
        Signal::Ok
    }

    /// Act on the pending bits another CPU or the timer thread raised.
    /// Returns a signal when the cycle should end here.
    fn handle_pending(&mut self, pending: u32) -> Option<Signal> {
        let cpuad = self.cpuad as usize;
        if pending & PEND_PTLB != 0 {
            self.sys.cpus[cpuad].clear(PEND_PTLB);
            self.purge_tlb();
        }
        if pending & PEND_STOP != 0 {
            self.sys.cpus[cpuad].clear(PEND_STOP);
            self.stopped = true;
            let store_at = {
                let mut state = self.sys.cpus[cpuad]
                    .state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                state.stopped = true;
                state.store_status_at.take()
            };
            if let Some(addr) = store_at {
                self.store_status(addr);
            }
        }
        if pending & PEND_START != 0 {
            self.sys.cpus[cpuad].clear(PEND_START);
            let new_prefix = {
                let mut state = self.sys.cpus[cpuad]
                    .state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                state.stopped = false;
                state.set_prefix.take()
            };
            if let Some(new_prefix) = new_prefix {
                self.prefix = new_prefix & 0x7FFF_F000;
                self.sys.cpus[cpuad]
                    .state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .prefix = self.prefix;
                self.purge_tlb();
            }
            self.stopped = false;
        }
        if pending & PEND_RESTART != 0 {
            self.sys.cpus[cpuad].clear(PEND_RESTART);
            self.stopped = false;
            self.sys.cpus[cpuad]
                .state
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .stopped = false;
            self.restart_interrupt();
            return Some(Signal::Ok);
        }
        // External interruptions wait for an enabled PSW.
        if self.psw.sysmask & PSW_EXTMASK != 0 {
            let cr0 = Cr0::from_bits_truncate(self.cr[0]);
            if pending & PEND_EXTCALL != 0 && cr0.contains(Cr0::XM_EXTCALL) {
                self.sys.cpus[cpuad].clear(PEND_EXTCALL);
                let from = {
                    let mut state = self.sys.cpus[cpuad]
                        .state
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    let from = state.extcall_from;
                    state.extcall_from = 0;
                    from
                };
                self.external_interrupt(psa::EXT_EXTERNAL_CALL, Some(from));
                return Some(Signal::Ok);
            }
            if pending & PEND_EMERSIG != 0 && cr0.contains(Cr0::XM_EMERSIG) {
                let from = {
                    let mut state = self.sys.cpus[cpuad]
                        .state
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    if state.emersig_mask == 0 {
                        None
                    } else {
                        let from = state.emersig_mask.trailing_zeros() as u16;
                        state.emersig_mask &= !(1 << from);
                        Some((from, state.emersig_mask == 0))
                    }
                };
                match from {
                    Some((from, drained)) => {
                        if drained {
                            self.sys.cpus[cpuad].clear(PEND_EMERSIG);
                        }
                        self.external_interrupt(psa::EXT_EMERGENCY_SIGNAL, Some(from));
                        return Some(Signal::Ok);
                    }
                    None => self.sys.cpus[cpuad].clear(PEND_EMERSIG),
                }
            }
            if pending & PEND_CLKC != 0 && cr0.contains(Cr0::XM_CLKC) {
                self.sys.cpus[cpuad].clear(PEND_CLKC);
                self.external_interrupt(psa::EXT_CLOCK_COMPARATOR, None);
                return Some(Signal::Ok);
            }
            if pending & PEND_PTIMER != 0 && cr0.contains(Cr0::XM_PTIMER) {
                self.sys.cpus[cpuad].clear(PEND_PTIMER);
                self.external_interrupt(psa::EXT_CPU_TIMER, None);
                return Some(Signal::Ok);
            }
            if pending & PEND_ITIMER != 0 && cr0.contains(Cr0::XM_ITIMER) {
                self.sys.cpus[cpuad].clear(PEND_ITIMER);
                self.external_interrupt(psa::EXT_INTERVAL_TIMER, None);
                return Some(Signal::Ok);
            }
            if pending & PEND_INTKEY != 0 && cr0.contains(Cr0::XM_INTKEY) {
                self.sys.cpus[cpuad].clear(PEND_INTKEY);
                self.external_interrupt(psa::EXT_INTERRUPT_KEY, None);
                return Some(Signal::Ok);
            }
        }
        None
    }

    /// Raise clock comparator / CPU timer pendings as the TOD clock moves.
    fn update_timers(&mut self) {
        let tod = self.sys.todclk.load(Ordering::Relaxed);
        if tod == self.last_tod {
            return;
        }
        let delta = tod.wrapping_sub(self.last_tod);
        self.last_tod = tod;
        self.ptimer = self.ptimer.wrapping_sub(delta as i64);
        let slot = &self.sys.cpus[self.cpuad as usize];
        if self.ptimer < 0 {
            slot.raise(PEND_PTIMER);
        }
        if self.clkc != 0 && tod.wrapping_add(self.todoffset) > self.clkc {
            slot.raise(PEND_CLKC);
        }
    }

    /// Deliver one pending I/O interruption when the PSW is enabled for it.
    fn deliver_io_interrupt(&mut self) -> bool {
        let enabled = if self.psw.ecmode {
            self.psw.sysmask & PSW_IOMASK != 0
        } else {
            self.psw.sysmask & 0xFE != 0
        };
        if !enabled {
            return false;
        }
        let intr = {
            let mut queue = self.sys.iopending.lock().unwrap_or_else(|e| e.into_inner());
            queue.pop_front()
        };
        let intr = match intr {
            Some(i) => i,
            None => return false,
        };
        let pfx = self.prefix;
        self.sys.store4_abs(pfx + psa::PSA_IOID, intr.ioid);
        self.sys.store4_abs(pfx + psa::PSA_IOPARM, intr.ioparm);
        self.swap_psw(psa::PSA_IOPOLD, psa::PSA_IOPNEW);
        true
    }

    fn external_interrupt(&mut self, code: u16, from_cpu: Option<u16>) {
        let pfx = self.prefix;
        if let Some(from) = from_cpu {
            self.sys.store2_abs(pfx + psa::PSA_EXTCPAD, from);
        }
        self.sys.store2_abs(pfx + psa::PSA_EXTINT, code);
        self.psw.intcode = code;
        self.swap_psw(psa::PSA_EXTOLD, psa::PSA_EXTNEW);
    }

    fn restart_interrupt(&mut self) {
        self.swap_psw(psa::PSA_IPLCCW1, psa::PSA_IPLPSW);
    }

    /// Store the current PSW at the old slot and load the new PSW; the
    /// common tail of every interruption class.
    pub fn swap_psw(&mut self, old_offset: u32, new_offset: u32) {
        let pfx = self.prefix;
        self.sys.store_abs(pfx + old_offset, &self.psw.store());
        let mut newpsw = [0u8; 8];
        self.sys.fetch_abs(pfx + new_offset, &mut newpsw);
        if let Err(ex) = self.psw.load(&newpsw) {
            // An unusable new PSW leaves the CPU check-stopped.
            error!(
                "CPU{:04X}: invalid new PSW at {:08X} ({:?})",
                self.cpuad,
                pfx + new_offset,
                ex
            );
            self.stopped = true;
        }
    }

    /// The program-check path: convert an architectural exception into a
    /// program interruption via the PSA.
    pub fn program_interrupt(&mut self, ex: Exception) {
        let code = ex.code();
        trace!(
            "CPU{:04X}: program interruption {:04X} at {:08X}",
            self.cpuad,
            code,
            self.psw.ia
        );
        let pfx = self.prefix;
        self.psw.intcode = code;
        let pgmint = [0, self.psw.ilc, (code >> 8) as u8, code as u8];
        self.sys.store_abs(pfx + psa::PSA_PGMINT, &pgmint);
        if ex.is_translation_class() {
            self.sys.store4_abs(pfx + psa::PSA_TEA, self.tea);
            self.sys.store_abs_byte(pfx + psa::PSA_EXCARID, self.excarid);
        }
        self.swap_psw(psa::PSA_PGMOLD, psa::PSA_PGMNEW);
    }

    /// Store-status: timers, PSW, prefix and all register sets into the
    /// architectural save areas anchored at `addr`.
    pub fn store_status(&mut self, addr: u32) {
        let base = addr & 0x7FFF_FE00;
        let sys = &self.sys;
        sys.store8_abs(base + psa::PSA_STOREPTMR, self.ptimer as u64);
        sys.store8_abs(base + psa::PSA_STORECLKC, self.clkc);
        sys.store_abs(base + psa::PSA_STOREPSW, &self.psw.store());
        sys.store4_abs(base + psa::PSA_STOREPFX, self.prefix);
        for i in 0..16 {
            sys.store4_abs(base + psa::PSA_STOREAR + i as u32 * 4, self.ar[i]);
            sys.store4_abs(base + psa::PSA_STOREGPR + i as u32 * 4, self.gpr[i]);
            sys.store4_abs(base + psa::PSA_STORECR + i as u32 * 4, self.cr[i]);
        }
        for i in 0..8 {
            sys.store4_abs(base + psa::PSA_STOREFPR + i as u32 * 4, self.fpr[i]);
        }
    }

    /// Disassemble the next few instructions for the debugger pane.
    pub fn disassemble(&mut self, lines: usize) -> Vec<(u32, Vec<u8>, String)> {
        let mut out = Vec::with_capacity(lines);
        let mut ia = self.psw.ia;
        for _ in 0..lines {
            match self.instruction_fetch_at(ia & self.psw.amode_mask()) {
                Ok(inst) => {
                    let (mnemonic, ilc) = parser::disassemble(&inst);
                    out.push((ia, inst[..ilc].to_vec(), mnemonic));
                    ia = ia.wrapping_add(ilc as u32) & self.psw.amode_mask();
                }
                Err(_) => {
                    out.push((ia, Vec::new(), String::from("dc")));
                    break;
                }
            }
        }
        out
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::from("\n");
        s.push_str(&format!("{r}╔═════════════════════════════════════════╗", r = cursor::Goto(1, 2)));
        s.push_str(&format!("{r}║ CPU{n:04X} state                             ║", n = self.cpuad, r = cursor::Goto(1, 3)));
        s.push_str(&format!("{r}╟─────────────────────────────────────────╢", r = cursor::Goto(1, 4)));
        for j in 0..4 {
            s.push_str(&format!(
                "{r}║ R{a:<2} {w:08x}  R{b:<2} {x:08x}  R{c:<2} {y:08x} ║\n",
                a = j,
                b = j + 4,
                c = j + 8,
                w = self.gpr[j],
                x = self.gpr[j + 4],
                y = self.gpr[j + 8],
                r = cursor::Goto(1, (j + 5) as u16),
            ));
        }
        s.push_str(&format!(
            "{r}║ PSW {p:02x}{q:02x} cc={cc} amode={am} ia={ia:08x}     ║",
            p = self.psw.sysmask,
            q = self.psw.pkey,
            cc = self.psw.cc as u8,
            am = if self.psw.amode { 31 } else { 24 },
            ia = self.psw.ia,
            r = cursor::Goto(1, 9),
        ));
        s.push_str(&format!("{r}╚═════════════════════════════════════════╝", r = cursor::Goto(1, 10)));
        write!(f, "{}", s)
    }
}

pub struct Debugger {
    code_running: bool,
    last_cmd: DebugCommand,
    breakpoints: HashSet<u32>,
}

#[derive(PartialEq, Clone)]
enum DebugCommand {
    Quit,
    SetBreakpoint(Option<String>),
    DeleteBreakpoint(Option<String>),
    Continue,
    Step,
    Jump(Option<String>),
}

impl Debugger {
    pub fn new() -> Box<Self> {
        Box::new(Debugger {
            code_running: false,
            last_cmd: DebugCommand::Step,
            breakpoints: HashSet::new(),
        })
    }

    fn get_command(&mut self) -> DebugCommand {
        let mut input = String::new();
        io::stdin().read_line(&mut input).unwrap_or(0);
        let mut cmd = input.split_whitespace();
        match cmd.next() {
            Some("q") => DebugCommand::Quit,
            Some("s") | Some("n") => DebugCommand::Step,
            Some("b") => DebugCommand::SetBreakpoint(cmd.next().map(String::from)),
            Some("d") => DebugCommand::DeleteBreakpoint(cmd.next().map(String::from)),
            Some("j") => DebugCommand::Jump(cmd.next().map(String::from)),
            Some("c") => DebugCommand::Continue,
            _ => self.last_cmd.clone(),
        }
    }

    fn draw_user_interface(&mut self, cpu: &mut Cpu) {
        print!("{c}{tl}{cpu}", c = clear::All, tl = cursor::Goto(1, 1), cpu = cpu);
        println!("{r}Next instructions:", r = cursor::Goto(1, 12));
        for (j, (ia, bytes, mnemonic)) in cpu.disassemble(8).iter().enumerate() {
            let mut hex = String::new();
            for b in bytes {
                hex.push_str(&format!("{:02x}", b));
            }
            let marker = if self.breakpoints.contains(ia) {
                format!("{}*{}", color::Fg(color::Red), color::Fg(color::Reset))
            } else if j == 0 {
                format!("{}>{}", color::Fg(color::Green), color::Fg(color::Reset))
            } else {
                String::from(" ")
            };
            println!(
                "{r}{m}{ia:08x}  {hex:<14} {mn}",
                m = marker,
                ia = ia,
                hex = hex,
                mn = mnemonic,
                r = cursor::Goto(1, (13 + j) as u16)
            );
        }
        println!(
            "{r}\nDebugger attached. n steps, c continues, b/d <addr> sets/deletes a breakpoint, j <addr> jumps, q quits.",
            r = cursor::Goto(1, 23)
        );
        print!("{r}> ", r = cursor::Goto(1, 25));
        io::stdout().flush().expect("");
    }

    pub fn update(&mut self, cpu: &mut Cpu) -> Signal {
        if self.code_running && !self.breakpoints.contains(&cpu.psw.ia) {
            return Signal::Ok;
        }
        self.code_running = false;
        self.draw_user_interface(cpu);
        let cmd = self.get_command();
        match &cmd {
            DebugCommand::Quit => Signal::Quit,
            DebugCommand::SetBreakpoint(b) => {
                if let Some(address) = parse_address(b) {
                    self.breakpoints.insert(address);
                }
                Signal::NoOp
            }
            DebugCommand::DeleteBreakpoint(b) => {
                if let Some(address) = parse_address(b) {
                    self.breakpoints.remove(&address);
                }
                Signal::NoOp
            }
            DebugCommand::Continue => {
                self.code_running = true;
                Signal::Ok
            }
            DebugCommand::Step => {
                self.last_cmd = cmd;
                Signal::Ok
            }
            DebugCommand::Jump(a) => {
                if let Some(address) = parse_address(a) {
                    cpu.psw.ia = address & cpu.psw.amode_mask();
                    self.last_cmd = cmd;
                    Signal::Ok
                } else {
                    Signal::NoOp
                }
            }
        }
    }
}

fn parse_address(address: &Option<String>) -> Option<u32> {
    match address {
        Some(addr) => u32::from_str_radix(addr, 16).ok(),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::System;

    fn cpu() -> Cpu {
        Cpu::new(0, Arc::new(System::new(0x100000, 0, 1)))
    }

    #[test]
    fn psw_roundtrip_ec_mode() {
        let mut psw = Psw::new();
        psw.ecmode = true;
        psw.sysmask = PSW_EXTMASK | PSW_IOMASK;
        psw.pkey = 0x40;
        psw.amode = true;
        psw.cc = Cc::High;
        psw.fomask = true;
        psw.ia = 0x0012_3456;
        let bytes = psw.store();
        let mut back = Psw::new();
        back.load(&bytes).unwrap();
        assert_eq!(back.sysmask, psw.sysmask);
        assert_eq!(back.pkey, 0x40);
        assert!(back.amode);
        assert_eq!(back.cc, Cc::High);
        assert!(back.fomask);
        assert_eq!(back.ia, 0x0012_3456);
    }

    #[test]
    fn psw_load_rejects_odd_address_and_reserved_bits() {
        let mut psw = Psw::new();
        assert_eq!(
            psw.load(&[0, 0x08, 0, 0, 0, 0, 0, 1]),
            Err(Exception::Specification)
        );
        assert_eq!(
            psw.load(&[0x80, 0x08, 0, 0, 0, 0, 0, 0]),
            Err(Exception::Specification)
        );
    }

    #[test]
    fn advance_wraps_to_amode() {
        let mut psw = Psw::new();
        psw.ia = 0x00FF_FFFE;
        psw.advance(4);
        assert_eq!(psw.ia, 0x0000_0002);
        psw.amode = true;
        psw.ia = 0x7FFF_FFFE;
        psw.advance(4);
        assert_eq!(psw.ia, 0x0000_0002);
    }

    #[test]
    fn program_interrupt_swaps_psws_through_the_psa() {
        let mut cpu = cpu();
        // new program PSW: enabled wait, ia 0x1234
        let newpsw: [u8; 8] = [0x02, 0x0A, 0, 0, 0, 0, 0x12, 0x34];
        cpu.sys.store_abs(psa::PSA_PGMNEW, &newpsw);
        cpu.psw.ecmode = true;
        cpu.psw.ilc = 4;
        cpu.psw.ia = 0x5678;
        cpu.program_interrupt(Exception::Operation);
        assert_eq!(cpu.psw.ia, 0x1234);
        assert!(cpu.psw.wait);
        assert_eq!(cpu.sys.fetch4_abs(psa::PSA_PGMINT), 0x0004_0001);
        let mut old = [0u8; 8];
        cpu.sys.fetch_abs(psa::PSA_PGMOLD, &mut old);
        assert_eq!(&old[6..], &[0x56, 0x78]);
    }

    #[test]
    fn store_status_fills_the_save_areas() {
        let mut cpu = cpu();
        cpu.gpr[1] = 0x11111111;
        cpu.cr[0] = 0x22222222;
        cpu.ar[15] = 0x33333333;
        cpu.prefix = 0;
        cpu.store_status(0);
        assert_eq!(cpu.sys.fetch4_abs(psa::PSA_STOREGPR + 4), 0x11111111);
        assert_eq!(cpu.sys.fetch4_abs(psa::PSA_STORECR), 0x22222222);
        assert_eq!(cpu.sys.fetch4_abs(psa::PSA_STOREAR + 60), 0x33333333);
    }
}
