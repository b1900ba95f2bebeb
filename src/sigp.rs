// SIGP order processing. The dispatcher in the control module validates the
// operands; this module manipulates the target CPU's shared state, always
// through the slot lock. Orders that need the target's cooperation (stop,
// restart, store status) leave pending bits the target honors at its next
// instruction boundary.

use crate::fields::Cc;
use crate::memory::{PEND_EMERSIG, PEND_EXTCALL, PEND_RESTART, PEND_START, PEND_STOP};
use crate::processor::Cpu;
use bitflags::bitflags;

pub const SIGP_SENSE: u8 = 0x01;
pub const SIGP_EXTCALL: u8 = 0x02;
pub const SIGP_EMERGENCY: u8 = 0x03;
pub const SIGP_START: u8 = 0x04;
pub const SIGP_STOP: u8 = 0x05;
pub const SIGP_RESTART: u8 = 0x06;
pub const SIGP_STOPSTORE: u8 = 0x09;
pub const SIGP_INITRESET: u8 = 0x0B;
pub const SIGP_RESET: u8 = 0x0C;
pub const SIGP_SETPREFIX: u8 = 0x0D;
pub const SIGP_STORE: u8 = 0x0E;

bitflags! {
    /// Status word returned on condition code 1.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SigpStatus: u32 {
        const EQUIPMENT_CHECK       = 0x8000_0000;
        const INCORRECT_STATE       = 0x0000_0200;
        const INVALID_PARAMETER     = 0x0000_0100;
        const EXTERNAL_CALL_PENDING = 0x0000_0080;
        const STOPPED               = 0x0000_0040;
        const OPERATOR_INTERVENING  = 0x0000_0020;
        const CHECK_STOP            = 0x0000_0010;
        const INOPERATIVE           = 0x0000_0004;
        const INVALID_ORDER         = 0x0000_0002;
        const RECEIVER_CHECK        = 0x0000_0001;
    }
}

/// Process one order against the target CPU. Returns the condition code
/// and, for cc1, the status word.
pub fn signal(cpu: &mut Cpu, target: u16, order: u8, parm: u32) -> (Cc, u32) {
    if target as usize >= cpu.sys.numcpu {
        return (Cc::cc_overflow(), 0);
    }
    let slot = &cpu.sys.cpus[target as usize];
    let mut state = slot.state.lock().unwrap_or_else(|e| e.into_inner());
    if !state.online {
        return (Cc::cc_overflow(), 0);
    }

    let mut status = SigpStatus::empty();
    match order {
        SIGP_SENSE => {
            if state.stopped {
                status |= SigpStatus::STOPPED;
            }
            if slot.pending.load(std::sync::atomic::Ordering::SeqCst) & PEND_EXTCALL != 0 {
                status |= SigpStatus::EXTERNAL_CALL_PENDING;
            }
            if status.is_empty() {
                return (Cc::cc_equal(), 0);
            }
            return (Cc::cc_low(), status.bits());
        }
        SIGP_EXTCALL => {
            // only one external call may be pending per CPU
            if slot.pending.load(std::sync::atomic::Ordering::SeqCst) & PEND_EXTCALL != 0 {
                return (Cc::cc_low(), SigpStatus::EXTERNAL_CALL_PENDING.bits());
            }
            state.extcall_from = cpu.cpuad;
            slot.raise(PEND_EXTCALL);
        }
        SIGP_EMERGENCY => {
            state.emersig_mask |= 1 << cpu.cpuad;
            slot.raise(PEND_EMERSIG);
        }
        SIGP_START => {
            slot.raise(PEND_START);
        }
        SIGP_STOP => {
            slot.raise(PEND_STOP);
        }
        SIGP_RESTART => {
            slot.raise(PEND_RESTART);
        }
        SIGP_STOPSTORE => {
            state.store_status_at = Some(state.prefix);
            slot.raise(PEND_STOP);
        }
        SIGP_INITRESET | SIGP_RESET => {
            state.extcall_from = 0;
            state.emersig_mask = 0;
            state.store_status_at = None;
            slot.pending.store(0, std::sync::atomic::Ordering::SeqCst);
            slot.raise(PEND_STOP);
        }
        SIGP_SETPREFIX => {
            if !state.stopped {
                return (Cc::cc_low(), SigpStatus::INCORRECT_STATE.bits());
            }
            let prefix = parm & 0x7FFF_F000;
            if cpu.sys.chkaddr(prefix, 4096).is_err() {
                return (Cc::cc_low(), SigpStatus::INVALID_PARAMETER.bits());
            }
            // the target stays stopped; the new prefix takes effect when
            // it is next started
            state.set_prefix = Some(prefix);
            state.prefix = prefix;
        }
        SIGP_STORE => {
            if !state.stopped {
                return (Cc::cc_low(), SigpStatus::INCORRECT_STATE.bits());
            }
            let addr = parm & 0x7FFF_FE00;
            if cpu.sys.chkaddr(addr, 512).is_err() {
                return (Cc::cc_low(), SigpStatus::INVALID_PARAMETER.bits());
            }
            state.store_status_at = Some(addr);
            slot.raise(PEND_STOP);
        }
        _ => {
            return (Cc::cc_low(), SigpStatus::INVALID_ORDER.bits());
        }
    }
    (Cc::cc_equal(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::System;
    use std::sync::Arc;

    #[test]
    fn sense_of_unconfigured_cpu_is_cc3() {
        let sys = Arc::new(System::new(0x10000, 0, 2));
        let mut cpu = Cpu::new(0, sys);
        let (cc, _) = signal(&mut cpu, 5, SIGP_SENSE, 0);
        assert_eq!(cc, Cc::Ovfl);
        // CPU 1 exists in the configuration but has not come online
        let (cc, _) = signal(&mut cpu, 1, SIGP_SENSE, 0);
        assert_eq!(cc, Cc::Ovfl);
    }

    #[test]
    fn external_call_is_rejected_while_pending() {
        let sys = Arc::new(System::new(0x10000, 0, 2));
        let mut cpu0 = Cpu::new(0, sys.clone());
        let _cpu1 = Cpu::new(1, sys);
        let (cc, _) = signal(&mut cpu0, 1, SIGP_EXTCALL, 0);
        assert_eq!(cc, Cc::Equal);
        let (cc, status) = signal(&mut cpu0, 1, SIGP_EXTCALL, 0);
        assert_eq!(cc, Cc::Low);
        assert_eq!(status, SigpStatus::EXTERNAL_CALL_PENDING.bits());
    }

    #[test]
    fn set_prefix_requires_a_stopped_target() {
        let sys = Arc::new(System::new(0x10000, 0, 2));
        let mut cpu0 = Cpu::new(0, sys.clone());
        let _cpu1 = Cpu::new(1, sys.clone());
        let (cc, status) = signal(&mut cpu0, 1, SIGP_SETPREFIX, 0x2000);
        assert_eq!(cc, Cc::Low);
        assert_eq!(status, SigpStatus::INCORRECT_STATE.bits());
        sys.cpus[1].state.lock().unwrap().stopped = true;
        let (cc, _) = signal(&mut cpu0, 1, SIGP_SETPREFIX, 0x2000);
        assert_eq!(cc, Cc::Equal);
        // an address outside storage is an invalid parameter
        sys.cpus[1].state.lock().unwrap().set_prefix = None;
        let (cc, status) = signal(&mut cpu0, 1, SIGP_SETPREFIX, 0x7FFF_F000);
        assert_eq!(cc, Cc::Low);
        assert_eq!(status, SigpStatus::INVALID_PARAMETER.bits());
    }
}
