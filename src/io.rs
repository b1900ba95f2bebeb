// I/O instructions. Every one of these is a thin wrapper: validate the
// operands, find the device block, hand off to the device collaborator and
// set the condition code. Channel internals never appear here.

use crate::devices::{
    with_device_by_devnum, with_device_by_subchan, Orb, Pmcw, Schib, ORB4_RESV, ORB5_RESV,
    ORB7_RESV, PMCW27_RESV, PMCW4_RESV, PMCW5_E, PMCW5_V,
};
use crate::fields::*;
use crate::processor::Cpu;
use crate::psa;

/// Register 1 must name a subchannel: bits 0-15 are X'0001'.
fn subchan_check(cpu: &Cpu) -> Result<u16, Exception> {
    if cpu.gpr[1] >> 16 != 0x0001 {
        return Err(Exception::Operand);
    }
    Ok(cpu.gpr[1] as u16)
}

fn enabled(pmcw: &Pmcw) -> bool {
    pmcw.flag5 & PMCW5_V != 0 && pmcw.flag5 & PMCW5_E != 0
}

/// B230 CSCH - Clear Subchannel [S]
pub fn clear_subchannel(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let _f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let subchan = subchan_check(cpu)?;
    let sys = cpu.sys.clone();
    let cc = with_device_by_subchan(&sys, subchan, |dev| {
        if !enabled(dev.pmcw()) {
            return Cc::cc_overflow();
        }
        dev.clear();
        Cc::cc_equal()
    })
    .unwrap_or(Cc::cc_overflow());
    cpu.psw.cc = cc;
    Ok(())
}

/// B231 HSCH - Halt Subchannel [S]
pub fn halt_subchannel(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let _f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let subchan = subchan_check(cpu)?;
    let sys = cpu.sys.clone();
    let cc = with_device_by_subchan(&sys, subchan, |dev| {
        if !enabled(dev.pmcw()) {
            return Cc::cc_overflow();
        }
        dev.halt()
    })
    .unwrap_or(Cc::cc_overflow());
    cpu.psw.cc = cc;
    Ok(())
}

/// B232 MSCH - Modify Subchannel [S]
pub fn modify_subchannel(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    fw_check(f.ea2)?;
    let subchan = subchan_check(cpu)?;
    let mut bytes = [0u8; 28];
    cpu.vfetchc(&mut bytes, f.ea2, f.b2)?;
    let new = Pmcw::from_bytes(&bytes);
    if new.flag4 & PMCW4_RESV != 0 || new.flag27 & PMCW27_RESV != 0 {
        return Err(Exception::Operand);
    }
    let sys = cpu.sys.clone();
    let cc = with_device_by_subchan(&sys, subchan, |dev| {
        let pmcw = dev.pmcw();
        // the program-modifiable fields only
        pmcw.intparm = new.intparm;
        pmcw.flag4 = new.flag4;
        pmcw.flag5 = (pmcw.flag5 & PMCW5_V) | (new.flag5 & !PMCW5_V);
        pmcw.lpm = new.lpm;
        pmcw.mbi = new.mbi;
        Cc::cc_equal()
    })
    .unwrap_or(Cc::cc_overflow());
    cpu.psw.cc = cc;
    Ok(())
}

/// B233 SSCH - Start Subchannel [S]
pub fn start_subchannel(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    fw_check(f.ea2)?;
    let subchan = subchan_check(cpu)?;
    let mut bytes = [0u8; 12];
    cpu.vfetchc(&mut bytes, f.ea2, f.b2)?;
    let orb = Orb::from_bytes(&bytes);
    if orb.flag4 & ORB4_RESV != 0 || orb.flag5 & ORB5_RESV != 0 || orb.flag7 & ORB7_RESV != 0 {
        return Err(Exception::Operand);
    }
    if orb.ccwaddr & 0x8000_0000 != 0 {
        return Err(Exception::Operand);
    }
    let sys = cpu.sys.clone();
    let cc = with_device_by_subchan(&sys, subchan, |dev| {
        if !enabled(dev.pmcw()) {
            return Cc::cc_overflow();
        }
        dev.pmcw().intparm = orb.intparm;
        dev.start(&sys, &orb)
    })
    .unwrap_or(Cc::cc_overflow());
    cpu.psw.cc = cc;
    Ok(())
}

/// B234 STSCH - Store Subchannel [S]
pub fn store_subchannel(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    fw_check(f.ea2)?;
    let subchan = subchan_check(cpu)?;
    let sys = cpu.sys.clone();
    let schib = with_device_by_subchan(&sys, subchan, |dev| Schib {
        pmcw: *dev.pmcw(),
        scsw: dev.test().1.scsw,
        moddep: [0; 12],
    });
    match schib {
        Some(schib) => {
            cpu.vstorec(&schib.to_bytes(), f.ea2, f.b2)?;
            cpu.psw.cc = Cc::cc_equal();
        }
        None => cpu.psw.cc = Cc::cc_overflow(),
    }
    Ok(())
}

/// B235 TSCH - Test Subchannel [S]
pub fn test_subchannel(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    fw_check(f.ea2)?;
    let subchan = subchan_check(cpu)?;
    let sys = cpu.sys.clone();
    let result = with_device_by_subchan(&sys, subchan, |dev| {
        if !enabled(dev.pmcw()) {
            return None;
        }
        Some(dev.test())
    });
    match result {
        Some(Some((cc, irb))) => {
            cpu.vstorec(&irb.to_bytes(), f.ea2, f.b2)?;
            cpu.psw.cc = cc;
        }
        _ => cpu.psw.cc = Cc::cc_overflow(),
    }
    Ok(())
}

/// B236 TPI - Test Pending Interruption [S]
pub fn test_pending_interruption(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    fw_check(f.ea2)?;
    let intr = {
        let mut queue = cpu.sys.iopending.lock().unwrap_or_else(|e| e.into_inner());
        queue.pop_front()
    };
    match intr {
        Some(intr) => {
            if f.ea2 == 0 {
                // store into the PSA interruption fields
                let pfx = cpu.prefix;
                cpu.sys.store4_abs(pfx + psa::PSA_IOID, intr.ioid);
                cpu.sys.store4_abs(pfx + psa::PSA_IOPARM, intr.ioparm);
            } else {
                cpu.vstore4(intr.ioid, f.ea2, f.b2)?;
                cpu.vstore4(intr.ioparm, f.ea2.wrapping_add(4), f.b2)?;
            }
            cpu.psw.cc = Cc::cc_low();
        }
        None => cpu.psw.cc = Cc::cc_equal(),
    }
    Ok(())
}

/// B238 RSCH - Resume Subchannel [S]
pub fn resume_subchannel(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let _f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let subchan = subchan_check(cpu)?;
    let sys = cpu.sys.clone();
    let cc = with_device_by_subchan(&sys, subchan, |dev| {
        if !enabled(dev.pmcw()) {
            return Cc::cc_overflow();
        }
        dev.resume()
    })
    .unwrap_or(Cc::cc_overflow());
    cpu.psw.cc = cc;
    Ok(())
}

/// B239 STCRW - Store Channel Report Word [S]
pub fn store_channel_report_word(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    fw_check(f.ea2)?;
    let crw = {
        let mut queue = cpu.sys.crwpending.lock().unwrap_or_else(|e| e.into_inner());
        queue.pop_front()
    };
    match crw {
        Some(word) => {
            cpu.vstore4(word, f.ea2, f.b2)?;
            cpu.psw.cc = Cc::cc_equal();
        }
        None => {
            cpu.vstore4(0, f.ea2, f.b2)?;
            cpu.psw.cc = Cc::cc_low();
        }
    }
    Ok(())
}

/// B23A STCPS - Store Channel Path Status [S]
pub fn store_channel_path_status(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    fw_check(f.ea2)?;
    // no channel path is performing a dedicated function
    cpu.vstorec(&[0u8; 32], f.ea2, f.b2)?;
    Ok(())
}

/// B23C SCHM - Set Channel Monitor [S]
pub fn set_channel_monitor(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let _f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    if cpu.gpr[1] & 0x0FFF_FFFC != 0 {
        return Err(Exception::Operand);
    }
    // measurement data is not collected
    Ok(())
}

/// B23B RCHP - Reset Channel Path [S]
pub fn reset_channel_path(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let _f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    cpu.psw.cc = Cc::cc_equal();
    Ok(())
}

/// B237 SAL - Set Address Limit [S]
pub fn set_address_limit(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let _f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    if cpu.gpr[1] & 0x8000_FFFF != 0 {
        return Err(Exception::Operand);
    }
    Ok(())
}

// -- S/370 channel set ----------------------------------------------------

/// 9C SIO/SIOF - Start I/O [S]
pub fn s370_startio(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let devnum = (f.ea2 & 0xFFF) as u16;
    let caw = cpu.sys.fetch4_abs(cpu.prefix + psa::PSA_CAW);
    let sys = cpu.sys.clone();
    let cc = with_device_by_devnum(&sys, devnum, |dev| dev.start_io(&sys, caw))
        .unwrap_or(Cc::cc_overflow());
    cpu.psw.cc = cc;
    Ok(())
}

/// 9D TIO/CLRIO - Test I/O [S]
pub fn s370_testio(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let devnum = (f.ea2 & 0xFFF) as u16;
    let sys = cpu.sys.clone();
    let cc = with_device_by_devnum(&sys, devnum, |dev| dev.test_io()).unwrap_or(Cc::cc_overflow());
    cpu.psw.cc = cc;
    Ok(())
}

/// 9E HIO/HDV - Halt I/O [S]
pub fn s370_haltio(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let devnum = (f.ea2 & 0xFFF) as u16;
    let sys = cpu.sys.clone();
    let cc = with_device_by_devnum(&sys, devnum, |dev| dev.halt_io()).unwrap_or(Cc::cc_overflow());
    cpu.psw.cc = cc;
    Ok(())
}

/// 9F TCH - Test Channel [S]
pub fn s370_test_channel(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let _f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    cpu.psw.cc = Cc::cc_equal();
    Ok(())
}

/// B203 STIDC - Store Channel ID [S]
pub fn s370_store_channelid(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let _f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    // block multiplexor, model 0
    let pfx = cpu.prefix;
    cpu.sys.store4_abs(pfx + 0xA8, 0x2000_0000);
    cpu.psw.cc = Cc::cc_equal();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{Device, Irb, IoInterrupt, Scsw, SCSW3_SC_PEND};
    use crate::memory::System;
    use crate::parser;
    use std::sync::Arc;

    struct TestDevice {
        subchan: u16,
        pmcw: Pmcw,
        started: bool,
    }

    impl TestDevice {
        fn new(subchan: u16, devnum: u16) -> Box<TestDevice> {
            let mut pmcw = Pmcw::default();
            pmcw.devnum = devnum;
            pmcw.flag5 = PMCW5_E | PMCW5_V;
            Box::new(TestDevice { subchan, pmcw, started: false })
        }
    }

    impl Device for TestDevice {
        fn subchan(&self) -> u16 {
            self.subchan
        }
        fn pmcw(&mut self) -> &mut Pmcw {
            &mut self.pmcw
        }
        fn start(&mut self, sys: &System, orb: &Orb) -> Cc {
            self.started = true;
            let mut queue = sys.iopending.lock().unwrap();
            queue.push_back(IoInterrupt {
                ioid: 0x0001_0000 | self.subchan() as u32,
                ioparm: orb.intparm,
            });
            Cc::cc_equal()
        }
        fn test(&mut self) -> (Cc, Irb) {
            let mut irb = Irb::default();
            if self.started {
                irb.scsw.flag3 = SCSW3_SC_PEND;
                self.started = false;
                (Cc::cc_equal(), irb)
            } else {
                (Cc::cc_low(), irb)
            }
        }
        fn halt(&mut self) -> Cc {
            Cc::cc_equal()
        }
        fn clear(&mut self) {
            self.started = false;
        }
        fn resume(&mut self) -> Cc {
            Cc::cc_high()
        }
        fn start_io(&mut self, _sys: &System, _caw: u32) -> Cc {
            Cc::cc_equal()
        }
        fn test_io(&mut self) -> Cc {
            Cc::cc_low()
        }
        fn halt_io(&mut self) -> Cc {
            Cc::cc_equal()
        }
    }

    fn cpu_with_device() -> Cpu {
        let sys = Arc::new(System::new(0x10000, 0, 1));
        sys.devices.lock().unwrap().push(TestDevice::new(1, 0x190));
        Cpu::new(0, sys)
    }

    fn run(cpu: &mut Cpu, inst: &[u8]) -> ExecResult {
        parser::execute_instruction(inst, false, cpu)
    }

    #[test]
    fn ssch_requires_the_subsystem_id_tag() {
        let mut cpu = cpu_with_device();
        cpu.gpr[1] = 0x0000_0001; // bits 0-15 not 0001
        cpu.sys.store_abs(0x1000, &[0u8; 12]);
        assert_eq!(
            run(&mut cpu, &[0xB2, 0x33, 0x10, 0x00]),
            Err(Exception::Operand)
        );
    }

    #[test]
    fn ssch_tsch_complete_an_operation() {
        let mut cpu = cpu_with_device();
        cpu.gpr[1] = 0x0001_0001;
        let mut orb = [0u8; 12];
        orb[..4].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        cpu.sys.store_abs(0x1000, &orb);
        run(&mut cpu, &[0xB2, 0x33, 0x10, 0x00]).unwrap();
        assert_eq!(cpu.psw.cc, Cc::Equal);
        // the interrupt is queued with the ORB's interruption parameter
        let intr = cpu.sys.iopending.lock().unwrap().front().cloned().unwrap();
        assert_eq!(intr.ioparm, 0xDEAD_BEEF);

        run(&mut cpu, &[0xB2, 0x35, 0x20, 0x00]).unwrap(); // TSCH
        assert_eq!(cpu.psw.cc, Cc::Equal);
        assert_eq!(cpu.sys.fetch_abs_byte(0x2003), SCSW3_SC_PEND);
    }

    #[test]
    fn tsch_of_missing_subchannel_is_cc3() {
        let mut cpu = cpu_with_device();
        cpu.gpr[1] = 0x0001_0042;
        run(&mut cpu, &[0xB2, 0x35, 0x20, 0x00]).unwrap();
        assert_eq!(cpu.psw.cc, Cc::Ovfl);
    }

    #[test]
    fn tpi_drains_the_queue() {
        let mut cpu = cpu_with_device();
        cpu.sys.iopending.lock().unwrap().push_back(IoInterrupt {
            ioid: 0x0001_0001,
            ioparm: 0x1111_2222,
        });
        run(&mut cpu, &[0xB2, 0x36, 0x30, 0x00]).unwrap();
        assert_eq!(cpu.psw.cc, Cc::Low);
        assert_eq!(cpu.sys.fetch4_abs(0x3000), 0x0001_0001);
        assert_eq!(cpu.sys.fetch4_abs(0x3004), 0x1111_2222);
        run(&mut cpu, &[0xB2, 0x36, 0x30, 0x00]).unwrap();
        assert_eq!(cpu.psw.cc, Cc::Equal);
    }

    #[test]
    fn s370_wrappers_reach_the_device() {
        let mut cpu = cpu_with_device();
        run(&mut cpu, &[0x9C, 0x00, 0x01, 0x90]).unwrap(); // SIO
        assert_eq!(cpu.psw.cc, Cc::Equal);
        run(&mut cpu, &[0x9D, 0x00, 0x01, 0x90]).unwrap(); // TIO
        assert_eq!(cpu.psw.cc, Cc::Low);
        run(&mut cpu, &[0x9D, 0x00, 0x07, 0x77]).unwrap(); // unknown device
        assert_eq!(cpu.psw.cc, Cc::Ovfl);
    }
}
