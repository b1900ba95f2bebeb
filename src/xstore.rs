// Expanded storage instructions: page movement between main and expanded
// storage, page locking, and MVPG which may source or target either side.

use crate::dat::{AccessType, PageState, Space};
use crate::fields::*;
use crate::memory::{StorageKey, PAGE_MASK};
use crate::processor::Cpu;

const LKPG_GPR0_LOCKBIT: u32 = 0x0000_0200;
const LKPG_GPR0_RESV: u32 = 0xFFFF_FD00;

/// B22E PGIN - Page In from expanded storage [RRE]
pub fn page_in(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let block = cpu.gpr[f.r2];
    if block as usize >= cpu.sys.xpndsize {
        cpu.psw.cc = Cc::cc_overflow();
        return Ok(());
    }
    let vaddr = cpu.gpr[f.r1] & cpu.psw.amode_mask();
    let maddr = cpu.logical_to_abs_space(
        vaddr,
        Space::Real,
        0,
        AccessType::Write,
        cpu.psw.pkey,
    )? & PAGE_MASK;
    cpu.sys.chkaddr(maddr, 4096)?;
    cpu.sys.xpnd_to_main(block, maddr);
    cpu.psw.cc = Cc::cc_equal();
    Ok(())
}

/// B22F PGOUT - Page Out to expanded storage [RRE]
pub fn page_out(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let block = cpu.gpr[f.r2];
    if block as usize >= cpu.sys.xpndsize {
        cpu.psw.cc = Cc::cc_overflow();
        return Ok(());
    }
    let vaddr = cpu.gpr[f.r1] & cpu.psw.amode_mask();
    let maddr = cpu.logical_to_abs_space(
        vaddr,
        Space::Real,
        0,
        AccessType::Read,
        cpu.psw.pkey,
    )? & PAGE_MASK;
    cpu.sys.chkaddr(maddr, 4096)?;
    cpu.sys.main_to_xpnd(maddr, block);
    cpu.psw.cc = Cc::cc_equal();
    Ok(())
}

/// B262 LKPG - Lock Page [RRE]
pub fn lock_page(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    priv_check(cpu)?;
    if cpu.psw.real_mode() {
        return Err(Exception::SpecialOperation);
    }
    if cpu.gpr[0] & LKPG_GPR0_RESV != 0 {
        return Err(Exception::Specification);
    }
    let n2 = cpu.gpr[f.r2] & cpu.psw.amode_mask();
    let acctype = if cpu.gpr[0] & LKPG_GPR0_LOCKBIT != 0 {
        AccessType::Lockpage
    } else {
        AccessType::Unlkpage
    };
    // PTE access is serialized with other TLB manipulation
    let sys = cpu.sys.clone();
    let _mainlock = sys.obtain_mainlock();
    match cpu.translate(n2, Space::Reg(f.r2), f.r2, acctype) {
        Ok(tr) => {
            cpu.psw.cc = Cc::cc_equal();
            if acctype == AccessType::Lockpage {
                match tr.page {
                    PageState::Main => cpu.gpr[f.r1] = tr.raddr,
                    PageState::Expanded { block } => {
                        // report the page resident in expanded storage
                        cpu.gpr[f.r1] = block;
                        cpu.psw.cc = Cc::cc_high();
                    }
                }
            }
        }
        Err(_) => cpu.psw.cc = Cc::cc_overflow(),
    }
    Ok(())
}

/// B259 IESBE - Invalidate Expanded Storage Block Entry [RRE]
pub fn invalidate_expanded_storage_block_entry(
    inst: &[u8],
    execflag: bool,
    cpu: &mut Cpu,
) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    priv_check(cpu)?;
    cpu.sys.perform_serialization();
    {
        let sys = cpu.sys.clone();
        let _mainlock = sys.obtain_mainlock();
        let pto = cpu.gpr[f.r1];
        let vaddr = cpu.gpr[f.r2];
        cpu.invalidate_pte(pto, vaddr)?;
    }
    cpu.sys.perform_serialization();
    Ok(())
}

/// B254 MVPG - Move Page [RRE]
pub fn move_page(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    // bits 16-19 of register 0 must be zero; bits 20-21 must not both be set
    if cpu.gpr[0] & 0x0000_F000 != 0 || cpu.gpr[0] & 0x0000_0C00 == 0x0000_0C00 {
        return Err(Exception::Specification);
    }
    let mut akey1 = cpu.psw.pkey;
    let mut akey2 = cpu.psw.pkey;
    if cpu.gpr[0] & 0x0000_0C00 != 0 {
        let akey = (cpu.gpr[0] & 0x0000_00F0) as u8;
        if cpu.psw.prob && (cpu.cr[3] << (akey >> 4)) & 0x8000_0000 == 0 {
            return Err(Exception::PrivilegedOperation);
        }
        if cpu.gpr[0] & 0x0000_0800 != 0 {
            akey1 = akey;
        }
        if cpu.gpr[0] & 0x0000_0400 != 0 {
            akey2 = akey;
        }
    }

    let vaddr1 = cpu.gpr[f.r1] & cpu.psw.amode_mask() & PAGE_MASK;
    let vaddr2 = cpu.gpr[f.r2] & cpu.psw.amode_mask() & PAGE_MASK;

    let mut xpblk1 = None;
    let mut xpblk2 = None;
    if !cpu.psw.real_mode() {
        let cc_option = cpu.gpr[0] & 0x0000_0100 != 0;
        match cpu.translate(vaddr2, Space::Reg(f.r2), f.r2, AccessType::MvpgRead) {
            Ok(tr) => {
                if let PageState::Expanded { block } = tr.page {
                    xpblk2 = Some(block);
                }
            }
            Err(Exception::PageTranslation) if cc_option => {
                cpu.psw.cc = Cc::cc_high();
                return Ok(());
            }
            Err(ex) => return Err(ex),
        }
        match cpu.translate(vaddr1, Space::Reg(f.r1), f.r1, AccessType::MvpgWrite) {
            Ok(tr) => {
                if tr.protect {
                    return Err(Exception::Protection);
                }
                if let PageState::Expanded { block } = tr.page {
                    xpblk1 = Some(block);
                }
            }
            Err(Exception::PageTranslation) if cc_option => {
                cpu.psw.cc = Cc::cc_low();
                return Ok(());
            }
            Err(ex) => return Err(ex),
        }
    }

    // both operands in expanded storage, or the destination there with the
    // destination-reference intention set, cannot be honored
    if (xpblk1.is_some() && xpblk2.is_some())
        || (xpblk1.is_some() && cpu.gpr[0] & 0x0000_0200 != 0)
    {
        cpu.tea = vaddr1;
        return Err(Exception::PageTranslation);
    }

    match (xpblk1, xpblk2) {
        (None, Some(block2)) => {
            let aaddr1 =
                cpu.logical_to_abs(vaddr1, f.r1, AccessType::Write, akey1)? & PAGE_MASK;
            cpu.sys.or_storkey(aaddr1, StorageKey::REF | StorageKey::CHANGE);
            cpu.sys.xpnd_to_main(block2, aaddr1);
        }
        (Some(block1), None) => {
            let aaddr2 = cpu.logical_to_abs(vaddr2, f.r2, AccessType::Read, akey2)? & PAGE_MASK;
            cpu.sys.or_storkey(aaddr2, StorageKey::REF);
            cpu.sys.main_to_xpnd(aaddr2, block1);
        }
        _ => {
            let aaddr1 =
                cpu.logical_to_abs(vaddr1, f.r1, AccessType::Write, akey1)? & PAGE_MASK;
            let aaddr2 = cpu.logical_to_abs(vaddr2, f.r2, AccessType::Read, akey2)? & PAGE_MASK;
            cpu.sys.or_storkey(aaddr1, StorageKey::REF | StorageKey::CHANGE);
            cpu.sys.or_storkey(aaddr2, StorageKey::REF);
            for i in 0..4096u32 {
                let byte = cpu.sys.fetch_abs_byte(aaddr2 + i);
                cpu.sys.store_abs_byte(aaddr1 + i, byte);
            }
        }
    }
    cpu.psw.cc = Cc::cc_equal();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::System;
    use crate::parser;
    use std::sync::Arc;

    fn cpu() -> Cpu {
        Cpu::new(0, Arc::new(System::new(0x100000, 8, 1)))
    }

    fn run(cpu: &mut Cpu, inst: &[u8]) -> ExecResult {
        parser::execute_instruction(inst, false, cpu)
    }

    #[test]
    fn pgout_pgin_roundtrip() {
        let mut cpu = cpu();
        cpu.sys.store_abs(0x4000, b"page payload");
        cpu.gpr[1] = 0x4000;
        cpu.gpr[2] = 3;
        // PGOUT r1,r2
        run(&mut cpu, &[0xB2, 0x2F, 0x00, 0x12]).unwrap();
        assert_eq!(cpu.psw.cc, Cc::Equal);
        cpu.sys.store_abs(0x4000, &[0u8; 12]);
        run(&mut cpu, &[0xB2, 0x2E, 0x00, 0x12]).unwrap();
        let mut buf = [0u8; 12];
        cpu.sys.fetch_abs(0x4000, &mut buf);
        assert_eq!(&buf, b"page payload");
    }

    #[test]
    fn pgin_of_unconfigured_block_is_cc3() {
        let mut cpu = cpu();
        cpu.gpr[1] = 0x4000;
        cpu.gpr[2] = 99;
        run(&mut cpu, &[0xB2, 0x2E, 0x00, 0x12]).unwrap();
        assert_eq!(cpu.psw.cc, Cc::Ovfl);
    }

    #[test]
    fn mvpg_moves_a_main_storage_page() {
        let mut cpu = cpu();
        cpu.sys.store_abs(0x3000, b"move me");
        cpu.gpr[0] = 0;
        cpu.gpr[4] = 0x5000;
        cpu.gpr[5] = 0x3000;
        run(&mut cpu, &[0xB2, 0x54, 0x00, 0x45]).unwrap();
        let mut buf = [0u8; 7];
        cpu.sys.fetch_abs(0x5000, &mut buf);
        assert_eq!(&buf, b"move me");
        assert_eq!(cpu.sys.storkey(0x5000) & 0x06, 0x06);
        assert_eq!(cpu.sys.storkey(0x3000) & 0x04, 0x04);
    }
}
