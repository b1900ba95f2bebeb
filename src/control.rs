// Privileged control instructions: PSW and system-mask manipulation,
// control registers, prefixing, timers, storage keys, TLB invalidation,
// address-space control and the SIGP dispatcher. The state manipulation of
// SIGP targets lives in the sigp module.

use crate::dat::{AccessType, Cr0, PageState, Space};
use crate::fields::*;
use crate::memory::{StorageKey, PAGE_MASK};
use crate::processor::Cpu;
use crate::sigp;
use log::debug;

/// 82 LPSW - Load Program Status Word [S]
pub fn load_psw(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    dw_check(f.ea2)?;
    cpu.sys.perform_serialization();
    let mut bytes = [0u8; 8];
    cpu.vfetchc(&mut bytes, f.ea2, f.b2)?;
    cpu.psw.load(&bytes)?;
    cpu.sys.perform_serialization();
    Ok(())
}

/// 80 SSM - Set System Mask [S]
pub fn set_system_mask(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    if cpu.cr[0] & Cr0::SSM_SUPP.bits() != 0 {
        return Err(Exception::SpecialOperation);
    }
    let mask = cpu.vfetchb(f.ea2, f.b2)?;
    if cpu.psw.ecmode && mask & 0xB8 != 0 {
        return Err(Exception::Specification);
    }
    cpu.psw.sysmask = mask;
    Ok(())
}

/// AC STNSM - Store Then And System Mask [SI]
pub fn store_then_and_system_mask(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Si::from(inst, execflag, cpu);
    priv_check(cpu)?;
    cpu.vstoreb(cpu.psw.sysmask, f.ea1, f.b1)?;
    cpu.psw.sysmask &= f.i2;
    Ok(())
}

/// AD STOSM - Store Then Or System Mask [SI]
pub fn store_then_or_system_mask(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Si::from(inst, execflag, cpu);
    priv_check(cpu)?;
    cpu.vstoreb(cpu.psw.sysmask, f.ea1, f.b1)?;
    let mask = cpu.psw.sysmask | f.i2;
    if cpu.psw.ecmode && mask & 0xB8 != 0 {
        return Err(Exception::Specification);
    }
    cpu.psw.sysmask = mask;
    Ok(())
}

/// B7 LCTL - Load Control [RS]
pub fn load_control(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rs::from(inst, execflag, cpu);
    priv_check(cpu)?;
    fw_check(f.ea2)?;
    let mut addr = f.ea2;
    let mut r = f.r1;
    loop {
        cpu.cr[r] = cpu.vfetch4(addr, f.b2)?;
        if r == f.r3 {
            break;
        }
        r = (r + 1) & 15;
        addr = addr.wrapping_add(4) & cpu.psw.amode_mask();
    }
    // any STD may have changed out from under the TLB
    cpu.purge_tlb();
    Ok(())
}

/// B6 STCTL - Store Control [RS]
pub fn store_control(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rs::from(inst, execflag, cpu);
    priv_check(cpu)?;
    fw_check(f.ea2)?;
    let mut addr = f.ea2;
    let mut r = f.r1;
    loop {
        cpu.vstore4(cpu.cr[r], addr, f.b2)?;
        if r == f.r3 {
            break;
        }
        r = (r + 1) & 15;
        addr = addr.wrapping_add(4) & cpu.psw.amode_mask();
    }
    Ok(())
}

/// B210 SPX - Set Prefix [S]
pub fn set_prefix(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    fw_check(f.ea2)?;
    cpu.sys.perform_serialization();
    let new_prefix = cpu.vfetch4(f.ea2, f.b2)? & 0x7FFF_F000;
    cpu.sys.chkaddr(new_prefix, 4096)?;
    cpu.prefix = new_prefix;
    cpu.sys.cpus[cpu.cpuad as usize]
        .state
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .prefix = new_prefix;
    cpu.purge_tlb();
    cpu.sys.perform_serialization();
    Ok(())
}

/// B211 STPX - Store Prefix [S]
pub fn store_prefix(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    fw_check(f.ea2)?;
    cpu.vstore4(cpu.prefix, f.ea2, f.b2)
}

/// B212 STAP - Store CPU Address [S]
pub fn store_cpu_address(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    if f.ea2 & 1 != 0 {
        return Err(Exception::Specification);
    }
    cpu.vstore2(cpu.cpuad, f.ea2, f.b2)
}

/// B202 STIDP - Store CPU ID [S]
pub fn store_cpu_id(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    dw_check(f.ea2)?;
    // version, serial tagged with the CPU address, machine type 0390
    let dreg: u64 = ((cpu.cpuad as u64) << 48) | 0x0000_0000_0390_0000;
    cpu.vstore8(dreg, f.ea2, f.b2)
}

/// B204 SCK - Set Clock [S]
pub fn set_clock(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    dw_check(f.ea2)?;
    let operand = cpu.vfetch8(f.ea2, f.b2)?;
    crate::update_tod_clock(&cpu.sys);
    let tod = {
        let _todlock = cpu.sys.todlock.lock().unwrap_or_else(|e| e.into_inner());
        cpu.sys.todclk.load(std::sync::atomic::Ordering::Relaxed)
    };
    // the clock itself stays monotonic; only this CPU's view moves
    cpu.todoffset = (operand >> 8).wrapping_sub(tod);
    cpu.psw.cc = Cc::cc_equal();
    Ok(())
}

/// B206 SCKC - Set Clock Comparator [S]
pub fn set_clock_comparator(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    dw_check(f.ea2)?;
    cpu.clkc = cpu.vfetch8(f.ea2, f.b2)? >> 8;
    Ok(())
}

/// B207 STCKC - Store Clock Comparator [S]
pub fn store_clock_comparator(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    dw_check(f.ea2)?;
    cpu.vstore8(cpu.clkc << 8, f.ea2, f.b2)
}

/// B208 SPT - Set CPU Timer [S]
pub fn set_cpu_timer(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    dw_check(f.ea2)?;
    cpu.ptimer = (cpu.vfetch8(f.ea2, f.b2)? as i64) >> 8;
    Ok(())
}

/// B209 STPT - Store CPU Timer [S]
pub fn store_cpu_timer(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    dw_check(f.ea2)?;
    cpu.vstore8((cpu.ptimer << 8) as u64, f.ea2, f.b2)
}

/// B20A SPKA - Set PSW Key From Address [S]
pub fn set_psw_key_from_address(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    let key = (f.ea2 & 0xF0) as u8;
    // problem state may only select keys permitted by the PSW key mask
    if cpu.psw.prob && (cpu.cr[3] << (key >> 4)) & 0x8000_0000 == 0 {
        return Err(Exception::PrivilegedOperation);
    }
    cpu.psw.pkey = key;
    Ok(())
}

/// B20B IPK - Insert PSW Key [S]
pub fn insert_psw_key(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let _f = S::from(inst, execflag, cpu);
    if cpu.psw.prob && cpu.cr[0] & Cr0::EXT_AUTH.bits() == 0 {
        return Err(Exception::PrivilegedOperation);
    }
    cpu.gpr[2] = (cpu.gpr[2] & 0xFFFF_FF00) | cpu.psw.pkey as u32;
    Ok(())
}

/// 08 SSK - Set Storage Key [RR]
pub fn set_storage_key(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rr::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let addr = cpu.gpr[f.r2] & cpu.psw.amode_mask() & PAGE_MASK;
    cpu.sys.chkaddr(addr, 1)?;
    cpu.sys.set_storkey(addr, cpu.gpr[f.r1] as u8 & 0xFE);
    Ok(())
}

/// 09 ISK - Insert Storage Key [RR]
pub fn insert_storage_key(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rr::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let addr = cpu.gpr[f.r2] & cpu.psw.amode_mask() & PAGE_MASK;
    cpu.sys.chkaddr(addr, 1)?;
    cpu.gpr[f.r1] = (cpu.gpr[f.r1] & 0xFFFF_FF00) | cpu.sys.storkey(addr) as u32;
    Ok(())
}

/// B213 RRB - Reset Reference Bit [S]
pub fn reset_reference_bit(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let addr = f.ea2 & PAGE_MASK;
    cpu.sys.chkaddr(addr, 1)?;
    let key = cpu.sys.storkey(addr);
    cpu.sys.and_storkey(addr, StorageKey::from_bits_truncate(!StorageKey::REF.bits()));
    cpu.psw.cc = Cc::from_bits(
        ((key & StorageKey::REF.bits()) >> 1) | ((key & StorageKey::CHANGE.bits()) >> 1),
    );
    Ok(())
}

/// B229 ISKE - Insert Storage Key Extended [RRE]
pub fn insert_storage_key_extended(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let addr = cpu.gpr[f.r2] & PAGE_MASK;
    cpu.sys.chkaddr(addr, 1)?;
    cpu.gpr[f.r1] = (cpu.gpr[f.r1] & 0xFFFF_FF00) | cpu.sys.storkey(addr) as u32;
    Ok(())
}

/// B22B SSKE - Set Storage Key Extended [RRE]
pub fn set_storage_key_extended(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let addr = cpu.gpr[f.r2] & PAGE_MASK;
    cpu.sys.chkaddr(addr, 1)?;
    // key update and TLB invalidation stay consistent under the lock
    let sys = cpu.sys.clone();
    let _mainlock = sys.obtain_mainlock();
    cpu.sys.set_storkey(addr, cpu.gpr[f.r1] as u8 & 0xFE);
    cpu.invalidate_tlb_frame(addr);
    cpu.sys.broadcast_ptlb(cpu.cpuad as usize);
    Ok(())
}

/// B22A RRBE - Reset Reference Bit Extended [RRE]
pub fn reset_reference_bit_extended(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let addr = cpu.gpr[f.r2] & PAGE_MASK;
    cpu.sys.chkaddr(addr, 1)?;
    let sys = cpu.sys.clone();
    let _mainlock = sys.obtain_mainlock();
    let key = cpu.sys.storkey(addr);
    cpu.sys.and_storkey(addr, StorageKey::from_bits_truncate(!StorageKey::REF.bits()));
    cpu.psw.cc = Cc::from_bits(
        ((key & StorageKey::REF.bits()) >> 1) | ((key & StorageKey::CHANGE.bits()) >> 1),
    );
    Ok(())
}

/// B221 IPTE - Invalidate Page Table Entry [RRE]
pub fn invalidate_page_table_entry(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
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

/// B20D PTLB - Purge TLB [S]
pub fn purge_tlb(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let _f = S::from(inst, execflag, cpu);
    priv_check(cpu)?;
    cpu.purge_tlb();
    Ok(())
}

/// B248 PALB - Purge ALB [RRE]
pub fn purge_alb(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let _f = Rre::from(inst, execflag, cpu);
    priv_check(cpu)?;
    // access-list lookups ride through the TLB here
    cpu.purge_tlb();
    Ok(())
}

/// B1 LRA - Load Real Address [RX]
pub fn load_real_address(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rx::from(inst, execflag, cpu);
    priv_check(cpu)?;
    match cpu.translate(f.ea2, Space::Reg(f.b2), f.b2, AccessType::Read) {
        Ok(tr) => {
            if tr.page == PageState::Main {
                cpu.gpr[f.r1] = tr.raddr;
                cpu.psw.cc = Cc::cc_equal();
            } else {
                cpu.psw.cc = Cc::cc_high();
            }
        }
        Err(Exception::SegmentTranslation) => {
            cpu.gpr[f.r1] = cpu.tea;
            cpu.psw.cc = Cc::cc_low();
        }
        Err(Exception::PageTranslation) => {
            cpu.gpr[f.r1] = cpu.tea;
            cpu.psw.cc = Cc::cc_high();
        }
        Err(Exception::Addressing) | Err(Exception::TranslationSpecification) => {
            cpu.psw.cc = Cc::cc_overflow();
        }
        Err(ex) => return Err(ex),
    }
    Ok(())
}

/// E501 TPROT - Test Protection [SSE]
pub fn test_protection(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Sse::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let akey = (f.ea2 & 0xF0) as u8;
    let abs = match cpu.logical_to_abs(f.ea1, f.b1, AccessType::TProt, akey) {
        Ok(abs) => abs,
        Err(Exception::SegmentTranslation) | Err(Exception::PageTranslation) => {
            cpu.psw.cc = Cc::cc_overflow();
            return Ok(());
        }
        Err(ex) => return Err(ex),
    };
    let key = cpu.sys.storkey(abs);
    let fetch_ok = akey == 0
        || key & StorageKey::FETCH.bits() == 0
        || key & StorageKey::KEY.bits() == akey;
    let store_ok = akey == 0 || key & StorageKey::KEY.bits() == akey;
    cpu.psw.cc = if store_ok && fetch_ok {
        Cc::cc_equal()
    } else if fetch_ok {
        Cc::cc_low()
    } else {
        Cc::cc_high()
    };
    Ok(())
}

/// B22C TB - Test Block [RRE]
pub fn test_block(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let addr = cpu.gpr[f.r2] & PAGE_MASK;
    cpu.sys.chkaddr(addr, 4096)?;
    // the block is usable: zero it and report cc0
    for i in 0..4096 {
        cpu.sys.store_abs_byte(addr + i, 0);
    }
    cpu.sys
        .and_storkey(addr, StorageKey::from_bits_truncate(!StorageKey::BADFRM.bits()));
    cpu.gpr[0] = 0;
    cpu.psw.cc = Cc::cc_equal();
    Ok(())
}

/// B219 SAC / B279 SACF - Set Address Space Control [S]
pub fn set_address_space_control(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = S::from(inst, execflag, cpu);
    if cpu.psw.real_mode() {
        return Err(Exception::SpecialOperation);
    }
    let mode = f.ea2 & 0xF00;
    match mode {
        0x000 => {
            cpu.psw.space = false;
            cpu.psw.armode = false;
        }
        0x100 => {
            if cpu.cr[0] & Cr0::SEC_SPACE.bits() == 0 {
                return Err(Exception::SpecialOperation);
            }
            cpu.psw.space = true;
            cpu.psw.armode = false;
        }
        0x200 => {
            if cpu.cr[0] & Cr0::ASF.bits() == 0 {
                return Err(Exception::SpecialOperation);
            }
            cpu.psw.space = false;
            cpu.psw.armode = true;
        }
        0x300 => {
            if cpu.psw.prob {
                return Err(Exception::PrivilegedOperation);
            }
            cpu.psw.space = true;
            cpu.psw.armode = true;
        }
        _ => return Err(Exception::Specification),
    }
    Ok(())
}

/// B224 IAC - Insert Address Space Control [RRE]
pub fn insert_address_space_control(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    if cpu.psw.real_mode() {
        return Err(Exception::SpecialOperation);
    }
    if cpu.psw.prob && cpu.cr[0] & Cr0::EXT_AUTH.bits() == 0 {
        return Err(Exception::PrivilegedOperation);
    }
    let mode: u8 = if cpu.psw.home_space_mode() {
        3
    } else if cpu.psw.secondary_space_mode() {
        2
    } else if cpu.psw.access_register_mode() {
        1
    } else {
        0
    };
    cpu.gpr[f.r1] = (cpu.gpr[f.r1] & 0xFF00_FFFF) | ((mode as u32) << 16);
    cpu.psw.cc = Cc::from_bits(mode);
    Ok(())
}

/// B226 EPAR - Extract Primary ASN [RRE]
pub fn extract_primary_asn(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    if cpu.psw.real_mode() {
        return Err(Exception::SpecialOperation);
    }
    if cpu.psw.prob && cpu.cr[0] & Cr0::EXT_AUTH.bits() == 0 {
        return Err(Exception::PrivilegedOperation);
    }
    cpu.gpr[f.r1] = cpu.cr[4] & 0xFFFF;
    Ok(())
}

/// B227 ESAR - Extract Secondary ASN [RRE]
pub fn extract_secondary_asn(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    if cpu.psw.real_mode() {
        return Err(Exception::SpecialOperation);
    }
    if cpu.psw.prob && cpu.cr[0] & Cr0::EXT_AUTH.bits() == 0 {
        return Err(Exception::PrivilegedOperation);
    }
    cpu.gpr[f.r1] = cpu.cr[3] & 0xFFFF;
    Ok(())
}

/// B225 SSAR - Set Secondary ASN [RRE]
pub fn set_secondary_asn(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    if cpu.psw.real_mode() {
        return Err(Exception::SpecialOperation);
    }
    let asn = cpu.gpr[f.r1] & 0xFFFF;
    if asn == cpu.cr[4] & 0xFFFF {
        // setting the secondary space equal to the primary
        cpu.cr[3] = (cpu.cr[3] & 0xFFFF_0000) | asn;
        cpu.cr[7] = cpu.cr[1];
        return Ok(());
    }
    let (aste, std) = asn_translate(cpu, asn as u16)?;
    debug!("SSAR: ASN {:04X} ASTE {:08X}", asn, aste);
    cpu.cr[3] = (cpu.cr[3] & 0xFFFF_0000) | asn;
    cpu.cr[7] = std;
    Ok(())
}

/// ASN translation through the ASN first and second tables of CR14.
/// Returns the ASTE origin and the segment table designation.
fn asn_translate(cpu: &mut Cpu, asn: u16) -> Result<(u32, u32), Exception> {
    if cpu.cr[14] & 0x0008_0000 == 0 {
        return Err(Exception::SpecialOperation);
    }
    let afto = (cpu.cr[14] & 0x0007_FFFF) << 12;
    let afx = (asn as u32 & 0xFFC0) >> 6;
    let afte_addr = afto.wrapping_add(afx << 2);
    cpu.sys.chkaddr(afte_addr, 4)?;
    let afte = cpu.sys.fetch4_abs(afte_addr);
    if afte & 0x8000_0000 != 0 {
        cpu.tea = asn as u32;
        return Err(Exception::AfxTranslation);
    }
    let asto = if cpu.cr[0] & Cr0::ASF.bits() != 0 {
        afte & 0x7FFF_FFC0
    } else {
        afte & 0x7FFF_FFF0
    };
    let asx = asn as u32 & 0x003F;
    let aste_addr = asto.wrapping_add(asx * 64);
    cpu.sys.chkaddr(aste_addr, 32)?;
    let aste0 = cpu.sys.fetch4_abs(aste_addr);
    if aste0 & 0x8000_0000 != 0 {
        cpu.tea = asn as u32;
        return Err(Exception::AsxTranslation);
    }
    let std = cpu.sys.fetch4_abs(aste_addr + 8);
    Ok((aste_addr, std))
}

/// B223 IVSK - Insert Virtual Storage Key [RRE]
pub fn insert_virtual_storage_key(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    if cpu.psw.real_mode() {
        return Err(Exception::SpecialOperation);
    }
    if cpu.psw.prob && cpu.cr[0] & Cr0::EXT_AUTH.bits() == 0 {
        return Err(Exception::PrivilegedOperation);
    }
    let addr = cpu.gpr[f.r2] & cpu.psw.amode_mask();
    let abs = cpu.logical_to_abs(addr, f.r2, AccessType::TProt, 0)?;
    cpu.gpr[f.r1] = (cpu.gpr[f.r1] & 0xFFFF_FF00) | (cpu.sys.storkey(abs) & 0xF8) as u32;
    Ok(())
}

/// The byte mover of MVCP and MVCS: one operand in the primary space, the
/// other in the secondary, both under the key from R3.
fn move_across_spaces(
    inst: &[u8],
    execflag: bool,
    cpu: &mut Cpu,
    to_primary: bool,
) -> ExecResult {
    let f = Ss::from(inst, execflag, cpu);
    if cpu.psw.real_mode() || cpu.cr[0] & Cr0::SEC_SPACE.bits() == 0 {
        return Err(Exception::SpecialOperation);
    }
    let key = (cpu.gpr[f.r3] & 0xF0) as u8;
    if cpu.psw.prob && (cpu.cr[3] << (key >> 4)) & 0x8000_0000 == 0 {
        return Err(Exception::PrivilegedOperation);
    }
    let len = cpu.gpr[f.r1];
    if len > 256 {
        cpu.psw.cc = Cc::cc_overflow();
        return Ok(());
    }
    let (space1, key1, space2, key2) = if to_primary {
        (Space::Primary, cpu.psw.pkey, Space::Secondary, key)
    } else {
        (Space::Secondary, key, Space::Primary, cpu.psw.pkey)
    };
    let mut addr1 = f.ea1;
    let mut addr2 = f.ea2;
    for _ in 0..len {
        let abs2 = cpu.logical_to_abs_space(addr2, space2, 0, AccessType::Read, key2)?;
        let byte = cpu.sys.fetch_abs_byte(abs2);
        let abs1 = cpu.logical_to_abs_space(addr1, space1, 0, AccessType::Write, key1)?;
        cpu.sys.store_abs_byte(abs1, byte);
        addr1 = addr1.wrapping_add(1) & cpu.psw.amode_mask();
        addr2 = addr2.wrapping_add(1) & cpu.psw.amode_mask();
    }
    cpu.psw.cc = Cc::cc_equal();
    Ok(())
}

/// DA MVCP - Move to Primary [SS]
pub fn move_to_primary(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    move_across_spaces(inst, execflag, cpu, true)
}

/// DB MVCS - Move to Secondary [SS]
pub fn move_to_secondary(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    move_across_spaces(inst, execflag, cpu, false)
}

/// D9 MVCK - Move with Key [SS]
pub fn move_with_key(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Ss::from(inst, execflag, cpu);
    let key = (cpu.gpr[f.r3] & 0xF0) as u8;
    if cpu.psw.prob && (cpu.cr[3] << (key >> 4)) & 0x8000_0000 == 0 {
        return Err(Exception::PrivilegedOperation);
    }
    let len = cpu.gpr[f.r1];
    if len > 256 {
        cpu.psw.cc = Cc::cc_overflow();
        return Ok(());
    }
    if len > 0 {
        cpu.move_chars(f.ea1, f.b1, cpu.psw.pkey, f.ea2, f.b2, key, len as usize - 1)?;
    }
    cpu.psw.cc = Cc::cc_equal();
    Ok(())
}

/// 99 TRACE - Trace [RS]
pub fn trace(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rs::from(inst, execflag, cpu);
    priv_check(cpu)?;
    fw_check(f.ea2)?;
    if cpu.cr[12] & 0x0000_0001 == 0 {
        return Ok(());
    }
    // explicit tracing writes no table here, the event is only logged
    let n = cpu.vfetch4(f.ea2, f.b2)?;
    debug!(
        "CPU{:04X}: TRACE {:X}-{:X} operand {:08X}",
        cpu.cpuad, f.r1, f.r3, n
    );
    Ok(())
}

/// 0107 SCKPF - Set Clock Programmable Field [E]
pub fn set_clock_programmable_field(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let _f = E::from(inst, execflag, cpu);
    priv_check(cpu)?;
    if cpu.gpr[0] & 0xFFFF_0000 != 0 {
        return Err(Exception::Specification);
    }
    cpu.todpr = cpu.gpr[0] as u16;
    Ok(())
}

/// B246 STURA - Store Using Real Address [RRE]
pub fn store_using_real_address(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let raddr = cpu.gpr[f.r2] & cpu.psw.amode_mask();
    fw_check(raddr)?;
    let abs = crate::psa::apply_prefixing(raddr, cpu.prefix);
    cpu.sys.chkaddr(abs, 4)?;
    cpu.sys.store4_abs(abs, cpu.gpr[f.r1]);
    cpu.sys
        .or_storkey(abs, StorageKey::REF | StorageKey::CHANGE);
    Ok(())
}

/// B24B LURA - Load Using Real Address [RRE]
pub fn load_using_real_address(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rre::from(inst, execflag, cpu);
    priv_check(cpu)?;
    let raddr = cpu.gpr[f.r2] & cpu.psw.amode_mask();
    fw_check(raddr)?;
    let abs = crate::psa::apply_prefixing(raddr, cpu.prefix);
    cpu.sys.chkaddr(abs, 4)?;
    cpu.gpr[f.r1] = cpu.sys.fetch4_abs(abs);
    cpu.sys.or_storkey(abs, StorageKey::REF);
    Ok(())
}

/// AE SIGP - Signal Processor [RS]
pub fn signal_processor(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    let f = Rs::from(inst, execflag, cpu);
    priv_check(cpu)?;
    cpu.sys.perform_serialization();
    let target = cpu.gpr[f.r3] as u16;
    let order = (f.ea2 & 0xFF) as u8;
    let parm = cpu.gpr[f.r1 | 1];
    let (cc, status) = sigp::signal(cpu, target, order, parm);
    if cc == Cc::Low {
        cpu.gpr[f.r1] = status;
    }
    cpu.psw.cc = cc;
    cpu.sys.perform_serialization();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dat::CR0_TRAN_ESA390;
    use crate::memory::System;
    use crate::parser;
    use std::sync::Arc;

    fn cpu() -> Cpu {
        Cpu::new(0, Arc::new(System::new(0x100000, 0, 1)))
    }

    fn run(cpu: &mut Cpu, inst: &[u8]) -> ExecResult {
        parser::execute_instruction(inst, false, cpu)
    }

    #[test]
    fn privileged_instructions_check_problem_state() {
        let mut cpu = cpu();
        cpu.psw.prob = true;
        assert_eq!(
            run(&mut cpu, &[0x82, 0x00, 0x10, 0x00]),
            Err(Exception::PrivilegedOperation)
        );
        assert_eq!(
            run(&mut cpu, &[0xB2, 0x0D, 0x00, 0x00]),
            Err(Exception::PrivilegedOperation)
        );
    }

    #[test]
    fn lpsw_loads_an_enabled_wait() {
        let mut cpu = cpu();
        cpu.sys
            .store_abs(0x1000, &[0x02, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x20, 0x00]);
        run(&mut cpu, &[0x82, 0x00, 0x10, 0x00]).unwrap();
        assert!(cpu.psw.wait);
        assert!(cpu.psw.ecmode);
        assert_eq!(cpu.psw.ia, 0x2000);
    }

    #[test]
    fn lctl_stctl_roundtrip() {
        let mut cpu = cpu();
        cpu.cr[2] = 0xAAAA_0001;
        cpu.cr[3] = 0xBBBB_0002;
        run(&mut cpu, &[0xB6, 0x23, 0x10, 0x00]).unwrap(); // STCTL 2,3
        cpu.cr[2] = 0;
        cpu.cr[3] = 0;
        run(&mut cpu, &[0xB7, 0x23, 0x10, 0x00]).unwrap(); // LCTL 2,3
        assert_eq!(cpu.cr[2], 0xAAAA_0001);
        assert_eq!(cpu.cr[3], 0xBBBB_0002);
    }

    #[test]
    fn spx_and_stpx() {
        let mut cpu = cpu();
        cpu.sys.store4_abs(0x1000, 0x0002_3000);
        run(&mut cpu, &[0xB2, 0x10, 0x10, 0x00]).unwrap(); // SPX
        assert_eq!(cpu.prefix, 0x0002_3000);
        run(&mut cpu, &[0xB2, 0x11, 0x10, 0x04]).unwrap(); // STPX
        assert_eq!(cpu.sys.fetch4_abs(0x1004), 0x0002_3000);
    }

    #[test]
    fn sske_rrbe_reference_bits() {
        let mut cpu = cpu();
        cpu.gpr[1] = 0x60;
        cpu.gpr[2] = 0x5000;
        run(&mut cpu, &[0xB2, 0x2B, 0x00, 0x12]).unwrap(); // SSKE
        assert_eq!(cpu.sys.storkey(0x5000), 0x60);
        cpu.sys.or_storkey(0x5000, StorageKey::REF);
        run(&mut cpu, &[0xB2, 0x2A, 0x00, 0x12]).unwrap(); // RRBE
        assert_eq!(cpu.sys.storkey(0x5000) & StorageKey::REF.bits(), 0);
        assert_eq!(cpu.psw.cc, Cc::High); // ref was on, change off
    }

    #[test]
    fn spka_honors_the_key_mask_in_problem_state() {
        let mut cpu = cpu();
        run(&mut cpu, &[0xB2, 0x0A, 0x00, 0x40]).unwrap();
        assert_eq!(cpu.psw.pkey, 0x40);
        cpu.psw.prob = true;
        cpu.cr[3] = 0;
        assert_eq!(
            run(&mut cpu, &[0xB2, 0x0A, 0x00, 0x40]),
            Err(Exception::PrivilegedOperation)
        );
        cpu.cr[3] = 0x0800_0000; // PKM allows key 4
        run(&mut cpu, &[0xB2, 0x0A, 0x00, 0x40]).unwrap();
        assert_eq!(cpu.psw.pkey, 0x40);
    }

    #[test]
    fn ssm_can_be_suppressed() {
        let mut cpu = cpu();
        cpu.sys.store_abs_byte(0x1000, 0x03);
        run(&mut cpu, &[0x80, 0x00, 0x10, 0x00]).unwrap();
        assert_eq!(cpu.psw.sysmask, 0x03);
        cpu.cr[0] = Cr0::SSM_SUPP.bits();
        assert_eq!(
            run(&mut cpu, &[0x80, 0x00, 0x10, 0x00]),
            Err(Exception::SpecialOperation)
        );
    }

    #[test]
    fn lra_reports_translation_state() {
        let mut cpu = cpu();
        cpu.cr[0] = CR0_TRAN_ESA390;
        cpu.cr[1] = 0x0000_1000;
        cpu.sys.store4_abs(0x1000, 0x0000_2000 | 0x0F);
        cpu.sys.store4_abs(0x2000, 0x0001_0000);
        run(&mut cpu, &[0xB1, 0x30, 0x00, 0x00]).unwrap();
        assert_eq!(cpu.psw.cc, Cc::Equal);
        assert_eq!(cpu.gpr[3], 0x0001_0000);
    }
}
