// Dynamic address translation and operand access. A logical address goes
// through ALET resolution (AR mode), the segment and page tables of the
// selected address space, prefixing and key protection before it reaches the
// storage substrate. Each CPU carries a private TLB consulted by (STD,
// virtual page); invalidation clears exactly the matching entries.

use crate::fields::Exception;
use crate::memory::{StorageKey, PAGE_BYTEMASK, PAGE_MASK};
use crate::processor::Cpu;
use crate::psa;
use bitflags::bitflags;

bitflags! {
    /// Control register 0 bits the translator and the timers consume.
    #[derive(Debug, Copy, Clone)]
    pub struct Cr0: u32 {
        const SSM_SUPP    = 0x4000_0000;
        const TOD_SYNC    = 0x2000_0000;
        const LOW_PROT    = 0x1000_0000;
        const EXT_AUTH    = 0x0800_0000;
        const SEC_SPACE   = 0x0400_0000;
        const FETCH_OVRD  = 0x0200_0000;
        const STORE_OVRD  = 0x0100_0000;
        const TRAN_FMT    = 0x00F8_0000;
        const ASF         = 0x0001_0000;
        const XM_CLKC     = 0x0000_0800;
        const XM_PTIMER   = 0x0000_0400;
        const XM_ITIMER   = 0x0000_0080;
        const XM_INTKEY   = 0x0000_0040;
        const XM_EMERSIG  = 0x0000_4000;
        const XM_EXTCALL  = 0x0000_2000;
    }
}

/// The 1M/4K ESA/390 translation format in CR0 bits 8-12.
pub const CR0_TRAN_ESA390: u32 = 0x00B0_0000;

// Segment table designation.
pub const STD_STO: u32 = 0x7FFF_F000;
pub const STD_RESV: u32 = 0x0000_0C00;
pub const STD_PRIVATE: u32 = 0x0000_0100;
pub const STD_STL: u32 = 0x0000_007F;

// Segment table entry.
pub const SEGTAB_PTO: u32 = 0x7FFF_FFC0;
pub const SEGTAB_INVALID: u32 = 0x0000_0020;
pub const SEGTAB_COMMON: u32 = 0x0000_0010;
pub const SEGTAB_PTL: u32 = 0x0000_000F;
pub const SEGTAB_RESV: u32 = 0x8000_0000;

// Page table entry.
pub const PAGETAB_PFRA: u32 = 0x7FFF_F000;
pub const PAGETAB_INVALID: u32 = 0x0000_0400;
pub const PAGETAB_PROT: u32 = 0x0000_0200;
pub const PAGETAB_ESVALID: u32 = 0x0000_0100;
pub const PAGETAB_RESV: u32 = 0x8000_0900;

// Access-list entry token pieces.
pub const ALET_PRIMARY: u32 = 0;
pub const ALET_SECONDARY: u32 = 1;
pub const ALET_HOME: u32 = 2;
pub const ALET_RESV: u32 = 0xFE00_0000;
pub const ALET_PRI_LIST: u32 = 0x0100_0000;
pub const ALET_ALESN: u32 = 0x00FF_0000;
pub const ALET_ALEN: u32 = 0x0000_FFFF;

pub const ALD_ALO: u32 = 0x7FFF_FF80;
pub const ALD_ALL: u32 = 0x0000_007F;
pub const ALD_ALL_SHIFT: u32 = 3;

pub const ALE0_INVALID: u32 = 0x8000_0000;
pub const ALE0_FETCHONLY: u32 = 0x0200_0000;
pub const ALE0_PRIVATE: u32 = 0x0100_0000;
pub const ALE0_ALESN: u32 = 0x00FF_0000;
pub const ALE0_ALEAX: u32 = 0x0000_FFFF;
pub const ALE2_ASTE: u32 = 0x7FFF_FFC0;

pub const ASTE0_INVALID: u32 = 0x8000_0000;
pub const ASTE0_ATO: u32 = 0x7FFF_FFFC;
pub const ASTE1_AX: u32 = 0xFFFF_0000;
pub const ASTE1_ATL: u32 = 0x0000_FFF0;

pub const CR2_DUCTO: u32 = 0x7FFF_FFC0;
pub const CR5_PASTEO: u32 = 0x7FFF_FFC0;

/// What an access is for; protection and reference-bit behavior key off it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    InstFetch,
    /// LKPG lock path: page-in-expanded-storage is reported, not checked.
    Lockpage,
    Unlkpage,
    /// MVPG operand accesses may continue on page-not-present.
    MvpgRead,
    MvpgWrite,
    /// TPROT tests without faulting or setting reference bits.
    TProt,
}

impl AccessType {
    fn is_store(self) -> bool {
        matches!(self, AccessType::Write | AccessType::MvpgWrite)
    }
}

/// Which address space an access goes through.
#[derive(Debug, Copy, Clone)]
pub enum Space {
    /// The access register numbered by the base field (AR mode only).
    Reg(usize),
    Primary,
    Secondary,
    Home,
    /// Bypass translation; the address is real.
    Real,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PageState {
    Main,
    /// Valid only in expanded storage.
    Expanded { block: u32 },
}

/// Successful translation result.
pub struct Translation {
    pub raddr: u32,
    pub private: bool,
    pub protect: bool,
    /// Segment-table indication for the translation exception address.
    pub stid: u32,
    pub page: PageState,
}

/// One translation-lookaside buffer entry.
#[derive(Debug, Copy, Clone)]
pub struct TlbEntry {
    pub std: u32,
    pub vaddr: u32,
    pub pte: u32,
    pub common: bool,
    pub valid: bool,
}

impl TlbEntry {
    pub const fn invalid() -> TlbEntry {
        TlbEntry { std: 0, vaddr: 0, pte: 0, common: false, valid: false }
    }
}

pub const TLB_SIZE: usize = 256;

impl Cpu {
    // -- segment table designation selection ------------------------------

    /// Resolve the STD for an access, running ALET translation in AR mode.
    /// Returns (std, stid, fetch_only).
    fn fetch_std(&mut self, space: Space, arn: usize) -> Result<(u32, u32, bool), Exception> {
        match space {
            Space::Primary => Ok((self.cr[1], psa::TEA_ST_PRIMARY, false)),
            Space::Secondary => Ok((self.cr[7], psa::TEA_ST_SECNDRY, false)),
            Space::Home => Ok((self.cr[13], psa::TEA_ST_HOME, false)),
            Space::Real => Ok((self.cr[1], psa::TEA_ST_PRIMARY, false)),
            Space::Reg(_) => {
                if self.psw.armode && !self.psw.space {
                    let alet = if arn == 0 { 0 } else { self.ar[arn] };
                    let (std, fo) = self.alet_to_std(alet, arn)?;
                    Ok((std, psa::TEA_ST_ARMODE, fo))
                } else if self.psw.space && !self.psw.armode {
                    Ok((self.cr[7], psa::TEA_ST_SECNDRY, false))
                } else if self.psw.space && self.psw.armode {
                    Ok((self.cr[13], psa::TEA_ST_HOME, false))
                } else {
                    Ok((self.cr[1], psa::TEA_ST_PRIMARY, false))
                }
            }
        }
    }

    /// Access-list entry token to segment table designation. Returns the STD
    /// and the fetch-only indication of the access-list entry.
    fn alet_to_std(&mut self, alet: u32, arn: usize) -> Result<(u32, bool), Exception> {
        match alet {
            ALET_PRIMARY => return Ok((self.cr[1], false)),
            ALET_SECONDARY => return Ok((self.cr[7], false)),
            ALET_HOME => return Ok((self.cr[13], false)),
            _ => {}
        }
        let fail = |cpu: &mut Cpu, ex: Exception| {
            cpu.excarid = arn as u8;
            Err(ex)
        };
        if alet & ALET_RESV != 0 {
            return fail(self, Exception::AletSpecification);
        }
        // Effective access-list designation from the primary ASTE or the
        // dispatchable-unit control table.
        let ald = if alet & ALET_PRI_LIST != 0 {
            let pasteo = self.cr[5] & CR5_PASTEO;
            self.fetch4_real_checked(pasteo + 16)?
        } else {
            let ducto = self.cr[2] & CR2_DUCTO;
            self.fetch4_real_checked(ducto + 16)?
        };
        let alen = alet & ALET_ALEN;
        if alen >= ((ald & ALD_ALL) + 1) << ALD_ALL_SHIFT {
            return fail(self, Exception::AlenTranslation);
        }
        let aleo = (ald & ALD_ALO).wrapping_add(alen << 4);
        let ale0 = self.fetch4_real_checked(aleo)?;
        if ale0 & ALE0_INVALID != 0 {
            return fail(self, Exception::AlenTranslation);
        }
        if (ale0 & ALE0_ALESN) != (alet & ALET_ALESN) {
            return fail(self, Exception::AleSequence);
        }
        let ale2 = self.fetch4_real_checked(aleo + 8)?;
        let ale3 = self.fetch4_real_checked(aleo + 12)?;
        let asteo = ale2 & ALE2_ASTE;
        let aste0 = self.fetch4_real_checked(asteo)?;
        if aste0 & ASTE0_INVALID != 0 {
            return fail(self, Exception::AsteValidity);
        }
        let aste5 = self.fetch4_real_checked(asteo + 20)?;
        if aste5 != ale3 {
            return fail(self, Exception::AsteSequence);
        }
        // Private entries not matching the extended authorization index must
        // pass the secondary-authority bit of the authority table.
        let eax = self.cr[8] >> 16;
        if ale0 & ALE0_PRIVATE != 0 && (ale0 & ALE0_ALEAX) != eax {
            let aste1 = self.fetch4_real_checked(asteo + 4)?;
            if eax > ((aste1 & ASTE1_ATL) >> 4) * 4 + 3 {
                return fail(self, Exception::ExtendedAuthority);
            }
            let ato = aste0 & ASTE0_ATO;
            let atbyte = self.fetch_real_byte_checked(ato + eax / 4)?;
            if atbyte & (0x40 >> ((eax & 3) * 2)) == 0 {
                return fail(self, Exception::ExtendedAuthority);
            }
        }
        let std = self.fetch4_real_checked(asteo + 8)?;
        Ok((std, ale0 & ALE0_FETCHONLY != 0))
    }

    fn fetch4_real_checked(&mut self, raddr: u32) -> Result<u32, Exception> {
        let abs = psa::apply_prefixing(raddr, self.prefix);
        self.sys.chkaddr(abs, 4)?;
        Ok(self.sys.fetch4_abs(abs))
    }

    fn fetch_real_byte_checked(&mut self, raddr: u32) -> Result<u8, Exception> {
        let abs = psa::apply_prefixing(raddr, self.prefix);
        self.sys.chkaddr(abs, 1)?;
        Ok(self.sys.fetch_abs_byte(abs))
    }

    // -- translation ------------------------------------------------------

    /// Translate a virtual address through the segment and page tables of
    /// the selected space, consulting and populating the TLB. The returned
    /// address is real (not yet prefixed).
    pub fn translate(
        &mut self,
        vaddr: u32,
        space: Space,
        arn: usize,
        acctype: AccessType,
    ) -> Result<Translation, Exception> {
        let (std, stid, fetch_only) = self.fetch_std(space, arn)?;
        let private = std & STD_PRIVATE != 0;

        // TLB first; a hit short-circuits the table walk.
        let ix = (vaddr >> 12) as usize & (TLB_SIZE - 1);
        let entry = self.tlb[ix];
        if entry.valid
            && entry.vaddr == vaddr & PAGE_MASK
            && (entry.std == std || entry.common)
        {
            let pte = entry.pte;
            return Ok(Translation {
                raddr: (pte & PAGETAB_PFRA) | (vaddr & PAGE_BYTEMASK),
                private,
                protect: pte & PAGETAB_PROT != 0 || fetch_only,
                stid,
                page: PageState::Main,
            });
        }

        let tea = |cpu: &mut Cpu, ex: Exception| {
            cpu.tea = (vaddr & psa::TEA_EFFADDR) | stid;
            if matches!(stid, psa::TEA_ST_SECNDRY) {
                cpu.tea |= psa::TEA_SECADDR;
            }
            Err(ex)
        };

        if self.cr[0] & Cr0::TRAN_FMT.bits() != CR0_TRAN_ESA390 || std & STD_RESV != 0 {
            return tea(self, Exception::TranslationSpecification);
        }

        // Segment table lookup; length is in units of 64 entries.
        if (vaddr >> 26) > (std & STD_STL) {
            return tea(self, Exception::SegmentTranslation);
        }
        let sto = std & STD_STO;
        let steaddr = sto.wrapping_add(((vaddr >> 20) & 0x7FF) << 2);
        let ste = self.fetch4_real_checked(steaddr)?;
        if ste & SEGTAB_RESV != 0 {
            return tea(self, Exception::TranslationSpecification);
        }
        if ste & SEGTAB_INVALID != 0 {
            return tea(self, Exception::SegmentTranslation);
        }
        let common = ste & SEGTAB_COMMON != 0;

        // Page table lookup; length is in units of 16 entries.
        let pagex = (vaddr >> 12) & 0xFF;
        if (pagex >> 4) > (ste & SEGTAB_PTL) {
            return tea(self, Exception::PageTranslation);
        }
        let pteaddr = (ste & SEGTAB_PTO).wrapping_add(pagex << 2);
        let pte = self.fetch4_real_checked(pteaddr)?;
        if pte & PAGETAB_RESV != 0 {
            return tea(self, Exception::TranslationSpecification);
        }
        if pte & PAGETAB_INVALID != 0 {
            // A page resident only in expanded storage is reported to the
            // callers that can continue.
            if pte & PAGETAB_ESVALID != 0
                && matches!(
                    acctype,
                    AccessType::Lockpage
                        | AccessType::Unlkpage
                        | AccessType::MvpgRead
                        | AccessType::MvpgWrite
                )
            {
                return Ok(Translation {
                    raddr: 0,
                    private,
                    protect: pte & PAGETAB_PROT != 0 || fetch_only,
                    stid,
                    page: PageState::Expanded { block: (pte & PAGETAB_PFRA) >> 12 },
                });
            }
            return tea(self, Exception::PageTranslation);
        }

        self.tlb[ix] = TlbEntry {
            std,
            vaddr: vaddr & PAGE_MASK,
            pte,
            common,
            valid: true,
        };

        Ok(Translation {
            raddr: (pte & PAGETAB_PFRA) | (vaddr & PAGE_BYTEMASK),
            private,
            protect: pte & PAGETAB_PROT != 0 || fetch_only,
            stid,
            page: PageState::Main,
        })
    }

    /// Translate, prefix, protection-check and reference-bit a logical
    /// address, yielding the absolute address of the byte.
    pub fn logical_to_abs_space(
        &mut self,
        addr: u32,
        space: Space,
        arn: usize,
        acctype: AccessType,
        akey: u8,
    ) -> Result<u32, Exception> {
        let real_mode = matches!(space, Space::Real) || self.psw.real_mode();
        let (raddr, private, protect) = if real_mode {
            (addr, false, false)
        } else {
            let tr = self.translate(addr, space, arn, acctype)?;
            if tr.page != PageState::Main {
                return Err(Exception::PageTranslation);
            }
            (tr.raddr, tr.private, tr.protect)
        };

        // Low-address protection applies to the effective address before
        // translation, stores only, never in a private space.
        if acctype.is_store()
            && addr < 512
            && self.cr[0] & Cr0::LOW_PROT.bits() != 0
            && !private
        {
            return Err(Exception::Protection);
        }
        if acctype.is_store() && protect {
            return Err(Exception::Protection);
        }

        let abs = psa::apply_prefixing(raddr, self.prefix);
        self.sys.chkaddr(abs, 1)?;

        let key = self.sys.storkey(abs);
        if acctype == AccessType::TProt {
            return Ok(abs);
        }
        if acctype.is_store() {
            if akey != 0
                && (key & StorageKey::KEY.bits()) != akey
                && !(self.cr[0] & Cr0::STORE_OVRD.bits() != 0
                    && key & StorageKey::KEY.bits() == 0x90)
            {
                return Err(Exception::Protection);
            }
            self.sys.or_storkey(abs, StorageKey::REF | StorageKey::CHANGE);
        } else {
            if akey != 0
                && key & StorageKey::FETCH.bits() != 0
                && (key & StorageKey::KEY.bits()) != akey
                && !(self.cr[0] & Cr0::FETCH_OVRD.bits() != 0 && addr < 2048)
            {
                return Err(Exception::Protection);
            }
            self.sys.or_storkey(abs, StorageKey::REF);
        }
        Ok(abs)
    }

    pub fn logical_to_abs(
        &mut self,
        addr: u32,
        arn: usize,
        acctype: AccessType,
        akey: u8,
    ) -> Result<u32, Exception> {
        self.logical_to_abs_space(addr, Space::Reg(arn), arn, acctype, akey)
    }

    // -- operand fetch and store ------------------------------------------

    pub fn vfetchb(&mut self, addr: u32, arn: usize) -> Result<u8, Exception> {
        let abs = self.logical_to_abs(addr, arn, AccessType::Read, self.psw.pkey)?;
        Ok(self.sys.fetch_abs_byte(abs))
    }

    pub fn vstoreb(&mut self, byte: u8, addr: u32, arn: usize) -> Result<(), Exception> {
        let abs = self.logical_to_abs(addr, arn, AccessType::Write, self.psw.pkey)?;
        self.sys.store_abs_byte(abs, byte);
        Ok(())
    }

    fn vfetch_n(&mut self, addr: u32, arn: usize, buf: &mut [u8]) -> Result<(), Exception> {
        let len = buf.len() as u32;
        if (addr & PAGE_BYTEMASK) + len <= 0x1000 {
            let abs = self.logical_to_abs(addr, arn, AccessType::Read, self.psw.pkey)?;
            self.sys.fetch_abs(abs, buf);
            return Ok(());
        }
        // Crosses a page boundary: translate both pages, split the access.
        for (i, b) in buf.iter_mut().enumerate() {
            let a = addr.wrapping_add(i as u32) & self.psw.amode_mask();
            let abs = self.logical_to_abs(a, arn, AccessType::Read, self.psw.pkey)?;
            *b = self.sys.fetch_abs_byte(abs);
        }
        Ok(())
    }

    fn vstore_n(&mut self, addr: u32, arn: usize, bytes: &[u8]) -> Result<(), Exception> {
        let len = bytes.len() as u32;
        if (addr & PAGE_BYTEMASK) + len <= 0x1000 {
            let abs = self.logical_to_abs(addr, arn, AccessType::Write, self.psw.pkey)?;
            self.sys.store_abs(abs, bytes);
            return Ok(());
        }
        // The rightmost page is validated before any byte is stored so the
        // instruction suppresses cleanly on an access exception.
        let last = addr.wrapping_add(len - 1) & self.psw.amode_mask();
        self.logical_to_abs(last, arn, AccessType::Write, self.psw.pkey)?;
        for (i, b) in bytes.iter().enumerate() {
            let a = addr.wrapping_add(i as u32) & self.psw.amode_mask();
            let abs = self.logical_to_abs(a, arn, AccessType::Write, self.psw.pkey)?;
            self.sys.store_abs_byte(abs, *b);
        }
        Ok(())
    }

    pub fn vfetch2(&mut self, addr: u32, arn: usize) -> Result<u16, Exception> {
        let mut b = [0u8; 2];
        self.vfetch_n(addr, arn, &mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    pub fn vfetch4(&mut self, addr: u32, arn: usize) -> Result<u32, Exception> {
        let mut b = [0u8; 4];
        self.vfetch_n(addr, arn, &mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    pub fn vfetch8(&mut self, addr: u32, arn: usize) -> Result<u64, Exception> {
        let mut b = [0u8; 8];
        self.vfetch_n(addr, arn, &mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    pub fn vstore2(&mut self, value: u16, addr: u32, arn: usize) -> Result<(), Exception> {
        self.vstore_n(addr, arn, &value.to_be_bytes())
    }

    pub fn vstore4(&mut self, value: u32, addr: u32, arn: usize) -> Result<(), Exception> {
        self.vstore_n(addr, arn, &value.to_be_bytes())
    }

    pub fn vstore8(&mut self, value: u64, addr: u32, arn: usize) -> Result<(), Exception> {
        self.vstore_n(addr, arn, &value.to_be_bytes())
    }

    /// Fetch `buf.len()` bytes (at most 256) from the operand.
    pub fn vfetchc(&mut self, buf: &mut [u8], addr: u32, arn: usize) -> Result<(), Exception> {
        self.vfetch_n(addr, arn, buf)
    }

    /// Store `bytes.len()` bytes (at most 256) into the operand.
    pub fn vstorec(&mut self, bytes: &[u8], addr: u32, arn: usize) -> Result<(), Exception> {
        self.vstore_n(addr, arn, bytes)
    }

    /// Check that `len_m1 + 1` operand bytes are accessible without moving
    /// any data: leftmost byte and rightmost page are translated.
    pub fn validate_operand(
        &mut self,
        addr: u32,
        arn: usize,
        len_m1: usize,
        acctype: AccessType,
    ) -> Result<(), Exception> {
        self.logical_to_abs(addr, arn, acctype, self.psw.pkey)?;
        let last = addr.wrapping_add(len_m1 as u32) & self.psw.amode_mask();
        if last & PAGE_MASK != addr & PAGE_MASK {
            self.logical_to_abs(last & PAGE_MASK, arn, acctype, self.psw.pkey)?;
        }
        Ok(())
    }

    /// Byte-wise left-to-right move between two operands, each under its own
    /// key. Both leftmost bytes and both rightmost pages are translated up
    /// front; the copy then walks absolute addresses, hopping to the next
    /// frame at each page boundary. Overlap behaves like the architecture
    /// says: a one-byte offset replicates.
    pub fn move_chars(
        &mut self,
        mut addr1: u32,
        arn1: usize,
        key1: u8,
        mut addr2: u32,
        arn2: usize,
        key2: u8,
        len_m1: usize,
    ) -> Result<(), Exception> {
        let mut abs1 = self.logical_to_abs(addr1, arn1, AccessType::Write, key1)?;
        let mut abs2 = self.logical_to_abs(addr2, arn2, AccessType::Read, key2)?;

        let npv1 = addr1.wrapping_add(len_m1 as u32) & self.psw.amode_mask() & PAGE_MASK;
        let npv2 = addr2.wrapping_add(len_m1 as u32) & self.psw.amode_mask() & PAGE_MASK;
        let mut npa1 = 0;
        let mut npa2 = 0;
        if npv1 != addr1 & PAGE_MASK {
            npa1 = self.logical_to_abs(npv1, arn1, AccessType::Write, key1)?;
        }
        if npv2 != addr2 & PAGE_MASK {
            npa2 = self.logical_to_abs(npv2, arn2, AccessType::Read, key2)?;
        }

        for _ in 0..=len_m1 {
            let byte = self.sys.fetch_abs_byte(abs2);
            self.sys.store_abs_byte(abs1, byte);

            addr1 = addr1.wrapping_add(1) & self.psw.amode_mask();
            abs1 += 1;
            if addr1 & PAGE_BYTEMASK == 0 {
                abs1 = npa1;
            }
            addr2 = addr2.wrapping_add(1) & self.psw.amode_mask();
            abs2 += 1;
            if addr2 & PAGE_BYTEMASK == 0 {
                abs2 = npa2;
            }
        }
        Ok(())
    }

    /// Fetch the instruction at the PSW instruction address. Returns six
    /// bytes; trailing bytes beyond the ILC are unpredictable.
    pub fn instfetch(&mut self) -> Result<[u8; 6], Exception> {
        let ia = self.psw.ia & self.psw.amode_mask();
        if ia & 1 != 0 {
            return Err(Exception::Specification);
        }
        self.instruction_fetch_at(ia)
    }

    /// Shared by sequential fetch and EXECUTE.
    pub fn instruction_fetch_at(&mut self, addr: u32) -> Result<[u8; 6], Exception> {
        let mut inst = [0u8; 6];
        let abs = self.logical_to_abs(addr, 0, AccessType::InstFetch, self.psw.pkey)?;
        inst[0] = self.sys.fetch_abs_byte(abs);
        inst[1] = if addr & PAGE_BYTEMASK == 0xFFF {
            self.vfetchb_inst(addr.wrapping_add(1))?
        } else {
            self.sys.fetch_abs_byte(abs + 1)
        };
        let ilc = ilc_of(inst[0]);
        for i in 2..ilc {
            let a = addr.wrapping_add(i as u32) & self.psw.amode_mask();
            inst[i] = if a & PAGE_MASK != addr & PAGE_MASK {
                self.vfetchb_inst(a)?
            } else {
                self.sys.fetch_abs_byte(abs + i as u32)
            };
        }
        Ok(inst)
    }

    fn vfetchb_inst(&mut self, addr: u32) -> Result<u8, Exception> {
        let a = addr & self.psw.amode_mask();
        let abs = self.logical_to_abs(a, 0, AccessType::InstFetch, self.psw.pkey)?;
        Ok(self.sys.fetch_abs_byte(abs))
    }

    /// Instruction fetch uses the home space in home mode, otherwise the
    /// primary space.
    pub fn inst_space(&self) -> Space {
        if self.psw.armode && self.psw.space {
            Space::Home
        } else {
            Space::Primary
        }
    }

    // -- TLB maintenance --------------------------------------------------

    pub fn purge_tlb(&mut self) {
        for e in self.tlb.iter_mut() {
            e.valid = false;
        }
    }

    /// Drop every entry whose page frame matches; IPTE and SSKE use this.
    pub fn invalidate_tlb_frame(&mut self, pfra: u32) {
        for e in self.tlb.iter_mut() {
            if e.valid && e.pte & PAGETAB_PFRA == pfra & PAGETAB_PFRA {
                e.valid = false;
            }
        }
    }

    /// Drop entries belonging to one segment table designation.
    pub fn invalidate_tlb_std(&mut self, std: u32) {
        for e in self.tlb.iter_mut() {
            if e.valid && e.std == std {
                e.valid = false;
            }
        }
    }

    /// Mark a page table entry invalid in real storage and purge the
    /// matching TLB entries. Callers hold the main-storage lock.
    pub fn invalidate_pte(&mut self, pto: u32, vaddr: u32) -> Result<(), Exception> {
        let pteaddr = (pto & SEGTAB_PTO).wrapping_add(((vaddr >> 12) & 0xFF) << 2);
        let abs = psa::apply_prefixing(pteaddr, self.prefix);
        self.sys.chkaddr(abs, 4)?;
        let pte = self.sys.fetch4_abs(abs);
        self.sys.store4_abs(abs, pte | PAGETAB_INVALID);
        self.invalidate_tlb_frame(pte);
        self.sys.broadcast_ptlb(self.cpuad as usize);
        Ok(())
    }
}

fn ilc_of(opcode: u8) -> usize {
    match opcode >> 6 {
        0 => 2,
        1 | 2 => 4,
        _ => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Cpu;
    use crate::memory::System;
    use std::sync::Arc;

    fn real_cpu() -> Cpu {
        let sys = Arc::new(System::new(0x100000, 4, 1));
        Cpu::new(0, sys)
    }

    #[test]
    fn real_mode_passes_addresses_through() {
        let mut cpu = real_cpu();
        cpu.sys.store4_abs(0x5000, 0x11223344);
        assert_eq!(cpu.vfetch4(0x5000, 0).unwrap(), 0x11223344);
        cpu.vstore2(0xBEEF, 0x5006, 0).unwrap();
        assert_eq!(cpu.sys.fetch2_abs(0x5006), 0xBEEF);
    }

    #[test]
    fn reference_and_change_bits_follow_accesses() {
        let mut cpu = real_cpu();
        cpu.vstoreb(1, 0x7000, 0).unwrap();
        let key = cpu.sys.storkey(0x7000);
        assert_eq!(key & 0x06, 0x06);
        cpu.vfetchb(0x8000, 0).unwrap();
        assert_eq!(cpu.sys.storkey(0x8000) & 0x06, 0x04);
    }

    #[test]
    fn key_mismatch_store_is_protection_checked() {
        let mut cpu = real_cpu();
        cpu.sys.set_storkey(0x9000, 0x20);
        cpu.psw.pkey = 0x30;
        assert_eq!(cpu.vstoreb(0, 0x9000, 0), Err(Exception::Protection));
        cpu.psw.pkey = 0x00;
        assert!(cpu.vstoreb(0, 0x9000, 0).is_ok());
    }

    #[test]
    fn fetch_protection_honors_the_fetch_bit() {
        let mut cpu = real_cpu();
        cpu.sys.set_storkey(0xA000, 0x20);
        cpu.psw.pkey = 0x30;
        // no fetch-protect bit: fetch allowed, store refused
        assert!(cpu.vfetchb(0xA000, 0).is_ok());
        cpu.sys.set_storkey(0xA000, 0x28);
        assert_eq!(cpu.vfetchb(0xA000, 0), Err(Exception::Protection));
    }

    fn dat_cpu() -> Cpu {
        // one segment, identity-ish page table at 0x2000 mapping
        // virtual page n -> real page n+16
        let mut cpu = real_cpu();
        cpu.psw.ecmode = true;
        cpu.psw.sysmask = 0x04; // DAT on
        cpu.cr[0] = CR0_TRAN_ESA390;
        cpu.cr[1] = 0x0000_1000; // STO 0x1000, STL 0
        cpu.sys.store4_abs(0x1000, 0x0000_2000 | 0x0F); // STE: PTO 0x2000, PTL 15
        for page in 0..256u32 {
            cpu.sys
                .store4_abs(0x2000 + page * 4, (page + 16) << 12);
        }
        cpu
    }

    #[test]
    fn translation_walks_segment_and_page_tables() {
        let mut cpu = dat_cpu();
        let tr = cpu.translate(0x0000_3456, Space::Primary, 0, AccessType::Read).unwrap();
        assert_eq!(tr.raddr, 0x0001_3456);
        assert_eq!(tr.page, PageState::Main);
    }

    #[test]
    fn tlb_hit_short_circuits_and_purge_clears() {
        let mut cpu = dat_cpu();
        cpu.translate(0x3456, Space::Primary, 0, AccessType::Read).unwrap();
        // wreck the page table; the TLB must still answer
        cpu.sys.store4_abs(0x2000 + 3 * 4, PAGETAB_INVALID);
        let tr = cpu.translate(0x3000, Space::Primary, 0, AccessType::Read).unwrap();
        assert_eq!(tr.raddr, 0x0001_3000);
        cpu.purge_tlb();
        assert_eq!(
            cpu.translate(0x3000, Space::Primary, 0, AccessType::Read).err(),
            Some(Exception::PageTranslation)
        );
    }

    #[test]
    fn invalid_page_raises_page_translation_and_sets_tea() {
        let mut cpu = dat_cpu();
        cpu.sys.store4_abs(0x2000 + 7 * 4, PAGETAB_INVALID);
        assert_eq!(
            cpu.translate(0x7123, Space::Primary, 0, AccessType::Read).err(),
            Some(Exception::PageTranslation)
        );
        assert_eq!(cpu.tea & psa::TEA_EFFADDR, 0x7000);
    }

    #[test]
    fn expanded_page_is_reported_to_lockpage() {
        let mut cpu = dat_cpu();
        cpu.sys
            .store4_abs(0x2000 + 9 * 4, (3 << 12) | PAGETAB_INVALID | PAGETAB_ESVALID);
        let tr = cpu
            .translate(0x9000, Space::Primary, 0, AccessType::Lockpage)
            .unwrap();
        assert_eq!(tr.page, PageState::Expanded { block: 3 });
    }

    #[test]
    fn page_crossing_fetch_is_split() {
        let mut cpu = dat_cpu();
        cpu.psw.sysmask = 0; // DAT off for easy addressing
        cpu.psw.ecmode = true;
        cpu.sys.store4_abs(0x0FFE, 0xAABBCCDD);
        assert_eq!(cpu.vfetch4(0x0FFE, 0).unwrap(), 0xAABBCCDD);
    }
}
