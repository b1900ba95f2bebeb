// The prefixed storage area IS main storage at the prefixed location; this
// module is nothing but the architectural offset map into that 4 KiB frame
// plus a handful of accessors. Never a separate allocation.

/// IPL PSW / restart new PSW.
pub const PSA_IPLPSW: u32 = 0x000;
/// IPL CCW1 / restart old PSW.
pub const PSA_IPLCCW1: u32 = 0x008;
pub const PSA_IPLCCW2: u32 = 0x010;
pub const PSA_EXTOLD: u32 = 0x018;
pub const PSA_SVCOLD: u32 = 0x020;
pub const PSA_PGMOLD: u32 = 0x028;
pub const PSA_MCKOLD: u32 = 0x030;
pub const PSA_IOPOLD: u32 = 0x038;
/// Channel status word (S/370).
pub const PSA_CSW: u32 = 0x040;
/// Channel address word (S/370).
pub const PSA_CAW: u32 = 0x048;
/// Interval timer (S/370).
pub const PSA_INTTIMER: u32 = 0x050;
pub const PSA_EXTNEW: u32 = 0x058;
pub const PSA_SVCNEW: u32 = 0x060;
pub const PSA_PGMNEW: u32 = 0x068;
pub const PSA_MCKNEW: u32 = 0x070;
pub const PSA_IOPNEW: u32 = 0x078;
pub const PSA_EXTPARM: u32 = 0x080;
pub const PSA_EXTCPAD: u32 = 0x084;
pub const PSA_EXTINT: u32 = 0x086;
pub const PSA_SVCINT: u32 = 0x088;
pub const PSA_PGMINT: u32 = 0x08C;
/// Translation exception address.
pub const PSA_TEA: u32 = 0x090;
pub const PSA_MONCLASS: u32 = 0x094;
pub const PSA_PERINT: u32 = 0x096;
pub const PSA_PERADR: u32 = 0x098;
pub const PSA_MONCODE: u32 = 0x09C;
/// Exception access id.
pub const PSA_EXCARID: u32 = 0x0A0;
pub const PSA_IOID: u32 = 0x0B8;
pub const PSA_IOPARM: u32 = 0x0BC;
/// CPU timer save area.
pub const PSA_STOREPTMR: u32 = 0x0D8;
/// Clock comparator save area.
pub const PSA_STORECLKC: u32 = 0x0E0;
pub const PSA_MCKINT: u32 = 0x0E8;
/// Store status PSW save area.
pub const PSA_STOREPSW: u32 = 0x100;
pub const PSA_STOREPFX: u32 = 0x108;
pub const PSA_STOREAR: u32 = 0x120;
pub const PSA_STOREFPR: u32 = 0x160;
pub const PSA_STOREGPR: u32 = 0x180;
pub const PSA_STORECR: u32 = 0x1C0;
/// Logical CPU address consumed by the MVS assists.
pub const PSA_LCPUA: u32 = 0x2F4;
/// Locks-held indicator word of the MVS assists.
pub const PSA_HLHI: u32 = 0x2F8;

/// Bits of the translation exception address word.
pub const TEA_SECADDR: u32 = 0x8000_0000;
pub const TEA_EFFADDR: u32 = 0x7FFF_F000;
pub const TEA_PROT_AP: u32 = 0x0000_0004;
pub const TEA_ST_PRIMARY: u32 = 0x0000_0000;
pub const TEA_ST_ARMODE: u32 = 0x0000_0001;
pub const TEA_ST_SECNDRY: u32 = 0x0000_0002;
pub const TEA_ST_HOME: u32 = 0x0000_0003;

/// External interruption codes stored at PSA+0x86.
pub const EXT_INTERRUPT_KEY: u16 = 0x0040;
pub const EXT_INTERVAL_TIMER: u16 = 0x0080;
pub const EXT_TOD_SYNC_CHECK: u16 = 0x1003;
pub const EXT_CLOCK_COMPARATOR: u16 = 0x1004;
pub const EXT_CPU_TIMER: u16 = 0x1005;
pub const EXT_MALFUNCTION_ALERT: u16 = 0x1200;
pub const EXT_EMERGENCY_SIGNAL: u16 = 0x1201;
pub const EXT_EXTERNAL_CALL: u16 = 0x1202;
pub const EXT_SERVICE_SIGNAL: u16 = 0x2401;

/// Convert a real address to absolute through the prefix register: the
/// first page and the prefixed page trade places, everything else is
/// untouched.
#[inline]
pub fn apply_prefixing(addr: u32, prefix: u32) -> u32 {
    if addr & 0x7FFF_F000 == 0 {
        (addr & 0xFFF) | prefix
    } else if addr & 0x7FFF_F000 == prefix {
        addr & 0xFFF
    } else {
        addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixing_swaps_page_zero_and_the_prefix_page() {
        assert_eq!(apply_prefixing(0x0000_0123, 0x0008_0000), 0x0008_0123);
        assert_eq!(apply_prefixing(0x0008_0123, 0x0008_0000), 0x0000_0123);
        assert_eq!(apply_prefixing(0x0004_5678, 0x0008_0000), 0x0004_5678);
        assert_eq!(apply_prefixing(0x0000_0456, 0), 0x0000_0456);
    }
}
