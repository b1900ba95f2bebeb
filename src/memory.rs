// The storage substrate shared by every emulated CPU: main storage bytes,
// the storage-key array (one key byte per 4 KiB frame), expanded storage
// blocks, and the process-wide locks. Bytes live in atomics so that all CPU
// threads may touch them concurrently; anything outside the main-storage
// lock carries only host-memory-model ordering, which is exactly what the
// architecture promises for unserialized accesses.

use crate::devices::{Device, IoInterrupt};
use crate::fields::Exception;
use bitflags::bitflags;
use std::collections::VecDeque;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;
pub const PAGE_MASK: u32 = 0xFFFF_F000;
pub const PAGE_BYTEMASK: u32 = 0x0000_0FFF;

pub const XSTORE_PAGE_SIZE: usize = 4096;
pub const XSTORE_PAGE_SHIFT: usize = 12;

bitflags! {
    /// One storage key byte per 4 KiB frame.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct StorageKey: u8 {
        const KEY    = 0xF0;
        const FETCH  = 0x08;
        const REF    = 0x04;
        const CHANGE = 0x02;
        const BADFRM = 0x01;
    }
}

/// Pending-interruption bits in a CPU slot, checked at the top of the fetch
/// loop without taking the slot lock.
pub const PEND_EXTCALL: u32 = 0x0001;
pub const PEND_EMERSIG: u32 = 0x0002;
pub const PEND_CLKC: u32 = 0x0004;
pub const PEND_PTIMER: u32 = 0x0008;
pub const PEND_ITIMER: u32 = 0x0010;
pub const PEND_RESTART: u32 = 0x0020;
pub const PEND_STOP: u32 = 0x0040;
pub const PEND_START: u32 = 0x0080;
pub const PEND_PTLB: u32 = 0x0100;
pub const PEND_INTKEY: u32 = 0x0200;

/// Per-CPU state that other CPUs may read or poke (SIGP, broadcast purges,
/// the timer thread). Everything behind the slot mutex; the `pending` word
/// is the lock-free summary.
pub struct CpuBox {
    pub online: bool,
    pub stopped: bool,
    pub waiting: bool,
    pub prefix: u32,
    pub emersig_mask: u32,
    pub extcall_from: u16,
    pub set_prefix: Option<u32>,
    pub store_status_at: Option<u32>,
}

pub struct CpuSlot {
    pub pending: AtomicU32,
    pub state: Mutex<CpuBox>,
}

impl CpuSlot {
    fn new() -> Self {
        CpuSlot {
            pending: AtomicU32::new(0),
            state: Mutex::new(CpuBox {
                online: false,
                stopped: true,
                waiting: false,
                prefix: 0,
                emersig_mask: 0,
                extcall_from: 0,
                set_prefix: None,
                store_status_at: None,
            }),
        }
    }

    pub fn raise(&self, bits: u32) {
        self.pending.fetch_or(bits, Ordering::SeqCst);
    }

    pub fn clear(&self, bits: u32) {
        self.pending.fetch_and(!bits, Ordering::SeqCst);
    }
}

/// The shared system block: storage, keys, expanded storage, locks, the TOD
/// clock, the configured devices and the I/O interruption queue.
pub struct System {
    mainstor: Box<[AtomicU8Cell]>,
    storkeys: Box<[AtomicU8Cell]>,
    xpndstor: Box<[AtomicU8Cell]>,
    pub mainsize: usize,
    /// Expanded storage size in 4 KiB blocks.
    pub xpndsize: usize,
    pub numcpu: usize,
    pub cpus: Vec<CpuSlot>,
    /// Main-storage access lock of the atomic instructions.
    pub mainlock: Mutex<()>,
    /// TOD clock update lock.
    pub todlock: Mutex<()>,
    /// Serialization lock; acquire+release is the memory barrier.
    serlock: Mutex<()>,
    /// Interrupt lock: pending I/O interruptions live under it.
    pub iopending: Mutex<VecDeque<IoInterrupt>>,
    pub devices: Mutex<Vec<Box<dyn Device>>>,
    /// TOD clock, bit 51 = one microsecond; updated under todlock.
    pub todclk: AtomicU64,
    /// Number of CPUs currently held up in a broadcast operation; a failed
    /// CS does not yield while one is in progress.
    pub brdcstncpu: AtomicUsize,
    /// Channel report words queued by devices for STCRW.
    pub crwpending: Mutex<VecDeque<u32>>,
}

// A plain AtomicU8 newtype so the storage arrays read as what they are.
pub struct AtomicU8Cell(std::sync::atomic::AtomicU8);

impl AtomicU8Cell {
    fn new() -> Self {
        AtomicU8Cell(std::sync::atomic::AtomicU8::new(0))
    }
    #[inline]
    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }
    #[inline]
    pub fn set(&self, byte: u8) {
        self.0.store(byte, Ordering::Relaxed)
    }
    #[inline]
    fn or(&self, bits: u8) {
        self.0.fetch_or(bits, Ordering::Relaxed);
    }
    #[inline]
    fn and(&self, bits: u8) {
        self.0.fetch_and(bits, Ordering::Relaxed);
    }
}

fn byte_array(len: usize) -> Box<[AtomicU8Cell]> {
    let mut v = Vec::with_capacity(len);
    v.resize_with(len, AtomicU8Cell::new);
    v.into_boxed_slice()
}

impl System {
    /// `mainsize` in bytes (rounded up to a page), `xpndsize` in 4 KiB blocks.
    pub fn new(mainsize: usize, xpndsize: usize, numcpu: usize) -> System {
        let mainsize = (mainsize + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        let mut cpus = Vec::with_capacity(numcpu);
        for _ in 0..numcpu {
            cpus.push(CpuSlot::new());
        }
        System {
            mainstor: byte_array(mainsize),
            storkeys: byte_array(mainsize >> PAGE_SHIFT),
            xpndstor: byte_array(xpndsize * XSTORE_PAGE_SIZE),
            mainsize,
            xpndsize,
            numcpu,
            cpus,
            mainlock: Mutex::new(()),
            todlock: Mutex::new(()),
            serlock: Mutex::new(()),
            iopending: Mutex::new(VecDeque::new()),
            devices: Mutex::new(Vec::new()),
            todclk: AtomicU64::new(0),
            brdcstncpu: AtomicUsize::new(0),
            crwpending: Mutex::new(VecDeque::new()),
        }
    }

    /// Addressing exception when an absolute address falls outside the
    /// configured storage.
    pub fn chkaddr(&self, addr: u32, len: usize) -> Result<(), Exception> {
        if addr as usize + len > self.mainsize {
            return Err(Exception::Addressing);
        }
        Ok(())
    }

    pub fn obtain_mainlock(&self) -> MutexGuard<'_, ()> {
        self.mainlock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The serialization barrier: a paired acquire and release of the
    /// dedicated lock plus a full fence on the host.
    pub fn perform_serialization(&self) {
        drop(self.serlock.lock().unwrap_or_else(|e| e.into_inner()));
        fence(Ordering::SeqCst);
    }

    // -- absolute storage access, big-endian ------------------------------

    #[inline]
    pub fn fetch_abs_byte(&self, addr: u32) -> u8 {
        self.mainstor[addr as usize].get()
    }

    #[inline]
    pub fn store_abs_byte(&self, addr: u32, byte: u8) {
        self.mainstor[addr as usize].set(byte);
    }

    pub fn fetch_abs(&self, addr: u32, buf: &mut [u8]) {
        let base = addr as usize;
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.mainstor[base + i].get();
        }
    }

    pub fn store_abs(&self, addr: u32, bytes: &[u8]) {
        let base = addr as usize;
        for (i, b) in bytes.iter().enumerate() {
            self.mainstor[base + i].set(*b);
        }
    }

    pub fn fetch2_abs(&self, addr: u32) -> u16 {
        let mut b = [0u8; 2];
        self.fetch_abs(addr, &mut b);
        u16::from_be_bytes(b)
    }

    pub fn fetch4_abs(&self, addr: u32) -> u32 {
        let mut b = [0u8; 4];
        self.fetch_abs(addr, &mut b);
        u32::from_be_bytes(b)
    }

    pub fn fetch8_abs(&self, addr: u32) -> u64 {
        let mut b = [0u8; 8];
        self.fetch_abs(addr, &mut b);
        u64::from_be_bytes(b)
    }

    pub fn store2_abs(&self, addr: u32, value: u16) {
        self.store_abs(addr, &value.to_be_bytes());
    }

    pub fn store4_abs(&self, addr: u32, value: u32) {
        self.store_abs(addr, &value.to_be_bytes());
    }

    pub fn store8_abs(&self, addr: u32, value: u64) {
        self.store_abs(addr, &value.to_be_bytes());
    }

    // -- storage keys -----------------------------------------------------

    #[inline]
    pub fn storkey(&self, addr: u32) -> u8 {
        self.storkeys[addr as usize >> PAGE_SHIFT].get()
    }

    #[inline]
    pub fn set_storkey(&self, addr: u32, key: u8) {
        self.storkeys[addr as usize >> PAGE_SHIFT].set(key);
    }

    /// Reference/change updates are a read-modify-write on the key byte;
    /// callers needing architectural atomicity hold the main-storage lock.
    #[inline]
    pub fn or_storkey(&self, addr: u32, bits: StorageKey) {
        self.storkeys[addr as usize >> PAGE_SHIFT].or(bits.bits());
    }

    #[inline]
    pub fn and_storkey(&self, addr: u32, bits: StorageKey) {
        self.storkeys[addr as usize >> PAGE_SHIFT].and(bits.bits());
    }

    // -- expanded storage -------------------------------------------------

    pub fn xpnd_to_main(&self, block: u32, abs: u32) {
        let xbase = (block as usize) << XSTORE_PAGE_SHIFT;
        let mbase = abs as usize;
        for i in 0..XSTORE_PAGE_SIZE {
            self.mainstor[mbase + i].set(self.xpndstor[xbase + i].get());
        }
    }

    pub fn main_to_xpnd(&self, abs: u32, block: u32) {
        let xbase = (block as usize) << XSTORE_PAGE_SHIFT;
        let mbase = abs as usize;
        for i in 0..XSTORE_PAGE_SIZE {
            self.xpndstor[xbase + i].set(self.mainstor[mbase + i].get());
        }
    }

    pub fn xpnd_clear(&self, block: u32) {
        let xbase = (block as usize) << XSTORE_PAGE_SHIFT;
        for i in 0..XSTORE_PAGE_SIZE {
            self.xpndstor[xbase + i].set(0);
        }
    }

    /// Signal every other CPU to purge its TLB before the next instruction.
    pub fn broadcast_ptlb(&self, from_cpu: usize) {
        for (n, slot) in self.cpus.iter().enumerate() {
            if n != from_cpu {
                slot.raise(PEND_PTLB);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_roundtrip() {
        let sys = System::new(0x10000, 0, 1);
        sys.store4_abs(0x1000, 0xDEAD_BEEF);
        assert_eq!(sys.fetch_abs_byte(0x1000), 0xDE);
        assert_eq!(sys.fetch_abs_byte(0x1003), 0xEF);
        assert_eq!(sys.fetch4_abs(0x1000), 0xDEAD_BEEF);
        sys.store8_abs(0x2000, 0x0123_4567_89AB_CDEF);
        assert_eq!(sys.fetch2_abs(0x2006), 0xCDEF);
        assert_eq!(sys.fetch8_abs(0x2000), 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn storage_keys_are_per_frame() {
        let sys = System::new(0x10000, 0, 1);
        sys.set_storkey(0x3000, 0x60);
        assert_eq!(sys.storkey(0x3FFF), 0x60);
        assert_eq!(sys.storkey(0x2FFF), 0x00);
        sys.or_storkey(0x3000, StorageKey::REF | StorageKey::CHANGE);
        assert_eq!(sys.storkey(0x3000), 0x66);
    }

    #[test]
    fn expanded_storage_block_moves() {
        let sys = System::new(0x10000, 2, 1);
        sys.store_abs(0x1000, b"expanded storage");
        sys.main_to_xpnd(0x1000, 1);
        sys.store_abs(0x1000, &[0u8; 16]);
        sys.xpnd_to_main(1, 0x1000);
        let mut buf = [0u8; 16];
        sys.fetch_abs(0x1000, &mut buf);
        assert_eq!(&buf, b"expanded storage");
    }

    #[test]
    fn addressing_check() {
        let sys = System::new(0x10000, 0, 1);
        assert!(sys.chkaddr(0xFFFF, 1).is_ok());
        assert!(sys.chkaddr(0xFFFF, 2).is_err());
        assert!(sys.chkaddr(0x10000, 1).is_err());
    }
}
