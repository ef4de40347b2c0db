//! Arena-growth collaborators.
//!
//! The heap never talks to the operating system directly; it asks an
//! [`ArenaGrow`] implementation for more bytes at the top of the arena.

use std::ptr;

use libc::{
  MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void, intptr_t, mmap, munmap,
  sbrk,
};

const PAGE_SIZE: usize = 4096;

/// Source of new arena bytes.
///
/// `grow` extends the arena by `incr` bytes at its current high end and
/// returns the previous end as the base of the new region, or null on
/// failure. A failed call must leave the arena unmodified.
pub trait ArenaGrow {
  fn grow(
    &mut self,
    incr: usize,
  ) -> *mut u8;
}

/// Grows the arena by moving the program break with `sbrk(2)`.
pub struct SystemBreak;

impl ArenaGrow for SystemBreak {
  fn grow(
    &mut self,
    incr: usize,
  ) -> *mut u8 {
    let address = unsafe { sbrk(incr as intptr_t) };

    if address == usize::MAX as *mut c_void {
      return ptr::null_mut();
    }

    address as *mut u8
  }
}

/// A fixed-capacity pool mapped once up front, with an internal break
/// pointer. Growth past the capacity fails deterministically, which
/// makes exhaustion testable and lets many heaps coexist in one
/// process.
pub struct FixedPool {
  base: *mut u8,
  brk: usize,
  capacity: usize,
  mapped: usize,
}

impl FixedPool {
  pub fn new(capacity: usize) -> Option<Self> {
    let mapped = (capacity + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);

    let base = unsafe {
      mmap(
        ptr::null_mut(),
        mapped,
        PROT_READ | PROT_WRITE,
        MAP_ANONYMOUS | MAP_PRIVATE,
        -1,
        0,
      )
    };

    if base == MAP_FAILED {
      return None;
    }

    Some(Self {
      base: base as *mut u8,
      brk: 0,
      capacity,
      mapped,
    })
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.brk
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

impl ArenaGrow for FixedPool {
  fn grow(
    &mut self,
    incr: usize,
  ) -> *mut u8 {
    match self.brk.checked_add(incr) {
      Some(end) if end <= self.capacity => {
        let address = unsafe { self.base.add(self.brk) };
        self.brk = end;
        address
      }
      _ => ptr::null_mut(),
    }
  }
}

impl Drop for FixedPool {
  fn drop(&mut self) {
    unsafe {
      munmap(self.base as *mut c_void, self.mapped);
    }
  }
}
