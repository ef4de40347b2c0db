//! Implicit-list heap: free-block membership is encoded solely in the
//! allocated bit, and fitting scans every block in address order.

use std::{cmp, ptr};

use log::{debug, trace, warn};

use crate::{
  align,
  grow::ArenaGrow,
  tag::{
    CHUNK_SIZE, DSIZE, MIN_BLOCK, WSIZE, check_block, footer_of, header_of, next_block_of,
    prev_block_of, read_allocated, read_size, store, write_tag,
  },
};

/// First-fit heap scanning the whole arena for a free block.
pub struct ImplicitHeap<G: ArenaGrow> {
  grow: G,
  base: *mut u8,
  size: usize,
}

impl<G: ArenaGrow> ImplicitHeap<G> {
  /// Bootstraps an empty heap: prologue and epilogue sentinels followed
  /// by one chunk-sized free block. Returns `None` if the growth
  /// collaborator refuses either acquisition.
  pub fn new(mut grow: G) -> Option<Self> {
    let start = grow.grow(4 * WSIZE);
    if start.is_null() {
      return None;
    }

    unsafe {
      store(start, 0); // alignment padding
      write_tag(start.add(WSIZE), DSIZE, true); // prologue header
      write_tag(start.add(2 * WSIZE), DSIZE, true); // prologue footer
      write_tag(start.add(3 * WSIZE), 0, true); // epilogue

      let mut heap = Self {
        grow,
        base: start.add(2 * WSIZE),
        size: 4 * WSIZE,
      };

      if heap.extend(CHUNK_SIZE).is_null() {
        return None;
      }

      Some(heap)
    }
  }

  /// Returns an 8-aligned payload pointer of at least `size` bytes, or
  /// null when `size` is 0 or the arena cannot be grown far enough.
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    let asize = if size <= DSIZE {
      MIN_BLOCK
    } else {
      align!(size + DSIZE)
    };

    unsafe {
      let mut bp = self.find_fit(asize);

      if bp.is_null() {
        bp = self.extend(cmp::max(asize, CHUNK_SIZE));
        if bp.is_null() {
          return ptr::null_mut();
        }
      }

      self.place(bp, asize);
      trace!("allocate({}) -> {:p} ({} byte block)", size, bp, asize);
      bp
    }
  }

  /// Returns a block to the heap. Null is a no-op.
  pub unsafe fn release(
    &mut self,
    bp: *mut u8,
  ) {
    if bp.is_null() {
      return;
    }

    unsafe {
      let size = read_size(header_of(bp));
      write_tag(header_of(bp), size, false);
      write_tag(footer_of(bp), size, false);

      trace!("release({:p}) ({} byte block)", bp, size);
      self.coalesce(bp);
    }
  }

  /// Moves a block to a fresh allocation of `new_size` bytes,
  /// preserving `min(new_size, old payload)` bytes of content. A zero
  /// `new_size` behaves as release; a null `bp` behaves as allocate.
  /// On allocation failure the original block is left untouched and
  /// null is returned.
  pub unsafe fn resize(
    &mut self,
    bp: *mut u8,
    new_size: usize,
  ) -> *mut u8 {
    unsafe {
      if new_size == 0 {
        self.release(bp);
        return ptr::null_mut();
      }

      if bp.is_null() {
        return self.allocate(new_size);
      }

      let new_bp = self.allocate(new_size);
      if new_bp.is_null() {
        return ptr::null_mut();
      }

      let old_payload = read_size(header_of(bp)) - DSIZE;
      ptr::copy_nonoverlapping(bp, new_bp, cmp::min(new_size, old_payload));

      self.release(bp);
      new_bp
    }
  }

  unsafe fn extend(
    &mut self,
    bytes: usize,
  ) -> *mut u8 {
    let size = align!(bytes);

    let bp = self.grow.grow(size);
    if bp.is_null() {
      warn!("arena growth of {} bytes refused", size);
      return ptr::null_mut();
    }

    unsafe {
      // The new free block's header lands on the old epilogue.
      write_tag(header_of(bp), size, false);
      write_tag(footer_of(bp), size, false);
      write_tag(header_of(next_block_of(bp)), 0, true); // new epilogue

      self.size += size;
      trace!("extended arena by {} bytes, {} total", size, self.size);

      self.coalesce(bp)
    }
  }

  unsafe fn find_fit(
    &self,
    asize: usize,
  ) -> *mut u8 {
    unsafe {
      let mut bp = next_block_of(self.base);

      while read_size(header_of(bp)) > 0 {
        if !read_allocated(header_of(bp)) && read_size(header_of(bp)) >= asize {
          return bp;
        }
        bp = next_block_of(bp);
      }

      ptr::null_mut()
    }
  }

  unsafe fn place(
    &mut self,
    bp: *mut u8,
    asize: usize,
  ) {
    unsafe {
      let size = read_size(header_of(bp));

      if size - asize >= MIN_BLOCK {
        write_tag(header_of(bp), asize, true);
        write_tag(footer_of(bp), asize, true);

        let rest = next_block_of(bp);
        write_tag(header_of(rest), size - asize, false);
        write_tag(footer_of(rest), size - asize, false);
      } else {
        // The leftover cannot host a free block, absorb it.
        write_tag(header_of(bp), size, true);
        write_tag(footer_of(bp), size, true);
      }
    }
  }

  unsafe fn coalesce(
    &mut self,
    bp: *mut u8,
  ) -> *mut u8 {
    unsafe {
      let prev_allocated = read_allocated(footer_of(prev_block_of(bp)));
      let next_allocated = read_allocated(header_of(next_block_of(bp)));
      let mut size = read_size(header_of(bp));
      let mut bp = bp;

      if prev_allocated && next_allocated {
        return bp;
      } else if prev_allocated && !next_allocated {
        size += read_size(header_of(next_block_of(bp)));
        write_tag(header_of(bp), size, false);
        write_tag(footer_of(bp), size, false);
      } else if !prev_allocated && next_allocated {
        size += read_size(header_of(prev_block_of(bp)));
        write_tag(footer_of(bp), size, false);
        write_tag(header_of(prev_block_of(bp)), size, false);
        bp = prev_block_of(bp);
      } else {
        size += read_size(header_of(next_block_of(bp))) + read_size(header_of(prev_block_of(bp)));
        write_tag(footer_of(next_block_of(bp)), size, false);
        write_tag(header_of(prev_block_of(bp)), size, false);
        bp = prev_block_of(bp);
      }

      bp
    }
  }

  /// Scans the arena and reports every violated invariant through the
  /// log facade. Returns the number of violations; zero means the heap
  /// is consistent.
  pub fn check(
    &self,
    verbose: bool,
  ) -> usize {
    let mut errors = 0;

    unsafe {
      if verbose {
        debug!("heap ({:p}): {} bytes", self.base, self.size);
      }

      let header = header_of(self.base);
      if read_size(header) != DSIZE || !read_allocated(header) {
        warn!("bad prologue header");
        errors += 1;
      }
      errors += check_block(self.base, verbose);

      let end = self.end();
      let mut prev_free = false;
      let mut bp = next_block_of(self.base);

      while bp < end && read_size(header_of(bp)) > 0 {
        errors += check_block(bp, verbose);

        let free = !read_allocated(header_of(bp));
        if free && prev_free {
          warn!("adjacent free blocks at {:p}", bp);
          errors += 1;
        }
        prev_free = free;

        bp = next_block_of(bp);
      }

      if bp != end {
        warn!("block walk ended at {:p}, expected epilogue at {:p}", bp, end);
        errors += 1;
      } else if read_size(header_of(bp)) != 0 || !read_allocated(header_of(bp)) {
        warn!("bad epilogue header");
        errors += 1;
      }
    }

    errors
  }

  /// Number of free blocks currently in the arena.
  pub fn free_blocks(&self) -> usize {
    let mut count = 0;

    unsafe {
      let end = self.end();
      let mut bp = next_block_of(self.base);

      while bp < end && read_size(header_of(bp)) > 0 {
        if !read_allocated(header_of(bp)) {
          count += 1;
        }
        bp = next_block_of(bp);
      }
    }

    count
  }

  /// Total bytes acquired from the growth collaborator. Never
  /// decreases.
  pub fn heap_size(&self) -> usize {
    self.size
  }

  /// One past the last arena byte; the epilogue's payload pointer.
  fn end(&self) -> *mut u8 {
    unsafe { self.base.sub(2 * WSIZE).add(self.size) }
  }
}
