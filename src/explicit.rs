//! Explicit-list heap: free blocks are threaded into a doubly-linked
//! LIFO list through their own payload bytes, so fitting only ever
//! visits free blocks.
//!
//! The two link words live at the start of a free block's payload and
//! are valid only while the block is free; allocation overwrites them
//! with caller data.

use std::{cmp, ptr};

use log::{debug, trace, warn};

use crate::{
  align,
  grow::ArenaGrow,
  tag::{
    CHUNK_SIZE, DSIZE, MIN_BLOCK, WSIZE, check_block, footer_of, header_of, load, next_block_of,
    prev_block_of, read_allocated, read_size, store, write_tag,
  },
};

#[inline]
unsafe fn next_free(bp: *mut u8) -> *mut u8 {
  unsafe { load(bp) as *mut u8 }
}

#[inline]
unsafe fn prev_free(bp: *mut u8) -> *mut u8 {
  unsafe { load(bp.add(WSIZE)) as *mut u8 }
}

#[inline]
unsafe fn set_next_free(
  bp: *mut u8,
  target: *mut u8,
) {
  unsafe { store(bp, target as usize) }
}

#[inline]
unsafe fn set_prev_free(
  bp: *mut u8,
  target: *mut u8,
) {
  unsafe { store(bp.add(WSIZE), target as usize) }
}

/// First-fit heap over an explicit free list with LIFO reuse.
pub struct ExplicitHeap<G: ArenaGrow> {
  grow: G,
  base: *mut u8,
  size: usize,
  free_head: *mut u8,
}

impl<G: ArenaGrow> ExplicitHeap<G> {
  /// Bootstraps an empty heap: prologue and epilogue sentinels followed
  /// by one chunk-sized free block, which becomes the sole free-list
  /// entry. Returns `None` if the growth collaborator refuses either
  /// acquisition.
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
        free_head: ptr::null_mut(),
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

  /// First fit over the free list only.
  unsafe fn find_fit(
    &self,
    asize: usize,
  ) -> *mut u8 {
    unsafe {
      let mut bp = self.free_head;

      while !bp.is_null() {
        if read_size(header_of(bp)) >= asize {
          return bp;
        }
        bp = next_free(bp);
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
      self.unlink(bp);

      if size - asize >= MIN_BLOCK {
        write_tag(header_of(bp), asize, true);
        write_tag(footer_of(bp), asize, true);

        let rest = next_block_of(bp);
        write_tag(header_of(rest), size - asize, false);
        write_tag(footer_of(rest), size - asize, false);
        self.insert(rest);
      } else {
        // The leftover cannot host a free block, absorb it.
        write_tag(header_of(bp), size, true);
        write_tag(footer_of(bp), size, true);
      }
    }
  }

  /// Merges `bp` with any free neighbor and links the survivor into
  /// the free list. Expects `bp` to be tagged free and not yet linked.
  unsafe fn coalesce(
    &mut self,
    bp: *mut u8,
  ) -> *mut u8 {
    unsafe {
      let prev_allocated = read_allocated(footer_of(prev_block_of(bp)));
      let next_allocated = read_allocated(header_of(next_block_of(bp)));
      let mut size = read_size(header_of(bp));
      let mut bp = bp;

      if prev_allocated && !next_allocated {
        let next = next_block_of(bp);
        self.unlink(next);
        size += read_size(header_of(next));
        write_tag(header_of(bp), size, false);
        write_tag(footer_of(bp), size, false);
      } else if !prev_allocated && next_allocated {
        let prev = prev_block_of(bp);
        self.unlink(prev);
        size += read_size(header_of(prev));
        write_tag(footer_of(bp), size, false);
        write_tag(header_of(prev), size, false);
        bp = prev;
      } else if !prev_allocated && !next_allocated {
        let prev = prev_block_of(bp);
        let next = next_block_of(bp);
        self.unlink(prev);
        self.unlink(next);
        size += read_size(header_of(prev)) + read_size(header_of(next));
        write_tag(footer_of(next), size, false);
        write_tag(header_of(prev), size, false);
        bp = prev;
      }

      self.insert(bp);
      bp
    }
  }

  /// Pushes a free block onto the head of the list.
  unsafe fn insert(
    &mut self,
    bp: *mut u8,
  ) {
    unsafe {
      set_next_free(bp, self.free_head);
      set_prev_free(bp, ptr::null_mut());

      if !self.free_head.is_null() {
        set_prev_free(self.free_head, bp);
      }
      self.free_head = bp;
    }
  }

  /// Removes a free block from the list.
  unsafe fn unlink(
    &mut self,
    bp: *mut u8,
  ) {
    unsafe {
      let next = next_free(bp);
      let prev = prev_free(bp);

      if prev.is_null() {
        self.free_head = next;
      } else {
        set_next_free(prev, next);
      }

      if !next.is_null() {
        set_prev_free(next, prev);
      }
    }
  }

  /// Scans the arena and the free list, reporting every violated
  /// invariant through the log facade. Returns the number of
  /// violations; zero means the heap is consistent.
  pub fn check(
    &self,
    verbose: bool,
  ) -> usize {
    let mut errors = 0;

    unsafe {
      if verbose {
        debug!(
          "heap ({:p}): {} bytes, free list head {:p}",
          self.base, self.size, self.free_head
        );
      }

      let header = header_of(self.base);
      if read_size(header) != DSIZE || !read_allocated(header) {
        warn!("bad prologue header");
        errors += 1;
      }
      errors += check_block(self.base, verbose);

      let end = self.end();
      let mut prev_was_free = false;
      let mut bp = next_block_of(self.base);

      while bp < end && read_size(header_of(bp)) > 0 {
        errors += check_block(bp, verbose);

        let free = !read_allocated(header_of(bp));
        if free && prev_was_free {
          warn!("adjacent free blocks at {:p}", bp);
          errors += 1;
        }
        prev_was_free = free;

        bp = next_block_of(bp);
      }

      if bp != end {
        warn!("block walk ended at {:p}, expected epilogue at {:p}", bp, end);
        errors += 1;
      } else if read_size(header_of(bp)) != 0 || !read_allocated(header_of(bp)) {
        warn!("bad epilogue header");
        errors += 1;
      }

      errors += self.check_free_list(verbose);
    }

    errors
  }

  unsafe fn check_free_list(
    &self,
    verbose: bool,
  ) -> usize {
    unsafe {
      let mut errors = 0;
      let end = self.end();
      let scanned_free = self.free_blocks();

      if !self.free_head.is_null() && !prev_free(self.free_head).is_null() {
        warn!("free-list head {:p} has a predecessor", self.free_head);
        errors += 1;
      }

      let mut node = self.free_head;
      let mut list_len = 0;

      // A cycle would loop forever, so the walk is capped one past the
      // number of free blocks the arena scan found.
      while !node.is_null() && list_len <= scanned_free {
        if node <= self.base || node >= end {
          warn!("free-list node {:p} outside the arena", node);
          errors += 1;
          break;
        }

        if verbose {
          debug!(
            "free node {:p}: next {:p} prev {:p}",
            node,
            next_free(node),
            prev_free(node),
          );
        }

        if read_allocated(header_of(node)) {
          warn!("free-list node {:p} is marked allocated", node);
          errors += 1;
        }

        let next = next_free(node);
        if !next.is_null() && prev_free(next) != node {
          warn!("broken free-list linkage at {:p}", node);
          errors += 1;
        }

        list_len += 1;
        node = next;
      }

      if list_len != scanned_free {
        warn!(
          "free list holds {} blocks, arena scan found {}",
          list_len, scanned_free
        );
        errors += 1;
      }

      errors
    }
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

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grow::FixedPool;

  fn new_heap(capacity: usize) -> ExplicitHeap<FixedPool> {
    ExplicitHeap::new(FixedPool::new(capacity).unwrap()).unwrap()
  }

  #[test]
  fn test_allocate_aligned_and_usable() {
    let mut heap = new_heap(64 * 1024);

    unsafe {
      let first_addr = heap.allocate(8) as *mut u64;
      assert!(!first_addr.is_null());
      assert_eq!(0, first_addr as usize % crate::ALIGNMENT);

      *first_addr = 3u64;

      let second_addr = heap.allocate(32);
      ptr::write_bytes(second_addr, 0xCD, 32);

      assert_eq!(*first_addr, 3);
      assert_eq!(0, heap.check(false));
    }
  }

  #[test]
  fn test_first_fit_reuses_freed_block() {
    let mut heap = new_heap(64 * 1024);

    unsafe {
      let p1 = heap.allocate(100);
      assert!(!p1.is_null());
      assert_eq!(0, p1 as usize % crate::ALIGNMENT);

      let p2 = heap.allocate(200);
      assert!(!p2.is_null());

      heap.release(p1);

      // The freed block sits at the list head, so 50 bytes land in it.
      let p3 = heap.allocate(50);
      assert_eq!(p1, p3);

      heap.release(p2);
      heap.release(p3);

      assert_eq!(0, heap.check(false));
      assert_eq!(1, heap.free_blocks());
    }
  }

  #[test]
  fn test_lifo_reuse_of_last_freed() {
    let mut heap = new_heap(64 * 1024);

    unsafe {
      let a = heap.allocate(64);
      let b = heap.allocate(64);
      assert!(!b.is_null());

      heap.release(a);

      // The most recently freed block is handed out first.
      let c = heap.allocate(64);
      assert_eq!(a, c);
      assert_eq!(0, heap.check(false));
    }
  }

  #[test]
  fn test_zero_allocate_is_noop() {
    let mut heap = new_heap(64 * 1024);

    let free_before = heap.free_blocks();
    let size_before = heap.heap_size();

    unsafe {
      assert!(heap.allocate(0).is_null());
    }

    assert_eq!(0, heap.check(false));
    assert_eq!(free_before, heap.free_blocks());
    assert_eq!(size_before, heap.heap_size());
  }

  #[test]
  fn test_release_null_is_noop() {
    let mut heap = new_heap(64 * 1024);

    unsafe {
      heap.release(ptr::null_mut());
    }

    assert_eq!(0, heap.check(false));
  }

  #[test]
  fn test_coalesce_merges_both_neighbors() {
    let mut heap = new_heap(64 * 1024);

    unsafe {
      let a = heap.allocate(64);
      let b = heap.allocate(64);
      let c = heap.allocate(64);
      let d = heap.allocate(64);
      assert!(!d.is_null());

      heap.release(a);
      heap.release(c);
      assert_eq!(3, heap.free_blocks());
      assert_eq!(0, heap.check(false));

      heap.release(b);
      assert_eq!(2, heap.free_blocks());
      assert_eq!(0, heap.check(false));
    }
  }

  #[test]
  fn test_resize_preserves_content() {
    let mut heap = new_heap(64 * 1024);

    unsafe {
      let p = heap.allocate(64);
      for i in 0..64 {
        *p.add(i) = i as u8;
      }

      let grown = heap.resize(p, 128);
      assert!(!grown.is_null());
      for i in 0..64 {
        assert_eq!(i as u8, *grown.add(i));
      }

      let shrunk = heap.resize(grown, 16);
      assert!(!shrunk.is_null());
      for i in 0..16 {
        assert_eq!(i as u8, *shrunk.add(i));
      }

      assert_eq!(0, heap.check(false));
    }
  }

  #[test]
  fn test_resize_null_allocates() {
    let mut heap = new_heap(64 * 1024);

    unsafe {
      let p = heap.resize(ptr::null_mut(), 64);
      assert!(!p.is_null());
      assert_eq!(0, p as usize % crate::ALIGNMENT);
      assert_eq!(0, heap.check(false));
    }
  }

  #[test]
  fn test_resize_zero_releases() {
    let mut heap = new_heap(64 * 1024);

    unsafe {
      let p = heap.allocate(64);

      assert!(heap.resize(p, 0).is_null());
      assert_eq!(0, heap.check(false));
      assert_eq!(1, heap.free_blocks());
    }
  }

  #[test]
  fn test_exhaustion_leaves_heap_valid() {
    let mut heap = new_heap(8192);

    unsafe {
      let p = heap.allocate(100);
      assert!(!p.is_null());

      assert!(heap.allocate(100_000).is_null());
      assert_eq!(0, heap.check(false));

      let q = heap.allocate(100);
      assert!(!q.is_null());
      assert_eq!(0, heap.check(false));
    }
  }

  #[test]
  fn test_failed_resize_leaves_original_untouched() {
    let mut heap = new_heap(8192);

    unsafe {
      let p = heap.allocate(100);
      for i in 0..100 {
        *p.add(i) = 0xAB;
      }

      assert!(heap.resize(p, 100_000).is_null());

      for i in 0..100 {
        assert_eq!(0xAB, *p.add(i));
      }
      assert_eq!(0, heap.check(false));
    }
  }

  #[test]
  fn test_heap_size_is_monotonic() {
    let mut heap = new_heap(64 * 1024);
    let mut last = heap.heap_size();

    unsafe {
      let p = heap.allocate(6000);
      assert!(heap.heap_size() >= last);
      last = heap.heap_size();

      heap.release(p);
      assert!(heap.heap_size() >= last);
      last = heap.heap_size();

      let q = heap.allocate(10_000);
      assert!(heap.heap_size() >= last);
      last = heap.heap_size();

      heap.release(q);
      assert!(heap.heap_size() >= last);
    }
  }

  #[test]
  fn test_free_list_survives_interleaved_traffic() {
    let mut heap = new_heap(256 * 1024);
    let sizes = [24usize, 100, 8, 512, 64, 3000, 40, 256];

    unsafe {
      let mut live = Vec::new();

      for (round, &size) in sizes.iter().cycle().take(32).enumerate() {
        let p = heap.allocate(size);
        assert!(!p.is_null());
        ptr::write_bytes(p, round as u8, size);
        live.push((p, size, round as u8));

        // Free every other allocation as we go.
        if round % 2 == 1 {
          let (victim, _, _) = live.remove(round % live.len());
          heap.release(victim);
        }

        assert_eq!(0, heap.check(false));
      }

      // Survivors still hold their fill patterns.
      for &(p, size, fill) in &live {
        for i in 0..size {
          assert_eq!(fill, *p.add(i));
        }
      }

      for &(p, _, _) in &live {
        heap.release(p);
      }

      assert_eq!(0, heap.check(false));
      assert_eq!(1, heap.free_blocks());
    }
  }
}
