//! # tagalloc - A Boundary-Tag Memory Allocator Library
//!
//! This crate provides a **first-fit heap allocator** over a single
//! contiguous, growable arena, in two variants: an implicit-list heap
//! and an explicit free-list heap.
//!
//! ## Overview
//!
//! Every region of the arena, free or allocated, is a *block* flanked
//! by a header and a footer tag packing the block size together with an
//! allocated bit:
//!
//! ```text
//!   Arena Layout:
//!
//!   ┌────┬────────┬──────────────┬──────────────┬───────────────┬────┐
//!   │pad │prologue│  block A     │  block B     │  free block   │epi │
//!   │    │ hdr ftr│ hdr .... ftr │ hdr .... ftr │ hdr ….... ftr │hdr │
//!   └────┴────────┴──────────────┴──────────────┴───────────────┴────┘
//!    low ▲                                                      ▲ high
//!        │                                                      │
//!    always-allocated sentinels bound the arena on both ends ───┘
//!
//!   Freeing a block eagerly merges it with free neighbors, so no two
//!   adjacent blocks are ever both free.
//! ```
//!
//! A free block reuses its first two payload words as `next`/`prev`
//! links; the explicit variant threads all free blocks into a LIFO list
//! through these words, while the implicit variant ignores them and
//! scans the arena by address.
//!
//! ```text
//!   Free Block (explicit variant):
//!   ┌────────┬───────────┬───────────┬─────────────────┬────────┐
//!   │ header │ next-free │ prev-free │   (unused)      │ footer │
//!   │ size|0 │           │           │                 │ size|0 │
//!   └────────┴───────────┴───────────┴─────────────────┴────────┘
//!            ▲
//!            └── the same bytes are caller data once allocated
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macro (align!)
//!   ├── tag        - Boundary-tag encode/decode and block navigation
//!   ├── grow       - Arena-growth collaborators (sbrk, fixed mmap pool)
//!   ├── implicit   - ImplicitHeap: address-ordered block scan
//!   └── explicit   - ExplicitHeap: doubly-linked LIFO free list
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{ExplicitHeap, FixedPool};
//!
//! fn main() {
//!     let pool = FixedPool::new(64 * 1024).unwrap();
//!     let mut heap = ExplicitHeap::new(pool).unwrap();
//!
//!     unsafe {
//!         // Allocate and use 100 bytes.
//!         let ptr = heap.allocate(100);
//!         assert!(!ptr.is_null());
//!         ptr.write_bytes(0x2A, 100);
//!
//!         // Grow it, contents preserved.
//!         let bigger = heap.resize(ptr, 200);
//!         assert_eq!(bigger.read(), 0x2A);
//!
//!         // Give it back.
//!         heap.release(bigger);
//!     }
//!
//!     assert_eq!(0, heap.check(false));
//! }
//! ```
//!
//! ## How It Works
//!
//! Allocation rounds the request up to the 8-byte quantum plus tag
//! overhead, then takes the **first** free block that fits. If the
//! chosen block is large enough to leave a viable remainder, it is
//! split and the remainder stays free; otherwise the whole block is
//! handed out. When nothing fits, the arena is extended at its high
//! end through an [`ArenaGrow`] collaborator — either the real program
//! break ([`SystemBreak`]) or a fixed-capacity mapped pool
//! ([`FixedPool`]).
//!
//! Releasing re-tags the block free and immediately coalesces it with
//! adjacent free blocks, keeping the footer of every block trustworthy
//! for neighbor navigation.
//!
//! ## Features
//!
//! - **Two engines, one layout**: implicit scan and explicit free list
//!   share the same tag format and growth path
//! - **Eager coalescing**: fragmentation from frees is merged away at
//!   release time
//! - **Pluggable growth**: `sbrk`-backed or deterministic fixed pool
//! - **On-demand diagnostics**: `check()` validates sentinels, tag
//!   pairs, coalescing, and free-list structure without touching the
//!   hot path
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives
//! - **Monotonic arena**: memory is never returned to the OS until the
//!   heap is dropped
//! - **First-fit only**: no binning, no best-fit, no in-place resize
//! - **Unix-only**: requires `libc` (`sbrk`, `mmap`)
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory
//! management. `allocate`, `release`, and `resize` require `unsafe`
//! blocks, and passing a pointer the heap did not hand out is undefined
//! behavior.

pub mod align;
mod explicit;
mod grow;
mod implicit;
mod tag;

pub use explicit::ExplicitHeap;
pub use grow::{ArenaGrow, FixedPool, SystemBreak};
pub use implicit::ImplicitHeap;
pub use tag::ALIGNMENT;
