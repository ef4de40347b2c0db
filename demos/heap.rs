use std::ptr;

use libc::sbrk;
use tagalloc::{ExplicitHeap, SystemBreak};

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  env_logger::init();

  // An explicit free-list heap growing through the real program break.
  let mut heap = ExplicitHeap::new(SystemBreak).expect("initial arena growth failed");

  unsafe {
    // Initial heap state
    print_program_break("start");

    // --------------------------------------------------------------------
    // 1) Allocate 100 bytes and fill them.
    // --------------------------------------------------------------------
    let first_block = heap.allocate(100);
    println!("\n[1] Allocate 100 bytes -> {:?}", first_block);
    ptr::write_bytes(first_block, 0xAB, 100);
    println!(
      "[1] Address = {:#X}, addr % 8 = {}",
      first_block as usize,
      first_block as usize % 8
    );

    // --------------------------------------------------------------------
    // 2) Allocate 200 more bytes.
    // --------------------------------------------------------------------
    let second_block = heap.allocate(200);
    println!("\n[2] Allocate 200 bytes -> {:?}", second_block);
    ptr::write_bytes(second_block, 0xCD, 200);

    // --------------------------------------------------------------------
    // 3) Release the first block and allocate a smaller one.
    //    First fit hands the freed region straight back.
    // --------------------------------------------------------------------
    heap.release(first_block);
    println!("\n[3] Released first block at {:?}", first_block);

    let third_block = heap.allocate(50);
    println!("[3] Allocate 50 bytes -> {:?}", third_block);
    println!(
      "[3] third_block == first_block? {}",
      if third_block == first_block {
        "Yes, it reused the freed block"
      } else {
        "No, it allocated somewhere else"
      }
    );

    // --------------------------------------------------------------------
    // 4) Grow the second block with resize; contents move with it.
    // --------------------------------------------------------------------
    let resized = heap.resize(second_block, 400);
    println!("\n[4] Resize 200 -> 400 bytes: {:?}", resized);
    println!(
      "[4] First byte after the move = 0x{:X} (expected 0xCD)",
      resized.read()
    );

    // --------------------------------------------------------------------
    // 5) Allocate past the current arena to force growth.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");

    let big_block = heap.allocate(64 * 1024);
    println!("\n[5] Allocate large 64 KiB block -> {:?}", big_block);

    print_program_break("after large alloc");

    // --------------------------------------------------------------------
    // 6) Release everything and verify the heap coalesced cleanly.
    // --------------------------------------------------------------------
    heap.release(third_block);
    heap.release(resized);
    heap.release(big_block);
  }

  let errors = heap.check(true);
  println!(
    "\n[6] Consistency check: {} error(s), {} free block(s)",
    errors,
    heap.free_blocks()
  );
  println!("[6] End of example. Process will exit and the OS will reclaim all memory.");
}
