use std::io::Read;

use buddy_alloc::buddy::BuddyAllocator;
use buddy_alloc::region::ProcessBreak;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:#x}",
    label,
    std::process::id(),
    ProcessBreak::current_break(),
  );
}

fn main() {
  env_logger::init();

  // K=20 (1 MiB region), M=12 (4 KiB smallest block). Managed from wherever the
  // process break currently sits.
  let k = 20;
  let m = 12;

  print_program_break("start");
  block_until_enter_pressed();

  let h = ProcessBreak::current_break();
  let mut allocator = unsafe { BuddyAllocator::init(h, k, m, ProcessBreak) }
    .expect("region primitive failed to reserve the header and bitmap");
  print_program_break("after init");

  unsafe {
    // --------------------------------------------------------------------
    // 1) Allocate 8000 bytes. Rounds up to the smallest order that fits
    //    (8192), splitting the region's left spine down to it.
    // --------------------------------------------------------------------
    let first = allocator.allocate(8000).expect("allocate 8000");
    println!("\n[1] Allocate 8000 bytes -> {:?}", first);
    allocator.dump();
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate another 8000 bytes. Takes the buddy of the first block,
    //    no further splitting needed.
    // --------------------------------------------------------------------
    let second = allocator.allocate(8000).expect("allocate 8000 again");
    println!("\n[2] Allocate 8000 bytes again -> {:?}", second);
    allocator.dump();
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Free the first block. Its buddy is now allocated, so this does
    //    not trigger a coalesce.
    // --------------------------------------------------------------------
    allocator.free(first).expect("free first");
    println!("\n[3] Freed first block");
    allocator.dump();
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Grow a block in place via realloc, observing the region grow to
    //    cover it.
    // --------------------------------------------------------------------
    print_program_break("before realloc");
    let grown = allocator.realloc(second, 40000).expect("realloc to 40000");
    println!("\n[4] Reallocated second block to 40000 bytes -> {:?}", grown);
    print_program_break("after realloc");
    allocator.dump();
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Free everything. The region shrinks back down to its start.
    // --------------------------------------------------------------------
    allocator.free(grown).expect("free grown block");
    println!("\n[5] Freed remaining block");
    allocator.dump();
    print_program_break("after freeing everything");

    println!("\n[6] End of demo.");
  }
}
