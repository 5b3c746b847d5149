use std::io::Read;

use rmalloc::{MMAP_THRESHOLD, allocate, allocate_zeroed, deallocate, print_state, reallocate};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop`, `gdb`, or just visually track how the program break moves.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { libc::sbrk(0) },
  );
}

fn main() {
  unsafe {
    // Initial heap state
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate three small blocks. Each one extends the program break
    //    and is appended to the spatial chain.
    // --------------------------------------------------------------------
    let first = allocate(100);
    let second = allocate(200);
    let third = allocate(50);
    println!("\n[1] Allocated 100, 200 and 50 bytes:");
    println!("    first  = {first:?}");
    println!("    second = {second:?}");
    println!("    third  = {third:?}");
    print_program_break("after three allocations");
    print_state();

    first.write_bytes(0xAB, 100);
    println!("[1] Initialized first block with 0xAB");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Free the middle block. It goes onto the free chain but stays in
    //    the heap: it is not the tail, so nothing is returned to the OS.
    // --------------------------------------------------------------------
    deallocate(second);
    println!("\n[2] Freed the middle block at {second:?}");
    print_state();

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Allocate 60 bytes. First fit reuses the freed middle block and
    //    splits off the rest as a smaller free block.
    // --------------------------------------------------------------------
    let reused = allocate(60);
    println!("\n[3] Allocate 60 bytes (check reuse of the freed block)");
    println!(
      "    reused == second? {}",
      if reused == second {
        "Yes, it reused the freed block"
      } else {
        "No, it allocated somewhere else"
      }
    );
    print_state();

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Grow the first block. Its right-hand neighbour is live, so the
    //    payload has to move; the old block is freed in the process.
    // --------------------------------------------------------------------
    let first = reallocate(first, 5000);
    println!("\n[4] Reallocated the first block to 5000 bytes, now at {first:?}");
    println!("    first byte still 0x{:02X}", first.read());
    print_program_break("after reallocate");
    print_state();

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) A zeroed table, calloc style.
    // --------------------------------------------------------------------
    let table = allocate_zeroed(16, 32);
    println!("\n[5] Zero-allocated a 16 x 32 byte table at {table:?}");
    println!("    table[0] = {}, table[511] = {}", table.read(), table.add(511).read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) A large block. This one bypasses the heap entirely and lives in
    //    its own anonymous mapping: watch the break NOT move.
    // --------------------------------------------------------------------
    print_program_break("before large allocation");
    let big = allocate(MMAP_THRESHOLD + 4096);
    println!("\n[6] Allocated {} bytes at {big:?} (mapped)", MMAP_THRESHOLD + 4096);
    print_program_break("after large allocation");
    print_state();

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Free everything. The mapped block is unmapped on the spot; the
    //    heap blocks coalesce into one run and the tail release lowers
    //    the program break back down.
    // --------------------------------------------------------------------
    deallocate(big);
    deallocate(table);
    deallocate(first);
    deallocate(reused);
    deallocate(third);
    println!("\n[7] Freed everything");
    print_program_break("end");
    print_state();

    println!("\n[8] End of demo. The allocator state above should be empty again.");
  }
}
