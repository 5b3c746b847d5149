//! # Heap Manager
//!
//! The block manager behind the public allocation API. It keeps every
//! heap-resident block on two intrusive doubly-linked chains that are
//! threaded through the block headers themselves:
//!
//! ```text
//!                      HEAP MEMORY (grows upward →)
//!
//!   head                                              tail     program
//!    │                                                 │        break
//!    ▼                                                 ▼          │
//!  ┌────────┬─────────┬────────┬─────────┬────────┬─────────┐    ▼
//!  │ hdr A  │ payload │ hdr B  │ payload │ hdr C  │ payload │
//!  │ live   │         │ FREE   │         │ live   │         │
//!  └────────┴─────────┴────────┴─────────┴────────┴─────────┘
//!    │  ▲                │  ▲                │  ▲
//!    │  └── next/prev ───┘  └── next/prev ───┘  │
//!    │      (spatial chain, address order,      │
//!    │       no gaps between blocks)            │
//!    │                                          │
//!  free_head ──► hdr B ──► ... (free chain, LIFO order)
//! ```
//!
//! The spatial chain covers the managed heap contiguously: each block's
//! payload ends exactly where the next header begins. That adjacency is
//! what makes splitting and coalescing pure pointer arithmetic. The free
//! chain is a LIFO stack of the currently-free blocks; `find_free_block`
//! walks it front to back and takes the first fit.
//!
//! Requests at or above [`MMAP_THRESHOLD`] bypass the heap entirely: they
//! get a dedicated anonymous mapping with the same header layout, appear
//! on neither chain, and are returned to the OS as a whole on free.
//!
//! ## Lifecycle of a heap block
//!
//! ```text
//!   extend_heap ──► live ──► deallocate ──► free ──┬─► reused (first fit)
//!        ▲                                         ├─► absorbed (coalesce)
//!   split leftover ────────────────────────────────┴─► released (tail shrink)
//! ```
//!
//! All public entry points serialize on one process-wide mutex; the heap
//! is a single shared structure, never torn down, and initialized to the
//! empty chains below at program start.

use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::block::{HEADER_SIZE, Header, MIN_SPLIT_SIZE, MMAP_THRESHOLD};
use crate::os;

/// Requests above this would overflow the total-size arithmetic once
/// rounded up to the alignment unit.
const MAX_REQUEST: usize = isize::MAX as usize - HEADER_SIZE - (crate::ALIGNMENT - 1);

/// The process-wide allocator state: three chain heads, nothing more.
/// Every reachable header lives inside the managed memory itself.
pub struct Heap {
  /// Lowest-addressed heap block, or null while the heap is empty.
  head: *mut Header,

  /// Highest-addressed heap block; its payload ends at the program break.
  tail: *mut Header,

  /// Most recently freed block; entry point of the first-fit search.
  free_head: *mut Header,
}

// SAFETY: the raw chain pointers are only ever dereferenced by code
// holding the `HEAP` mutex, so moving the struct between threads is fine.
unsafe impl Send for Heap {}

static HEAP: Mutex<Heap> = Mutex::new(Heap::new());

/// Acquires the global allocator lock.
///
/// A poisoned lock is taken over as-is: the chain structure is governed
/// by the allocator's invariants, not by unwind bookkeeping.
fn lock() -> MutexGuard<'static, Heap> {
  HEAP.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Heap {
  const fn new() -> Self {
    Self {
      head: ptr::null_mut(),
      tail: ptr::null_mut(),
      free_head: ptr::null_mut(),
    }
  }

  /// Pushes `block` onto the free chain and flags it free.
  ///
  /// # Safety
  ///
  /// `block` must be a valid heap block that is not currently on the
  /// free chain.
  unsafe fn insert_free(
    &mut self,
    block: *mut Header,
  ) {
    unsafe {
      (*block).is_free = true;
      (*block).next_free = self.free_head;
      (*block).prev_free = ptr::null_mut();
      if !self.free_head.is_null() {
        (*self.free_head).prev_free = block;
      }
      self.free_head = block;
    }
  }

  /// Unlinks `block` from the free chain and clears its free flag.
  ///
  /// # Safety
  ///
  /// `block` must currently be on the free chain.
  unsafe fn remove_free(
    &mut self,
    block: *mut Header,
  ) {
    unsafe {
      if (*block).prev_free.is_null() {
        self.free_head = (*block).next_free;
      } else {
        (*(*block).prev_free).next_free = (*block).next_free;
      }
      if !(*block).next_free.is_null() {
        (*(*block).next_free).prev_free = (*block).prev_free;
      }
      (*block).next_free = ptr::null_mut();
      (*block).prev_free = ptr::null_mut();
      (*block).is_free = false;
    }
  }

  /// First-fit search: walks the free chain from its head and returns
  /// the first block with `size >= requested`, or null.
  ///
  /// Later, closer fits are never considered. The chain's LIFO order
  /// means recently freed blocks are found first, which serves the
  /// common allocate/free bursts of similar sizes well.
  unsafe fn find_free_block(
    &self,
    size: usize,
  ) -> *mut Header {
    unsafe {
      let mut current = self.free_head;
      while !current.is_null() {
        if (*current).size >= size {
          return current;
        }
        current = (*current).next_free;
      }
      ptr::null_mut()
    }
  }

  /// Splits `block` so its payload shrinks to `size`, turning the rest
  /// into a new free block directly behind it.
  ///
  /// Does nothing unless the leftover payload would reach
  /// [`MIN_SPLIT_SIZE`]; small overshoot is cheaper kept as internal
  /// fragmentation than as a micro block on the free chain.
  ///
  /// ```text
  ///   before:  [ hdr │ size ................................ ]
  ///   after:   [ hdr │ size ][ new hdr (free) │ leftover ... ]
  /// ```
  ///
  /// # Safety
  ///
  /// `block` must be a live heap block with `size <= (*block).size`,
  /// and `size` must be a multiple of the alignment unit.
  unsafe fn split_block(
    &mut self,
    block: *mut Header,
    size: usize,
  ) {
    unsafe {
      if (*block).size < size + HEADER_SIZE + MIN_SPLIT_SIZE {
        return;
      }

      let rest = Header::payload(block).add(size) as *mut Header;
      (*rest).size = (*block).size - size - HEADER_SIZE;
      (*rest).is_free = false;
      (*rest).is_mmap = false;
      (*rest).next = (*block).next;
      (*rest).prev = block;
      (*rest).next_free = ptr::null_mut();
      (*rest).prev_free = ptr::null_mut();

      if !(*block).next.is_null() {
        (*(*block).next).prev = rest;
      } else {
        self.tail = rest;
      }
      (*block).next = rest;
      (*block).size = size;

      self.insert_free(rest);
    }
  }

  /// Absorbs the spatial successor of `block` if that successor is a
  /// free heap block. `block` keeps its own free-chain position.
  unsafe fn coalesce_with_next(
    &mut self,
    block: *mut Header,
  ) {
    unsafe {
      let next = (*block).next;
      if next.is_null() || !(*next).is_free || (*next).is_mmap {
        return;
      }

      self.remove_free(next);
      let after = (*next).next;
      (*block).size += HEADER_SIZE + (*next).size;
      (*block).next = after;
      if !after.is_null() {
        (*after).prev = block;
      } else {
        self.tail = block;
      }
    }
  }

  /// Merges `block` into its spatial predecessor if that predecessor is
  /// a free heap block. Both leave the free chain; the surviving,
  /// enlarged predecessor is re-inserted at the head and returned so the
  /// caller can keep working with the live end of the merge.
  unsafe fn coalesce_with_prev(
    &mut self,
    block: *mut Header,
  ) -> *mut Header {
    unsafe {
      let prev = (*block).prev;
      if prev.is_null() || !(*prev).is_free || (*prev).is_mmap {
        return block;
      }

      self.remove_free(block);
      self.remove_free(prev);

      let after = (*block).next;
      (*prev).size += HEADER_SIZE + (*block).size;
      (*prev).next = after;
      if !after.is_null() {
        (*after).prev = prev;
      } else {
        self.tail = prev;
      }

      self.insert_free(prev);
      prev
    }
  }

  /// Grows the heap by one block of payload `size` and appends it to the
  /// spatial chain. Returns null if the OS refuses to move the break.
  unsafe fn extend_heap(
    &mut self,
    size: usize,
  ) -> *mut Header {
    let total = HEADER_SIZE + size;
    let old_break = match unsafe { os::extend_break(total as isize) } {
      Ok(address) => address,
      Err(error) => {
        debug!("heap extension by {total} bytes failed: {error}");
        return ptr::null_mut();
      }
    };
    debug_assert_eq!(
      old_break as usize % crate::ALIGNMENT,
      0,
      "program break drifted off the alignment unit"
    );

    let block = old_break as *mut Header;
    unsafe {
      (*block).size = size;
      (*block).is_free = false;
      (*block).is_mmap = false;
      (*block).next = ptr::null_mut();
      (*block).prev = self.tail;
      (*block).next_free = ptr::null_mut();
      (*block).prev_free = ptr::null_mut();

      if self.head.is_null() {
        self.head = block;
      }
      if !self.tail.is_null() {
        (*self.tail).next = block;
      }
      self.tail = block;
    }
    block
  }

  /// Returns free blocks at the top of the heap to the OS by lowering
  /// the program break past them. Stops at the first live (or missing)
  /// tail; interior free blocks are never released.
  ///
  /// The tail is unlinked from the chains only once the OS has accepted
  /// the shrink, so a refused shrink leaves the block on the free chain
  /// for a later retry instead of leaking it from the allocator's model.
  unsafe fn release_tail(&mut self) {
    unsafe {
      while !self.tail.is_null() && (*self.tail).is_free && !(*self.tail).is_mmap {
        let tail = self.tail;
        if Header::end(tail) != os::current_break() {
          // Someone else moved the break; the memory above the chain is
          // not ours to hand back.
          warn!("tail block does not end at the program break, keeping it");
          return;
        }

        let prev = (*tail).prev;
        let total = HEADER_SIZE + (*tail).size;
        self.remove_free(tail);

        let shrunk = os::set_break(tail as *mut u8).is_ok()
          || os::extend_break(-(total as isize)).is_ok();
        if !shrunk {
          self.insert_free(tail);
          warn!("OS refused to shrink the heap by {total} bytes");
          return;
        }

        self.tail = prev;
        if prev.is_null() {
          self.head = ptr::null_mut();
        } else {
          (*prev).next = ptr::null_mut();
        }
        debug!("released {total} bytes at the heap tail");
      }
    }
  }

  /// Allocation core for a pre-aligned request: mapped region for large
  /// sizes, otherwise first fit with a split, otherwise heap growth.
  unsafe fn allocate_block(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if size >= MMAP_THRESHOLD {
        let block = map_region(size);
        if block.is_null() {
          return ptr::null_mut();
        }
        return Header::payload(block);
      }

      let block = self.find_free_block(size);
      if !block.is_null() {
        self.remove_free(block);
        self.split_block(block, size);
        return Header::payload(block);
      }

      let block = self.extend_heap(size);
      if block.is_null() {
        return ptr::null_mut();
      }
      Header::payload(block)
    }
  }

  /// Tries to resize `block` to the pre-aligned `size` without moving
  /// its payload. Returns `true` when the caller can keep the pointer.
  ///
  /// Mapped blocks only ever shrink in place (which keeps the region at
  /// its original length). Heap blocks shrink by splitting, or grow by
  /// absorbing a free spatial successor when the merged payload reaches
  /// `size`.
  unsafe fn try_resize_in_place(
    &mut self,
    block: *mut Header,
    size: usize,
  ) -> bool {
    unsafe {
      if (*block).is_mmap {
        return size <= (*block).size;
      }

      if size <= (*block).size {
        self.split_block(block, size);
        return true;
      }

      let next = (*block).next;
      if !next.is_null()
        && (*next).is_free
        && !(*next).is_mmap
        && (*block).size + HEADER_SIZE + (*next).size >= size
      {
        self.remove_free(next);
        let after = (*next).next;
        (*block).size += HEADER_SIZE + (*next).size;
        (*block).next = after;
        if !after.is_null() {
          (*after).prev = block;
        } else {
          self.tail = block;
        }
        self.split_block(block, size);
        return true;
      }

      false
    }
  }
}

/// Obtains a dedicated anonymous mapping for one large block. The block
/// carries the usual header but joins neither chain.
unsafe fn map_region(size: usize) -> *mut Header {
  let total = HEADER_SIZE + size;
  let block = match os::map_anonymous(total) {
    Ok(address) => address as *mut Header,
    Err(error) => {
      debug!("large allocation failed: {error}");
      return ptr::null_mut();
    }
  };

  unsafe {
    (*block).size = size;
    (*block).is_free = false;
    (*block).is_mmap = true;
    (*block).next = ptr::null_mut();
    (*block).prev = ptr::null_mut();
    (*block).next_free = ptr::null_mut();
    (*block).prev_free = ptr::null_mut();
  }
  block
}

/// Allocates `size` bytes and returns a pointer to the payload, aligned
/// to [`ALIGNMENT`](crate::ALIGNMENT) bytes. Returns null when `size` is
/// zero or the OS is out of memory.
///
/// Requests of [`MMAP_THRESHOLD`] bytes and above are served from a
/// dedicated anonymous mapping; smaller ones reuse a free heap block
/// (first fit, splitting oversized hits) or extend the program break.
///
/// ```text
///   ┌────────────────────┬───────────────────────────┐
///   │    Block Header    │        User Payload       │
///   └────────────────────┴───────────────────────────┘
///                        ▲
///                        └── returned pointer
/// ```
///
/// # Safety
///
/// The returned memory is uninitialized. The pointer must be released
/// through [`deallocate`] (or [`reallocate`]) and not be used afterwards.
pub unsafe fn allocate(
  size: usize,
) -> *mut u8 {
  if size == 0 || size > MAX_REQUEST {
    return ptr::null_mut();
  }
  let size = crate::align!(size);

  let mut state = lock();
  unsafe { state.allocate_block(size) }
}

/// Releases an allocation obtained from this allocator. Passing null is
/// a no-op.
///
/// Mapped blocks are unmapped immediately. Heap blocks go back onto the
/// free chain and merge with free spatial neighbours; when the merged
/// run ends up at the top of the heap it is handed back to the OS by
/// lowering the program break.
///
/// # Safety
///
/// `address` must be null or a pointer previously returned by
/// [`allocate`], [`allocate_zeroed`] or [`reallocate`] that has not been
/// released since. The payload must no longer be accessed.
pub unsafe fn deallocate(
  address: *mut u8,
) {
  if address.is_null() {
    return;
  }

  let mut state = lock();
  unsafe {
    let block = Header::from_payload(address);

    if (*block).is_mmap {
      os::unmap(block as *mut u8, HEADER_SIZE + (*block).size);
      return;
    }

    state.insert_free(block);
    state.coalesce_with_next(block);
    state.coalesce_with_prev(block);
    state.release_tail();
  }
}

/// Allocates a zero-initialized region of `count * size` bytes, the
/// `calloc` shape. Returns null when either factor is zero or the
/// multiplication would overflow.
///
/// # Safety
///
/// Same contract as [`allocate`].
pub unsafe fn allocate_zeroed(
  count: usize,
  size: usize,
) -> *mut u8 {
  if count == 0 || size == 0 {
    return ptr::null_mut();
  }
  let Some(total) = count.checked_mul(size) else {
    return ptr::null_mut();
  };

  let address = unsafe { allocate(total) };
  if !address.is_null() {
    unsafe { ptr::write_bytes(address, 0, total) };
  }
  address
}

/// Resizes an allocation to `size` bytes, the `realloc` shape.
///
/// A null `address` behaves like [`allocate`]; a zero `size` behaves
/// like [`deallocate`] and returns null. Otherwise the allocator first
/// tries to resize in place (shrink by splitting, grow by absorbing a
/// free right-hand neighbour, keep mapped regions that are still big
/// enough). Only when that fails does it allocate a fresh block, copy
/// the old payload, and release the old block; the global lock is
/// dropped for that path so the nested calls can reacquire it.
///
/// Returns null and leaves the old allocation untouched when a needed
/// fresh allocation fails.
///
/// # Safety
///
/// `address` must be null or a live pointer from this allocator. After a
/// successful call only the returned pointer may be used.
pub unsafe fn reallocate(
  address: *mut u8,
  size: usize,
) -> *mut u8 {
  if address.is_null() {
    return unsafe { allocate(size) };
  }
  if size == 0 {
    unsafe { deallocate(address) };
    return ptr::null_mut();
  }
  if size > MAX_REQUEST {
    return ptr::null_mut();
  }
  let size = crate::align!(size);

  let mut state = lock();
  unsafe {
    let block = Header::from_payload(address);
    let old_size = (*block).size;

    if state.try_resize_in_place(block, size) {
      return address;
    }

    // The block has to move. Drop the lock so the nested allocate and
    // deallocate can take it; the old block stays live in the meantime,
    // so no other caller can claim it.
    drop(state);

    let new_address = allocate(size);
    if new_address.is_null() {
      return ptr::null_mut();
    }
    ptr::copy_nonoverlapping(address, new_address, old_size);
    deallocate(address);
    new_address
  }
}

/// Dumps every block on the spatial chain and every block on the free
/// chain to stdout, one line per block. Diagnostic only.
pub fn print_state() {
  let state = lock();

  println!("All blocks:");
  let mut block = state.head;
  while !block.is_null() {
    unsafe {
      println!(
        "  [{:p}] size={} free={} mmap={} next={:p} prev={:p}",
        block,
        (*block).size,
        (*block).is_free,
        (*block).is_mmap,
        (*block).next,
        (*block).prev,
      );
      block = (*block).next;
    }
  }

  println!("Free list:");
  let mut block = state.free_head;
  while !block.is_null() {
    unsafe {
      println!("  [{:p}] size={}", block, (*block).size);
      block = (*block).next_free;
    }
  }
}
