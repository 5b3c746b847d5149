//! # rmalloc - A Free-List Memory Allocator Library
//!
//! This crate provides a general-purpose **free-list allocator** in Rust
//! that manages memory directly on top of the `sbrk` and `mmap` system
//! calls, with the classic `malloc`/`free`/`calloc`/`realloc` surface.
//!
//! ## Overview
//!
//! ```text
//!   Free-List Allocator Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         HEAP MEMORY                                  │
//!   │                                                                      │
//!   │   ┌──────┬──────┬──────┬──────┬──────┐                               │
//!   │   │ A1   │ FREE │ A2   │ FREE │ A3   │◄── Program Break              │
//!   │   └──────┴──────┴──────┴──────┴──────┘                               │
//!   │             ▲             ▲                                          │
//!   │             └─────────────┴── reused by later allocations            │
//!   │                                                                      │
//!   │   Freed blocks are kept on a free list, merged with free             │
//!   │   neighbours, split when oversized, and handed back to the           │
//!   │   OS when they end up at the top of the heap.                        │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each block is prefixed by a header carrying its size, two flags, and
//! the links of two intrusive chains:
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────────┬────────────────────────────────┐
//!   │       Block Header        │          User Payload          │
//!   │  ┌─────────────────────┐  │                                │
//!   │  │ size                │  │  ┌──────────────────────────┐  │
//!   │  │ is_free / is_mmap   │  │  │   size bytes, 16-byte    │  │
//!   │  │ next / prev         │  │  │   aligned                │  │
//!   │  │ next_free/prev_free │  │  └──────────────────────────┘  │
//!   │  └─────────────────────┘  │                                │
//!   └───────────────────────────┴────────────────────────────────┘
//!                               ▲
//!                               └── Pointer returned to user
//! ```
//!
//! `next`/`prev` order every heap block by address with no gaps, which
//! makes splitting and coalescing pure pointer arithmetic. The
//! `next_free`/`prev_free` chain holds only free blocks, in LIFO order,
//! and is searched first fit. Requests of [`MMAP_THRESHOLD`] bytes and
//! above are served from dedicated anonymous mappings that sit on
//! neither chain and go back to the OS individually on free.
//!
//! ## Crate Structure
//!
//! ```text
//!   rmalloc
//!   ├── align      - align! macro (round sizes to the alignment unit)
//!   ├── block      - block header, layout constants, pointer math
//!   ├── os         - sbrk/brk/mmap/munmap adapter
//!   └── heap       - chains, block operations, public API
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! unsafe {
//!   let ptr = rmalloc::allocate(64);
//!   assert!(!ptr.is_null());
//!
//!   ptr.write_bytes(0x42, 64);
//!   let ptr = rmalloc::reallocate(ptr, 128);
//!   assert_eq!(ptr.read(), 0x42);
//!
//!   rmalloc::deallocate(ptr);
//! }
//! ```
//!
//! ## Thread Safety
//!
//! All entry points serialize on one process-wide mutex, so the
//! allocator can be called from parallel threads. There are no
//! per-thread caches and no lock-free fast path.
//!
//! ## Limitations
//!
//! - **First fit only**: no best-fit search or size-class segregation
//! - **Fixed alignment**: payloads are 16-byte aligned, never more
//! - **Tail-only reclamation**: interior heap memory is reused but not
//!   returned to the OS; only free blocks at the break are released
//! - **Unix-only**: requires `libc` with `sbrk`/`brk` (POSIX systems)
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals in raw memory. Callers
//! own the usual `malloc` contract: no double free, no use after free,
//! no pointers the allocator did not hand out.

mod align;
mod block;
mod heap;
mod os;

pub use block::{ALIGNMENT, MIN_SPLIT_SIZE, MMAP_THRESHOLD};
pub use heap::{allocate, allocate_zeroed, deallocate, print_state, reallocate};
