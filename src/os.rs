//! Thin wrappers over the platform primitives the allocator sits on:
//! program-break adjustment (`sbrk`/`brk`) and anonymous memory mappings
//! (`mmap`/`munmap`). Everything above this module deals in headers and
//! chains; everything below it is the kernel.

use std::ptr;

use libc::{c_void, intptr_t};
use log::{trace, warn};
use thiserror::Error;

/// Failure of a platform memory primitive.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OsError {
  /// `sbrk`/`brk` refused to move the program break.
  #[error("program break adjustment failed")]
  BreakFailed,

  /// `mmap` could not provide an anonymous region of the given size.
  #[error("anonymous mapping of {0} bytes failed")]
  MapFailed(usize),
}

/// Current end of the data segment, `sbrk(0)`.
pub fn current_break() -> *mut u8 {
  unsafe { libc::sbrk(0) as *mut u8 }
}

/// Moves the program break by `delta` bytes and returns the previous
/// break, which is where newly gained memory starts.
///
/// # Safety
///
/// A negative `delta` discards the top of the heap; no live block may
/// extend past the new break.
pub unsafe fn extend_break(
  delta: isize,
) -> Result<*mut u8, OsError> {
  let previous = unsafe { libc::sbrk(delta as intptr_t) };
  if previous == usize::MAX as *mut c_void {
    return Err(OsError::BreakFailed);
  }
  trace!("moved program break by {delta} bytes from {previous:p}");
  Ok(previous as *mut u8)
}

/// Sets the program break to `address`.
///
/// # Safety
///
/// Same contract as [`extend_break`] with a negative delta: memory at
/// and above `address` ceases to exist.
pub unsafe fn set_break(
  address: *mut u8,
) -> Result<(), OsError> {
  if unsafe { libc::brk(address as *mut c_void) } != 0 {
    return Err(OsError::BreakFailed);
  }
  trace!("set program break to {address:p}");
  Ok(())
}

/// Maps `len` bytes of fresh, private, read-write anonymous memory.
pub fn map_anonymous(
  len: usize,
) -> Result<*mut u8, OsError> {
  let address = unsafe {
    libc::mmap(
      ptr::null_mut(),
      len,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    )
  };
  if address == libc::MAP_FAILED {
    return Err(OsError::MapFailed(len));
  }
  trace!("mapped {len} anonymous bytes at {address:p}");
  Ok(address as *mut u8)
}

/// Returns a region obtained from [`map_anonymous`] to the OS.
///
/// # Safety
///
/// `address` and `len` must denote exactly one live mapping returned by
/// [`map_anonymous`]; the region must not be touched afterwards.
pub unsafe fn unmap(
  address: *mut u8,
  len: usize,
) {
  if unsafe { libc::munmap(address as *mut c_void, len) } != 0 {
    warn!("munmap of {len} bytes at {address:p} failed");
  } else {
    trace!("unmapped {len} bytes at {address:p}");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn break_probe_reports_an_address() {
    assert!(!current_break().is_null());
  }

  #[test]
  fn anonymous_mapping_round_trip() {
    let len = 4 * 4096;
    let address = map_anonymous(len).expect("mapping must succeed");

    unsafe {
      address.write_bytes(0x5A, len);
      assert_eq!(address.read(), 0x5A);
      assert_eq!(address.add(len - 1).read(), 0x5A);
      unmap(address, len);
    }
  }

  #[test]
  fn errors_render_their_cause() {
    assert_eq!(OsError::BreakFailed.to_string(), "program break adjustment failed");
    assert_eq!(
      OsError::MapFailed(64).to_string(),
      "anonymous mapping of 64 bytes failed"
    );
  }
}
