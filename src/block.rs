use std::mem;

/// User payloads and block sizes are multiples of this many bytes.
pub const ALIGNMENT: usize = 16;

/// Requests at or above this size get a dedicated anonymous mapping
/// instead of heap space.
pub const MMAP_THRESHOLD: usize = 128 * 1024;

/// Smallest payload a split leftover is allowed to have; anything less
/// stays with the claimed block as internal fragmentation.
pub const MIN_SPLIT_SIZE: usize = 32;

/// Bytes between a header and its payload: the header size rounded up
/// so payloads land on the alignment unit.
pub const HEADER_SIZE: usize = crate::align!(mem::size_of::<Header>());

/// Metadata prefix of every block, heap-resident or mapped.
///
/// Heap blocks are threaded onto two chains through these fields:
/// `next`/`prev` order all heap blocks by address with no gaps between
/// them, and `next_free`/`prev_free` link the currently-free ones in
/// LIFO order. Mapped blocks carry the same header but sit on neither
/// chain.
pub struct Header {
  /// Payload size in bytes, always a multiple of [`ALIGNMENT`].
  pub size: usize,
  /// Set exactly while the block is on the free chain.
  pub is_free: bool,
  /// Set for standalone mapped regions.
  pub is_mmap: bool,
  pub next: *mut Header,
  pub prev: *mut Header,
  pub next_free: *mut Header,
  pub prev_free: *mut Header,
}

impl Header {
  /// First payload byte of `block`.
  ///
  /// # Safety
  ///
  /// `block` must point to a live header with its payload behind it.
  pub unsafe fn payload(block: *mut Header) -> *mut u8 {
    unsafe { (block as *mut u8).add(HEADER_SIZE) }
  }

  /// Recovers the header from a payload pointer handed out earlier.
  ///
  /// # Safety
  ///
  /// `address` must be a payload pointer this allocator handed out, so
  /// that a live header sits [`HEADER_SIZE`] bytes below it.
  pub unsafe fn from_payload(address: *mut u8) -> *mut Header {
    unsafe { address.sub(HEADER_SIZE) as *mut Header }
  }

  /// One past the last payload byte of `block`.
  ///
  /// # Safety
  ///
  /// `block` must point to a live header whose `size` field is intact.
  pub unsafe fn end(block: *mut Header) -> *mut u8 {
    unsafe { Header::payload(block).add((*block).size) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_size_is_aligned_and_sufficient() {
    assert_eq!(HEADER_SIZE % ALIGNMENT, 0);
    assert!(HEADER_SIZE >= mem::size_of::<Header>());
  }

  #[test]
  fn payload_and_header_round_trip() {
    #[repr(align(16))]
    struct Arena([u8; 256]);
    let mut arena = Arena([0; 256]);
    let block = arena.0.as_mut_ptr() as *mut Header;

    unsafe {
      (*block).size = 64;

      let payload = Header::payload(block);
      assert_eq!(payload as usize, block as usize + HEADER_SIZE);
      assert_eq!(payload as usize % ALIGNMENT, 0);
      assert_eq!(Header::from_payload(payload), block);
      assert_eq!(Header::end(block) as usize, payload as usize + 64);
    }
  }
}
