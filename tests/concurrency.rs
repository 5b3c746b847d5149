//! Hammers the allocator from several threads at once. Every entry
//! point serializes on the global mutex, so the churn must come out
//! with each thread's payloads intact and without tripping the OS.

use std::thread;

use rmalloc::{allocate, deallocate, reallocate};

#[test]
fn parallel_churn_keeps_payloads_intact() {
  let workers: Vec<_> = (0..8usize)
    .map(|worker| {
      thread::spawn(move || unsafe {
        let marker = (worker as u8) ^ 0x5A;

        for round in 0..200usize {
          let size = 1 + (worker * 37 + round * 61) % 1500;

          let address = allocate(size);
          assert!(!address.is_null());
          address.write_bytes(marker, size);

          // grow every third round to drive the resize paths as well
          let address = if round % 3 == 0 {
            let grown = reallocate(address, size * 2);
            assert!(!grown.is_null());
            grown
          } else {
            address
          };

          assert_eq!(address.read(), marker, "payload corrupted under contention");
          assert_eq!(address.add(size - 1).read(), marker);

          deallocate(address);
        }
      })
    })
    .collect();

  for worker in workers {
    worker.join().expect("worker must not panic");
  }
}
