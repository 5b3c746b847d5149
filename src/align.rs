/// Rounds the given size up to the next multiple of the alignment unit.
///
/// # Examples
///
/// ```rust
/// assert_eq!(rmalloc::align!(1), 16);
/// assert_eq!(rmalloc::align!(100), 112);
/// assert_eq!(rmalloc::align!(32), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::ALIGNMENT - 1) & !($crate::ALIGNMENT - 1)
  };
}
