//! Derived attributes computed lazily on loaded rows: calendar activation,
//! stop-time delay, and vehicle bearing interpolation. These are pure
//! functions over row data plus thin store-backed lookups; nothing here
//! writes to the store.

pub mod bearing;
pub mod calendar;
pub mod delay;
