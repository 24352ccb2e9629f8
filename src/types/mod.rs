//! Wire-level code types shared by the stream modules.
//!
//! - [`enums`] — Subscription modes, exchange types and control-frame actions
//!
//! All enums are re-exported at the module root via `pub use enums::*`.

pub mod enums;

pub use enums::*;
