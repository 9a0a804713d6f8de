// ── Local state ──
//
// The per-scope collection, the reconciler that mutates it, and the buffer
// that holds events while no snapshot is trusted.

pub mod buffer;
pub mod collection;
pub mod reconcile;

pub use buffer::EventBuffer;
pub use collection::{Direction, LocalCollection, OrderingPolicy};
pub use reconcile::{Applied, apply};
