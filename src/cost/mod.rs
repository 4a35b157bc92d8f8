//! Static cycle estimation for kernels.
//!
//! Walks the CFG top to bottom and prices every instruction against a
//! simple latency-hiding policy: concurrent warps cover high-latency memory
//! with `max(work * warps, latency)`. Loops are priced by a dedicated
//! walker that distinguishes innermost loops (whose body tail overlaps the
//! next iteration) from outer loops (whose inner loops are priced
//! recursively).

pub mod counter;
pub mod report;

pub use counter::{CycleCounter, CycleParams, CycleSummary, LoopCycles};
