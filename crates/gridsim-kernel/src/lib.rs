//! gridsim-kernel — the deterministic simulation kernel.
//!
//! A single-threaded cooperative executor over virtual time. All simulated
//! concurrency in gridsim is built on this crate:
//!
//! - `SimTime` / `Kernel` — the virtual clock and the event loop
//! - `Sleep` — timers keyed by `(deadline, sequence)`; insertion order is
//!   the tie-break, so runs replay deterministically for identical inputs
//! - `Promise` — single-settlement futures with `then`/`catch`/`race`
//! - `Signal` / `Semaphore` / `Queue` — cancellation-safe primitives used
//!   by the server resource model
//!
//! # Architecture
//!
//! ```text
//! Kernel
//!   ├── VirtualClock (monotonic, advanced only by the run loop)
//!   ├── Timer heap   (min by (deadline, seq))
//!   ├── Task table   (suspended continuations; one runs at a time)
//!   └── Ready queue  (FIFO — same-time events run in scheduling order)
//! ```
//!
//! Tasks are spawned with a label; an error escaping a top-level task is
//! fatal to the run and reported as a [`SimAbort`] naming the task, the
//! virtual time, and the error. Abandoned race branches are defused instead:
//! their settlements never surface.

pub mod clock;
pub mod error;
pub mod executor;
pub mod promise;
pub mod sync;

pub use clock::SimTime;
pub use error::{KernelResult, SimAbort};
pub use executor::{Kernel, Sleep};
pub use promise::Promise;
pub use sync::{race_signal, race2, Acquire, Either, Permit, Pop, Queue, Semaphore, Signal};
