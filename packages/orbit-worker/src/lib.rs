//! # orbit-worker
//!
//! LEO telemetry producers. Four binaries share this library:
//!
//! - `const-sim` — constellation-wide worker driving the full
//!   `(plane, ordinal)` grid under controller coordination
//! - `sat-node` — hardware-in-the-loop worker pinned to one satellite by
//!   host identity
//! - `third-party` — degenerate worker running a one-shot external job on
//!   the `thirdParty` topic
//! - `orbit-sim` — standalone generator (CSV files or direct POSTs, no
//!   controller)
//!
//! Layering, leaves first: `geodesy` (WGS-84 math) → `orbit` (sample
//! kernel) → `sink` (HTTP/CSV/exfilt outputs) → `registry` (per-process
//! bookkeeping) → `listener` (bus command routing) → `worker` (producer
//! lifecycle).

pub mod config;
pub mod geodesy;
pub mod listener;
pub mod orbit;
pub mod registry;
pub mod sink;
pub mod worker;
