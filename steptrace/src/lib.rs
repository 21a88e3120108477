//! # steptrace - Source-Level Execution Traces of Native Programs
//!
//! steptrace runs a compiled C/C++ program under a native debugger, steps it
//! line by line, and records what happened at every line that belongs to the
//! user's own sources: which variables appeared, which changed, which objects
//! were constructed or destroyed. The result is one JSON document that a
//! visualizer can replay as a timeline.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Target Executable (-g)                      │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ ptrace
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Native Debugger (GDB, MI mode)                 │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ MI records over pipes
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    steptrace (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Backend    │──▶│   Session    │──▶│    Export    │         │
//! │  │ (DebugBackend│   │    Driver    │   │ (steps JSON) │         │
//! │  │   trait)     │   └──────┬───────┘   └──────────────┘         │
//! │  └──────────────┘          │                                    │
//! │                ┌───────────┼───────────┐                        │
//! │                ▼           ▼           ▼                        │
//! │         ┌───────────┐ ┌──────────┐ ┌──────────┐                 │
//! │         │ User-Code │ │ Snapshot │ │ Classify │                 │
//! │         │  Filter + │ │ Extractor│ │  Engine  │                 │
//! │         │  Dedup    │ └──────────┘ └──────────┘                 │
//! │         └───────────┘                                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`backend`]: the [`backend::DebugBackend`] capability contract
//!   - `gdb`: GDB/MI adapter and MI record parser
//! - [`testing`]: replaying backend for tests and `--replay`
//! - [`classification`]: user-code filter with explicit deny tables
//! - [`snapshot`]: frame snapshots and value coercion
//! - [`engine`]: deduplication, classification, timeout alarm, session driver
//! - [`export`]: writes the trace document
//! - [`semantic_info`]: the optional semantic-info input document
//! - [`preflight`]: checks run before a session starts
//! - [`process_lookup`]: process liveness and signal delivery by PID
//! - [`config`], [`cli`]: budgets and command-line arguments
//! - [`domain`]: core types (Pid, `ThreadId`) and error enums
//!
//! ## Session Guarantees
//!
//! - Every trace ends with exactly one terminal step (`program_end` or `timeout`)
//! - Step ids are 0, 1, 2, ... in append order
//! - No two consecutive recorded steps share a (function, file, line, depth) signature
//! - The traced process is killed before the session returns, on every path
//!
//! ## Typical Usage
//!
//! ```bash
//! # Trace a program built with debug info
//! cc -g -O0 -o prog prog.c && tracer ./prog > trace.json
//!
//! # Name the primary source explicitly
//! tracer ./prog semantic.json
//!
//! # Replay a scripted session without a debugger
//! tracer --replay script.json ./prog
//! ```

// Expose modules for testing
pub mod backend;
pub mod classification;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod export;
pub mod preflight;
pub mod process_lookup;
pub mod semantic_info;
pub mod snapshot;
pub mod testing;
