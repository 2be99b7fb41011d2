//! # Radar - eBPF File Deletion Sensor
//!
//! Radar loads a precompiled eBPF probe, attaches it to the
//! `syscalls/sys_enter_unlinkat` tracepoint, and reports every file deletion
//! on the host with the deleting process's PID and command name.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     eBPF Probe (Kernel)                         │
//! │  • Tracepoint: syscalls/sys_enter_unlinkat                      │
//! │  • Perf event array: events (one buffer per CPU)                │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ 276-byte records
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Radar (This Crate)                           │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  Read Loop   │──▶│  Dispatcher  │──▶│   Consumer   │──▶ log  │
//! │  │  (decode)    │   │ (bounded 10) │   │   (+ sink)   │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │         ▲                                                       │
//! │         │ close                                                 │
//! │  ┌──────────────┐                                               │
//! │  │  Supervisor  │  cancellation → close, detach, unload         │
//! │  └──────────────┘                                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`sensor`]: capability traits, aya-backed implementations, read loop,
//!   dispatcher, consumer and the lifecycle coordinator
//! - [`domain`]: events, lifecycle states and errors
//! - [`config`]: operating parameters with their defaults
//! - [`preflight`]: privilege, kernel and probe object checks
//! - [`cli`]: command-line argument parsing
//!
//! ## Typical Usage
//!
//! ```bash
//! # Probe object in the working directory
//! sudo ./radar
//!
//! # JSON lines on stdout for another tool to pick up
//! sudo ./radar --object /opt/radar/radar.o --json
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod preflight;
pub mod sensor;
