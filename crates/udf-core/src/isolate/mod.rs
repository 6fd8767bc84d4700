//! Process isolation for UDF execution.
//!
//! This module provides:
//! - Anonymous shared memory for the output buffer (`shm`)
//! - The child→parent report protocol (`protocol`)
//! - Forked worker processes with bounded waits (`worker`)
//! - The injected sandbox policy capability (`sandbox`)
//!
//! # Architecture
//!
//! ```text
//! parent                               child (fork)
//!   │ SharedRegion::new(output size)
//!   │ IsolatedChild::spawn ───────────► sandbox.install()
//!   │                                    │   └─ Err → report SandboxRejected, _exit(2)
//!   │                                    ├─ init(filter_path)
//!   │                                    ├─ dynamic_dataset()  ── writes ──► shm
//!   │                                    └─ report ──pipe──► parent, _exit
//!   │ wait(timeout) ── SIGKILL on deadline
//!   └─ shm.copy_to(output)
//! ```

pub mod protocol;
mod sandbox;
mod shm;
mod worker;

pub use protocol::ChildReport;
pub use sandbox::{NoNewPrivileges, SandboxContext, SandboxPolicy};
pub use shm::SharedRegion;
pub use worker::IsolatedChild;
