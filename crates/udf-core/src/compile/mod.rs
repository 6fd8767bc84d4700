//! Compilation pipeline for UDFs.
//!
//! This module provides:
//! - Template assembly (user source spliced into a language template)
//! - Toolchain discovery (native compiler, bytecode compiler)
//! - Dependency scanning (dataset names referenced by `lib.getData`)
//!
//! # Architecture
//!
//! ```text
//! udf.cpp / udf.lua
//!     │
//!     ├── DependencyScanner ──► ["A", "B", ...]   (before compile, no execution)
//!     │
//!     └── assemble(template) ──► /tmp/udf-XXXX.{cpp,lua}
//!                                   │
//!                                   └── g++ / luajit ──► artifact bytes
//! ```

mod assemble;
mod dependency_scanner;
mod toolchain;

pub use assemble::assemble;
pub(crate) use assemble::write_transient;
pub use dependency_scanner::{ACCESSOR, DependencyScanner};
pub use toolchain::ToolchainManager;
