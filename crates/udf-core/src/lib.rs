//! Core engine for user-defined array datasets.
//!
//! This crate provides:
//! - Dataset descriptors for caller-owned typed buffers
//! - Template assembly and toolchain invocation (native module or bytecode)
//! - Static discovery of the datasets a UDF reads
//! - Execution backends, with fork-based isolation and a shared-memory
//!   output channel for interpreted UDFs

pub mod backend;
pub mod compile;
pub mod config;
pub mod dataset;
pub mod error;
pub mod isolate;

pub use backend::{Backend, BytecodeBackend, NativeBackend};
pub use compile::{DependencyScanner, ToolchainManager, assemble};
pub use config::EngineConfig;
pub use dataset::{DatasetDescriptor, ElementType};
pub use error::{Error, Result};
pub use isolate::{NoNewPrivileges, SandboxContext, SandboxPolicy};
