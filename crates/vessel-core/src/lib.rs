//! # vessel-core
//!
//! Privileged setup primitives for the Vessel container runtime.
//!
//! This crate provides safe abstractions over:
//! - **Privilege control**: controlled alternation between the invoking
//!   user and an escalated identity, with scoped guards.
//! - **Namespaces**: user and mount namespace unshare with strict ordering.
//! - **Rootfs assembly**: image resolution, session directories, mount,
//!   structure repair, and the terminal chroot.
//! - **Process execution**: a synchronous fork/exec primitive for host and
//!   in-container scripts.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling.

pub mod exec;
pub mod files;
pub mod image;
pub mod invocation;
pub mod namespace;
pub mod privilege;
pub mod rootfs;
pub mod session;
