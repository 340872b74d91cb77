//! # vessel-bootstrap
//!
//! Definition-driven root filesystem construction.
//!
//! A bootstrap definition is a declarative text file: a header of
//! `Key: value` lines selecting a base-OS module, followed by named
//! `%section` script blocks run at fixed lifecycle points. This crate
//! parses that format and drives the construction sequence against a
//! mounted rootfs.

pub mod definition;
pub mod engine;
pub mod module;
