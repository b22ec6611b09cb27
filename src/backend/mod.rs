//! Backend process integration
//!
//! Discovers the chatlog backend executable, supervises the long-lived
//! `server` process, and runs one-shot CLI subcommands against the same
//! candidate chain.

pub mod detect;
pub mod locator;
pub mod runner;
pub mod supervisor;
