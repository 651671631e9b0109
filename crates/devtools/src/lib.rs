//! `odd-devtools` wires the relay, page observers and panel controllers
//! together in one process.
//!
//! The browser pieces (tabs, script injection, page evaluation) are
//! simulated by [`sim`]; the `odd-devtools` binary drives them from the
//! command line.

pub mod cli;
pub mod sim;
