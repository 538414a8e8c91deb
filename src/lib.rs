#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod address;
pub mod backend;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod fs;
pub mod logging;
pub mod network;
pub mod paths;
pub mod progress;
pub mod shell;
pub mod vbox;
pub mod vm;

#[cfg(test)]
mod testing;
