#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod catalog;
pub mod cli;
pub mod config;
pub mod deps;
pub mod disk;
pub mod error;
pub mod image;
pub mod lifecycle;
pub mod logging;
pub mod menu;
pub mod paths;
pub mod provision;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod ui;
pub mod util;
