//! Larder — inventory ledger & costing core
//!
//! This crate holds the stock state, movement ledger and weighted-average
//! costing engine behind a restaurant back-office system. The surrounding
//! pages (POS, purchasing forms, kitchen display, reports) talk to it
//! through the mutation commands and the read-only services; they never
//! touch the stock tables directly.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod commands;
pub mod config;
pub mod costing;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;
