// library crate for axsel
// the binary is a thin CLI over these modules

pub mod action;
pub mod cli;
pub mod clock;
pub mod config;
pub mod logging;
pub mod query;
pub mod rules;
pub mod scheduler;
pub mod selector;
pub mod tree;
