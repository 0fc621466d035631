//! `fanout` command: runs one dispatch job against the simulated collaborators.

pub mod app;
