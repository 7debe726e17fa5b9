// src/cfg/mod.rs
pub mod fs_cfg;
