// src/mem/mod.rs
pub mod ex_flash;
pub mod flash;
pub mod ram;
