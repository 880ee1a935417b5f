//! Parent module for all EtherCAT modules

pub mod base;
pub mod coe;
pub mod config;
pub mod foe;
pub mod image;
pub mod main;
pub mod r#type;

#[cfg(test)]
mod sim;
