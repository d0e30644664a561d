//! Multizone simulation driver and mesh deformation.

pub mod comm;
pub mod config;
pub mod deformation_driver;
pub mod driver;
pub mod error;
pub mod geometry;
pub mod grid_movement;
pub mod numerics;
pub mod output;
pub mod solver;
