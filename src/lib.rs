//! Droplet hydraulic erosion library
//!
//! Re-exports modules for use by binaries and tools.

pub mod erosion;
pub mod error;
pub mod export;
pub mod fixed_point;
pub mod heightfield;
pub mod terrain;

pub use error::ErosionError;
pub use heightfield::Heightfield;
