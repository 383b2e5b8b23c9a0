//! Store filesystem trees inside a hierarchical container and list, verify and extract them
//! again.
//!
//! The engine lives in [`archive`], the container it reads from and writes to is provided by
//! the `h5ar-container` crate and re-exported as [`container`].

pub mod archive;

pub use h5ar_container as container;
