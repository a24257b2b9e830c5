//! Satellite flight-dynamics toolkit: a TLE time-series database, a CCSDS
//! OEM/OPM file archive and a satellite registry, all addressed through a
//! compact selector grammar (`norad=25544@oem~2?2019-07-20`).
//!
//! Everything lives under a workspace directory (see [`wspace::Workspace`]);
//! the `space` binary is a thin CLI over these modules.

pub mod archive;
pub mod ccsds;
pub mod error;
pub mod fetch;
pub mod request;
pub mod sat;
pub mod tle;
pub mod wspace;

pub use error::{Error, Result};
