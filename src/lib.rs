//! Regnav - regulatory question answering
//!
//! Regulatory items live at points of a 4D coordinate space (pillar,
//! level, branch, expertise) and are linked by typed crosswalks. A query
//! walks the Algorithm of Thought state machine in [`workflow`]: it is
//! parsed, positioned in the space, matched against nearby items, reasoned
//! about by a weighted panel of expert personas ([`persona`]) and checked
//! by an independent compliance pass ([`compliance`]).
//!
//! [`app::Regnav`] wires all of it together from a [`config::RegnavConfig`].

pub mod analysis;
pub mod app;
pub mod cli;
pub mod compliance;
pub mod config;
pub mod error;
pub mod logging;
pub mod persona;
pub mod space;
pub mod workflow;

pub use app::Regnav;
pub use error::{Error, Result};
