//! # ccuhub-domain
//!
//! Pure domain model for the ccuhub Homematic binding.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Addresses** (`HM-1:1` channels, `HM-1:1.STATE` parameters)
//! - Define **Devices**, **Channels** and **Parameters** as discovered on the CCU
//! - Define **Events** (the append-only log records)
//! - Define **Schedules** (time-triggered actions) and their runner states
//! - Define **Residents** (presence tracking)
//! - Decode the controller's native error representation into [`error::RemoteError`]
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod address;
pub mod device;
pub mod event;
pub mod presence;
pub mod schedule;
