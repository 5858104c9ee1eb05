//! # ccuhub-app
//!
//! Application layer: use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `RemoteClient`: discovery, reads, writes and the event subscription
//!   - `EventLog`: durable append & ordered replay of events
//!   - `ScheduleRepository`: persistence for schedules
//!   - `Listener`: locally registered event handlers
//! - Provide the stateful use-cases:
//!   - `EventManager`: single subscription, de-duplication, logging, fan-out
//!   - `ScheduleRunner`: schedule state machine driven by `tick`
//!   - `PresenceTracker`: resident arrive/leave derivation
//!   - `DeviceRegistry`: discovered devices and capability-checked IO
//! - Orchestrate domain objects without knowing *how* persistence or IO works
//!
//! ## Dependency rule
//! Depends on `ccuhub-domain` only (plus `tokio` for channels, locks and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod action_executor;
pub mod device_registry;
pub mod event_manager;
pub mod ports;
pub mod presence;
pub mod retry;
pub mod schedule_runner;

mod sync;

#[cfg(test)]
mod testing;
