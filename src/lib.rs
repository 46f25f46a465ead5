//! iOS NextAlarm bridge library.
//!
//! Turns the iOS Clock alarm list, pushed by an Apple Shortcut into Home
//! Assistant, into a per-person next alarm sensor with diagnostics and a
//! refresh-problem indicator, published through MQTT discovery.

pub mod alarm;
pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod input;
pub mod instance_lock;
pub mod refresh;
pub mod sensors;
pub mod storage;
