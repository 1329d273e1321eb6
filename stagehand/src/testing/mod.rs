//! Testing utilities for staging tasks.
//!
//! This module provides:
//! - Fake container runtime and archive transport
//! - Lifecycle hook recorders
//! - Ready-made configuration and attribute fixtures

mod fakes;
mod fixtures;

pub use fakes::{FakeContainerRuntime, FakeTransport, RecordingHooks};
pub use fixtures::{staging_attributes, staging_config};
