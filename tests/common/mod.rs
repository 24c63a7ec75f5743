/// Common test utilities for integration tests
///
/// This module provides:
/// - A recording backend that answers from scripted responses
/// - A fixed host platform
/// - Config fixtures

pub mod fixtures;
pub mod recording_backend;
