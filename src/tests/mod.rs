// Test modules for batch-llm crate
//
// Test organization follows the template pattern where each source file
// has a corresponding test file that focuses on business logic verification.

// Test helper utilities (scripted endpoint, config and payload builders)
pub mod helpers;

// Core unit tests
pub mod cache;
pub mod compose;
pub mod error;

// NOTE: HTTP wire tests live in the integration suite
// (tests/endpoint_integration_tests.rs); they need a mock server and
// don't belong in unit tests.
