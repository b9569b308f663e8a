//! Integration test suite entry point.

mod http_remote_tests;
mod queue_flow_tests;
