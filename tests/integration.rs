// main integration test file
// run with: cargo test --test integration

#[path = "integration_tests/common.rs"]
mod common;

#[path = "integration_tests/test_selector.rs"]
mod test_selector;

#[path = "integration_tests/test_engine.rs"]
mod test_engine;

#[path = "integration_tests/test_cache.rs"]
mod test_cache;

#[path = "integration_tests/test_rules.rs"]
mod test_rules;

#[path = "integration_tests/test_scheduler.rs"]
mod test_scheduler;

#[path = "integration_tests/test_cli.rs"]
mod test_cli;
