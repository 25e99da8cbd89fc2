/*!
# Sysmon DevKit - test support for the metrics agent

Library used by the agent's tests:
- Source fixtures standing in for the producer files
- Stub push collector recording delivered records
- Test harness with polling waits and record assertions
*/

pub mod collector_stub;
pub mod source_fixtures;
pub mod test_utils;

pub use collector_stub::{ReceivedRecord, StubCollector};
pub use source_fixtures::SourceFixtures;
pub use test_utils::{get_nested_field, wait_until, TestHarness};
