//! Snapshot tests pinning user-visible strings: error messages and the
//! serialized shape of sync reports and events.

mod error_messages;
