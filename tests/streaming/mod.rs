//! Service-level tests
//!
//! Each test registers in-memory transports, emits events and checks what
//! reached each client.

pub mod delivery_tests;
pub mod filter_tests;
pub mod reconnect_tests;
