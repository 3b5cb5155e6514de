//! Test scenarios for integration testing
//!
//! Each module contains tests for specific functionality:
//! - relay: byte forwarding and connection teardown
//! - failover: failsafe connect, retirement and exhaustion
//! - topology: membership notifications reaching live traffic
//! - policy: selection order as seen by clients

pub mod policy;
pub mod topology;
