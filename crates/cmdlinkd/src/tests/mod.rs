//! Test suites for the daemon.

mod support;
