//! Behavioural tests for the protocol core.
