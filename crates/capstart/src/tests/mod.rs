//! Sandbox-level unit and behavioural tests.

mod sandbox_unit;
pub(crate) mod support;
