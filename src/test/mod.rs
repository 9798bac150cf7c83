//! Scripted transport and whole-operation tests.


mod connection;

pub(crate) use scenario::{capture, ScriptedTransport};
