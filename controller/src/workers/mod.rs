//! Background workers

pub mod actions;
pub mod dispatcher;
