//! Deployment generation and lifecycle

pub mod audit;
pub mod fsm;
pub mod generator;
pub mod git;
pub mod lifecycle;
pub mod netpol;
pub mod ports;
pub mod render;
pub mod sealer;
pub mod template;
