//! Prompt evaluation: token estimation, cost accounting, text comparison,
//! rule validation and the orchestrator that runs them against stored prompts.

pub mod compare;
pub mod cost;
pub mod handlers;
pub mod orchestrator;
pub mod tokens;
pub mod validation;
