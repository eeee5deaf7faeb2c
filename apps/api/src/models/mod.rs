pub mod eval;
pub mod prompt;
