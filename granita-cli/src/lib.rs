//! Library surface of the granita CLI: argument parsing, command
//! execution, and logging bootstrap, kept separate from the binary so the
//! pieces stay testable.

pub mod cli;
pub mod logging;
