//! Command-line interface orchestration for the granita training driver.

mod commands;

pub use commands::{
    Cli, CliError, Command, LabelingModeArg, LearningModeArg, PriorityModeArg, TrainCommand,
    TrainSummary, render_summary, run_cli,
};
