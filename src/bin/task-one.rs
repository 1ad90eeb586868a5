use std::process::ExitCode;

use stage_chain::tasks::{Task, run_standalone};

fn main() -> ExitCode {
    run_standalone(Task::Array)
}
