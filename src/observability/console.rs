use std::fmt::Debug;
use std::io::{self, Write};
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use super::{StageEvent, StageObserver};
use crate::error::ChainError;
use crate::pipeline::StageInfo;

/// Prints human-readable progress lines for every stage.
pub struct ConsoleObserver<W: Write + Send = io::Stdout> {
    out: Mutex<W>,
}

impl ConsoleObserver<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleObserver<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn write_with<F>(&self, write: F) -> Result<()>
    where
        F: FnOnce(&mut W) -> io::Result<()>,
    {
        let mut guard = self
            .out
            .lock()
            .map_err(|_| anyhow!("console writer lock poisoned"))?;
        write(&mut *guard)?;
        guard.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> StageObserver for ConsoleObserver<W> {
    fn stage_started(&self, event: &StageEvent<'_>) -> Result<()> {
        self.write_with(|out| {
            if event.stage.index > 0 {
                writeln!(out)?;
            }
            writeln!(
                out,
                "--- STAGE {}: {} ---",
                event.stage.index + 1,
                event.stage.name
            )
        })
    }

    fn stage_completed(&self, event: &StageEvent<'_>, output: &dyn Debug) -> Result<()> {
        self.write_with(|out| {
            if event.stage.produces_value() {
                writeln!(out, "   value: {output:?}")?;
            }
            writeln!(
                out,
                "   [thread: {}] '{}' took {} ms",
                event.worker,
                event.stage.name,
                event.elapsed.as_millis()
            )
        })
    }

    fn stage_failed(&self, _run_id: u64, stage: &StageInfo, error: &ChainError) -> Result<()> {
        self.write_with(|out| writeln!(out, "   '{}' failed: {}", stage.name, error.describe()))
    }
}
