// src/exec/backend.rs

//! Scheduler backend abstraction.
//!
//! The dispatcher and poller talk to a `SchedulerBackend` instead of a
//! concrete scheduler. Production code uses
//! [`crate::exec::local::LocalScheduler`]; `--plan` uses [`PlanPrinter`];
//! tests record submitted operations.

use std::future::Future;
use std::io::Write;
use std::pin::Pin;

use crate::dispatch::ScheduleOp;
use crate::errors::Result;

pub type SubmitFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Where scheduler operations go.
pub trait SchedulerBackend: Send {
    /// Submit one operation. Operations are submitted in order and the
    /// backend must preserve that order within a job.
    fn submit(&mut self, op: ScheduleOp) -> SubmitFuture<'_>;
}

impl<B: SchedulerBackend + ?Sized> SchedulerBackend for &mut B {
    fn submit(&mut self, op: ScheduleOp) -> SubmitFuture<'_> {
        (**self).submit(op)
    }
}

/// Prints each operation to stdout instead of running it.
#[derive(Debug, Default)]
pub struct PlanPrinter {
    printed: usize,
}

impl PlanPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn printed(&self) -> usize {
        self.printed
    }
}

impl SchedulerBackend for PlanPrinter {
    fn submit(&mut self, op: ScheduleOp) -> SubmitFuture<'_> {
        Box::pin(async move {
            writeln!(std::io::stdout(), "{op}")?;
            self.printed += 1;
            Ok(())
        })
    }
}
