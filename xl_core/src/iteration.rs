//! IterationGuard - bounded search loops
//!
//! Every probing loop in this crate goes through a guard so a search that
//! never converges still terminates.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct IterationError {
    current: u32,
    max: u32,
    context: &'static str,
}

impl fmt::Display for IterationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Iteration limit exceeded: {}/{} in {}",
            self.current, self.max, self.context
        )
    }
}

impl std::error::Error for IterationError {}

#[derive(Debug, Clone)]
pub struct IterationGuard {
    current: u32,
    max: u32,
    context: &'static str,
}

impl IterationGuard {
    pub fn new(max: u32, context: &'static str) -> Self {
        Self {
            current: 0,
            max,
            context,
        }
    }

    pub fn increment(&mut self) -> Result<u32, IterationError> {
        self.current += 1;
        if self.current > self.max {
            Err(IterationError {
                current: self.current,
                max: self.max,
                context: self.context,
            })
        } else {
            Ok(self.current)
        }
    }
}
