//! Test doubles shared by the unit tests of this crate.

use async_trait::async_trait;
use std::{sync::Mutex, time::Duration};

use crate::process::{CommandOutput, CommandRunner, Invocation, InvocationError};

type Handler = dyn Fn(&Invocation) -> Result<CommandOutput, InvocationError> + Send + Sync;

/// [`CommandRunner`] that records every invocation and answers from a closure.
pub struct ScriptedRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Invocation) -> Result<CommandOutput, InvocationError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn ok() -> Result<CommandOutput, InvocationError> {
        Self::exit(0, "")
    }

    pub fn exit(code: i32, stderr: &str) -> Result<CommandOutput, InvocationError> {
        Ok(CommandOutput {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
            duration: Duration::ZERO,
        })
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Program names of every recorded call.
    pub fn programs(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|call| call.program().to_string())
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, InvocationError> {
        self.calls.lock().unwrap().push(invocation.clone());
        (self.handler)(invocation)
    }
}
