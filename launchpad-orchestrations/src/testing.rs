//! Scripted command runner for exercising CLI-backed stages without the CLIs

use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

struct Rule {
    pattern: String,
    responses: VecDeque<CommandOutput>,
}

/// Answers commands whose command line contains a registered pattern.
///
/// The first matching rule wins. A rule with several responses hands them
/// out in order and keeps repeating the last one. Unmatched commands
/// succeed with empty output. Every call is recorded.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: impl Into<String>, response: CommandOutput) -> Self {
        self.on_sequence(pattern, vec![response])
    }

    pub fn on_sequence(self, pattern: impl Into<String>, responses: Vec<CommandOutput>) -> Self {
        self.rules
            .lock()
            .expect("rules lock poisoned")
            .push(Rule {
                pattern: pattern.into(),
                responses: responses.into(),
            });
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::command_line).collect()
    }

    /// Number of recorded calls whose command line contains `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.command_lines().iter().filter(|c| c.contains(pattern)).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        self.calls.lock().expect("calls lock poisoned").push(spec.clone());
        let line = spec.command_line();

        let mut rules = self.rules.lock().expect("rules lock poisoned");
        for rule in rules.iter_mut() {
            if line.contains(&rule.pattern) {
                let response = if rule.responses.len() > 1 {
                    rule.responses.pop_front()
                } else {
                    rule.responses.front().cloned()
                };
                return Ok(response.unwrap_or_default());
            }
        }
        Ok(CommandOutput::success(""))
    }
}
