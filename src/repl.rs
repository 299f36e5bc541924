use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::devtools;
use crate::env::Scope;
use crate::error::EvalResult;
use crate::reader;
use crate::runtime::{self, EvalOptions};
use crate::value::Value;

const HISTORY_FILE: &str = ".kindle-history";

//===----------------------------------------------------------------------===//
// Line input
//===----------------------------------------------------------------------===//

/// Blocking source of operator input. `None` means end of input.
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> Option<String>;
}

/// Input shared between a driver and the debuggers it creates.
pub type Input = Rc<RefCell<dyn LineSource>>;

/// Terminal input with history, backed by rustyline.
pub struct EditorInput {
    editor: Option<DefaultEditor>,
}

impl EditorInput {
    pub fn new() -> Self {
        let editor = match DefaultEditor::new() {
            Ok(mut editor) => {
                if editor.load_history(HISTORY_FILE).is_err() {
                    log::debug!("no history loaded from {}", HISTORY_FILE);
                }
                Some(editor)
            }
            Err(err) => {
                log::warn!("line editor unavailable: {}", err);
                None
            }
        };
        Self { editor }
    }
}

impl Default for EditorInput {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSource for EditorInput {
    fn read_line(&mut self, prompt: &str) -> Option<String> {
        let editor = self.editor.as_mut()?;
        loop {
            match editor.readline(prompt) {
                Ok(line) => {
                    if let Err(err) = editor.add_history_entry(line.as_str()) {
                        log::warn!("error adding to history: {:?}", err);
                    }
                    if let Err(err) = editor.save_history(HISTORY_FILE) {
                        log::warn!("error saving history: {:?}", err);
                    }
                    return Some(line);
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => return None,
                Err(err) => {
                    log::error!("readline failed: {:?}", err);
                    return None;
                }
            }
        }
    }
}

/// Pre-recorded input, one line per entry.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    lines: VecDeque<String>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { lines: lines.into_iter().map(Into::into).collect() }
    }

    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

impl LineSource for ScriptedInput {
    fn read_line(&mut self, _prompt: &str) -> Option<String> {
        self.lines.pop_front()
    }
}

//===----------------------------------------------------------------------===//
// REPL
//===----------------------------------------------------------------------===//

pub struct Repl {
    pub print_ast: bool,
    pub tracing: bool,
    scope: Scope,
}

impl Repl {
    pub fn new(scope: Scope, print_ast: bool, tracing: bool) -> Self {
        Repl { print_ast, tracing, scope }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Reads, evaluates and returns the value of one input line.
    pub fn rep(&self, input: &str) -> EvalResult<Value> {
        if self.print_ast {
            let ast = reader::read(input)?;
            self.scope.write_out(&format!("{}\n", devtools::pretty_print_ast(&ast)))?;
        }
        let options = EvalOptions::new().tracing(self.tracing);
        runtime::eval(input, Some(&self.scope), &options)
    }

    pub fn run(&self, input: &mut dyn LineSource) -> EvalResult<()> {
        while let Some(line) = input.read_line("> ") {
            if line.trim().is_empty() {
                continue;
            }
            match self.rep(&line) {
                Ok(value) => self.scope.write_out(&format!("{}\n", value))?,
                Err(diag) => self.scope.write_out(&format!("{}\n", diag.format_error()))?,
            }
        }
        Ok(())
    }
}
