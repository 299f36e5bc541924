use std::cell::RefCell;
use std::rc::Rc;

use colored::Colorize;

use crate::env::{Scope, Sink, WeakScope};
use crate::error::{Diagnostic, Error, EvalResult, StopReason};
use crate::repl::Input;
use crate::runtime::{self, EvalOptions};
use crate::value::Value;

pub const PROMPT: &str = "kindle-dbg> ";

/// The narrow protocol between the evaluator and an attached debugger.
pub trait DebugHook {
    /// Asked before every list node is evaluated.
    fn needs_break(&self, scope: &Scope, line: Option<usize>) -> bool;

    /// Runs the interactive loop after `needs_break` answered true.
    /// Returns once the operator resumes; fails with `DebuggerStop` on quit or restart.
    fn suspend(&self, scope: &Scope, form: &Value) -> EvalResult<()>;

    /// Called once for an uncaught evaluation error, at the failing frame.
    fn on_error(&self, scope: &Scope, form: &Value, diag: &Diagnostic) -> EvalResult<()>;
}

//===----------------------------------------------------------------------===//
// Breakpoints and stepping
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub line: usize,
    /// Lisp source; empty means unconditional.
    pub condition: String,
}

impl Breakpoint {
    pub fn new(line: usize, condition: impl Into<String>) -> Self {
        Self { line, condition: condition.into() }
    }
}

/// Decides whether the next node suspends, given its call depth `d` and the
/// depth `d0` recorded when the stepping command was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPredicate {
    /// step: the very next node.
    Always,
    /// over: `d <= d0`.
    AtOrAbove(usize),
    /// out: `d < d0`.
    Above(usize),
    /// run: only breakpoints stop.
    Never,
}

impl StepPredicate {
    pub fn matches(self, depth: usize) -> bool {
        match self {
            StepPredicate::Always => true,
            StepPredicate::AtOrAbove(d0) => depth <= d0,
            StepPredicate::Above(d0) => depth < d0,
            StepPredicate::Never => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// No stop requested; only breakpoints can suspend.
    Running,
    /// A one-shot stop request guarded by a predicate.
    Stepping(StepPredicate),
    /// The interactive loop is active.
    Suspended,
}

#[derive(Debug)]
struct State {
    exec: ExecState,
    breakpoints: Vec<Breakpoint>,
    /// Line and frame of the last suspension. The breakpoint on that line
    /// stays quiet in that frame until another line runs; other frames reaching
    /// the same line still stop.
    latched: Option<(usize, WeakScope)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LoopMode {
    Suspended,
    Failed,
    TopLevel,
}

pub struct Debugger {
    state: RefCell<State>,
    input: Input,
}

impl Debugger {
    /// A fresh debugger stops before the first evaluated node.
    pub fn new(input: Input, breakpoints: Vec<Breakpoint>) -> Self {
        Self {
            state: RefCell::new(State {
                exec: ExecState::Stepping(StepPredicate::Always),
                breakpoints,
                latched: None,
            }),
            input,
        }
    }

    pub fn attach(self: &Rc<Self>, scope: &Scope) {
        let hook: Rc<dyn DebugHook> = self.clone();
        scope.attach_debugger(Some(hook));
    }

    pub fn exec_state(&self) -> ExecState {
        self.state.borrow().exec
    }

    /// Installs a new stop request, or clears it for `Never`.
    pub fn resume(&self, predicate: StepPredicate) {
        log::debug!("resume with {:?}", predicate);
        self.state.borrow_mut().exec = match predicate {
            StepPredicate::Never => ExecState::Running,
            other => ExecState::Stepping(other),
        };
    }

    /// Adds a breakpoint, replacing any existing one on the same line.
    pub fn add_breakpoint(&self, line: usize, condition: &str) {
        log::debug!("breakpoint at line {} condition={:?}", line, condition);
        let breakpoint = Breakpoint::new(line, condition);
        let mut state = self.state.borrow_mut();
        match state.breakpoints.iter_mut().find(|b| b.line == line) {
            Some(existing) => *existing = breakpoint,
            None => state.breakpoints.push(breakpoint),
        }
    }

    pub fn remove_breakpoint(&self, line: usize) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.breakpoints.len();
        state.breakpoints.retain(|b| b.line != line);
        before != state.breakpoints.len()
    }

    pub fn clear_breakpoints(&self) {
        log::debug!("clear all breakpoints");
        self.state.borrow_mut().breakpoints.clear();
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.state.borrow().breakpoints.clone()
    }

    pub fn has_breakpoint_at(&self, line: usize) -> bool {
        self.state.borrow().breakpoints.iter().any(|b| b.line == line)
    }

    fn breakpoint_hit(&self, line: usize, scope: &Scope) -> bool {
        let breakpoint = match self.state.borrow().breakpoints.iter().find(|b| b.line == line) {
            Some(b) => b.clone(),
            None => return false,
        };
        if breakpoint.condition.trim().is_empty() {
            return true;
        }

        match evaluate_quietly(&breakpoint.condition, scope) {
            Ok(value) => value.is_true(),
            Err(diag) => {
                log::warn!("bad condition for line {}: {}: {}", line, breakpoint.condition, diag);
                let warning =
                    format!("Error: bad condition for line {}: {}\n", line, breakpoint.condition);
                if let Err(err) = scope.write_out(&warning) {
                    log::error!("{}", err);
                }
                false
            }
        }
    }

    //===------------------------------------------------------------------===//
    // Interactive loop
    //===------------------------------------------------------------------===//

    /// The loop entered when no program is running, e.g. after the program
    /// ended or failed. Returns true when the operator asked for a restart.
    pub fn interactive_loop(&self, scope: &Scope, tracing: bool) -> EvalResult<bool> {
        if tracing {
            scope.set_tracing(true);
        }
        self.command_loop(scope, LoopMode::TopLevel)
    }

    fn stop(&self, mode: LoopMode, reason: StopReason) -> EvalResult<bool> {
        match mode {
            LoopMode::TopLevel => Ok(reason == StopReason::Restart),
            _ => Err(Error::DebuggerStop(reason).into()),
        }
    }

    fn command_loop(&self, top: &Scope, mode: LoopMode) -> EvalResult<bool> {
        let global = top.global();
        let mut current = top.clone();

        loop {
            let line = self.input.borrow_mut().read_line(PROMPT);
            let line = match line {
                Some(line) => line,
                None => return self.stop(mode, StopReason::Quit),
            };
            let line = line.trim();
            let (cmd, rest) = match line.split_once(char::is_whitespace) {
                Some((cmd, rest)) => (cmd, rest.trim()),
                None => (line, ""),
            };

            let output = match cmd {
                "" => continue,
                "exit" | "quit" | "q" => return self.stop(mode, StopReason::Quit),
                "restart" => return self.stop(mode, StopReason::Restart),
                "help" | "h" => help_text(),
                "version" | "ver" => version_text(),
                "about" => about_text(),
                "funcs" => global.dump_functions(),
                "macros" => global.dump_macros(),
                "code" | "c" => self.source_listing(&current),
                "stack" | "k" => top.dump_stack(Some(&current)),
                "up" | "u" => {
                    if let Some(caller) = current.walk_up() {
                        current = caller;
                    }
                    continue;
                }
                "down" | "d" => {
                    if let Some(callee) = current.walk_down() {
                        current = callee;
                    }
                    continue;
                }
                "step" | "s" | "over" | "v" | "out" | "o" | "run" | "r" => match mode {
                    LoopMode::TopLevel if global.finished() => {
                        "program has finished, use restart or quit".to_string()
                    }
                    LoopMode::TopLevel => "no program is running".to_string(),
                    LoopMode::Failed => {
                        "cannot resume after an error, use restart or quit".to_string()
                    }
                    LoopMode::Suspended if global.finished() => {
                        top.write_out("program has finished\n")?;
                        return Ok(false);
                    }
                    LoopMode::Suspended => {
                        let d0 = current.call_stack_depth();
                        self.resume(match cmd {
                            "step" | "s" => StepPredicate::Always,
                            "over" | "v" => StepPredicate::AtOrAbove(d0),
                            "out" | "o" => StepPredicate::Above(d0),
                            _ => StepPredicate::Never,
                        });
                        return Ok(false);
                    }
                },
                "break" | "b" => self.break_command(rest),
                "clear" => self.clear_command(rest, top)?,
                "list" | "t" => self
                    .breakpoints()
                    .iter()
                    .map(|b| format!("line {:<5} condition: {}", b.line, b.condition))
                    .collect::<Vec<_>>()
                    .join("\n"),
                "locals" | "l" => current.dump_variables(),
                "globals" | "g" => global.dump_variables(),
                _ => match evaluate_quietly(line, &current) {
                    Ok(value) => format!("result={}", value),
                    Err(diag) => format!("{} {}", "Error:".red(), diag),
                },
            };

            if !output.is_empty() {
                top.write_out(&format!("{}\n", output))?;
            }
        }
    }

    fn break_command(&self, rest: &str) -> String {
        let (line, condition) = match rest.split_once(char::is_whitespace) {
            Some((line, condition)) => (line, condition.trim()),
            None => (rest, ""),
        };
        match line.parse::<usize>() {
            Ok(line) => {
                self.add_breakpoint(line, condition);
                String::new()
            }
            Err(_) => "Warning: no breakpoint set or modified".to_string(),
        }
    }

    fn clear_command(&self, rest: &str, top: &Scope) -> EvalResult<String> {
        if !rest.is_empty() {
            let removed = rest.parse::<usize>().map(|line| self.remove_breakpoint(line));
            return Ok(match removed {
                Ok(true) => String::new(),
                _ => "Warning: no breakpoint cleared".to_string(),
            });
        }

        top.write_out("Really delete all breakpoints? (y/n)\n")?;
        loop {
            let answer = self.input.borrow_mut().read_line("(y/n) ");
            match answer.map(|a| a.trim().to_uppercase()).as_deref() {
                Some("Y") | Some("YES") => {
                    self.clear_breakpoints();
                    return Ok(String::new());
                }
                Some("N") | Some("NO") | None => return Ok(String::new()),
                Some(_) => continue,
            }
        }
    }

    fn source_listing(&self, scope: &Scope) -> String {
        let source = match scope.source(&scope.module_name()) {
            Some(source) => source,
            None => return "no source available".to_string(),
        };
        let current_line = scope.current_line();

        source
            .split('\n')
            .enumerate()
            .map(|(i, text)| {
                let line = i + 1;
                let mark = if self.has_breakpoint_at(line) {
                    format!("{:<2}", "B").red().to_string()
                } else {
                    "  ".to_string()
                };
                let here = if current_line == Some(line) { "-->" } else { "   " };
                format!("{:>3} {} {} {}", line, mark, here, text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DebugHook for Debugger {
    fn needs_break(&self, scope: &Scope, line: Option<usize>) -> bool {
        let depth = scope.call_stack_depth();
        let (stepping, latched) = {
            let mut state = self.state.borrow_mut();
            if state.latched.as_ref().map(|(l, _)| *l) != line {
                state.latched = None;
            }
            let stepping = matches!(state.exec, ExecState::Stepping(p) if p.matches(depth));
            let latched = state.latched.as_ref().map_or(false, |(_, frame)| frame.refers_to(scope));
            (stepping, latched)
        };

        let hit = stepping
            || (!latched && line.map_or(false, |line| self.breakpoint_hit(line, scope)));
        if hit {
            let mut state = self.state.borrow_mut();
            state.exec = ExecState::Suspended;
            state.latched = line.map(|line| (line, scope.downgrade()));
        }
        hit
    }

    fn suspend(&self, scope: &Scope, form: &Value) -> EvalResult<()> {
        scope.write_out(&format!("{}\n", banner(scope, form)))?;
        self.command_loop(scope, LoopMode::Suspended).map(|_| ())
    }

    fn on_error(&self, scope: &Scope, form: &Value, diag: &Diagnostic) -> EvalResult<()> {
        self.state.borrow_mut().exec = ExecState::Suspended;
        scope.write_out(&format!("{} {}\n{}\n", "Error:".red().bold(), diag, banner(scope, form)))?;
        self.command_loop(scope, LoopMode::Failed).map(|_| ())
    }
}

fn banner(scope: &Scope, form: &Value) -> String {
    let head = match form {
        Value::List { items, .. } => items[0].to_string(),
        other => other.to_string(),
    };
    let line = form.line().map(|l| l.to_string()).unwrap_or_else(|| "?".to_string());
    format!(
        "--> {} line={} depth={} module={}",
        head,
        line,
        scope.call_stack_depth(),
        scope.module_name()
    )
}

/// Evaluates operator-supplied source without re-entering the debugger and
/// without disturbing the frame position or the finished flag.
fn evaluate_quietly(code: &str, scope: &Scope) -> EvalResult {
    let saved = scope.current_token();
    let result = {
        let _guard = scope.suppress_hook();
        runtime::eval(code, Some(scope), &EvalOptions::new().update_finished(false))
    };
    scope.set_current_token(saved);
    result
}

fn help_text() -> String {
    [
        "",
        "help for interactive loop:",
        "",
        "  (h)elp            : show this help",
        "  version           : show the version of this interpreter",
        "  about             : show information about this interpreter",
        "  funcs             : show all builtin functions and special forms",
        "  macros            : show all macros",
        "  (c)ode            : show the program code",
        "  stac(k)           : show the current call stack",
        "  (u)p              : go one frame up in the call stack",
        "  (d)own            : go one frame down in the call stack",
        "  (r)un             : execute the program",
        "  (s)tep            : step into function",
        "  o(v)er            : step over function",
        "  (o)ut             : step out of function",
        "  (b)reak no [cond] : set a breakpoint in line no with condition cond",
        "  clear [no]        : clear the breakpoint in line no or clear all",
        "  lis(t)            : show all breakpoints",
        "  restart           : restart the program",
        "  (l)ocals          : show the variables of the selected frame",
        "  (g)lobals         : show all global variables",
        "  exit              : exit the interactive loop",
        "",
    ]
    .join("\n")
}

fn version_text() -> String {
    format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn about_text() -> String {
    format!("{}\n{}", version_text(), env!("CARGO_PKG_DESCRIPTION"))
}

//===----------------------------------------------------------------------===//
// Driver
//===----------------------------------------------------------------------===//

/// Runs `source` under a fresh debugger, restarting on request with the
/// breakpoints collected so far. Returns the value of the last completed run.
pub fn debug_program(
    source: &str,
    module: &str,
    breakpoints: Vec<Breakpoint>,
    input: Input,
    sink: Sink,
    tracing: bool,
) -> EvalResult<Option<Value>> {
    let mut breakpoints = breakpoints;
    let mut result = None;

    loop {
        let scope = runtime::create_default_scope(sink.clone());
        let debugger = Rc::new(Debugger::new(input.clone(), breakpoints));
        debugger.attach(&scope);
        log::info!("debugging {}", module);

        let options = EvalOptions::new().module(module).tracing(tracing);
        let restart = match runtime::eval(source, Some(&scope), &options) {
            Ok(value) => {
                scope.write_out(&format!("program finished, result={}\n", value))?;
                result = Some(value);
                debugger.interactive_loop(&scope, false)?
            }
            Err(diag) => match &diag.error {
                Error::DebuggerStop(reason) => *reason == StopReason::Restart,
                _ => {
                    scope.write_out(&format!("{}\n", diag.format_error()))?;
                    debugger.interactive_loop(&scope, false)?
                }
            },
        };

        breakpoints = debugger.breakpoints();
        scope.attach_debugger(None);

        if !restart {
            log::info!("debugger session ended");
            return Ok(result);
        }
        log::info!("restart program");
        scope.write_out("restart program\n")?;
    }
}
