use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;

use kindle::debugger::debug_program;
use kindle::devtools;
use kindle::env::Scope;
use kindle::error::Diagnostic;
use kindle::formatter::Formatter;
use kindle::reader;
use kindle::repl::{EditorInput, Input, Repl};
use kindle::runtime::{self, EvalOptions};

/// Kindle runs Lisp scripts, either directly or under an interactive
/// source-level debugger.
#[derive(Parser, Debug)]
#[command(name = "kindle", version, about, long_about = None)]
struct Args {
    /// Script to run. Without a script (and without --eval) a REPL starts.
    file: Option<PathBuf>,

    /// Evaluate this code instead of a file.
    #[arg(short, long, value_name = "CODE")]
    eval: Option<String>,

    /// Write a `--> form` line for every evaluated form.
    #[arg(short, long)]
    trace: bool,

    /// Run the script under the interactive debugger.
    #[arg(short, long)]
    debug: bool,

    /// Start a REPL after the script has run, keeping its bindings.
    #[arg(short, long)]
    interactive: bool,

    /// Also print the internal form of errors.
    #[arg(short, long)]
    lengthy: bool,

    /// Pretty-print the AST before evaluating.
    #[arg(long)]
    print_ast: bool,

    /// Print the script reformatted instead of running it.
    #[arg(long)]
    format: bool,
}

fn report(diag: &Diagnostic, lengthy: bool) {
    eprintln!("{}", diag.format_error());
    if lengthy {
        eprintln!("{:?}", diag);
    }
}

fn load(args: &Args) -> Result<Option<(String, String)>, String> {
    if let Some(code) = &args.eval {
        return Ok(Some((code.clone(), "<eval>".to_string())));
    }
    match &args.file {
        Some(path) => fs::read_to_string(path)
            .map(|source| Some((source, path.display().to_string())))
            .map_err(|err| format!("failed to read '{}': {}", path.display(), err)),
        None => Ok(None),
    }
}

fn run_repl(scope: Scope, args: &Args) -> ExitCode {
    let repl = Repl::new(scope, args.print_ast, args.trace);
    let mut input = EditorInput::new();
    match repl.run(&mut input) {
        Ok(()) => ExitCode::SUCCESS,
        Err(diag) => {
            report(&diag, args.lengthy);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let (source, module) = match load(&args) {
        Ok(Some(loaded)) => loaded,
        Ok(None) => return run_repl(runtime::create_default_scope(runtime::stdout_sink()), &args),
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return ExitCode::FAILURE;
        }
    };

    if args.format {
        return match Formatter::new().format_source(&source) {
            Ok(formatted) => {
                print!("{}", formatted);
                ExitCode::SUCCESS
            }
            Err(err) => {
                report(&Diagnostic::from(err), args.lengthy);
                ExitCode::FAILURE
            }
        };
    }

    if args.print_ast {
        match reader::read(&source) {
            Ok(ast) => println!("{}", devtools::pretty_print_ast(&ast)),
            Err(err) => {
                report(&Diagnostic::from(err), args.lengthy);
                return ExitCode::FAILURE;
            }
        }
    }

    if args.debug {
        let input: Input = Rc::new(RefCell::new(EditorInput::new()));
        return match debug_program(&source, &module, Vec::new(), input, runtime::stdout_sink(), args.trace)
        {
            Ok(_) => ExitCode::SUCCESS,
            Err(diag) => {
                report(&diag, args.lengthy);
                ExitCode::FAILURE
            }
        };
    }

    let scope = runtime::create_default_scope(runtime::stdout_sink());
    let options = EvalOptions::new().module(&module).tracing(args.trace);
    let status = match runtime::eval(&source, Some(&scope), &options) {
        Ok(value) => {
            if args.eval.is_some() && !value.is_undefined() {
                println!("{}", value);
            }
            ExitCode::SUCCESS
        }
        Err(diag) => {
            report(&diag, args.lengthy);
            ExitCode::FAILURE
        }
    };

    if args.interactive {
        return run_repl(scope, &args);
    }
    status
}
