//! Special forms and builtin functions installed into every global frame.

pub mod native_fns;
pub mod special_forms;

use crate::env::Scope;
use crate::error::Error;
use crate::value::{Function, NativeFn, Value};

/// Binds all special forms and builtins into the global frame of `scope`.
pub fn install(scope: &Scope) {
    let global = scope.global();
    special_forms::install(&global);
    native_fns::install(&global);
}

pub(crate) fn register(scope: &Scope, name: &str, signature: &str, f: NativeFn) {
    scope.bind(name, Value::function(Function::native(name, signature, f)));
}

pub(crate) fn register_special(scope: &Scope, name: &str, signature: &str, f: NativeFn) {
    scope.bind(name, Value::function(Function::special_form(name, signature, f)));
}

/// Fails unless at least `n` arguments were passed.
pub(crate) fn expect_args(name: &str, args: &[Value], n: usize) -> Result<(), Error> {
    if args.len() < n {
        Err(Error::runtime(format!("{} expects {} arguments, got {}", name, n, args.len())))
    } else {
        Ok(())
    }
}
