use std::cell::RefCell;
use std::io::Write;
use std::rc::{Rc, Weak};

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::debugger::DebugHook;
use crate::error::Error;
use crate::expander::Macro;
use crate::value::{Callable, Pos, Value};

/// Output sink shared by every frame of one global scope.
pub type Sink = Rc<RefCell<dyn Write>>;

pub const GLOBAL_FRAME: &str = "<global>";
pub const DEFAULT_MODULE: &str = "<main>";

/// State owned by the global frame and visible from every frame below it.
struct Shared {
    tracing: bool,
    finished: bool,
    debugger: Option<Rc<dyn DebugHook>>,
    sink: Sink,
    macros: FxHashMap<Rc<str>, Rc<Macro>>,
    sources: FxHashMap<String, Rc<str>>,
    trace: Vec<String>,
    suppressed: usize,
}

pub struct Frame {
    bindings: FxHashMap<Rc<str>, Value>,
    /// Lexically enclosing frame, used for symbol resolution.
    parent: Option<FrameLink>,
    /// Call chain, used only for stack navigation and depth.
    caller: Weak<RefCell<Frame>>,
    callee: Weak<RefCell<Frame>>,
    shared: Rc<RefCell<Shared>>,
    current_token: Pos,
    module_name: String,
    name: Rc<str>,
    args: Vec<Value>,
}

/// Handle to one frame. Cloning the handle shares the frame.
#[derive(Clone)]
pub struct Scope(Rc<RefCell<Frame>>);

/// Non-owning frame handle.
#[derive(Clone, Debug, Default)]
pub struct WeakScope(Weak<RefCell<Frame>>);

impl WeakScope {
    pub fn upgrade(&self) -> Option<Scope> {
        self.0.upgrade().map(Scope)
    }

    /// True when this handle points at `scope`'s frame.
    pub fn refers_to(&self, scope: &Scope) -> bool {
        std::ptr::eq(self.0.as_ptr(), Rc::as_ptr(&scope.0))
    }
}

/// Lexical link held by call frames and closures.
///
/// The global frame is only ever linked weakly, so the handle returned by
/// [`Scope::new_global`] and its clones are its sole owners. Functions bound
/// in the global frame would otherwise keep it alive through their closure.
#[derive(Clone, Debug)]
pub enum FrameLink {
    Global(WeakScope),
    Local(Scope),
}

impl FrameLink {
    pub fn upgrade(&self) -> Option<Scope> {
        match self {
            FrameLink::Global(weak) => weak.upgrade(),
            FrameLink::Local(scope) => Some(scope.clone()),
        }
    }
}

/// Keeps the debugger hook silent while alive.
pub struct HookGuard {
    shared: Rc<RefCell<Shared>>,
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        let mut shared = self.shared.borrow_mut();
        shared.suppressed = shared.suppressed.saturating_sub(1);
    }
}

impl Scope {
    pub fn new_global(sink: Sink) -> Self {
        let shared = Shared {
            tracing: false,
            finished: false,
            debugger: None,
            sink,
            macros: FxHashMap::default(),
            sources: FxHashMap::default(),
            trace: Vec::new(),
            suppressed: 0,
        };
        Scope(Rc::new(RefCell::new(Frame {
            bindings: FxHashMap::default(),
            parent: None,
            caller: Weak::new(),
            callee: Weak::new(),
            shared: Rc::new(RefCell::new(shared)),
            current_token: None,
            module_name: DEFAULT_MODULE.to_string(),
            name: Rc::from(GLOBAL_FRAME),
            args: Vec::new(),
        })))
    }

    /// Pushes a call frame below `self` whose lexical parent is `parent`.
    pub fn new_call(&self, parent: &Scope, name: &str, args: Vec<Value>) -> Scope {
        let frame = {
            let caller = self.0.borrow();
            Frame {
                bindings: FxHashMap::default(),
                parent: Some(parent.link()),
                caller: Rc::downgrade(&self.0),
                callee: Weak::new(),
                shared: caller.shared.clone(),
                current_token: caller.current_token.clone(),
                module_name: caller.module_name.clone(),
                name: Rc::from(name),
                args,
            }
        };
        let scope = Scope(Rc::new(RefCell::new(frame)));
        self.0.borrow_mut().callee = Rc::downgrade(&scope.0);
        log::debug!("push frame {} depth={}", name, scope.call_stack_depth());
        scope
    }

    /// Unlinks a returning frame from the call chain.
    pub fn detach(&self) {
        if let Some(caller) = self.walk_up() {
            let mut caller = caller.0.borrow_mut();
            if caller.callee.ptr_eq(&Rc::downgrade(&self.0)) {
                caller.callee = Weak::new();
            }
        }
        let mut frame = self.0.borrow_mut();
        log::debug!("pop frame {}", frame.name);
        frame.caller = Weak::new();
    }

    pub fn downgrade(&self) -> WeakScope {
        WeakScope(Rc::downgrade(&self.0))
    }

    /// Link to this frame that does not own it when it is the global frame.
    pub fn link(&self) -> FrameLink {
        if self.is_global() {
            FrameLink::Global(self.downgrade())
        } else {
            FrameLink::Local(self.clone())
        }
    }

    fn parent(&self) -> Option<Scope> {
        self.0.borrow().parent.as_ref().and_then(FrameLink::upgrade)
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_global(&self) -> bool {
        self.0.borrow().parent.is_none()
    }

    //===------------------------------------------------------------------===//
    // Bindings
    //===------------------------------------------------------------------===//

    /// Looks `name` up along the lexical chain.
    pub fn resolve(&self, name: &str) -> Option<Value> {
        let mut scope = self.clone();
        loop {
            let parent = {
                let frame = scope.0.borrow();
                if let Some(value) = frame.bindings.get(name) {
                    return Some(value.clone());
                }
                frame.parent.as_ref().and_then(FrameLink::upgrade)
            };
            scope = parent?;
        }
    }

    /// Binds into this frame only.
    pub fn bind(&self, name: impl Into<Rc<str>>, value: Value) {
        self.0.borrow_mut().bindings.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().bindings.contains_key(name)
    }

    /// Overwrites the nearest existing binding of `name`.
    pub fn set(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut scope = self.clone();
        loop {
            let parent = {
                let mut frame = scope.0.borrow_mut();
                if let Some(slot) = frame.bindings.get_mut(name) {
                    *slot = value;
                    return Ok(());
                }
                frame.parent.as_ref().and_then(FrameLink::upgrade)
            };
            match parent {
                Some(parent) => scope = parent,
                None => return Err(Error::UnboundSymbol(name.to_string())),
            }
        }
    }

    pub fn global(&self) -> Scope {
        let mut scope = self.clone();
        loop {
            match scope.parent() {
                Some(parent) => scope = parent,
                None => return scope,
            }
        }
    }

    //===------------------------------------------------------------------===//
    // Call chain
    //===------------------------------------------------------------------===//

    /// Frames from this one up to and including the global frame.
    pub fn call_stack_depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self.walk_up();
        while let Some(scope) = current {
            depth += 1;
            current = scope.walk_up();
        }
        depth
    }

    /// The caller of this frame.
    pub fn walk_up(&self) -> Option<Scope> {
        self.0.borrow().caller.upgrade().map(Scope)
    }

    /// The frame this one is currently calling into.
    pub fn walk_down(&self) -> Option<Scope> {
        self.0.borrow().callee.upgrade().map(Scope)
    }

    //===------------------------------------------------------------------===//
    // Frame metadata
    //===------------------------------------------------------------------===//

    pub fn name(&self) -> Rc<str> {
        self.0.borrow().name.clone()
    }

    pub fn module_name(&self) -> String {
        self.0.borrow().module_name.clone()
    }

    pub fn set_module_name(&self, module: &str) {
        self.0.borrow_mut().module_name = module.to_string();
    }

    pub fn args(&self) -> Vec<Value> {
        self.0.borrow().args.clone()
    }

    pub fn current_token(&self) -> Pos {
        self.0.borrow().current_token.clone()
    }

    pub fn set_current_token(&self, token: Pos) {
        self.0.borrow_mut().current_token = token;
    }

    pub fn current_line(&self) -> Option<usize> {
        self.0.borrow().current_token.as_ref().map(|t| t.line)
    }

    //===------------------------------------------------------------------===//
    // Global state
    //===------------------------------------------------------------------===//

    fn shared(&self) -> Rc<RefCell<Shared>> {
        self.0.borrow().shared.clone()
    }

    pub fn tracing(&self) -> bool {
        self.shared().borrow().tracing
    }

    pub fn set_tracing(&self, on: bool) {
        self.shared().borrow_mut().tracing = on;
    }

    /// Records one traced step and echoes it to the sink.
    pub fn record_trace(&self, entry: String) -> Result<(), Error> {
        self.write_out(&format!("{}\n", entry))?;
        self.shared().borrow_mut().trace.push(entry);
        Ok(())
    }

    pub fn trace_log(&self) -> Vec<String> {
        self.shared().borrow().trace.clone()
    }

    pub fn finished(&self) -> bool {
        self.shared().borrow().finished
    }

    pub fn set_finished(&self, finished: bool) {
        self.shared().borrow_mut().finished = finished;
    }

    pub fn debugger(&self) -> Option<Rc<dyn DebugHook>> {
        self.shared().borrow().debugger.clone()
    }

    pub fn attach_debugger(&self, debugger: Option<Rc<dyn DebugHook>>) {
        self.shared().borrow_mut().debugger = debugger;
    }

    /// The attached debugger unless the hook is currently suppressed.
    pub fn active_debugger(&self) -> Option<Rc<dyn DebugHook>> {
        let shared = self.shared();
        let shared = shared.borrow();
        if shared.suppressed > 0 {
            None
        } else {
            shared.debugger.clone()
        }
    }

    pub fn suppress_hook(&self) -> HookGuard {
        let shared = self.shared();
        shared.borrow_mut().suppressed += 1;
        HookGuard { shared }
    }

    pub fn sink(&self) -> Sink {
        self.shared().borrow().sink.clone()
    }

    pub fn write_out(&self, text: &str) -> Result<(), Error> {
        let sink = self.sink();
        let mut out = sink.borrow_mut();
        out.write_all(text.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| Error::runtime(format!("output failed: {}", e)))
    }

    pub fn define_macro(&self, name: Rc<str>, mac: Macro) {
        log::debug!("register macro {}", name);
        self.shared().borrow_mut().macros.insert(name, Rc::new(mac));
    }

    pub fn lookup_macro(&self, name: &str) -> Option<Rc<Macro>> {
        self.shared().borrow().macros.get(name).cloned()
    }

    pub fn has_macros(&self) -> bool {
        !self.shared().borrow().macros.is_empty()
    }

    pub fn set_source(&self, module: &str, source: &str) {
        self.shared().borrow_mut().sources.insert(module.to_string(), Rc::from(source));
    }

    pub fn source(&self, module: &str) -> Option<Rc<str>> {
        self.shared().borrow().sources.get(module).cloned()
    }

    //===------------------------------------------------------------------===//
    // Dumps
    //===------------------------------------------------------------------===//

    /// Bindings of this frame, sorted by name. Builtins are left to `dump_functions`.
    pub fn dump_variables(&self) -> String {
        let frame = self.0.borrow();
        frame
            .bindings
            .iter()
            .filter(|(_, v)| !matches!(v, Value::Function(f) if !f.is_lambda()))
            .sorted_by(|a, b| a.0.cmp(b.0))
            .map(|(name, value)| format!("{} : {} = {}", name, value.type_of(), value))
            .join("\n")
    }

    /// Builtin functions and special forms of the global frame.
    pub fn dump_functions(&self) -> String {
        let global = self.global();
        let frame = global.0.borrow();
        frame
            .bindings
            .iter()
            .filter_map(|(name, value)| match value {
                Value::Function(f) if matches!(f.callable, Callable::Native(_)) => {
                    let kind = if f.special_form { "special form" } else { "function" };
                    let sig = f.signature.as_deref().unwrap_or("");
                    Some((name.clone(), format!("{:<20} {:<13} {}", name, kind, sig)))
                }
                _ => None,
            })
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, line)| line)
            .join("\n")
    }

    pub fn dump_macros(&self) -> String {
        let shared = self.shared();
        let shared = shared.borrow();
        shared
            .macros
            .iter()
            .sorted_by(|a, b| a.0.cmp(b.0))
            .map(|(name, mac)| {
                let kind = if mac.runtime { "eval" } else { "expand" };
                format!("{:<20} {:<7} ({} {})", name, kind, name, mac.params.iter().join(" "))
            })
            .join("\n")
    }

    /// Call chain from this frame up to the global frame; `selected` is marked with `-->`.
    pub fn dump_stack(&self, selected: Option<&Scope>) -> String {
        let mut lines = Vec::new();
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            let marker = match selected {
                Some(s) if s.ptr_eq(&scope) => "-->",
                _ => "   ",
            };
            let line = scope
                .current_line()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "?".to_string());
            lines.push(format!(
                "{} {:>3} name={} line={} module={}",
                marker,
                scope.call_stack_depth(),
                scope.name(),
                line,
                scope.module_name()
            ));
            current = scope.walk_up();
        }
        lines.join("\n")
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let frame = self.0.borrow();
        f.debug_struct("Scope")
            .field("name", &frame.name)
            .field("module", &frame.module_name)
            .field("bindings", &frame.bindings.len())
            .finish()
    }
}
