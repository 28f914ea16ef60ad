use crate::ast::{
    AssignOp, BinaryOp, Expr, ExprKind, FunctionDecl, Program, StepOp, Stmt, StmtKind, UnaryOp,
};
use crate::environment::{EnvError, Environment, check_type};
use crate::source::Span;
use crate::stack::ensure_sufficient_stack;
use crate::types::{Closure, Function, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use thiserror::Error;
use tracing::{instrument, trace};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error("Type error: {message}")]
    TypeError { message: String, span: Span },
    #[error("Function '{name}' expects {expected} argument(s) but got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("Cannot call a value of type {found}")]
    NotCallable { found: &'static str, span: Span },
    #[error("'{signal}' used outside of {context}")]
    ControlEscape {
        signal: &'static str,
        context: &'static str,
        span: Span,
    },
    #[error("Maximum call depth exceeded (limit: {limit})")]
    RecursionLimit { limit: usize, span: Span },
}

impl EvalError {
    pub fn span(&self) -> Span {
        match self {
            EvalError::Env(env_err) => env_err.span(),
            EvalError::TypeError { span, .. }
            | EvalError::Arity { span, .. }
            | EvalError::NotCallable { span, .. }
            | EvalError::ControlEscape { span, .. }
            | EvalError::RecursionLimit { span, .. } => *span,
        }
    }
}

fn type_error(message: String, span: Span) -> EvalError {
    EvalError::TypeError { message, span }
}

// Result type alias for convenience
pub type EvalResult<T = Value> = Result<T, EvalError>;

/// How a statement finished. Break, continue and return unwind through
/// enclosing statements until a loop or call consumes them.
#[derive(Debug)]
pub enum Flow {
    Normal(Value),
    Break(Span),
    Continue(Span),
    Return(Value, Span),
}

impl Flow {
    fn escape_error(self) -> Option<EvalError> {
        let (signal, context, span) = match self {
            Flow::Normal(_) => return None,
            Flow::Break(span) => ("break", "a loop", span),
            Flow::Continue(span) => ("continue", "a loop", span),
            Flow::Return(_, span) => ("return", "a function", span),
        };
        Some(EvalError::ControlEscape {
            signal,
            context,
            span,
        })
    }
}

/// Nested user-function calls allowed before a call fails.
pub const MAX_CALL_DEPTH: usize = 1000;

pub struct Interpreter<'o> {
    globals: Rc<RefCell<Environment>>,
    // Current scope; swapped for blocks, loops and calls.
    env: Rc<RefCell<Environment>>,
    out: Box<dyn FnMut(&str) + 'o>,
    call_depth: usize,
}

impl<'o> Interpreter<'o> {
    /// Creates an interpreter with a fresh root scope; `out` receives each printed line.
    pub fn new(out: impl FnMut(&str) + 'o) -> Self {
        let globals = Environment::new_global_populated();
        Interpreter {
            env: globals.clone(),
            globals,
            out: Box::new(out),
            call_depth: 0,
        }
    }

    pub fn globals(&self) -> Rc<RefCell<Environment>> {
        self.globals.clone()
    }

    /// Sends one line to the output sink.
    pub fn emit(&mut self, line: &str) {
        (self.out)(line)
    }

    /// Runs every top-level statement in order and returns the value of the
    /// last expression statement (null if there was none).
    #[instrument(level = "debug", skip_all, fields(statements = program.body.len()))]
    pub fn run(&mut self, program: &Program) -> EvalResult<Value> {
        let mut last = Value::Null;
        for stmt in &program.body {
            match self.execute(stmt)? {
                Flow::Normal(value) => {
                    if matches!(stmt.kind, StmtKind::Expr(_)) {
                        last = value;
                    }
                }
                escaped => {
                    if let Some(err) = escaped.escape_error() {
                        return Err(err);
                    }
                }
            }
        }
        Ok(last)
    }

    // Runs `f` with `scope` as the current scope, restoring the previous one on every path.
    fn with_scope<T>(
        &mut self,
        scope: Rc<RefCell<Environment>>,
        f: impl FnOnce(&mut Self) -> EvalResult<T>,
    ) -> EvalResult<T> {
        let previous = std::mem::replace(&mut self.env, scope);
        let result = f(self);
        self.env = previous;
        result
    }

    fn execute_all(&mut self, body: &[Stmt]) -> EvalResult<Flow> {
        for stmt in body {
            match self.execute(stmt)? {
                Flow::Normal(_) => {}
                signal => return Ok(signal),
            }
        }
        Ok(Flow::Normal(Value::Null))
    }

    fn execute(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        ensure_sufficient_stack(|| self.execute_stmt(stmt))
    }

    fn execute_stmt(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Block(body) => {
                let scope = Environment::new_enclosed(self.env.clone());
                self.with_scope(scope, |interp| interp.execute_all(body))
            }
            StmtKind::VarDecl {
                name,
                declared_type,
                initializer,
                ..
            } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Null,
                };
                // A mutable binding may start out null whatever its declared type
                if !matches!(value, Value::Null) {
                    check_type(name, *declared_type, &value, span)?;
                }
                self.env
                    .borrow_mut()
                    .declare(name, value, false, *declared_type, span)?;
                Ok(Flow::Normal(Value::Null))
            }
            StmtKind::ConstDecl {
                name,
                declared_type,
                initializer,
            } => {
                let value = self.evaluate(initializer)?;
                check_type(name, *declared_type, &value, span)?;
                self.env
                    .borrow_mut()
                    .declare(name, value, true, *declared_type, span)?;
                Ok(Flow::Normal(Value::Null))
            }
            StmtKind::Expr(expr) => Ok(Flow::Normal(self.evaluate(expr)?)),
            StmtKind::Print(expr) => {
                let value = self.evaluate(expr)?;
                let print = self.globals.borrow().lookup("print", span)?;
                self.call_value(print, vec![value], span)?;
                Ok(Flow::Normal(Value::Null))
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(Flow::Normal(Value::Null))
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute(body)? {
                        Flow::Break(_) => break,
                        Flow::Normal(_) | Flow::Continue(_) => {}
                        ret @ Flow::Return(..) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal(Value::Null))
            }
            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => {
                let scope = Environment::new_enclosed(self.env.clone());
                self.with_scope(scope, |interp| {
                    if let Some(init) = init {
                        interp.execute(init)?;
                    }
                    loop {
                        if let Some(condition) = condition {
                            if !interp.evaluate(condition)?.is_truthy() {
                                break;
                            }
                        }
                        match interp.execute(body)? {
                            Flow::Break(_) => break,
                            Flow::Normal(_) | Flow::Continue(_) => {}
                            ret @ Flow::Return(..) => return Ok(ret),
                        }
                        if let Some(update) = update {
                            interp.evaluate(update)?;
                        }
                    }
                    Ok(Flow::Normal(Value::Null))
                })
            }
            StmtKind::Break => Ok(Flow::Break(span)),
            StmtKind::Continue => Ok(Flow::Continue(span)),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value, span))
            }
            StmtKind::FunctionDecl(decl) => {
                let function = self.make_closure(decl);
                if let Some(name) = &decl.name {
                    self.env
                        .borrow_mut()
                        .declare(name, function, false, None, span)?;
                }
                Ok(Flow::Normal(Value::Null))
            }
        }
    }

    fn make_closure(&self, decl: &Rc<FunctionDecl>) -> Value {
        Value::Function(Function::Closure(Rc::new(Closure {
            decl: decl.clone(),
            env: self.env.clone(),
        })))
    }

    pub fn evaluate(&mut self, expr: &Expr) -> EvalResult<Value> {
        ensure_sufficient_stack(|| self.evaluate_expr(expr))
    }

    fn evaluate_expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::String(s) => Ok(Value::String(s.clone())),
            ExprKind::Boolean(b) => Ok(Value::Boolean(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Identifier(name) => Ok(self.env.borrow().lookup(name, span)?),
            ExprKind::Grouping(inner) => self.evaluate(inner),
            ExprKind::Array(elements) => {
                let values = elements
                    .iter()
                    .map(|element| self.evaluate(element))
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok(Value::array(values))
            }
            ExprKind::Object(properties) => {
                let mut map = BTreeMap::new();
                for (key, value) in properties {
                    let value = self.evaluate(value)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::object(map))
            }
            ExprKind::Function(decl) => Ok(self.make_closure(decl)),
            ExprKind::Member { object, property } => {
                let container = self.evaluate(object)?;
                Ok(read_slot(&container, &Value::String(property.clone())))
            }
            ExprKind::Index { object, index } => {
                let container = self.evaluate(object)?;
                let key = self.evaluate(index)?;
                Ok(read_slot(&container, &key))
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Negate => match self.evaluate(operand)? {
                    Value::Number(n) => Ok(Value::Number(-n)),
                    other => Err(type_error(
                        format!("Unary '-' expects a number but got {}", other.type_name()),
                        span,
                    )),
                },
                UnaryOp::Not => Ok(Value::Boolean(!self.evaluate(operand)?.is_truthy())),
                UnaryOp::Step(step) => self.step(*step, operand, true, span),
            },
            ExprKind::Postfix { op, operand } => self.step(*op, operand, false, span),
            ExprKind::Binary { op, left, right } => {
                let left = self.evaluate(left)?;
                // && and || short-circuit and yield an operand, not a boolean
                match op {
                    BinaryOp::And if !left.is_truthy() => Ok(left),
                    BinaryOp::Or if left.is_truthy() => Ok(left),
                    BinaryOp::And | BinaryOp::Or => self.evaluate(right),
                    _ => {
                        let right = self.evaluate(right)?;
                        apply_binary(*op, left, right, span)
                    }
                }
            }
            ExprKind::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(then_branch)
                } else {
                    self.evaluate(else_branch)
                }
            }
            ExprKind::Assignment { op, target, value } => self.assign(*op, target, value, span),
            ExprKind::Call { callee, args } => {
                let callee = self.evaluate(callee)?;
                let args = args
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<EvalResult<Vec<_>>>()?;
                self.call_value(callee, args, span)
            }
        }
    }

    // Prefix and postfix ++/--, only on plain variables.
    fn step(&mut self, op: StepOp, operand: &Expr, prefix: bool, span: Span) -> EvalResult<Value> {
        let ExprKind::Identifier(name) = &operand.kind else {
            return Err(type_error(
                format!("Operator '{}' can only be applied to a variable", op),
                span,
            ));
        };
        let current = self.env.borrow().lookup(name, operand.span)?;
        let Value::Number(n) = current else {
            return Err(type_error(
                format!(
                    "Operator '{}' expects a number but got {}",
                    op,
                    current.type_name()
                ),
                span,
            ));
        };
        let updated = n + op.delta();
        self.env
            .borrow_mut()
            .assign(name, Value::Number(updated), span)?;
        Ok(Value::Number(if prefix { updated } else { n }))
    }

    fn assign(&mut self, op: AssignOp, target: &Expr, value: &Expr, span: Span) -> EvalResult<Value> {
        match &target.kind {
            ExprKind::Identifier(name) => {
                let current = match op.binary() {
                    Some(_) => Some(self.env.borrow().lookup(name, target.span)?),
                    None => None,
                };
                let rhs = self.evaluate(value)?;
                let new_value = combine(op, current, rhs, span)?;
                self.env
                    .borrow_mut()
                    .assign(name, new_value.clone(), span)?;
                Ok(new_value)
            }
            ExprKind::Member { object, property } => {
                let container = self.evaluate(object)?;
                self.assign_slot(op, container, Value::String(property.clone()), value, span)
            }
            ExprKind::Index { object, index } => {
                let container = self.evaluate(object)?;
                let key = self.evaluate(index)?;
                self.assign_slot(op, container, key, value, span)
            }
            _ => Err(type_error("Invalid assignment target".to_string(), target.span)),
        }
    }

    // Member and index writes mutate the container in place; bindings are not involved.
    fn assign_slot(
        &mut self,
        op: AssignOp,
        container: Value,
        key: Value,
        value: &Expr,
        span: Span,
    ) -> EvalResult<Value> {
        let current = op.binary().map(|_| read_slot(&container, &key));
        let rhs = self.evaluate(value)?;
        let new_value = combine(op, current, rhs, span)?;
        write_slot(&container, &key, new_value.clone(), span)?;
        Ok(new_value)
    }

    /// Calls any function value with already-evaluated arguments.
    pub fn call_value(&mut self, callee: Value, args: Vec<Value>, span: Span) -> EvalResult<Value> {
        let Value::Function(function) = callee else {
            return Err(EvalError::NotCallable {
                found: callee.type_name(),
                span,
            });
        };
        let name = function.name().unwrap_or("<anonymous>");
        if args.len() != function.arity() {
            return Err(EvalError::Arity {
                name: name.to_string(),
                expected: function.arity(),
                found: args.len(),
                span,
            });
        }
        trace!(function = name, args = args.len(), "call");
        match function {
            Function::Native(native) => (native.func)(self, args, span),
            Function::Closure(closure) => {
                if self.call_depth >= MAX_CALL_DEPTH {
                    return Err(EvalError::RecursionLimit {
                        limit: MAX_CALL_DEPTH,
                        span,
                    });
                }
                self.call_depth += 1;
                let result = self.call_closure(&closure, args, span);
                self.call_depth -= 1;
                result
            }
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: Vec<Value>, span: Span) -> EvalResult<Value> {
        let decl = &closure.decl;
        // Parent is the defining scope, not the caller's
        let scope = Environment::new_enclosed(closure.env.clone());
        {
            let mut frame = scope.borrow_mut();
            for (param, arg) in decl.params.iter().zip(args) {
                check_type(&param.name, param.declared_type, &arg, span)?;
                frame.declare(&param.name, arg, false, param.declared_type, param.span)?;
            }
        }

        let value = match self.with_scope(scope, |interp| interp.execute_all(&decl.body))? {
            Flow::Normal(_) => Value::Null,
            Flow::Return(value, _) => value,
            escaped => {
                return Err(escaped
                    .escape_error()
                    .unwrap_or_else(|| type_error("Unexpected control flow".to_string(), span)));
            }
        };

        if let Some(expected) = decl.return_type {
            if !value.satisfies(expected) {
                return Err(type_error(
                    format!(
                        "Function '{}' must return {} but returned {}",
                        decl.display_name(),
                        expected,
                        value.type_name()
                    ),
                    span,
                ));
            }
        }
        Ok(value)
    }
}

// Applies the compound operator, if any, to the slot's current value.
fn combine(op: AssignOp, current: Option<Value>, rhs: Value, span: Span) -> EvalResult<Value> {
    match (op.binary(), current) {
        (Some(binary), Some(current)) => apply_binary(binary, current, rhs, span),
        _ => Ok(rhs),
    }
}

fn compare<T: PartialOrd + ?Sized>(op: BinaryOp, a: &T, b: &T) -> bool {
    match op {
        BinaryOp::Less => a < b,
        BinaryOp::LessEqual => a <= b,
        BinaryOp::Greater => a > b,
        BinaryOp::GreaterEqual => a >= b,
        _ => false,
    }
}

/// Strict binary semantics; `&&`/`||` here are the non-short-circuit forms.
pub fn apply_binary(op: BinaryOp, left: Value, right: Value, span: Span) -> EvalResult<Value> {
    match op {
        BinaryOp::Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", left, right)))
            }
            _ => Err(type_error(
                format!(
                    "Operator '+' expects numbers or strings but got {} and {}",
                    left.type_name(),
                    right.type_name()
                ),
                span,
            )),
        },
        BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Remainder => {
            let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                return Err(type_error(
                    format!(
                        "Operator '{}' expects numbers but got {} and {}",
                        op,
                        left.type_name(),
                        right.type_name()
                    ),
                    span,
                ));
            };
            let n = match op {
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide => a / b,
                _ => a % b,
            };
            Ok(Value::Number(n))
        }
        BinaryOp::Equal => Ok(Value::Boolean(left == right)),
        BinaryOp::NotEqual => Ok(Value::Boolean(left != right)),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Boolean(compare(op, a, b))),
                (Value::String(a), Value::String(b)) => {
                    Ok(Value::Boolean(compare(op, a.as_str(), b.as_str())))
                }
                _ => Err(type_error(
                    format!(
                        "Operator '{}' cannot compare {} with {}",
                        op,
                        left.type_name(),
                        right.type_name()
                    ),
                    span,
                )),
            }
        }
        BinaryOp::And => Ok(if left.is_truthy() { right } else { left }),
        BinaryOp::Or => Ok(if left.is_truthy() { left } else { right }),
    }
}

// Non-negative integral numbers index arrays.
fn array_index(n: f64) -> Option<usize> {
    if n >= 0.0 && n.is_finite() && n.fract() == 0.0 {
        Some(n as usize)
    } else {
        None
    }
}

/// Member/index read. Missing keys and non-containers read as null.
fn read_slot(container: &Value, key: &Value) -> Value {
    match (container, key) {
        (Value::Array(elements), Value::Number(n)) => array_index(*n)
            .and_then(|i| elements.borrow().get(i).cloned())
            .unwrap_or(Value::Null),
        (Value::Array(elements), Value::String(k)) if k == "length" => {
            Value::Number(elements.borrow().len() as f64)
        }
        (Value::String(s), Value::String(k)) if k == "length" => {
            Value::Number(s.chars().count() as f64)
        }
        (Value::String(s), Value::Number(n)) => array_index(*n)
            .and_then(|i| s.chars().nth(i))
            .map_or(Value::Null, |c| Value::String(c.to_string())),
        (Value::Object(properties), key) => properties
            .borrow()
            .get(&key.to_string())
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn write_slot(container: &Value, key: &Value, value: Value, span: Span) -> EvalResult<()> {
    match container {
        Value::Array(elements) => {
            let index = match key {
                Value::Number(n) => array_index(*n),
                _ => None,
            };
            let Some(index) = index else {
                return Err(type_error(
                    format!("Invalid array index {}", key),
                    span,
                ));
            };
            let mut elements = elements.borrow_mut();
            if index < elements.len() {
                elements[index] = value;
            } else {
                // Writing past the end pads with nulls
                elements.resize(index, Value::Null);
                elements.push(value);
            }
            Ok(())
        }
        Value::Object(properties) => {
            properties.borrow_mut().insert(key.to_string(), value);
            Ok(())
        }
        other => Err(type_error(
            format!(
                "Cannot set property '{}' on a value of type {}",
                key,
                other.type_name()
            ),
            span,
        )),
    }
}
