use crate::evaluator::{EvalResult, Interpreter};
use crate::source::Span;
use crate::types::{NativeFunction, Value};

/// Built-ins installed in every root scope.
pub fn natives() -> Vec<NativeFunction> {
    vec![NativeFunction {
        name: "print",
        arity: 1,
        func: prim_print,
    }]
}

/// Writes the display text of its argument as one output line.
pub fn prim_print(interpreter: &mut Interpreter<'_>, args: Vec<Value>, _span: Span) -> EvalResult<Value> {
    for value in &args {
        interpreter.emit(&value.to_string());
    }
    Ok(Value::Null)
}
