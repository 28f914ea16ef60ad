use crate::ast::{FunctionDecl, TypeAnnotation};
use crate::environment::Environment;
use crate::evaluator::{EvalResult, Interpreter};
use crate::source::Span;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt; // For custom display formatting
use std::rc::Rc;

/// A runtime value. Arrays and objects are shared, mutable containers:
/// cloning a `Value` clones the handle, not the contents.
#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<BTreeMap<String, Value>>>),
    Function(Function),
}

impl Value {
    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    pub fn object(properties: BTreeMap<String, Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(properties)))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Null => "null",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    /// Null, false, 0 (and NaN) and the empty string are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Same-kind check against a declared type. `Any` accepts everything.
    pub fn satisfies(&self, annotation: TypeAnnotation) -> bool {
        matches!(
            (annotation, self),
            (TypeAnnotation::Any, _)
                | (TypeAnnotation::Number, Value::Number(_))
                | (TypeAnnotation::String, Value::String(_))
                | (TypeAnnotation::Boolean, Value::Boolean(_))
        )
    }

    // Strings inside containers are shown quoted
    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "\"{}\"", s.escape_debug()),
            other => write!(f, "{}", other),
        }
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string() // also covers -0
    } else if n.fract() == 0.0 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Null => f.write_str("null"),
            Value::Array(elements) => {
                f.write_str("[")?;
                for (i, element) in elements.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    element.fmt_nested(f)?;
                }
                f.write_str("]")
            }
            Value::Object(properties) => {
                f.write_str("{")?;
                for (i, (key, value)) in properties.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: ", key)?;
                    value.fmt_nested(f)?;
                }
                f.write_str("}")
            }
            Value::Function(function) => match function.name() {
                Some(name) => write!(f, "<function {}>", name),
                None => f.write_str("<function>"),
            },
        }
    }
}

// Structural equality within a kind; functions compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Object(a), Value::Object(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }
}

pub type NativeFn = fn(&mut Interpreter<'_>, Vec<Value>, Span) -> EvalResult<Value>;

/// A built-in implemented in Rust.
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub func: NativeFn,
}

/// A user function paired with the scope it was defined in.
pub struct Closure {
    pub decl: Rc<FunctionDecl>,
    pub env: Rc<RefCell<Environment>>,
}

#[derive(Clone)]
pub enum Function {
    Closure(Rc<Closure>),
    Native(Rc<NativeFunction>),
}

impl Function {
    pub fn name(&self) -> Option<&str> {
        match self {
            Function::Closure(closure) => closure.decl.name.as_deref(),
            Function::Native(native) => Some(native.name),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Function::Closure(closure) => closure.decl.params.len(),
            Function::Native(native) => native.arity,
        }
    }
}

// A closure's environment can contain the closure itself, so Debug stays shallow.
impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Closure(closure) => {
                write!(f, "Closure({})", closure.decl.display_name())
            }
            Function::Native(native) => write!(f, "Native({})", native.name),
        }
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Function::Closure(a), Function::Closure(b)) => Rc::ptr_eq(a, b),
            (Function::Native(a), Function::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_native(_: &mut Interpreter<'_>, _: Vec<Value>, _: Span) -> EvalResult<Value> {
        Ok(Value::Null)
    }

    #[test]
    fn test_number_display() {
        assert_eq!(Value::Number(10.0).to_string(), "10");
        assert_eq!(Value::Number(-0.0).to_string(), "0");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Number(0.1 + 0.2).to_string(), "0.30000000000000004");
        assert_eq!(Value::Number(1e21).to_string(), "1000000000000000000000");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "Infinity");
        assert_eq!(Value::Number(f64::NEG_INFINITY).to_string(), "-Infinity");
        assert_eq!(Value::Number(f64::NAN).to_string(), "NaN");
    }

    #[test]
    fn test_container_display() {
        let mut props = BTreeMap::new();
        props.insert("b".to_string(), Value::string("x\"y"));
        props.insert("a".to_string(), Value::array(vec![Value::Number(1.0), Value::Null]));
        assert_eq!(
            Value::object(props).to_string(),
            "{a: [1, null], b: \"x\\\"y\"}"
        );
        assert_eq!(Value::array(vec![]).to_string(), "[]");
        assert_eq!(Value::string("raw").to_string(), "raw");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("0").is_truthy());
        assert!(Value::Number(-1.0).is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn test_satisfies() {
        assert!(Value::Number(1.0).satisfies(TypeAnnotation::Number));
        assert!(!Value::string("1").satisfies(TypeAnnotation::Number));
        assert!(Value::Null.satisfies(TypeAnnotation::Any));
        assert!(!Value::Null.satisfies(TypeAnnotation::Boolean));
    }

    #[test]
    fn test_equality() {
        assert_eq!(Value::Number(1.0), Value::Number(1.0));
        assert_ne!(Value::Number(1.0), Value::string("1"));
        assert_ne!(Value::Null, Value::Boolean(false));
        assert_eq!(
            Value::array(vec![Value::Number(1.0)]),
            Value::array(vec![Value::Number(1.0)])
        );

        let native = Rc::new(NativeFunction {
            name: "f",
            arity: 0,
            func: dummy_native,
        });
        let f1 = Value::Function(Function::Native(native.clone()));
        let f2 = Value::Function(Function::Native(native));
        let other = Value::Function(Function::Native(Rc::new(NativeFunction {
            name: "f",
            arity: 0,
            func: dummy_native,
        })));
        assert_eq!(f1, f2);
        assert_ne!(f1, other);
        assert_eq!(f1.to_string(), "<function f>");
    }

    #[test]
    fn test_shared_containers_alias() {
        let a = Value::array(vec![]);
        let b = a.clone();
        if let Value::Array(elements) = &a {
            elements.borrow_mut().push(Value::Number(1.0));
        }
        assert_eq!(b.to_string(), "[1]");
    }
}
