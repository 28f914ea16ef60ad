use crate::ast::TypeAnnotation;
use crate::lexer;
use crate::source::Span;
use crate::types::{Function, NativeFunction, Value};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("Variable '{name}' is already declared in this scope")]
    DuplicateBinding { name: String, span: Span },
    #[error("'{name}' is a reserved word and cannot be declared")]
    ReservedName { name: String, span: Span },
    #[error("Undeclared variable '{name}'")]
    UndeclaredVariable { name: String, span: Span },
    #[error("Cannot assign to '{name}' because it is a constant")]
    ConstAssignment { name: String, span: Span },
    #[error("Type error: '{name}' is declared as {expected} but got {found}")]
    TypeMismatch {
        name: String,
        expected: TypeAnnotation,
        found: &'static str,
        span: Span,
    },
}

impl EnvError {
    pub fn span(&self) -> Span {
        match self {
            EnvError::DuplicateBinding { span, .. }
            | EnvError::ReservedName { span, .. }
            | EnvError::UndeclaredVariable { span, .. }
            | EnvError::ConstAssignment { span, .. }
            | EnvError::TypeMismatch { span, .. } => *span,
        }
    }
}

/// Checks `value` against a binding's declared type.
pub fn check_type(
    name: &str,
    declared_type: Option<TypeAnnotation>,
    value: &Value,
    span: Span,
) -> Result<(), EnvError> {
    match declared_type {
        Some(expected) if !value.satisfies(expected) => Err(EnvError::TypeMismatch {
            name: name.to_string(),
            expected,
            found: value.type_name(),
            span,
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub is_constant: bool,
    pub declared_type: Option<TypeAnnotation>,
}

#[derive(Debug)]
pub struct Environment {
    // Shared with every closure created while this scope was active.
    outer: Option<Rc<RefCell<Environment>>>,
    bindings: HashMap<String, Binding>,
}

impl Environment {
    /// Creates a new, top-level (global) environment.
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Environment {
            outer: None,
            bindings: HashMap::new(),
        }))
    }

    /// A root scope holding the built-ins.
    pub fn new_global_populated() -> Rc<RefCell<Environment>> {
        let env_ptr = Environment::new();
        {
            let mut env = env_ptr.borrow_mut();
            for native in crate::primitives::natives() {
                env.add_native(native);
            }
        }
        env_ptr
    }

    /// Creates a new environment enclosed within an outer one.
    pub fn new_enclosed(outer_env: Rc<RefCell<Environment>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Environment {
            outer: Some(outer_env),
            bindings: HashMap::new(),
        }))
    }

    /// Declares `name` in this frame only.
    pub fn declare(
        &mut self,
        name: &str,
        value: Value,
        is_constant: bool,
        declared_type: Option<TypeAnnotation>,
        span: Span,
    ) -> Result<(), EnvError> {
        if lexer::keyword(name).is_some() {
            return Err(EnvError::ReservedName {
                name: name.to_string(),
                span,
            });
        }
        if self.bindings.contains_key(name) {
            return Err(EnvError::DuplicateBinding {
                name: name.to_string(),
                span,
            });
        }
        self.bindings.insert(
            name.to_string(),
            Binding {
                value,
                is_constant,
                declared_type,
            },
        );
        Ok(())
    }

    /// Looks up a variable's value.
    /// Checks the current environment first, then walks up the outer environment chain.
    /// `span` is the location where the variable was referenced, used for error reporting.
    pub fn lookup(&self, name: &str, span: Span) -> Result<Value, EnvError> {
        if let Some(binding) = self.bindings.get(name) {
            return Ok(binding.value.clone());
        }
        match &self.outer {
            Some(outer_env_ptr) => outer_env_ptr.borrow().lookup(name, span),
            None => Err(EnvError::UndeclaredVariable {
                name: name.to_string(),
                span,
            }),
        }
    }

    /// Updates the nearest binding of `name` in the chain, honouring constness and type.
    pub fn assign(&mut self, name: &str, value: Value, span: Span) -> Result<(), EnvError> {
        if let Some(binding) = self.bindings.get_mut(name) {
            if binding.is_constant {
                return Err(EnvError::ConstAssignment {
                    name: name.to_string(),
                    span,
                });
            }
            check_type(name, binding.declared_type, &value, span)?;
            binding.value = value;
            return Ok(());
        }
        match &self.outer {
            Some(outer_env_ptr) => outer_env_ptr.borrow_mut().assign(name, value, span),
            None => Err(EnvError::UndeclaredVariable {
                name: name.to_string(),
                span,
            }),
        }
    }

    // Built-ins bypass the reserved-word check: `print` is both a keyword and a binding.
    fn add_native(&mut self, native: NativeFunction) {
        self.bindings.insert(
            native.name.to_string(),
            Binding {
                value: Value::Function(Function::Native(Rc::new(native))),
                is_constant: true,
                declared_type: None,
            },
        );
    }

    /// Gets a list of all identifiers visible from this environment
    pub fn get_identifiers(&self) -> HashSet<String> {
        let mut identifiers: HashSet<String> = self.bindings.keys().cloned().collect();
        if let Some(outer_env_ptr) = &self.outer {
            identifiers.extend(outer_env_ptr.borrow().get_identifiers());
        }
        identifiers
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    fn declare(env: &Rc<RefCell<Environment>>, name: &str, value: Value) {
        env.borrow_mut()
            .declare(name, value, false, None, Span::default())
            .unwrap();
    }

    fn assert_env_error(result: Result<(), EnvError>, expected_error_variant: EnvError) {
        match result {
            Ok(()) => panic!("Expected {:?}, but the operation succeeded", expected_error_variant),
            Err(e) => assert_eq!(
                std::mem::discriminant(&e),
                std::mem::discriminant(&expected_error_variant),
                "Expected error variant like {:?}, got: {:?}",
                expected_error_variant,
                e
            ),
        }
    }

    #[test]
    fn test_declare_and_lookup_global() {
        let env = Environment::new();
        declare(&env, "x", num(10.0));
        assert_eq!(env.borrow().lookup("x", Span::default()), Ok(num(10.0)));
    }

    #[test]
    fn test_lookup_undeclared() {
        let env = Environment::new();
        let result = env.borrow().lookup("y", Span::new(3, 4));
        assert!(matches!(
            result,
            Err(EnvError::UndeclaredVariable { ref name, span }) if name == "y" && span == Span::new(3, 4)
        ));
    }

    #[test]
    fn test_lookup_through_enclosing_scopes() {
        let global_env = Environment::new();
        declare(&global_env, "x", num(1.0));
        let middle = Environment::new_enclosed(global_env.clone());
        let inner = Environment::new_enclosed(middle);
        assert_eq!(inner.borrow().lookup("x", Span::default()), Ok(num(1.0)));
    }

    #[test]
    fn test_shadowing() {
        let global_env = Environment::new();
        declare(&global_env, "x", num(1.0));
        let inner = Environment::new_enclosed(global_env.clone());
        declare(&inner, "x", Value::string("inner"));
        assert_eq!(
            inner.borrow().lookup("x", Span::default()),
            Ok(Value::string("inner"))
        );
        assert_eq!(global_env.borrow().lookup("x", Span::default()), Ok(num(1.0)));
    }

    #[test]
    fn test_duplicate_binding() {
        let env = Environment::new();
        declare(&env, "a", num(1.0));
        let result = env
            .borrow_mut()
            .declare("a", num(2.0), false, None, Span::default());
        assert_env_error(
            result,
            EnvError::DuplicateBinding {
                name: String::new(),
                span: Span::default(),
            },
        );
    }

    #[test]
    fn test_reserved_names() {
        let env = Environment::new();
        for word in ["let", "loyal", "print", "number", "plus"] {
            let result = env
                .borrow_mut()
                .declare(word, num(1.0), false, None, Span::default());
            assert_env_error(
                result,
                EnvError::ReservedName {
                    name: String::new(),
                    span: Span::default(),
                },
            );
        }
    }

    #[test]
    fn test_assign_updates_owning_scope() {
        let global_env = Environment::new();
        declare(&global_env, "count", num(0.0));
        let inner = Environment::new_enclosed(global_env.clone());
        inner
            .borrow_mut()
            .assign("count", num(5.0), Span::default())
            .unwrap();
        assert_eq!(
            global_env.borrow().lookup("count", Span::default()),
            Ok(num(5.0))
        );
    }

    #[test]
    fn test_assign_undeclared() {
        let env = Environment::new();
        assert_env_error(
            env.borrow_mut().assign("nope", num(1.0), Span::default()),
            EnvError::UndeclaredVariable {
                name: String::new(),
                span: Span::default(),
            },
        );
    }

    #[test]
    fn test_const_assignment_fails_regardless_of_type() {
        let env = Environment::new();
        env.borrow_mut()
            .declare("c", num(1.0), true, Some(TypeAnnotation::Any), Span::default())
            .unwrap();
        for value in [num(2.0), Value::string("s"), Value::Null] {
            assert_env_error(
                env.borrow_mut().assign("c", value, Span::default()),
                EnvError::ConstAssignment {
                    name: String::new(),
                    span: Span::default(),
                },
            );
        }
    }

    #[test]
    fn test_typed_assignment() {
        let env = Environment::new();
        env.borrow_mut()
            .declare("n", num(1.0), false, Some(TypeAnnotation::Number), Span::default())
            .unwrap();
        assert!(env.borrow_mut().assign("n", num(2.0), Span::default()).is_ok());
        let result = env
            .borrow_mut()
            .assign("n", Value::string("two"), Span::default());
        match result {
            Err(err @ EnvError::TypeMismatch { .. }) => {
                assert_eq!(
                    err.to_string(),
                    "Type error: 'n' is declared as number but got string"
                );
            }
            other => panic!("Expected type mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_global_populated_has_print() {
        let env = Environment::new_global_populated();
        let print = env.borrow().lookup("print", Span::default()).unwrap();
        assert_eq!(print.to_string(), "<function print>");
        assert!(env.borrow().get_identifiers().contains("print"));
    }

    #[test]
    fn test_get_identifiers_includes_outer() {
        let global_env = Environment::new();
        declare(&global_env, "a", num(1.0));
        let inner = Environment::new_enclosed(global_env);
        declare(&inner, "b", num(2.0));
        let ids = inner.borrow().get_identifiers();
        assert!(ids.contains("a") && ids.contains("b"));
    }
}
