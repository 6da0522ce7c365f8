use crate::environment::Environment;
use crate::error::Error;
use crate::interpreter::Interpreter;
use crate::object::Object;
use crate::syntax::{FunctionBody, Stmt};
use crate::token::Token;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub enum Function {
    // These are functions that the interpreter exposes to user code but that
    // are implemented in the host language. Sometimes these are called
    // primitives, external functions, or foreign functions. Many languages
    // also let users provide their own native functions through a foreign
    // function interface (FFI); Lox doesn't have one, so `clock` is the only
    // native this crate defines.
    Native {
        name: &'static str,
        arity: usize,
        body: Rc<dyn Fn(&[Object]) -> Object>,
    },

    // LoxFunction in the book.
    User {
        name: Token,
        params: Vec<Token>,
        body: Rc<Vec<Stmt>>,
        closure: Rc<RefCell<Environment>>,
        is_initializer: bool,
    },
}

impl Function {
    pub fn from_declaration(
        name: Token,
        function: &FunctionBody,
        closure: &Rc<RefCell<Environment>>,
        is_initializer: bool,
    ) -> Self {
        Function::User {
            name,
            params: function.params.clone(),
            body: Rc::new(function.body.clone()),
            closure: Rc::clone(closure),
            is_initializer,
        }
    }

    // We pass in the interpreter in case the implementer needs it, and the
    // list of already-evaluated argument values; the job here is only to
    // return the value the call expression produces.
    pub fn call(&self, interpreter: &mut Interpreter, arguments: &[Object]) -> Result<Object, Error> {
        match self {
            Function::Native { body, .. } => Ok(body(arguments)),
            Function::User {
                params,
                body,
                closure,
                is_initializer,
                ..
            } => {
                // This means each function call gets its own environment
                // where its parameters live. That environment must be
                // created dynamically: otherwise recursion would break,
                // since multiple calls to the same function in flight at
                // once each need independent parameter storage, even though
                // they share one closure.
                let environment = Rc::new(RefCell::new(Environment::from(closure)));
                for (param, argument) in params.iter().zip(arguments.iter()) {
                    environment
                        .borrow_mut()
                        .define(param.lexeme.clone(), argument.clone());
                }

                let result = interpreter.execute_block(body, environment);

                match result {
                    // A genuine runtime error propagates even out of an
                    // initializer; only a normal return or fall-off gets
                    // coerced to `this`.
                    Err(Error::Runtime { token, message }) => Err(Error::Runtime { token, message }),
                    _ if *is_initializer => {
                        // `return;` inside init() always yields the instance,
                        // regardless of what (if anything) the return statement
                        // carried.
                        Ok(Environment::get_at(closure, 0, "this"))
                    }
                    Err(Error::Return { value }) => Ok(value),
                    Err(other) => Err(other),
                    Ok(()) => Ok(Object::Null), // fell off the end with no return statement
                }
            }
        }
    }

    // Creates a new environment nestled inside the method's original
    // closure — a closure-within-a-closure. When the method runs, that
    // environment becomes the parent of the call's parameter environment.
    // We declare "this" there, bound to the instance the method was looked
    // up on.
    pub fn bind(&self, instance: Object) -> Self {
        match self {
            Function::Native { .. } => unreachable!("native functions are never bound to instances"),
            Function::User {
                name,
                params,
                body,
                closure,
                is_initializer,
            } => {
                let environment = Rc::new(RefCell::new(Environment::from(closure)));
                environment
                    .borrow_mut()
                    .define("this".to_string(), instance);
                Function::User {
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                    closure: environment,
                    is_initializer: *is_initializer,
                }
            }
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Function::Native { arity, .. } => *arity,
            Function::User { params, .. } => params.len(),
        }
    }
}

// Implements to_string, which corresponds to toString in the book.
impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Native { name, .. } => write!(f, "<native fn {name}>"),
            Function::User { name, .. } => write!(f, "<fn {}>", name.lexeme),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
