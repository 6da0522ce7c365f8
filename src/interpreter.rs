use crate::class::{LoxClass, LoxInstance};
use crate::diagnostics::Reporter;
use crate::environment::Environment;
use crate::error::Error;
use crate::function::Function;
use crate::object::Object;
use crate::syntax::{expr, stmt};
use crate::syntax::{Expr, FunctionBody, LiteralValue, Stmt};
use crate::token::{Token, TokenType};

use std::cell::RefCell;
use std::collections::HashMap;
use std::mem;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct Interpreter {
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    // Filled in by the resolver: expression node id -> number of environment
    // hops to the scope that declares the name. Missing from this map means
    // the resolver couldn't find the name in any block scope, so we treat it
    // as a global.
    locals: HashMap<u32, usize>,
}

impl Interpreter {
    pub fn new() -> Self {
        let globals = Rc::new(RefCell::new(Environment::new()));
        globals.borrow_mut().define(
            "clock".to_string(),
            Object::Callable(Function::Native {
                name: "clock",
                arity: 0,
                body: Rc::new(|_args| {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .expect("system clock is before the epoch");
                    Object::Number(now.as_secs_f64())
                }),
            }),
        );

        Interpreter {
            environment: Rc::clone(&globals),
            globals,
            locals: HashMap::new(),
        }
    }

    // Called by the resolver as it walks the tree; poked directly into the
    // interpreter so that by the time interpret() runs, every variable
    // reference already knows how many environments to walk out.
    pub fn resolve(&mut self, expr_id: u32, depth: usize) {
        self.locals.insert(expr_id, depth);
    }

    // Runs a whole program. A runtime error unwinds out of a single
    // statement and stops the rest of the program cold — Lox has no
    // mechanism for a script to recover from one itself.
    pub fn interpret(&mut self, statements: &[Stmt], reporter: &mut Reporter) {
        for statement in statements {
            if let Err(error) = self.execute(statement) {
                match error {
                    Error::Runtime { token, message } => {
                        reporter.runtime_error(&token, &message);
                    }
                    other => unreachable!("a top-level statement leaked {other:?}"),
                }
                return;
            }
        }
    }

    fn execute(&mut self, statement: &Stmt) -> Result<(), Error> {
        statement.accept(self)
    }

    // Runs a block of statements in a fresh child environment, restoring the
    // caller's environment on every exit path — including a Return or Break
    // unwinding through it — so a function call or loop iteration can never
    // leak its locals into the enclosing scope.
    pub fn execute_block(&mut self, statements: &[Stmt], environment: Rc<RefCell<Environment>>) -> Result<(), Error> {
        let previous = mem::replace(&mut self.environment, environment);

        let result = statements.iter().try_for_each(|statement| self.execute(statement));

        self.environment = previous;
        result
    }

    fn evaluate(&mut self, expression: &Expr) -> Result<Object, Error> {
        expression.accept(self)
    }

    fn look_up_variable(&mut self, id: u32, name: &Token) -> Result<Object, Error> {
        match self.locals.get(&id) {
            Some(depth) => Ok(Environment::get_at(&self.environment, *depth, &name.lexeme)),
            None => self.globals.borrow().get(name),
        }
    }

    fn number_operand_error<R>(&self, operator: &Token) -> Result<R, Error> {
        Err(Error::Runtime { token: operator.clone(), message: "Operand(s) must be a number.".to_string() })
    }
}

impl expr::Visitor<Object> for Interpreter {
    fn visit_literal_expr(&mut self, value: &LiteralValue) -> Result<Object, Error> {
        Ok(match value {
            LiteralValue::Boolean(b) => Object::Boolean(*b),
            LiteralValue::Null => Object::Null,
            LiteralValue::Number(n) => Object::Number(*n),
            LiteralValue::String(s) => Object::String(s.clone()),
        })
    }

    fn visit_variable_expr(&mut self, id: u32, name: &Token) -> Result<Object, Error> {
        self.look_up_variable(id, name)
    }

    fn visit_assign_expr(&mut self, id: u32, name: &Token, value: &Expr) -> Result<Object, Error> {
        let value = self.evaluate(value)?;

        match self.locals.get(&id) {
            Some(depth) => Environment::assign_at(&self.environment, *depth, &name.lexeme, value.clone()),
            None => self.globals.borrow_mut().assign(name, value.clone())?,
        }

        Ok(value)
    }

    fn visit_grouping_expr(&mut self, expression: &Expr) -> Result<Object, Error> {
        self.evaluate(expression)
    }

    fn visit_unary_expr(&mut self, operator: &Token, right: &Expr) -> Result<Object, Error> {
        let right = self.evaluate(right)?;

        match operator.token_type {
            TokenType::Minus => match right {
                Object::Number(n) => Ok(Object::Number(-n)),
                _ => self.number_operand_error(operator),
            },
            TokenType::Bang => Ok(Object::Boolean(!right.is_truthy())),
            _ => unreachable!("not a unary operator: {:?}", operator.token_type),
        }
    }

    fn visit_binary_expr(&mut self, left: &Expr, operator: &Token, right: &Expr) -> Result<Object, Error> {
        let l = self.evaluate(left)?;
        let r = self.evaluate(right)?;

        match operator.token_type {
            TokenType::Minus => match (&l, &r) {
                (Object::Number(a), Object::Number(b)) => Ok(Object::Number(a - b)),
                _ => self.number_operand_error(operator),
            },
            TokenType::Slash => match (&l, &r) {
                (Object::Number(_), Object::Number(b)) if *b == 0.0 => {
                    Err(Error::Runtime { token: operator.clone(), message: "Division by zero.".to_string() })
                }
                (Object::Number(a), Object::Number(b)) => Ok(Object::Number(a / b)),
                _ => self.number_operand_error(operator),
            },
            TokenType::Star => match (&l, &r) {
                (Object::Number(a), Object::Number(b)) => Ok(Object::Number(a * b)),
                _ => self.number_operand_error(operator),
            },
            // If either side is a string, the other is stringified (via the
            // same Display impl `print` uses) and the two are concatenated.
            TokenType::Plus => match (&l, &r) {
                (Object::Number(a), Object::Number(b)) => Ok(Object::Number(a + b)),
                (Object::String(_), _) | (_, Object::String(_)) => Ok(Object::String(format!("{l}{r}"))),
                _ => Err(Error::Runtime {
                    token: operator.clone(),
                    message: "Operands must be two numbers or two strings.".to_string(),
                }),
            },
            TokenType::Greater => match (&l, &r) {
                (Object::Number(a), Object::Number(b)) => Ok(Object::Boolean(a > b)),
                _ => self.number_operand_error(operator),
            },
            TokenType::GreaterEqual => match (&l, &r) {
                (Object::Number(a), Object::Number(b)) => Ok(Object::Boolean(a >= b)),
                _ => self.number_operand_error(operator),
            },
            TokenType::Less => match (&l, &r) {
                (Object::Number(a), Object::Number(b)) => Ok(Object::Boolean(a < b)),
                _ => self.number_operand_error(operator),
            },
            TokenType::LessEqual => match (&l, &r) {
                (Object::Number(a), Object::Number(b)) => Ok(Object::Boolean(a <= b)),
                _ => self.number_operand_error(operator),
            },
            TokenType::BangEqual => Ok(Object::Boolean(!l.equals(&r))),
            TokenType::EqualEqual => Ok(Object::Boolean(l.equals(&r))),
            _ => unreachable!("not a binary operator: {:?}", operator.token_type),
        }
    }

    // Since Lox short-circuits, we only evaluate the right operand when the
    // left one didn't already decide the result.
    fn visit_logical_expr(&mut self, left: &Expr, operator: &Token, right: &Expr) -> Result<Object, Error> {
        let left_value = self.evaluate(left)?;

        if operator.token_type == TokenType::Or {
            if left_value.is_truthy() {
                return Ok(left_value);
            }
        } else if !left_value.is_truthy() {
            return Ok(left_value);
        }

        self.evaluate(right)
    }

    fn visit_ternary_expr(&mut self, condition: &Expr, then_branch: &Expr, else_branch: &Expr) -> Result<Object, Error> {
        if self.evaluate(condition)?.is_truthy() {
            self.evaluate(then_branch)
        } else {
            self.evaluate(else_branch)
        }
    }

    fn visit_call_expr(&mut self, callee: &Expr, paren: &Token, arguments: &[Expr]) -> Result<Object, Error> {
        let callee_value = self.evaluate(callee)?;

        let mut args = Vec::with_capacity(arguments.len());
        for argument in arguments {
            args.push(self.evaluate(argument)?);
        }

        match callee_value {
            Object::Callable(function) => {
                if args.len() != function.arity() {
                    return Err(Error::Runtime {
                        token: paren.clone(),
                        message: format!("Expected {} arguments but got {}.", function.arity(), args.len()),
                    });
                }
                function.call(self, &args)
            }
            Object::Class(class) => {
                let initializer = class.borrow().find_method("init");
                if let Some(initializer) = &initializer {
                    if args.len() != initializer.arity() {
                        return Err(Error::Runtime {
                            token: paren.clone(),
                            message: format!("Expected {} arguments but got {}.", initializer.arity(), args.len()),
                        });
                    }
                }

                let instance = LoxInstance::new(&class);
                if let Some(initializer) = initializer {
                    initializer.bind(instance.clone()).call(self, &args)?;
                }
                Ok(instance)
            }
            _ => Err(Error::Runtime { token: paren.clone(), message: "Can only call functions and classes.".to_string() }),
        }
    }

    // Property dispatch is dynamic: the resolver never looks at the name
    // after the dot, so `.` on a class looks up a static method and `.` on
    // an instance falls back from fields to bound methods.
    fn visit_get_expr(&mut self, object: &Expr, name: &Token) -> Result<Object, Error> {
        let object_value = self.evaluate(object)?;
        match &object_value {
            Object::Instance(instance) => instance.borrow().get(name, &object_value),
            Object::Class(class) => LoxClass::get_static(class, name),
            _ => Err(Error::Runtime { token: name.clone(), message: "Only instances have properties.".to_string() }),
        }
    }

    fn visit_set_expr(&mut self, object: &Expr, name: &Token, value: &Expr) -> Result<Object, Error> {
        let object_value = self.evaluate(object)?;
        match object_value {
            Object::Instance(instance) => {
                let value = self.evaluate(value)?;
                instance.borrow_mut().set(name, value.clone());
                Ok(value)
            }
            _ => Err(Error::Runtime { token: name.clone(), message: "Only instances have fields.".to_string() }),
        }
    }

    fn visit_this_expr(&mut self, id: u32, keyword: &Token) -> Result<Object, Error> {
        self.look_up_variable(id, keyword)
    }

    // `super` is always resolved one scope further out than `this` — see
    // visit_class_stmt, which pushes the `super` scope before the `this`
    // scope — so the bound method's `this` is exactly one hop closer.
    fn visit_super_expr(&mut self, id: u32, _keyword: &Token, method: &Token) -> Result<Object, Error> {
        let distance = *self
            .locals
            .get(&id)
            .expect("resolver always resolves a 'super' expression");
        let superclass = match Environment::get_at(&self.environment, distance, "super") {
            Object::Class(class) => class,
            _ => unreachable!("'super' always resolves to a class"),
        };
        let instance = Environment::get_at(&self.environment, distance - 1, "this");

        superclass
            .borrow()
            .find_method(&method.lexeme)
            .map(|bound| Object::Callable(bound.bind(instance)))
            .ok_or_else(|| Error::Runtime {
                token: method.clone(),
                message: format!("Undefined property '{}'.", method.lexeme),
            })
    }

    fn visit_function_expr(&mut self, function: &FunctionBody) -> Result<Object, Error> {
        let name = Token::new(TokenType::Identifier, "anonymous", 0);
        Ok(Object::Callable(Function::from_declaration(name, function, &self.environment, false)))
    }
}

impl stmt::Visitor<()> for Interpreter {
    fn visit_expression_stmt(&mut self, expression: &Expr) -> Result<(), Error> {
        self.evaluate(expression)?;
        Ok(())
    }

    fn visit_print_stmt(&mut self, expression: &Expr) -> Result<(), Error> {
        let value = self.evaluate(expression)?;
        println!("{value}");
        Ok(())
    }

    fn visit_var_stmt(&mut self, name: &Token, initializer: &Option<Expr>) -> Result<(), Error> {
        let value = match initializer {
            Some(expr) => self.evaluate(expr)?,
            None => Object::Null,
        };
        self.environment.borrow_mut().define(name.lexeme.clone(), value);
        Ok(())
    }

    fn visit_block_stmt(&mut self, statements: &[Stmt]) -> Result<(), Error> {
        let environment = Rc::new(RefCell::new(Environment::from(&self.environment)));
        self.execute_block(statements, environment)
    }

    fn visit_if_stmt(&mut self, condition: &Expr, then_branch: &Stmt, else_branch: &Option<Box<Stmt>>) -> Result<(), Error> {
        if self.evaluate(condition)?.is_truthy() {
            self.execute(then_branch)
        } else if let Some(else_stmt) = else_branch {
            self.execute(else_stmt)
        } else {
            Ok(())
        }
    }

    fn visit_while_stmt(&mut self, condition: &Expr, body: &Stmt) -> Result<(), Error> {
        while self.evaluate(condition)?.is_truthy() {
            match self.execute(body) {
                Err(Error::Break) => break,
                other => other?,
            }
        }
        Ok(())
    }

    fn visit_break_stmt(&mut self, _keyword: &Token) -> Result<(), Error> {
        Err(Error::Break)
    }

    fn visit_return_stmt(&mut self, _keyword: &Token, value: &Option<Expr>) -> Result<(), Error> {
        let value = match value {
            Some(expr) => self.evaluate(expr)?,
            None => Object::Null,
        };
        Err(Error::Return { value })
    }

    fn visit_function_stmt(&mut self, name: &Token, function: &FunctionBody) -> Result<(), Error> {
        let func = Function::from_declaration(name.clone(), function, &self.environment, false);
        self.environment.borrow_mut().define(name.lexeme.clone(), Object::Callable(func));
        Ok(())
    }

    fn visit_class_stmt(&mut self, name: &Token, superclass: &Option<Expr>, methods: &[Stmt]) -> Result<(), Error> {
        let superclass_obj = match superclass {
            Some(expr) => {
                let value = self.evaluate(expr)?;
                match value {
                    Object::Class(class) => Some(class),
                    _ => {
                        let token = match expr {
                            Expr::Variable { name, .. } => name.clone(),
                            _ => name.clone(),
                        };
                        return Err(Error::Runtime { token, message: "Superclass must be a class.".to_string() });
                    }
                }
            }
            None => None,
        };

        // Predeclared as nil so a method body can close over the class's own
        // name before the class value itself exists.
        self.environment.borrow_mut().define(name.lexeme.clone(), Object::Null);

        let methods_env = if let Some(superclass_class) = &superclass_obj {
            let env = Rc::new(RefCell::new(Environment::from(&self.environment)));
            env.borrow_mut().define("super".to_string(), Object::Class(Rc::clone(superclass_class)));
            env
        } else {
            Rc::clone(&self.environment)
        };

        let mut instance_methods = HashMap::new();
        let mut static_methods = HashMap::new();
        for method in methods {
            match method {
                Stmt::Method { name: method_name, function, is_class: false } => {
                    let is_initializer = method_name.lexeme == "init";
                    let func = Function::from_declaration(method_name.clone(), function, &methods_env, is_initializer);
                    instance_methods.insert(method_name.lexeme.clone(), func);
                }
                Stmt::Method { name: method_name, function, is_class: true } => {
                    let func = Function::from_declaration(method_name.clone(), function, &methods_env, false);
                    static_methods.insert(method_name.lexeme.clone(), func);
                }
                _ => unreachable!("class bodies only ever contain Stmt::Method"),
            }
        }

        let class = Rc::new(RefCell::new(LoxClass {
            name: name.lexeme.clone(),
            superclass: superclass_obj,
            methods: instance_methods,
            static_methods,
        }));

        self.environment.borrow_mut().assign(name, Object::Class(class))?;
        Ok(())
    }

    fn visit_method_stmt(&mut self, _name: &Token, _function: &FunctionBody, _is_class: bool) -> Result<(), Error> {
        unreachable!("Stmt::Method is only ever executed from within visit_class_stmt")
    }

    fn visit_null_stmt(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Reporter;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use crate::scanner::Scanner;

    // Runs a whole program through the real pipeline and hands back the
    // reporter so tests can assert on had_error / had_runtime_error without
    // scraping stdout.
    fn run(source: &str) -> Reporter {
        let mut reporter = Reporter::new();
        let mut scanner = Scanner::new(source.to_string(), &mut reporter);
        let tokens = scanner.scan_tokens().clone();

        let mut parser = Parser::new(&tokens, false, &mut reporter);
        let statements = parser.parse();

        let mut interpreter = Interpreter::new();
        let mut resolver = Resolver::new(&mut interpreter, &mut reporter);
        resolver.resolve_stmts(&statements);

        if !reporter.had_error {
            interpreter.interpret(&statements, &mut reporter);
        }

        reporter
    }

    #[test]
    fn arithmetic_and_string_concatenation() {
        let reporter = run("print 1 + 2 * 3; print \"a\" + \"b\";");
        assert!(!reporter.had_error);
        assert!(!reporter.had_runtime_error);
    }

    #[test]
    fn adding_a_number_to_a_string_concatenates_the_stringified_number() {
        let mut reporter = Reporter::new();
        let mut scanner = Scanner::new("\"a\" + 1".to_string(), &mut reporter);
        let tokens = scanner.scan_tokens().clone();
        let mut parser = Parser::new(&tokens, true, &mut reporter);
        let statements = parser.parse();
        assert!(!reporter.had_error);

        let expression = match statements.as_slice() {
            [Stmt::Print { expression }] => expression,
            other => panic!("expected a single print statement, got {other:?}"),
        };

        let mut interpreter = Interpreter::new();
        let value = interpreter.evaluate(expression).expect("no runtime error");
        assert_eq!(value.to_string(), "a1");

        // The other order must concatenate the same way and stay error-free
        // end to end.
        let reporter = run("print 1 + \"a\";");
        assert!(!reporter.had_error && !reporter.had_runtime_error);
    }

    #[test]
    fn truthiness_treats_only_nil_and_false_as_falsey() {
        let reporter = run("if (0) { print \"truthy\"; } else { print \"falsey\"; }");
        assert!(!reporter.had_error && !reporter.had_runtime_error);
    }

    #[test]
    fn closures_capture_their_defining_environment() {
        let reporter = run(
            "fun make_counter() {
                 var i = 0;
                 fun count() { i = i + 1; return i; }
                 return count;
             }
             var counter = make_counter();
             print counter();
             print counter();",
        );
        assert!(!reporter.had_error && !reporter.had_runtime_error);
    }

    #[test]
    fn break_exits_the_nearest_enclosing_loop() {
        let reporter = run(
            "var total = 0;
             for (var i = 0; i < 10; i = i + 1) {
                 if (i == 3) break;
                 total = total + 1;
             }
             print total;",
        );
        assert!(!reporter.had_error && !reporter.had_runtime_error);
    }

    #[test]
    fn break_outside_a_loop_is_a_static_error() {
        let reporter = run("break;");
        assert!(reporter.had_error);
    }

    #[test]
    fn class_initializer_always_returns_this() {
        let reporter = run(
            "class Box {
                 init(value) { this.value = value; }
             }
             var b = Box(7);
             print b.value;",
        );
        assert!(!reporter.had_error && !reporter.had_runtime_error);
    }

    #[test]
    fn subclass_methods_can_call_super() {
        let reporter = run(
            "class Animal {
                 speak() { return \"...\"; }
             }
             class Dog < Animal {
                 speak() { return super.speak() + \" woof\"; }
             }
             print Dog().speak();",
        );
        assert!(!reporter.had_error && !reporter.had_runtime_error);
    }

    #[test]
    fn ternary_expression_picks_a_branch() {
        let reporter = run("print true ? \"yes\" : \"no\";");
        assert!(!reporter.had_error && !reporter.had_runtime_error);
    }

    #[test]
    fn calling_a_non_callable_is_a_runtime_error() {
        let reporter = run("var x = 1; x();");
        assert!(reporter.had_runtime_error);
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let reporter = run("print 1 / 0;");
        assert!(reporter.had_runtime_error);
    }

    #[test]
    fn a_runtime_error_inside_an_initializer_propagates() {
        let reporter = run(
            "class Box {
                 init() { this.value = 1 / 0; }
             }
             Box();",
        );
        assert!(reporter.had_runtime_error);
    }
}
