use crate::diagnostics::Reporter;
use crate::error::Error;
use crate::interpreter::Interpreter;
use crate::syntax::{expr, stmt};
use crate::syntax::{Expr, FunctionBody, LiteralValue, Stmt};
use crate::token::{Token, TokenType};

use std::collections::HashMap;
use std::mem;

// Much like we track scopes as we walk the tree, we can track whether or not
// the code we are currently visiting is inside a function declaration.
#[derive(Debug, Clone, Copy, PartialEq)]
enum FunctionType {
    None,
    Function,
    Initializer,
    Method,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

// A name bound in a local scope. `used` drives the unused-local diagnostic;
// `defined` is the declare/define two-step the book uses to catch a variable
// referring to itself in its own initializer.
struct Binding {
    token: Token,
    defined: bool,
    used: bool,
}

pub struct Resolver<'i, 'r> {
    interpreter: &'i mut Interpreter,
    // This field keeps track of the stack of scopes currently, uh, in scope.
    // Each element in the stack is a Map representing a single block scope.
    // Keys, as in Environment, are variable names.

    // The scope stack is only used for local block scopes. Variables declared
    // at the top level in the global scope are not tracked by the resolver
    // since they are more dynamic in Lox. When resolving a variable, if we
    // can't find it in the stack of local scopes, we assume it must be
    // global.
    scopes: Vec<HashMap<String, Binding>>,

    current_function: FunctionType,
    current_class: ClassType,
    loop_depth: usize,
    reporter: &'r mut Reporter,
}

impl<'i, 'r> Resolver<'i, 'r> {
    pub fn new(interpreter: &'i mut Interpreter, reporter: &'r mut Reporter) -> Self {
        Resolver {
            interpreter,
            scopes: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            loop_depth: 0,
            reporter,
        }
    }

    fn resolve_stmt(&mut self, statement: &Stmt) {
        let _ = statement.accept(self);
    }

    pub fn resolve_stmts(&mut self, statements: &[Stmt]) {
        for statement in statements {
            self.resolve_stmt(statement)
        }
    }

    fn resolve_expr(&mut self, expression: &Expr) {
        let _ = expression.accept(self);
    }

    // A new lexical scope is created.
    // Lexical scopes nest in both the interpreter and the resolver. They
    // behave like a stack. The interpreter implements that stack using a
    // linked list — the chain of Environment objects. In the resolver, we
    // use a vector like a stack.
    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    // Warn about anything declared in this scope that was never read before
    // it goes out of scope.
    fn end_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            for binding in scope.values() {
                if !binding.used {
                    self.reporter.warn_token(&binding.token, "Unused local variable.");
                }
            }
        }
    }

    // Declaration adds the variable to the innermost scope so that it
    // shadows any outer one and so that we know the variable exists. We mark
    // it as "not ready yet" by binding its name to a Binding with
    // `defined: false`. This is what lets us catch errors like
    // `var a = a + 1;`.
    fn declare(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            if scope.contains_key(&name.lexeme) {
                self.reporter
                    .token_error(name, "Already a variable with this name in this scope.");
            }
            scope.insert(
                name.lexeme.clone(),
                Binding { token: name.clone(), defined: false, used: false },
            );
        }
    }

    // After declaring the variable, we resolve its initializer expression in
    // that same scope where the new variable now exists but is unavailable.
    // Once the initializer expression is done, the variable is ready for
    // prime time.
    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            if let Some(binding) = scope.get_mut(&name.lexeme) {
                binding.defined = true;
            }
        }
    }

    // Inserts a name that the resolver itself introduces (`this`, `super`)
    // rather than user code — pre-marked used so it never trips the
    // unused-local diagnostic.
    fn define_implicit(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(
                name.to_string(),
                Binding { token: Token::new(TokenType::Identifier, name, 0), defined: true, used: true },
            );
        }
    }

    // We start at the innermost scope and work outwards, looking in each map
    // for a matching name. If we find the variable, we resolve it, passing
    // in the number of scopes between the current innermost scope and the
    // scope where the variable was found. So, if the variable was found in
    // the current scope, we pass in 0. If we walk through all of the block
    // scopes and never find the variable, we leave it unresolved and assume
    // it's global.
    fn resolve_local(&mut self, id: u32, name: &Token) {
        for (i, scope) in self.scopes.iter_mut().rev().enumerate() {
            if let Some(binding) = scope.get_mut(&name.lexeme) {
                binding.used = true;
                self.interpreter.resolve(id, i);
                return;
            }
        }
    }

    // Creates a new scope for the body and then binds variables for each of
    // the function's parameters. Once that's ready, it resolves the
    // function body in that scope. This differs from how the interpreter
    // handles function declarations: at runtime, declaring a function
    // doesn't touch its body at all, the body is only visited once the
    // function is called. In static analysis we immediately traverse into
    // the body right then and there.
    fn resolve_function(&mut self, params: &[Token], body: &[Stmt], tpe: FunctionType) {
        // We stash the previous value of the field in a local variable
        // first. Remember, Lox has local functions, so you can nest function
        // declarations arbitrarily deeply, and we need to restore the
        // enclosing function's type once we're done with this one.
        let enclosing_function = mem::replace(&mut self.current_function, tpe);
        self.begin_scope();
        for param in params {
            self.declare(param);
            self.define(param);
        }
        self.resolve_stmts(body);
        self.end_scope();
        self.current_function = enclosing_function;
    }
}

// Only a few kinds of nodes are interesting when it comes to resolving
// variables: a block statement introduces a new scope for the statements it
// contains, a function declaration introduces a new scope for its body and
// binds its parameters in that scope, a variable declaration adds a new
// variable to the current scope, and variable/assignment expressions need
// their variables resolved. The rest of the nodes don't do anything special,
// but we still need visit methods for them so we keep traversing into their
// subtrees — even a `+` expression might have variables buried in either
// operand.
impl<'i, 'r> expr::Visitor<()> for Resolver<'i, 'r> {
    fn visit_variable_expr(&mut self, id: u32, name: &Token) -> Result<(), Error> {
        // First, check whether the variable is being accessed inside its own
        // initializer: if it exists in the current scope but isn't defined
        // yet, that's exactly the `var a = a;` case.
        if let Some(scope) = self.scopes.last() {
            if let Some(binding) = scope.get(&name.lexeme) {
                if !binding.defined {
                    self.reporter
                        .token_error(name, "Can't read local variable in its own initializer.");
                }
            }
        }
        self.resolve_local(id, name);
        Ok(())
    }

    // First, we resolve the expression for the assigned value in case it
    // also contains references to other variables. Then we use the existing
    // resolve_local() to resolve the variable being assigned to.
    fn visit_assign_expr(&mut self, id: u32, name: &Token, value: &Expr) -> Result<(), Error> {
        self.resolve_expr(value);
        self.resolve_local(id, name);
        Ok(())
    }

    fn visit_binary_expr(&mut self, left: &Expr, _operator: &Token, right: &Expr) -> Result<(), Error> {
        self.resolve_expr(left);
        self.resolve_expr(right);
        Ok(())
    }

    // During resolution, we recurse only into the expression to the left of
    // the dot. The actual property access happens in the interpreter since
    // Lox property dispatch is dynamic.
    fn visit_get_expr(&mut self, object: &Expr, _name: &Token) -> Result<(), Error> {
        self.resolve_expr(object);
        Ok(())
    }

    // Like Get, the property name itself is dynamic, so there's nothing to
    // resolve there. We just recurse into the two subexpressions: the object
    // whose property is being set, and the value it's being set to.
    fn visit_set_expr(&mut self, object: &Expr, _name: &Token, value: &Expr) -> Result<(), Error> {
        self.resolve_expr(value);
        self.resolve_expr(object);
        Ok(())
    }

    fn visit_this_expr(&mut self, id: u32, keyword: &Token) -> Result<(), Error> {
        if self.current_class == ClassType::None {
            self.reporter.token_error(keyword, "Can't use 'this' outside of a class.");
            return Ok(());
        }
        self.resolve_local(id, keyword);
        Ok(())
    }

    fn visit_super_expr(&mut self, id: u32, keyword: &Token, _method: &Token) -> Result<(), Error> {
        match self.current_class {
            ClassType::None => {
                self.reporter.token_error(keyword, "Can't use 'super' outside of a class.");
            }
            ClassType::Class => {
                self.reporter
                    .token_error(keyword, "Can't use 'super' in a class with no superclass.");
            }
            ClassType::Subclass => self.resolve_local(id, keyword),
        }
        Ok(())
    }

    // We walk the argument list and resolve them all. The callee is also an
    // expression (usually a variable expression), so it gets resolved too.
    fn visit_call_expr(&mut self, callee: &Expr, _paren: &Token, arguments: &[Expr]) -> Result<(), Error> {
        self.resolve_expr(callee);
        for argument in arguments {
            self.resolve_expr(argument);
        }
        Ok(())
    }

    fn visit_grouping_expr(&mut self, expression: &Expr) -> Result<(), Error> {
        self.resolve_expr(expression);
        Ok(())
    }

    fn visit_literal_expr(&mut self, _value: &LiteralValue) -> Result<(), Error> {
        Ok(())
    }

    // Since static analysis does no control flow or short-circuiting, a
    // logical expression resolves exactly like any other binary operator.
    fn visit_logical_expr(&mut self, left: &Expr, _operator: &Token, right: &Expr) -> Result<(), Error> {
        self.resolve_expr(left);
        self.resolve_expr(right);
        Ok(())
    }

    fn visit_ternary_expr(&mut self, condition: &Expr, then_branch: &Expr, else_branch: &Expr) -> Result<(), Error> {
        self.resolve_expr(condition);
        self.resolve_expr(then_branch);
        self.resolve_expr(else_branch);
        Ok(())
    }

    fn visit_unary_expr(&mut self, _operator: &Token, right: &Expr) -> Result<(), Error> {
        self.resolve_expr(right);
        Ok(())
    }

    // An anonymous function expression resolves exactly like a named
    // function declaration's body, just with no name to declare.
    fn visit_function_expr(&mut self, function: &FunctionBody) -> Result<(), Error> {
        self.resolve_function(&function.params, &function.body, FunctionType::Function);
        Ok(())
    }
}

impl<'i, 'r> stmt::Visitor<()> for Resolver<'i, 'r> {
    fn visit_block_stmt(&mut self, statements: &[Stmt]) -> Result<(), Error> {
        self.begin_scope();
        self.resolve_stmts(statements);
        self.end_scope();
        Ok(())
    }

    // Whenever a `this` expression is encountered inside a method, it
    // resolves to a "local variable" defined in an implicit scope just
    // outside of the method body's block.
    fn visit_class_stmt(&mut self, name: &Token, superclass: &Option<Expr>, methods: &[Stmt]) -> Result<(), Error> {
        let enclosing_class = mem::replace(
            &mut self.current_class,
            if superclass.is_some() { ClassType::Subclass } else { ClassType::Class },
        );

        self.declare(name);
        self.define(name);

        if let Some(Expr::Variable { name: superclass_name, .. }) = superclass {
            if superclass_name.lexeme == name.lexeme {
                self.reporter.token_error(superclass_name, "A class can't inherit from itself.");
            }
        }
        if let Some(superclass_expr) = superclass {
            self.resolve_expr(superclass_expr);
        }

        if superclass.is_some() {
            self.begin_scope();
            self.define_implicit("super");
        }

        self.begin_scope();
        self.define_implicit("this");

        for method in methods {
            if let Stmt::Method { name: method_name, function, is_class } = method {
                let declaration = if *is_class {
                    FunctionType::Function
                } else if method_name.lexeme == "init" {
                    FunctionType::Initializer
                } else {
                    FunctionType::Method
                };
                self.resolve_function(&function.params, &function.body, declaration);
            } else {
                unreachable!("class bodies only ever contain Stmt::Method");
            }
        }

        self.end_scope();

        if superclass.is_some() {
            self.end_scope();
        }

        self.current_class = enclosing_class;

        Ok(())
    }

    // An expression statement contains a single expression to traverse.
    fn visit_expression_stmt(&mut self, expression: &Expr) -> Result<(), Error> {
        self.resolve_expr(expression);
        Ok(())
    }

    // An if statement has an expression for its condition and one or two
    // statements for the branches.
    fn visit_if_stmt(&mut self, condition: &Expr, then_branch: &Stmt, else_branch: &Option<Box<Stmt>>) -> Result<(), Error> {
        self.resolve_expr(condition);
        self.resolve_stmt(then_branch);
        if let Some(else_stmt) = else_branch {
            self.resolve_stmt(else_stmt);
        }
        Ok(())
    }

    fn visit_print_stmt(&mut self, expression: &Expr) -> Result<(), Error> {
        self.resolve_expr(expression);
        Ok(())
    }

    fn visit_return_stmt(&mut self, keyword: &Token, value: &Option<Expr>) -> Result<(), Error> {
        if self.current_function == FunctionType::None {
            self.reporter.token_error(keyword, "Can't return from top-level code.");
        }

        if let Some(return_value) = value {
            if self.current_function == FunctionType::Initializer {
                self.reporter
                    .token_error(keyword, "Can't return a value from an initializer.");
            }
            self.resolve_expr(return_value);
        }
        Ok(())
    }

    fn visit_break_stmt(&mut self, keyword: &Token) -> Result<(), Error> {
        if self.loop_depth == 0 {
            self.reporter.token_error(keyword, "Can't break outside of a loop.");
        }
        Ok(())
    }

    // We resolve the condition and the body exactly once; the resolver
    // doesn't unroll loops, it just needs to see every variable reference
    // once.
    fn visit_while_stmt(&mut self, condition: &Expr, body: &Stmt) -> Result<(), Error> {
        self.resolve_expr(condition);
        self.loop_depth += 1;
        self.resolve_stmt(body);
        self.loop_depth -= 1;
        Ok(())
    }

    // We split binding into two steps, declaring then defining, in order to
    // handle funny edge cases like this:
    //
    //   var a = "outer";
    //   {
    //     var a = a;
    //   }
    fn visit_var_stmt(&mut self, name: &Token, initializer: &Option<Expr>) -> Result<(), Error> {
        self.declare(name);
        if let Some(init) = initializer {
            self.resolve_expr(init);
        }
        self.define(name);
        Ok(())
    }

    // Similar to visit_var_stmt, we declare and define the function's name
    // in the current scope. Unlike variables, though, we define the name
    // eagerly, before resolving the function's body. This lets a function
    // recursively refer to itself inside its own body.
    fn visit_function_stmt(&mut self, name: &Token, function: &FunctionBody) -> Result<(), Error> {
        self.declare(name);
        self.define(name);

        self.resolve_function(&function.params, &function.body, FunctionType::Function);
        Ok(())
    }

    // Methods are only ever resolved as part of a class body (see
    // visit_class_stmt); Stmt::Method never appears as a top-level or
    // block-level statement.
    fn visit_method_stmt(&mut self, _name: &Token, _function: &FunctionBody, _is_class: bool) -> Result<(), Error> {
        unreachable!("Stmt::Method is only ever resolved from within visit_class_stmt")
    }

    fn visit_null_stmt(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::parser::Parser;
    use crate::scanner::Scanner;

    fn resolve(source: &str) -> Reporter {
        let mut reporter = Reporter::new();
        let mut scanner = Scanner::new(source.to_string(), &mut reporter);
        let tokens = scanner.scan_tokens().clone();
        let mut parser = Parser::new(&tokens, false, &mut reporter);
        let statements = parser.parse();

        let mut interpreter = Interpreter::new();
        let mut resolver = Resolver::new(&mut interpreter, &mut reporter);
        resolver.resolve_stmts(&statements);
        reporter
    }

    #[test]
    fn self_referential_initializer_is_a_static_error() {
        let reporter = resolve("{ var a = a; }");
        assert!(reporter.had_error);
    }

    #[test]
    fn returning_a_value_from_an_initializer_is_a_static_error() {
        let reporter = resolve("class Box { init() { return 1; } }");
        assert!(reporter.had_error);
    }

    #[test]
    fn this_outside_a_class_is_a_static_error() {
        let reporter = resolve("print this;");
        assert!(reporter.had_error);
    }

    #[test]
    fn super_without_a_superclass_is_a_static_error() {
        let reporter = resolve("class A { m() { super.m(); } }");
        assert!(reporter.had_error);
    }

    #[test]
    fn a_class_cannot_inherit_from_itself() {
        let reporter = resolve("class A < A {}");
        assert!(reporter.had_error);
    }

    #[test]
    fn referencing_the_outer_binding_before_shadowing_it_is_fine() {
        let reporter = resolve("var a = \"outer\"; { print a; var a = \"inner\"; }");
        assert!(!reporter.had_error);
    }
}
