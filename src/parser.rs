use crate::diagnostics::Reporter;
use crate::error::Error;
use crate::syntax::{Expr, FunctionBody, LiteralValue, Stmt};
use crate::token::{Token, TokenType};

pub struct Parser<'t, 'r> {
    tokens: &'t [Token],
    current: usize,
    repl_mode: bool,
    reporter: &'r mut Reporter,
}

macro_rules! matches {
    ( $sel:ident, $( $x:expr ),* ) => {
        {
            if $( $sel.check($x) )||* {
                $sel.advance();
                true
            } else {
                false
            }
        }
    };
}

// Shared by equality/comparison/term/factor: parse `$next ( OP $next )*`,
// left-associative. A leading OP with no left operand is reported, and the
// right-hand side is parsed and returned on its own so the stray operator
// doesn't cascade into further spurious errors.
macro_rules! binary_level {
    ($name:ident, $next:ident, [$($tok:ident),+]) => {
        fn $name(&mut self) -> Result<Expr, Error> {
            if matches!(self, $(TokenType::$tok),+) {
                let operator = self.previous().clone();
                self.error(&operator, "Missing left-hand operand.");
                return self.$next();
            }

            let mut expr: Expr = self.$next()?;

            while matches!(self, $(TokenType::$tok),+) {
                let operator = self.previous().clone();
                let right: Expr = self.$next()?;
                expr = Expr::binary(expr, operator, right);
            }

            Ok(expr)
        }
    };
}

impl<'t, 'r> Parser<'t, 'r> {
    pub fn new(tokens: &'t [Token], repl_mode: bool, reporter: &'r mut Reporter) -> Self {
        Self {
            tokens,
            current: 0,
            repl_mode,
            reporter,
        }
    }

    // program        → declaration* EOF ;
    pub fn parse(&mut self) -> Vec<Stmt> {
        let mut statements: Vec<Stmt> = Vec::new();
        while !self.is_at_end() {
            statements.push(self.declaration());
        }
        statements
    }

    // declaration    → classDecl | funDecl | varDecl | statement ;
    fn declaration(&mut self) -> Stmt {
        let result = if matches!(self, TokenType::Var) {
            self.var_declaration()
        } else if matches!(self, TokenType::Class) {
            self.class_declaration()
        } else if matches!(self, TokenType::Fun) {
            self.function_declaration("function")
        } else {
            self.statement()
        };

        // catch the "exception thrown" when the parser begins error recovery
        match result {
            Err(Error::Parse) => {
                self.synchronize();
                Stmt::Null
            }
            Err(other) => unreachable!("parser only ever raises Error::Parse, got {other:?}"),
            Ok(stmt) => stmt,
        }
    }

    // classDecl      → "class" IDENTIFIER ( "<" IDENTIFIER )? "{" method* "}" ;
    // method         → "class"? function ;
    fn class_declaration(&mut self) -> Result<Stmt, Error> {
        let name = self.consume(TokenType::Identifier, "Expect class name.")?;
        let superclass = if matches!(self, TokenType::Less) {
            let superclass_name = self.consume(TokenType::Identifier, "Expect superclass name.")?;
            Some(Expr::variable(superclass_name))
        } else {
            None
        };
        self.consume(TokenType::LeftBrace, "Expect '{' before class body.")?;

        // Like most dynamically typed languages, fields aren't explicitly
        // listed in the class declaration; instances are loose bags of data
        // you can freely add fields to at runtime.
        let mut methods: Vec<Stmt> = Vec::new();
        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            let is_class = matches!(self, TokenType::Class);
            let method_name = self.consume(TokenType::Identifier, "Expect method name.")?;
            let function = self.function_body("method")?;
            methods.push(Stmt::Method { name: method_name, function, is_class });
        }

        self.consume(TokenType::RightBrace, "Expect '}' after class body.")?;

        Ok(Stmt::Class { name, superclass, methods })
    }

    // funDecl        → "fun" function ;
    // function       → IDENTIFIER "(" parameters? ")" block ;
    fn function_declaration(&mut self, kind: &str) -> Result<Stmt, Error> {
        let name = self.consume(TokenType::Identifier, &format!("Expect {kind} name."))?;
        let function = self.function_body(kind)?;
        Ok(Stmt::Function { name, function })
    }

    // parameters     → IDENTIFIER ( "," IDENTIFIER )* ;
    // Reused for named function declarations, methods, and the anonymous
    // `fun (...) { ... }` expression form.
    fn function_body(&mut self, kind: &str) -> Result<FunctionBody, Error> {
        self.consume(TokenType::LeftParen, &format!("Expect '(' after {kind} name."))?;
        let mut params: Vec<Token> = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                if params.len() >= 255 {
                    let peek = self.peek().clone();
                    self.error(&peek, "Can't have more than 255 parameters.");
                }

                params.push(self.consume(TokenType::Identifier, "Expect parameter name.")?);

                if !matches!(self, TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.")?;

        self.consume(TokenType::LeftBrace, &format!("Expect '{{' before {kind} body."))?;
        let body = self.block()?;
        Ok(FunctionBody { params, body })
    }

    // statement      → exprStmt | printStmt | ifStmt | whileStmt | forStmt
    //                | returnStmt | breakStmt | block ;
    fn statement(&mut self) -> Result<Stmt, Error> {
        if matches!(self, TokenType::For) {
            self.for_statement()
        } else if matches!(self, TokenType::If) {
            self.if_statement()
        } else if matches!(self, TokenType::Print) {
            self.print_statement()
        } else if matches!(self, TokenType::Return) {
            self.return_statement()
        } else if matches!(self, TokenType::Break) {
            self.break_statement()
        } else if matches!(self, TokenType::While) {
            self.while_statement()
        } else if matches!(self, TokenType::LeftBrace) {
            Ok(Stmt::Block { statements: self.block()? })
        } else {
            self.expression_statement()
        }
    }

    // In Lox the body of a function is a list of statements which don't
    // produce values, so we need dedicated syntax for emitting a result.
    // returnStmt     → "return" expression? ";" ;
    fn return_statement(&mut self) -> Result<Stmt, Error> {
        let keyword = self.previous().clone();
        let value = if !self.check(TokenType::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(TokenType::Semicolon, "Expect ';' after return value.")?;
        Ok(Stmt::Return { keyword, value })
    }

    // breakStmt      → "break" ";" ;
    fn break_statement(&mut self) -> Result<Stmt, Error> {
        let keyword = self.previous().clone();
        self.consume(TokenType::Semicolon, "Expect ';' after 'break'.")?;
        Ok(Stmt::Break { keyword })
    }

    // the else is bound to the nearest if that precedes it
    // ifStmt         → "if" "(" expression ")" statement ( "else" statement )? ;
    fn if_statement(&mut self) -> Result<Stmt, Error> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after if condition.")?;

        let then_branch = Box::new(self.statement()?);

        let else_branch = if matches!(self, TokenType::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If { condition, then_branch, else_branch })
    }

    // block          → "{" declaration* "}" ;
    fn block(&mut self) -> Result<Vec<Stmt>, Error> {
        let mut statements: Vec<Stmt> = Vec::new();

        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            statements.push(self.declaration());
        }

        self.consume(TokenType::RightBrace, "Expect '}' after block.")?;
        Ok(statements)
    }

    // whileStmt      → "while" "(" expression ")" statement ;
    fn while_statement(&mut self) -> Result<Stmt, Error> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after condition.")?;
        let body = Box::new(self.statement()?);

        Ok(Stmt::While { condition, body })
    }

    // forStmt        → "for" "(" ( varDecl | exprStmt | ";" ) expression? ";" expression? ")" statement ;
    // Desugared directly into the equivalent while loop; there is no
    // Stmt::For at all.
    fn for_statement(&mut self) -> Result<Stmt, Error> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.")?;

        let initializer = if matches!(self, TokenType::Semicolon) {
            None
        } else if matches!(self, TokenType::Var) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if !self.check(TokenType::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::Semicolon, "Expect ';' after loop condition.")?;

        let increment = if !self.check(TokenType::RightParen) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::RightParen, "Expect ')' after for clauses.")?;

        let mut body = self.statement()?;

        if let Some(incr) = increment {
            body = Stmt::Block {
                statements: vec![body, Stmt::Expression { expression: incr }],
            };
        }

        body = Stmt::While {
            condition: condition.unwrap_or_else(|| Expr::literal(LiteralValue::Boolean(true))),
            body: Box::new(body),
        };

        if let Some(init) = initializer {
            body = Stmt::Block { statements: vec![init, body] };
        }

        Ok(body)
    }

    // varDecl        → "var" IDENTIFIER ( "=" expression )? ";" ;
    fn var_declaration(&mut self) -> Result<Stmt, Error> {
        let name = self.consume(TokenType::Identifier, "Expect variable name.")?;
        let initializer = if matches!(self, TokenType::Equal) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.")?;
        Ok(Stmt::Var { name, initializer })
    }

    // printStmt      → "print" expression ";" ;
    fn print_statement(&mut self) -> Result<Stmt, Error> {
        let value = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after value.")?;
        Ok(Stmt::Print { expression: value })
    }

    // exprStmt       → expression (";" | ε-in-REPL-at-end) ;
    fn expression_statement(&mut self) -> Result<Stmt, Error> {
        let value = self.expression()?;

        if self.repl_mode && self.check(TokenType::Eof) {
            return Ok(Stmt::Print { expression: value });
        }

        self.consume(TokenType::Semicolon, "Expect ';' after expression.")?;
        Ok(Stmt::Expression { expression: value })
    }

    // expression     → assignment ;
    fn expression(&mut self) -> Result<Expr, Error> {
        self.assignment()
    }

    // The trick is that the parser first processes the left side as if it
    // were an expression (an r-value), then converts it to an assignment
    // target (an l-value) if an "=" follows. This works because every valid
    // assignment target happens to also be valid as a normal expression.
    //
    // assignment     := ternary ("=" assignment)?
    fn assignment(&mut self) -> Result<Expr, Error> {
        let expr = self.ternary()?;

        if matches!(self, TokenType::Equal) {
            // Assignment is right-associative, so we recursively call
            // assignment() again instead of looping like the binary levels
            // do.
            let value = self.assignment()?;

            if let Expr::Variable { name, .. } = expr {
                return Ok(Expr::assign(name, value));
            } else if let Expr::Get { object, name, .. } = expr {
                return Ok(Expr::set(*object, name, value));
            }

            // We don't throw here: the parser isn't in a confused state that
            // needs panic-mode recovery, it just found a bad assignment
            // target.
            let equals = self.previous().clone();
            self.error(&equals, "Invalid assignment target.");
        }

        Ok(expr)
    }

    // ternary        := logic_or ("?" expression ":" ternary)?
    fn ternary(&mut self) -> Result<Expr, Error> {
        let expr = self.logic_or()?;

        if matches!(self, TokenType::Question) {
            let then_branch = self.expression()?;
            self.consume(TokenType::Colon, "Expect ':' after then-branch of ternary expression.")?;
            let else_branch = self.ternary()?; // right-associative
            return Ok(Expr::ternary(expr, then_branch, else_branch));
        }

        Ok(expr)
    }

    // logic_or       → logic_and ( "or" logic_and )* ;
    fn logic_or(&mut self) -> Result<Expr, Error> {
        let mut expr = self.logic_and()?;

        while matches!(self, TokenType::Or) {
            let operator = self.previous().clone();
            let right = self.logic_and()?;
            expr = Expr::logical(expr, operator, right);
        }

        Ok(expr)
    }

    // logic_and      → equality ( "and" equality )* ;
    fn logic_and(&mut self) -> Result<Expr, Error> {
        let mut expr = self.equality()?;

        while matches!(self, TokenType::And) {
            let operator = self.previous().clone();
            let right = self.equality()?;
            expr = Expr::logical(expr, operator, right);
        }

        Ok(expr)
    }

    // equality       → comparison ( ( "!=" | "==" ) comparison )* ;
    binary_level!(equality, comparison, [BangEqual, EqualEqual]);
    // comparison     → term ( ( ">" | ">=" | "<" | "<=" ) term )* ;
    binary_level!(comparison, term, [Greater, GreaterEqual, Less, LessEqual]);
    // term           → factor ( ( "-" | "+" ) factor )* ;
    binary_level!(term, factor, [Minus, Plus]);
    // factor         → unary ( ( "/" | "*" ) unary )* ;
    binary_level!(factor, unary, [Slash, Star]);

    // unary          → ( "!" | "-" ) unary | call ;
    // Lox disallows a leading unary "+"; we report it but keep parsing the
    // operand so the rest of the expression still resolves.
    fn unary(&mut self) -> Result<Expr, Error> {
        if matches!(self, TokenType::Plus) {
            let operator = self.previous().clone();
            self.error(&operator, "Unary '+' is not supported.");
            return self.unary();
        }

        if matches!(self, TokenType::Bang, TokenType::Minus) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            return Ok(Expr::unary(operator, right));
        }

        self.call()
    }

    // call           → primary ( "(" arguments? ")" | "." IDENTIFIER )* ;
    // Matches a primary expression followed by zero or more calls/gets. With
    // no parentheses or dots, this is just a bare primary expression.
    fn call(&mut self) -> Result<Expr, Error> {
        let mut expr = self.primary()?;

        loop {
            if matches!(self, TokenType::LeftParen) {
                expr = self.finish_call(expr)?;
            } else if matches!(self, TokenType::Dot) {
                let name = self.consume(TokenType::Identifier, "Expect property name after '.'.")?;
                expr = Expr::get(expr, name);
            } else {
                break;
            }
        }

        Ok(expr)
    }

    // arguments      → expression ( "," expression )* ;
    fn finish_call(&mut self, callee: Expr) -> Result<Expr, Error> {
        let mut arguments: Vec<Expr> = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                if arguments.len() >= 255 {
                    // Only report, don't throw — the parser is still in a
                    // perfectly valid state, it just found too many args.
                    let peek = self.peek().clone();
                    self.error(&peek, "Can't have more than 255 arguments.");
                }

                arguments.push(self.expression()?);

                if !matches!(self, TokenType::Comma) {
                    break;
                }
            }
        }

        let paren = self.consume(TokenType::RightParen, "Expect ')' after arguments.")?;

        Ok(Expr::call(callee, paren, arguments))
    }

    // primary        → NUMBER | STRING | "true" | "false" | "nil" | "this"
    //                | "(" expression ")" | IDENTIFIER | "super" "." IDENTIFIER
    //                | "fun" "(" params? ")" block ;
    fn primary(&mut self) -> Result<Expr, Error> {
        if matches!(self, TokenType::False) {
            return Ok(Expr::literal(LiteralValue::Boolean(false)));
        }
        if matches!(self, TokenType::True) {
            return Ok(Expr::literal(LiteralValue::Boolean(true)));
        }
        if matches!(self, TokenType::Nil) {
            return Ok(Expr::literal(LiteralValue::Null));
        }

        if let TokenType::Number { literal } = &self.peek().token_type {
            let literal = *literal;
            self.advance();
            return Ok(Expr::literal(LiteralValue::Number(literal)));
        }
        if let TokenType::String { literal } = &self.peek().token_type {
            let literal = literal.clone();
            self.advance();
            return Ok(Expr::literal(LiteralValue::String(literal)));
        }

        if matches!(self, TokenType::Super) {
            let keyword = self.previous().clone();
            self.consume(TokenType::Dot, "Expect '.' after 'super'.")?;
            let method = self.consume(TokenType::Identifier, "Expect superclass method name.")?;
            return Ok(Expr::super_(keyword, method));
        }
        if matches!(self, TokenType::This) {
            return Ok(Expr::this(self.previous().clone()));
        }
        if matches!(self, TokenType::Identifier) {
            return Ok(Expr::variable(self.previous().clone()));
        }
        if matches!(self, TokenType::LeftParen) {
            let expr = self.expression()?;
            self.consume(TokenType::RightParen, "Expect ')' after expression.")?;
            return Ok(Expr::grouping(expr));
        }
        if matches!(self, TokenType::Fun) {
            let function = self.function_body("function")?;
            return Ok(Expr::function(function));
        }

        let peek = self.peek().clone();
        Err(self.error(&peek, "Expect expression."))
    }

    fn synchronize(&mut self) {
        self.advance();

        while !self.is_at_end() {
            if self.previous().token_type == TokenType::Semicolon {
                return;
            }

            match self.peek().token_type {
                TokenType::Class
                | TokenType::Fun
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => {
                    self.advance();
                }
            };
        }
    }

    // returns true if the current token is of the given type. Unlike
    // advance(), it never consumes the token, it only looks at it.
    fn check(&self, token_type: TokenType) -> bool {
        if self.is_at_end() {
            return false;
        }
        self.peek().token_type == token_type
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.current)
            .expect("Peek into end of token stream.")
    }

    fn previous(&self) -> &Token {
        self.tokens
            .get(self.current - 1)
            .expect("Previous was empty.")
    }

    fn consume(&mut self, token_type: TokenType, msg: &str) -> Result<Token, Error> {
        if self.check(token_type) {
            Ok(self.advance().clone())
        } else {
            let peek = self.peek().clone();
            Err(self.error(&peek, msg))
        }
    }

    fn error(&mut self, token: &Token, msg: &str) -> Error {
        self.reporter.token_error(token, msg);
        Error::Parse
    }
}
