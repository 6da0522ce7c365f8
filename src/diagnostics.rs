use crate::token::{Token, TokenType};

/// Collects the two process-wide flags the book keeps as globals
/// (`hadError` / `hadRuntimeError`) as fields on an explicit object that gets
/// threaded through the scanner, parser, and resolver instead.
#[derive(Debug, Default)]
pub struct Reporter {
    pub had_error: bool,
    pub had_runtime_error: bool,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, line: i32, message: &str) {
        self.report(line, "", message);
    }

    pub fn token_error(&mut self, token: &Token, message: &str) {
        if token.token_type == TokenType::Eof {
            self.report(token.line, " at end", message);
        } else {
            self.report(token.line, &format!(" at '{}'", token.lexeme), message);
        }
    }

    pub fn runtime_error(&mut self, token: &Token, message: &str) {
        eprintln!("{message}\n[line {}]", token.line);
        self.had_runtime_error = true;
    }

    // Unlike token_error, an unused local is advisory: it doesn't stop the
    // program from running, so it never sets had_error.
    pub fn warn_token(&mut self, token: &Token, message: &str) {
        eprintln!("[line {}] Warning at '{}': {}", token.line, token.lexeme, message);
    }

    fn report(&mut self, line: i32, location: &str, message: &str) {
        eprintln!("[line {line}] Error{location}: {message}");
        self.had_error = true;
    }

    // The REPL clears the syntax-error flag between lines so one bad line
    // doesn't poison the rest of the session; a runtime error is left as-is,
    // matching jlox (only the exit code it feeds into resets per line).
    pub fn reset_error(&mut self) {
        self.had_error = false;
    }
}
