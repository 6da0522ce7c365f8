mod class;
mod diagnostics;
mod environment;
mod error;
mod function;
mod interpreter;
mod object;
mod parser;
mod resolver;
mod scanner;
mod syntax;
mod token;

use std::env;
use std::fs;
use std::io::{self, Write};
use std::process::exit;

use diagnostics::Reporter;
use interpreter::Interpreter;
use parser::Parser;
use resolver::Resolver;
use scanner::Scanner;
use syntax::Stmt;

struct Lox {
    interpreter: Interpreter,
}

impl Lox {
    fn new() -> Self {
        Lox { interpreter: Interpreter::new() }
    }

    fn run_file(&mut self, path: &str) -> io::Result<()> {
        let source = fs::read_to_string(path)?;
        let mut reporter = Reporter::new();
        self.run(source, false, &mut reporter);

        if reporter.had_error {
            exit(65);
        }
        if reporter.had_runtime_error {
            exit(70);
        }
        Ok(())
    }

    fn run_prompt(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut reporter = Reporter::new();

        loop {
            print!("> ");
            io::stdout().flush()?;

            let mut line = String::new();
            if stdin.read_line(&mut line)? == 0 {
                println!();
                break;
            }

            self.run(line, true, &mut reporter);
            // A syntax error on one REPL line shouldn't poison the rest of
            // the session; a runtime error's exit-code implication is left
            // alone, matching jlox.
            reporter.reset_error();
        }

        Ok(())
    }

    fn run(&mut self, source: String, repl_mode: bool, reporter: &mut Reporter) {
        let mut scanner = Scanner::new(source, reporter);
        let tokens = scanner.scan_tokens().clone();

        let mut parser = Parser::new(&tokens, repl_mode, reporter);
        let statements: Vec<Stmt> =
            parser.parse().into_iter().filter(|stmt| !matches!(stmt, Stmt::Null)).collect();

        if reporter.had_error {
            return;
        }

        let mut resolver = Resolver::new(&mut self.interpreter, reporter);
        resolver.resolve_stmts(&statements);

        if reporter.had_error {
            return;
        }

        self.interpreter.interpret(&statements, reporter);
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut lox = Lox::new();

    match args.len() {
        1 => {
            if let Err(err) = lox.run_prompt() {
                eprintln!("{err}");
                exit(74);
            }
        }
        2 => {
            if let Err(err) = lox.run_file(&args[1]) {
                eprintln!("{err}");
                exit(74);
            }
        }
        _ => {
            eprintln!("Usage: lox-interpreter-rs [script]");
            exit(64);
        }
    }
}
