use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::{error::Error, object::Object, token::Token};

pub struct Environment {
    values: HashMap<String, Object>,
    enclosing: Option<Rc<RefCell<Environment>>>, // Parent-pointer
}

impl Environment {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn from(enclosing: &Rc<RefCell<Environment>>) -> Self {
        Self {
            values: HashMap::new(),
            enclosing: Some(Rc::clone(enclosing)),
        }
    }

    pub fn define(&mut self, name: String, value: Object) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &Token) -> Result<Object, Error> {
        let key = &*name.lexeme;
        if let Some(value) = self.values.get(key) {
            Ok((*value).clone())
        } else if let Some(ref enclosing) = self.enclosing {
            // it is probably faster to iteratively walk the chain but recursion here is prettier
            enclosing.borrow().get(name)
        } else {
            Err(Error::Runtime {
                token: name.clone(),
                message: format!("Undefined variable '{}'.", key),
            })
        }
    }

    pub fn assign(&mut self, name: &Token, value: Object) -> Result<(), Error> {
        let key = &*name.lexeme;
        if self.values.contains_key(key) {
            self.values.insert(name.lexeme.clone(), value);
            Ok(())
        } else if let Some(ref enclosing) = self.enclosing {
            enclosing.borrow_mut().assign(name, value)
        } else {
            Err(Error::Runtime {
                token: name.clone(),
                message: format!("Undefined variable '{}'.", key),
            })
        }
    }

    // Walk exactly `depth` enclosing hops. The resolver guarantees the name
    // exists in the scope at that distance, so a miss here means the
    // resolver and interpreter have disagreed about depth, not that the Lox
    // program did something wrong.
    fn ancestor(env: &Rc<RefCell<Environment>>, depth: usize) -> Rc<RefCell<Environment>> {
        let mut current = Rc::clone(env);
        for _ in 0..depth {
            let next = current
                .borrow()
                .enclosing
                .as_ref()
                .expect("resolver depth exceeds environment chain")
                .clone();
            current = next;
        }
        current
    }

    pub fn get_at(env: &Rc<RefCell<Environment>>, depth: usize, name: &str) -> Object {
        Environment::ancestor(env, depth)
            .borrow()
            .values
            .get(name)
            .cloned()
            .expect("resolved local missing from its scope")
    }

    pub fn assign_at(env: &Rc<RefCell<Environment>>, depth: usize, name: &str, value: Object) {
        Environment::ancestor(env, depth)
            .borrow_mut()
            .values
            .insert(name.to_string(), value);
    }
}
