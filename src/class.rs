use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::Error;
use crate::function::Function;
use crate::object::Object;
use crate::token::Token;

// The instance stores the state, the class stores the behaviour.
#[derive(Debug)]
pub struct LoxClass {
    pub name: String,
    pub superclass: Option<Rc<RefCell<LoxClass>>>,
    pub methods: HashMap<String, Function>,
    pub static_methods: HashMap<String, Function>,
}

impl LoxClass {
    pub fn find_method(&self, name: &str) -> Option<Function> {
        if let Some(method) = self.methods.get(name) {
            return Some(method.clone());
        }
        self.superclass
            .as_ref()
            .and_then(|superclass| superclass.borrow().find_method(name))
    }

    pub fn find_static_method(&self, name: &str) -> Option<Function> {
        if let Some(method) = self.static_methods.get(name) {
            return Some(method.clone());
        }
        self.superclass
            .as_ref()
            .and_then(|superclass| superclass.borrow().find_static_method(name))
    }

    // `Get` on a class value itself (not an instance) only ever resolves a
    // static method — there is no instance to fall back to fields on.
    pub fn get_static(class: &Rc<RefCell<LoxClass>>, name: &Token) -> Result<Object, Error> {
        class
            .borrow()
            .find_static_method(&name.lexeme)
            .map(Object::Callable)
            .ok_or_else(|| Error::Runtime {
                token: name.clone(),
                message: format!("Undefined property '{}'.", name.lexeme),
            })
    }
}

#[derive(Debug)]
pub struct LoxInstance {
    pub class: Rc<RefCell<LoxClass>>,
    fields: HashMap<String, Object>,
}

impl LoxInstance {
    // Returns a new `LoxInstance` wrapped in an `Object::Instance`.
    pub fn new(class: &Rc<RefCell<LoxClass>>) -> Object {
        let instance = LoxInstance {
            class: Rc::clone(class),
            fields: HashMap::new(),
        };

        Object::Instance(Rc::new(RefCell::new(instance)))
    }

    // Returns a member field of this instance, falling back to a bound
    // method on its class.
    pub fn get(&self, name: &Token, instance: &Object) -> Result<Object, Error> {
        if let Some(field) = self.fields.get(&name.lexeme) {
            Ok(field.clone())
        } else if let Some(method) = self.class.borrow().find_method(&name.lexeme) {
            Ok(Object::Callable(method.bind(instance.clone())))
        } else {
            Err(Error::Runtime {
                token: name.clone(),
                message: format!("Undefined property '{}'.", name.lexeme),
            })
        }
    }

    // Lox allows freely creating new fields on instances, so there's no need
    // to check whether the key is already present.
    pub fn set(&mut self, name: &Token, value: Object) {
        self.fields.insert(name.lexeme.clone(), value);
    }
}
