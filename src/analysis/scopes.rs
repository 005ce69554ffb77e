//! Name scopes.
//!
//! A stack of scopes maps identifiers to their types. Each scope remembers
//! the return type of the function it belongs to, inherited by nested
//! block scopes; the global scope's return type is void. Lookup walks
//! outwards; insertion checks only the current scope for collisions.

use std::collections::HashMap;

use crate::common::multiphase::Identifier;
use crate::types::TypeId;

struct Scope {
    entities: HashMap<Identifier, TypeId>,
    return_type: TypeId,
}

pub struct Scopes {
    stack: Vec<Scope>,
}

impl Scopes {
    pub fn new(global_return_type: TypeId) -> Self {
        Self {
            stack: vec![Scope {
                entities: HashMap::new(),
                return_type: global_return_type,
            }],
        }
    }

    pub fn enter_block(&mut self) {
        let return_type = self.current().return_type;
        self.stack.push(Scope {
            entities: HashMap::new(),
            return_type,
        });
    }

    pub fn enter_function(&mut self, return_type: TypeId) {
        self.stack.push(Scope {
            entities: HashMap::new(),
            return_type,
        });
    }

    pub fn leave(&mut self) {
        debug_assert!(self.stack.len() > 1, "the global scope is never left");
        self.stack.pop();
    }

    fn current(&self) -> &Scope {
        self.stack.last().expect("the global scope always exists")
    }

    /// Bind `name` in the current scope, reporting `false` on a collision
    /// with a name already bound there.
    pub fn add_variable(&mut self, name: Identifier, ty: TypeId) -> bool {
        let scope = self.stack.last_mut().expect("the global scope always exists");
        if scope.entities.contains_key(&name) {
            return false;
        }
        scope.entities.insert(name, ty);
        true
    }

    /// Bind `name` in the global scope regardless of the current scope.
    /// Functions live here so that recursive calls resolve while the
    /// function's own body is still being analyzed.
    pub fn add_global(&mut self, name: Identifier, ty: TypeId) -> bool {
        let scope = self.stack.first_mut().expect("the global scope always exists");
        if scope.entities.contains_key(&name) {
            return false;
        }
        scope.entities.insert(name, ty);
        true
    }

    /// The type bound to `name`, searching the current scope and then its
    /// ancestors.
    pub fn lookup(&self, name: &Identifier) -> Option<TypeId> {
        self.stack
            .iter()
            .rev()
            .find_map(|scope| scope.entities.get(name).copied())
    }

    pub fn return_type(&self) -> TypeId {
        self.current().return_type
    }
}

#[cfg(test)]
mod tests {
    use crate::types::Types;

    use super::*;

    #[test]
    fn lookup_walks_outwards_and_insertion_checks_locally() {
        let types = Types::new();
        let mut scopes = Scopes::new(types.void());
        let x = Identifier::from("x");

        assert!(scopes.add_variable(x.clone(), types.int()));
        assert!(!scopes.add_variable(x.clone(), types.char_()));

        scopes.enter_block();
        assert_eq!(scopes.lookup(&x), Some(types.int()));
        // Shadowing in an inner scope is a fresh binding.
        assert!(scopes.add_variable(x.clone(), types.char_()));
        assert_eq!(scopes.lookup(&x), Some(types.char_()));
        scopes.leave();

        assert_eq!(scopes.lookup(&x), Some(types.int()));
        assert_eq!(scopes.lookup(&Identifier::from("y")), None);
    }

    #[test]
    fn return_types_are_inherited_by_blocks() {
        let types = Types::new();
        let mut scopes = Scopes::new(types.void());
        assert_eq!(scopes.return_type(), types.void());

        scopes.enter_function(types.int());
        scopes.enter_block();
        assert_eq!(scopes.return_type(), types.int());
        scopes.leave();
        scopes.leave();
        assert_eq!(scopes.return_type(), types.void());
    }
}
