use std::collections::HashMap;

use crate::brick::BrickType;
use crate::error::{ConfigurationError, Result};
use crate::{collect, hub, nop, queue, switch, vtep};

/// Name to factory table consulted by `Graph::create`. Built explicitly at start-up.
#[derive(Clone, Default)]
pub struct Registry {
    types: HashMap<&'static str, BrickType>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// A registry holding every brick type shipped with the crate.
    pub fn with_builtins() -> Registry {
        let types = [
            nop::BRICK_TYPE,
            hub::BRICK_TYPE,
            queue::BRICK_TYPE,
            collect::BRICK_TYPE,
            switch::BRICK_TYPE,
            vtep::BRICK_TYPE,
        ];
        Registry {
            types: types.iter().map(|ty| (ty.name, *ty)).collect(),
        }
    }

    pub fn register(&mut self, ty: BrickType) -> Result<()> {
        if self.types.contains_key(ty.name) {
            return Err(ConfigurationError::DuplicateType(ty.name.to_string()).into());
        }
        self.types.insert(ty.name, ty);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&BrickType> {
        self.types.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.keys().copied()
    }
}
