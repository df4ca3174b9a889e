// Per-state string intern pool.
// Interning makes content equality coincide with handle identity, so
// string comparison and table-key hashing stay cheap.

use ahash::AHashSet;
use std::rc::Rc;

pub struct StringInterner {
    pool: AHashSet<Rc<str>>,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner {
            pool: AHashSet::new(),
        }
    }

    pub fn intern(&mut self, s: &str) -> Rc<str> {
        if let Some(existing) = self.pool.get(s) {
            return existing.clone();
        }
        let rc: Rc<str> = Rc::from(s);
        self.pool.insert(rc.clone());
        rc
    }

    pub fn intern_owned(&mut self, s: String) -> Rc<str> {
        if let Some(existing) = self.pool.get(s.as_str()) {
            return existing.clone();
        }
        let rc: Rc<str> = Rc::from(s);
        self.pool.insert(rc.clone());
        rc
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_dedups() {
        let mut pool = StringInterner::new();
        let a = pool.intern("hello");
        let b = pool.intern("hello");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }
}
