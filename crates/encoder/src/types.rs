use std::sync::Mutex;
use std::collections::HashMap;

/// Stream-scoped type ids.
///
/// `id` returns a positive id the first time a name is seen and the negated id
/// on every later lookup, so the caller knows whether a definition must be
/// sent. Ids start at 1.
#[derive(Debug, Default)]
pub struct TypeTable {
    ids: Mutex<HashMap<String, i64>>,
}

impl TypeTable {
    pub fn id(&self, name: &str) -> i64 {
        self.define(name, |_| {})
    }

    /// Like [`TypeTable::id`], running `send` with the new id before the table
    /// is unlocked. Callers that get a negated id back can rely on the
    /// definition having been sent already.
    pub fn define<F>(&self, name: &str, send: F) -> i64
    where
        F: FnOnce(i64),
    {
        let mut ids = match self.ids.lock() {
            Ok(ids) => ids,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(id) = ids.get(name) {
            return -id;
        }

        let id = ids.len() as i64 + 1;
        send(id);
        ids.insert(name.to_string(), id);
        id
    }
}

#[cfg(test)]
mod tests {
    use crate::TypeTable;

    #[test]
    fn repeated_types_are_negated() {
        let table = TypeTable::default();

        assert_eq!(table.id("Texture"), 1);
        assert_eq!(table.id("Buffer"), 2);
        assert_eq!(table.id("Texture"), -1);
        assert_eq!(table.id("Buffer"), -2);
    }

    #[test]
    fn definitions_are_sent_once_per_name() {
        let table = TypeTable::default();
        let mut sent = Vec::new();

        assert_eq!(table.define("Texture", |id| sent.push(id)), 1);
        assert_eq!(table.define("Texture", |id| sent.push(id)), -1);
        assert_eq!(table.define("Sampler", |id| sent.push(id)), 2);

        assert_eq!(sent, vec![1, 2]);
    }
}
