//! Bounded memo of parsed statements, keyed by SQL text.

use crate::parser::{ParsedStatement, StatementParser};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// First-in first-out cache in front of a [`StatementParser`].
///
/// Prepared statements are re-prepared with the same text over and over;
/// the analysis result only depends on that text.
pub struct ParseCache {
    parser: StatementParser,
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, Arc<ParsedStatement>>,
    order: VecDeque<String>,
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            parser: StatementParser::new(),
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Parse `sql`, or return the earlier result for the same text.
    pub fn get_or_parse(&self, sql: &str) -> Arc<ParsedStatement> {
        if self.capacity == 0 {
            return Arc::new(self.parser.parse(sql));
        }

        if let Some(hit) = self.lock().entries.get(sql) {
            return Arc::clone(hit);
        }

        let parsed = Arc::new(self.parser.parse(sql));

        let mut inner = self.lock();
        if !inner.entries.contains_key(sql) {
            while inner.order.len() >= self.capacity {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
            inner.order.push_back(sql.to_string());
            inner.entries.insert(sql.to_string(), Arc::clone(&parsed));
        }
        parsed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
