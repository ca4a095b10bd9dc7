//! A bounded page cache keyed by page number, evicting least-recently-used
//! entries once it grows past capacity. Dirty pages never live here; they
//! stay in the active transaction until commit.

use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;

pub struct PageCache {
    entries: LruCache<u32, Rc<[u8]>>,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, page_number: u32) -> Option<Rc<[u8]>> {
        self.entries.get(&page_number).cloned()
    }

    pub fn insert(&mut self, page_number: u32, bytes: Rc<[u8]>) {
        self.entries.put(page_number, bytes);
    }

    pub fn invalidate(&mut self, page_number: u32) {
        self.entries.pop(&page_number);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = PageCache::new(2);
        cache.insert(1, Rc::from(vec![1u8]));
        cache.insert(2, Rc::from(vec![2u8]));
        cache.get(1); // touch page 1 so it's more recent than page 2
        cache.insert(3, Rc::from(vec![3u8]));

        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
    }
}
