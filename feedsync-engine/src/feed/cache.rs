use feedsync_common::model::{
    Id,
    post::{Post, PostMarker},
};
use std::collections::HashSet;

/// Next page number to request. Its absence means the feed is exhausted.
pub type PageCursor = Option<u32>;

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct AppendOutcome {
    pub added: usize,
    pub duplicates: usize,
    pub evicted: Vec<Id<PostMarker>>,
}

/// Ordered, deduplicated and bounded list of posts.
///
/// Order is whatever the server returned, with later pages appended. The
/// capacity is only enforced while appending, by dropping from the tail.
#[derive(Clone, Debug)]
pub struct FeedCache {
    posts: Vec<Post>,
    ids: HashSet<Id<PostMarker>>,
    next_page: PageCursor,
    capacity: usize,
}

impl FeedCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            posts: Vec::new(),
            ids: HashSet::new(),
            next_page: None,
            capacity,
        }
    }

    #[must_use]
    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn next_page(&self) -> PageCursor {
        self.next_page
    }

    pub fn set_next_page(&mut self, next_page: PageCursor) {
        self.next_page = next_page;
    }

    #[must_use]
    pub fn contains(&self, id: &Id<PostMarker>) -> bool {
        self.ids.contains(id)
    }

    #[must_use]
    pub fn get(&self, id: &Id<PostMarker>) -> Option<&Post> {
        self.posts.iter().find(|post| &post.id == id)
    }

    pub fn get_mut(&mut self, id: &Id<PostMarker>) -> Option<&mut Post> {
        self.posts.iter_mut().find(|post| &post.id == id)
    }

    /// Swaps in a fresh head page. Returns the ids that are no longer cached.
    pub fn replace(&mut self, posts: Vec<Post>, next_page: PageCursor) -> Vec<Id<PostMarker>> {
        let previous = std::mem::take(&mut self.posts);
        self.ids.clear();
        self.next_page = next_page;

        for post in posts {
            if self.ids.insert(post.id.clone()) {
                self.posts.push(post);
            }
        }

        previous
            .into_iter()
            .map(|post| post.id)
            .filter(|id| !self.ids.contains(id))
            .collect()
    }

    pub fn append(&mut self, posts: Vec<Post>, next_page: PageCursor) -> AppendOutcome {
        let mut outcome = AppendOutcome::default();
        self.next_page = next_page;

        for post in posts {
            if self.ids.insert(post.id.clone()) {
                self.posts.push(post);
                outcome.added += 1;
            } else {
                outcome.duplicates += 1;
            }
        }

        if self.posts.len() > self.capacity {
            outcome.evicted = self
                .posts
                .drain(self.capacity..)
                .map(|post| post.id)
                .collect();
            for id in &outcome.evicted {
                self.ids.remove(id);
            }
            // Anything past the bound would be evicted again on arrival.
            self.next_page = None;
        }

        outcome
    }

    pub fn remove(&mut self, id: &Id<PostMarker>) -> Option<Post> {
        if !self.ids.remove(id) {
            return None;
        }
        let index = self.posts.iter().position(|post| &post.id == id)?;
        Some(self.posts.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use crate::feed::cache::FeedCache;
    use crate::testing::{post, posts};
    use feedsync_common::model::Id;

    fn ids(cache: &FeedCache) -> Vec<&str> {
        cache.posts().iter().map(|post| post.id.as_str()).collect()
    }

    #[test]
    fn replace_keeps_server_order_and_drops_duplicates() {
        let mut cache = FeedCache::new(10);
        cache.replace(vec![post("b"), post("a"), post("b"), post("c")], Some(2));

        assert_eq!(ids(&cache), ["b", "a", "c"]);
        assert_eq!(cache.next_page(), Some(2));
    }

    #[test]
    fn replace_reports_posts_that_left() {
        let mut cache = FeedCache::new(10);
        cache.replace(posts(["a", "b", "c"]), Some(2));

        let removed = cache.replace(posts(["c", "d"]), None);
        assert_eq!(removed, [Id::new_unchecked("a"), Id::new_unchecked("b")]);
        assert!(!cache.contains(&Id::new_unchecked("a")));
    }

    #[test]
    fn append_dedups_against_whole_cache() {
        let mut cache = FeedCache::new(10);
        cache.replace(posts(["a", "b", "c"]), Some(2));

        let outcome = cache.append(posts(["a", "d", "c", "e"]), Some(3));

        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.duplicates, 2);
        assert_eq!(ids(&cache), ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn append_evicts_tail_past_capacity() {
        let mut cache = FeedCache::new(100);
        let page = |range: std::ops::Range<usize>| {
            range.map(|i| post(&format!("p{i}"))).collect::<Vec<_>>()
        };

        cache.replace(page(0..50), Some(2));
        let outcome = cache.append(page(50..100), Some(3));
        assert!(outcome.evicted.is_empty());
        assert_eq!(cache.next_page(), Some(3));

        let outcome = cache.append(page(100..150), Some(4));
        assert_eq!(cache.len(), 100);
        assert_eq!(outcome.evicted.len(), 50);
        assert_eq!(cache.posts()[0].id.as_str(), "p0");
        assert_eq!(cache.posts()[99].id.as_str(), "p99");
        assert!(!cache.contains(&Id::new_unchecked("p120")));
        assert_eq!(cache.next_page(), None);
    }

    #[test]
    fn remove_forgets_id() {
        let mut cache = FeedCache::new(10);
        cache.replace(posts(["a", "b"]), None);

        assert!(cache.remove(&Id::new_unchecked("a")).is_some());
        assert!(cache.remove(&Id::new_unchecked("a")).is_none());
        assert_eq!(ids(&cache), ["b"]);

        cache.append(posts(["a"]), None);
        assert_eq!(ids(&cache), ["b", "a"]);
    }
}
