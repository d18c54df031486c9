use super::*;

/// Ids admitted into the queue during the current session. Entries are only
/// dropped by `clear`, so a deleted post can never be re-admitted by an
/// overlapping page.
#[derive(Clone, Debug, Default)]
pub(crate) struct SeenLedger {
    ids: HashSet<String>,
}

impl SeenLedger {
    pub(crate) fn mark(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    pub(crate) fn admit(&mut self, posts: Vec<Post>) -> Vec<Post> {
        posts.into_iter().filter(|post| self.mark(&post.id)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn clear(&mut self) {
        self.ids.clear();
    }
}

#[cfg(test)]
impl SeenLedger {
    pub(crate) fn seen(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}
