use super::*;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct FilterConfig {
    pub(crate) hide_replies: bool,
    pub(crate) hide_reposts: bool,
    pub(crate) only_zero_likes: bool,
    pub(crate) randomize: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct FilterPatch {
    pub(crate) hide_replies: Option<bool>,
    pub(crate) hide_reposts: Option<bool>,
    pub(crate) only_zero_likes: Option<bool>,
    pub(crate) randomize: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RandomizeTransition {
    Unchanged,
    Reshuffle,
    ForceReset,
}

impl RandomizeTransition {
    pub(crate) fn between(current: bool, requested: bool) -> Self {
        match (current, requested) {
            (false, true) => RandomizeTransition::Reshuffle,
            (true, false) => RandomizeTransition::ForceReset,
            _ => RandomizeTransition::Unchanged,
        }
    }
}

impl FilterConfig {
    pub(crate) fn apply(&mut self, patch: FilterPatch) -> RandomizeTransition {
        if let Some(value) = patch.hide_replies {
            self.hide_replies = value;
        }
        if let Some(value) = patch.hide_reposts {
            self.hide_reposts = value;
        }
        if let Some(value) = patch.only_zero_likes {
            self.only_zero_likes = value;
        }
        let transition = patch
            .randomize
            .map(|value| RandomizeTransition::between(self.randomize, value))
            .unwrap_or(RandomizeTransition::Unchanged);
        if let Some(value) = patch.randomize {
            self.randomize = value;
        }
        transition
    }
}

pub(crate) fn is_excluded(post: &Post, config: &FilterConfig) -> bool {
    (config.hide_replies && post.kind.is_reply())
        || (config.hide_reposts && post.kind.is_repost())
        || (config.only_zero_likes && post.like_count != 0)
}

pub(crate) fn next_visible(posts: &[Post], from: usize, config: &FilterConfig) -> usize {
    let mut idx = from.min(posts.len());
    while idx < posts.len() && is_excluded(&posts[idx], config) {
        idx += 1;
    }
    idx
}

pub(crate) fn count_visible(posts: &[Post], from: usize, config: &FilterConfig) -> usize {
    posts
        .iter()
        .skip(from)
        .filter(|post| !is_excluded(post, config))
        .count()
}
