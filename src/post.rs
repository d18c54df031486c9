use super::*;

use chrono::{DateTime, Local, TimeZone};
use std::fmt::Display;

const REASON_REPOST: &str = "app.bsky.feed.defs#reasonRepost";
const EMPTY_TEXT: &str = "No content available";
const UNKNOWN_HANDLE: &str = "unknown";

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PostKind {
    Normal,
    ReplyTo(String),
    RepostOf(String),
}

impl PostKind {
    pub(crate) fn label(&self) -> String {
        match self {
            PostKind::Normal => "Normal Post".to_string(),
            PostKind::ReplyTo(handle) => format!("Reply to @{}", handle),
            PostKind::RepostOf(handle) => format!("Repost of @{}", handle),
        }
    }

    pub(crate) fn is_reply(&self) -> bool {
        matches!(self, PostKind::ReplyTo(_))
    }

    pub(crate) fn is_repost(&self) -> bool {
        matches!(self, PostKind::RepostOf(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Post {
    pub(crate) id: String,
    pub(crate) record_uri: String,
    pub(crate) text: String,
    pub(crate) created_at: String,
    pub(crate) kind: PostKind,
    pub(crate) like_count: u64,
    pub(crate) repost_count: u64,
    pub(crate) reply_count: u64,
    pub(crate) permalink: String,
}

pub(crate) fn normalize_page(raw: &[FeedViewPost]) -> Vec<Post> {
    raw.iter().map(|item| normalize_post(item, &Local)).collect()
}

pub(crate) fn normalize_post<Tz>(item: &FeedViewPost, tz: &Tz) -> Post
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let post = &item.post;
    let is_repost = item
        .reason
        .as_ref()
        .map(|reason| reason.kind == REASON_REPOST)
        .unwrap_or(false);

    let kind = if is_repost {
        PostKind::RepostOf(handle_or_unknown(Some(&post.author.handle)))
    } else if post.record.reply.is_some() {
        let target = item
            .reply
            .as_ref()
            .and_then(|reply| reply.parent.as_ref())
            .and_then(|parent| parent.author.as_ref())
            .map(|author| author.handle.as_str());
        PostKind::ReplyTo(handle_or_unknown(target))
    } else {
        PostKind::Normal
    };

    let record_uri = if is_repost {
        post.viewer
            .as_ref()
            .and_then(|viewer| viewer.repost.clone())
            .unwrap_or_else(|| post.uri.clone())
    } else {
        post.uri.clone()
    };

    let text = if post.record.text.trim().is_empty() {
        EMPTY_TEXT.to_string()
    } else {
        post.record.text.clone()
    };

    Post {
        id: post.uri.clone(),
        record_uri,
        text,
        created_at: format_created_at(post.record.created_at.as_deref().unwrap_or(""), tz),
        kind,
        like_count: post.like_count.unwrap_or(0),
        repost_count: post.repost_count.unwrap_or(0),
        reply_count: post.reply_count.unwrap_or(0),
        permalink: permalink(&post.author.did, &post.uri),
    }
}

fn handle_or_unknown(handle: Option<&str>) -> String {
    match handle.map(str::trim) {
        Some(handle) if !handle.is_empty() => handle.to_string(),
        _ => UNKNOWN_HANDLE.to_string(),
    }
}

pub(crate) fn format_created_at<Tz>(raw: &str, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(parsed) => parsed
            .with_timezone(tz)
            .format("%B %-d, %Y, %-I:%M %p")
            .to_string(),
        Err(_) => raw.to_string(),
    }
}

pub(crate) fn permalink(author_did: &str, uri: &str) -> String {
    let rkey = uri.rsplit('/').next().unwrap_or(uri);
    format!("https://bsky.app/profile/{}/post/{}", author_did, rkey)
}
