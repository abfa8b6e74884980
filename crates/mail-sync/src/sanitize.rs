//! Markup stripping for message bodies
//!
//! Stored content must never carry executable markup or styling. The body is
//! parsed as an HTML fragment with an empty tag allow-list: script and style
//! elements go with their content, every other element is unwrapped to its
//! text, and comments are dropped. Text is re-serialized escaped, so
//! `&lt;script&gt;` cannot turn back into a tag.

use std::collections::HashSet;

/// Strip all markup from `input`, returning escaped plain text
pub fn sanitize_text(input: &str) -> String {
    ammonia::Builder::empty()
        .clean_content_tags(HashSet::from(["script", "style"]))
        .strip_comments(true)
        .clean(input)
        .to_string()
}
