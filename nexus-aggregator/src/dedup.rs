use crate::types::CandidatePost;
use std::collections::HashSet;
use tracing::debug;

/// Keep the first candidate for every url, in arrival order.
///
/// Urls are compared as exact strings. This only collapses duplicates inside
/// one batch; the `posts.url` unique constraint handles rows already stored.
pub fn dedup_by_url(posts: Vec<CandidatePost>) -> Vec<CandidatePost> {
    let total = posts.len();
    let mut seen_urls = HashSet::with_capacity(total);

    let unique: Vec<CandidatePost> = posts
        .into_iter()
        .filter(|post| seen_urls.insert(post.url.clone()))
        .collect();

    if unique.len() < total {
        debug!("Removed {} duplicate candidates out of {}", total - unique.len(), total);
    }

    unique
}
