// SPDX-License-Identifier: MPL-2.0

//! Cursor-following helpers shared by every "get all X" operation.
//!
//! The server decides when a listing ends: a page without a cursor (or with
//! an empty one) is the last page. Nothing here assumes a total count.

use chrono::{DateTime, Utc};
use std::future::Future;

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, cursor: Option<String>) -> Self {
        Self { items, cursor }
    }
}

/// Reported to the caller after every page has been applied.
#[derive(Debug, Clone, Copy)]
pub struct PageProgress<'a> {
    /// Page number (1-indexed) within this call.
    pub page: u32,
    pub page_items: usize,
    pub total_items: usize,
    /// Cursor for the next page, `None` on the last page.
    pub cursor: Option<&'a str>,
}

pub type PageCallback<'a> = &'a (dyn Fn(&PageProgress<'_>) + Send + Sync);

/// Progress sink for callers that don't care.
pub fn ignore_progress(_: &PageProgress<'_>) {}

/// Follow cursors from `start_cursor` until the server stops returning one.
///
/// `extract_cursor` sees the page before `extract_items` consumes it. Pages
/// are applied strictly in cursor order; the first error aborts the listing.
pub async fn fetch_all_pages<P, T, E, F, Fut, I, C>(
    start_cursor: Option<String>,
    fetch_one: F,
    extract_items: I,
    extract_cursor: C,
    on_page: PageCallback<'_>,
) -> Result<Vec<T>, E>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<P, E>>,
    I: Fn(P) -> Vec<T>,
    C: Fn(&P) -> Option<String>,
{
    drive(
        start_cursor,
        fetch_one,
        extract_items,
        extract_cursor,
        None::<(fn(&T) -> Option<DateTime<Utc>>, DateTime<Utc>)>,
        on_page,
    )
    .await
}

/// Like [`fetch_all_pages`], but stops after the first page whose oldest item
/// was created before `cutoff`. Items older than the cutoff are dropped; items
/// without a readable timestamp are kept.
pub async fn fetch_pages_until<P, T, E, F, Fut, I, C, S>(
    fetch_one: F,
    extract_items: I,
    extract_cursor: C,
    timestamp: S,
    cutoff: DateTime<Utc>,
    on_page: PageCallback<'_>,
) -> Result<Vec<T>, E>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<P, E>>,
    I: Fn(P) -> Vec<T>,
    C: Fn(&P) -> Option<String>,
    S: Fn(&T) -> Option<DateTime<Utc>>,
{
    drive(
        None,
        fetch_one,
        extract_items,
        extract_cursor,
        Some((timestamp, cutoff)),
        on_page,
    )
    .await
}

async fn drive<P, T, E, F, Fut, I, C, S>(
    start_cursor: Option<String>,
    mut fetch_one: F,
    extract_items: I,
    extract_cursor: C,
    bound: Option<(S, DateTime<Utc>)>,
    on_page: PageCallback<'_>,
) -> Result<Vec<T>, E>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<P, E>>,
    I: Fn(P) -> Vec<T>,
    C: Fn(&P) -> Option<String>,
    S: Fn(&T) -> Option<DateTime<Utc>>,
{
    let mut items = Vec::new();
    let mut cursor = start_cursor;
    let mut page_number = 0u32;

    loop {
        let page = fetch_one(cursor.clone()).await?;
        let next = extract_cursor(&page).filter(|c| !c.is_empty());
        let mut page_items = extract_items(page);
        page_number += 1;

        let mut reached_cutoff = false;
        if let Some((timestamp, cutoff)) = &bound {
            reached_cutoff = page_items
                .iter()
                .filter_map(timestamp)
                .min()
                .is_some_and(|oldest| oldest < *cutoff);
            page_items.retain(|item| timestamp(item).is_none_or(|t| t >= *cutoff));
        }

        let page_count = page_items.len();
        items.extend(page_items);

        on_page(&PageProgress {
            page: page_number,
            page_items: page_count,
            total_items: items.len(),
            cursor: next.as_deref(),
        });

        if reached_cutoff {
            break;
        }

        match next {
            None => break,
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                tracing::warn!(cursor = %next, "server repeated a cursor, stopping pagination");
                break;
            }
            Some(next) => cursor = Some(next),
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Mutex;

    /// Serve `pages` in order; page `i` carries cursor `"c{i+1}"` unless it is last.
    fn scripted(pages: Vec<Vec<u32>>) -> impl FnMut(Option<String>) -> std::future::Ready<Result<Page<u32>, String>> {
        let total = pages.len();
        move |cursor| {
            let index = match cursor.as_deref() {
                None => 0,
                Some(c) => c.trim_start_matches('c').parse::<usize>().unwrap(),
            };
            let next = (index + 1 < total).then(|| format!("c{}", index + 1));
            std::future::ready(Ok(Page::new(pages[index].clone(), next)))
        }
    }

    #[tokio::test]
    async fn test_collects_every_page() {
        let seen = Mutex::new(Vec::new());
        let on_page = |p: &PageProgress<'_>| seen.lock().unwrap().push((p.page, p.total_items));

        let items = fetch_all_pages(
            None,
            scripted(vec![vec![1, 2, 3], vec![4], vec![], vec![5, 6]]),
            |p: Page<u32>| p.items,
            |p: &Page<u32>| p.cursor.clone(),
            &on_page,
        )
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 4), (3, 4), (4, 6)]);
    }

    #[tokio::test]
    async fn test_starts_from_given_cursor() {
        let items = fetch_all_pages(
            Some("c1".to_string()),
            scripted(vec![vec![1], vec![2], vec![3]]),
            |p: Page<u32>| p.items,
            |p: &Page<u32>| p.cursor.clone(),
            &ignore_progress,
        )
        .await
        .unwrap();

        assert_eq!(items, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_empty_cursor_ends_listing() {
        let items = fetch_all_pages(
            None,
            |_| std::future::ready(Ok::<_, String>(Page::new(vec![7u32], Some(String::new())))),
            |p: Page<u32>| p.items,
            |p: &Page<u32>| p.cursor.clone(),
            &ignore_progress,
        )
        .await
        .unwrap();

        assert_eq!(items, vec![7]);
    }

    #[tokio::test]
    async fn test_repeated_cursor_terminates() {
        let mut calls = 0;
        let items = fetch_all_pages(
            None,
            |_| {
                calls += 1;
                std::future::ready(Ok::<_, String>(Page::new(vec![1u32], Some("same".into()))))
            },
            |p: Page<u32>| p.items,
            |p: &Page<u32>| p.cursor.clone(),
            &ignore_progress,
        )
        .await
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_error_aborts_listing() {
        let result = fetch_all_pages(
            None,
            |cursor: Option<String>| {
                std::future::ready(match cursor {
                    None => Ok(Page::new(vec![1u32], Some("c1".into()))),
                    Some(_) => Err("boom".to_string()),
                })
            },
            |p: Page<u32>| p.items,
            |p: &Page<u32>| p.cursor.clone(),
            &ignore_progress,
        )
        .await;

        assert_eq!(result.unwrap_err(), "boom");
    }

    #[tokio::test]
    async fn test_stops_at_cutoff_before_cursor_exhaustion() {
        let now = Utc::now();
        // Values are ages in days; the server would keep paging forever.
        let pages = vec![vec![0u32, 1, 2], vec![3, 4, 9], vec![10, 11]];
        let mut fetched = 0;
        let mut source = scripted(pages);

        let items = fetch_pages_until(
            |cursor| {
                fetched += 1;
                source(cursor)
            },
            |p: Page<u32>| p.items,
            |p: &Page<u32>| p.cursor.clone(),
            |age: &u32| Some(now - Duration::days(*age as i64)),
            now - Duration::days(5),
            &ignore_progress,
        )
        .await
        .unwrap();

        assert_eq!(fetched, 2);
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
    }
}
