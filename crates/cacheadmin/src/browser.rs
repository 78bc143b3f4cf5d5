//! Paginated, sorted key listings over any adapter.
//!
//! Every page request restarts enumeration from the beginning, collects the
//! full filtered key set (bounded by the scan iteration cap), then sorts and
//! slices it. Metadata is only fetched for the page slice unless the sort
//! order needs it for every key.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendAdapter, EnumerationStrategy};
use crate::constants::{
    DEFAULT_MAX_SCAN_ITERATIONS, DEFAULT_METADATA_BATCH, DEFAULT_METADATA_CONCURRENCY,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
use crate::error::{Error, Result};
use crate::key::{Key, KeySummary};
use crate::pattern::Pattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Key,
    Ttl,
    Size,
}

impl FromStr for SortField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "key" | "name" => Ok(Self::Key),
            "ttl" => Ok(Self::Ttl),
            "size" => Ok(Self::Size),
            other => Err(Error::validation(format!("unknown sort field: {other}"))),
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Key => "key",
            Self::Ttl => "ttl",
            Self::Size => "size",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            other => Err(Error::validation(format!("unknown sort order: {other}"))),
        }
    }
}

/// One page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseRequest {
    /// Glob pattern; `None` lists every key.
    pub pattern: Option<String>,
    pub sort: SortField,
    pub order: SortOrder,
    /// Zero-based page index.
    pub page: usize,
    pub page_size: usize,
}

impl Default for BrowseRequest {
    fn default() -> Self {
        Self {
            pattern: None,
            sort: SortField::Key,
            order: SortOrder::Asc,
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl BrowseRequest {
    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub const fn sort(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort = field;
        self.order = order;
        self
    }

    #[must_use]
    pub const fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    fn validate(&self) -> Result<(Pattern, usize)> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::validation(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        // the end of the page must be addressable too
        let offset = self
            .page
            .checked_mul(self.page_size)
            .filter(|offset| offset.checked_add(self.page_size).is_some())
            .ok_or_else(|| Error::validation(format!("page {} is out of range", self.page)))?;
        let pattern = Pattern::parse_optional(self.pattern.as_deref())?;
        Ok((pattern, offset))
    }
}

/// One page of key summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyPage {
    pub items: Vec<KeySummary>,
    /// Number of keys matching the pattern.
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    /// Index of the following page, if it has items.
    pub next_page: Option<usize>,
    /// Enumeration hit the iteration cap; `total_count` is a lower bound.
    pub truncated: bool,
}

/// Tuning for [`KeyBrowser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowseOptions {
    pub max_scan_iterations: usize,
    pub metadata_concurrency: usize,
    pub metadata_batch: usize,
}

impl Default for BrowseOptions {
    fn default() -> Self {
        Self {
            max_scan_iterations: DEFAULT_MAX_SCAN_ITERATIONS,
            metadata_concurrency: DEFAULT_METADATA_CONCURRENCY,
            metadata_batch: DEFAULT_METADATA_BATCH,
        }
    }
}

/// Builds [`KeyPage`]s from adapters.
#[derive(Debug, Clone, Default)]
pub struct KeyBrowser {
    options: BrowseOptions,
}

impl KeyBrowser {
    #[must_use]
    pub const fn new(options: BrowseOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub const fn options(&self) -> &BrowseOptions {
        &self.options
    }

    pub async fn browse(
        &self,
        adapter: &dyn BackendAdapter,
        request: &BrowseRequest,
    ) -> Result<KeyPage> {
        let (pattern, offset) = request.validate()?;
        let (mut keys, truncated) = self.collect_keys(adapter, &pattern).await?;
        let total_count = keys.len();

        let items = if request.sort == SortField::Key {
            if request.order == SortOrder::Desc {
                keys.reverse();
            }
            let slice = page_slice(&keys, offset, request.page_size);
            self.summarize(adapter, slice).await?
        } else {
            let mut summaries = self.summarize(adapter, &keys).await?;
            summaries.sort_by(|a, b| compare_summaries(a, b, request.sort, request.order));
            page_slice(&summaries, offset, request.page_size).to_vec()
        };

        let next_page = offset
            .checked_add(request.page_size)
            .is_some_and(|end| end < total_count)
            .then(|| request.page + 1);

        tracing::debug!(
            pattern = %pattern,
            total = total_count,
            returned = items.len(),
            truncated,
            "browsed keys"
        );

        Ok(KeyPage {
            items,
            total_count,
            page: request.page,
            page_size: request.page_size,
            next_page,
            truncated,
        })
    }

    /// All keys matching `pattern`, sorted byte-wise and deduplicated.
    ///
    /// The flag is true when cursor enumeration stopped at the iteration cap.
    pub async fn collect_keys(
        &self,
        adapter: &dyn BackendAdapter,
        pattern: &Pattern,
    ) -> Result<(Vec<Key>, bool)> {
        let mut keys = Vec::new();
        let mut truncated = false;

        match adapter.strategy() {
            EnumerationStrategy::Snapshot => {
                let batch = adapter.enumerate_keys(pattern, None).await?;
                keys.extend(batch.keys);
            }
            EnumerationStrategy::Cursor => {
                let mut cursor: Option<String> = None;
                let mut iterations = 0;
                loop {
                    let batch = adapter.enumerate_keys(pattern, cursor.as_deref()).await?;
                    iterations += 1;
                    keys.extend(batch.keys);

                    match batch.next {
                        None => break,
                        Some(_) if iterations >= self.options.max_scan_iterations => {
                            tracing::warn!(
                                iterations,
                                collected = keys.len(),
                                "key enumeration stopped at the iteration cap"
                            );
                            truncated = true;
                            break;
                        }
                        next => cursor = next,
                    }
                }
            }
        }

        keys.retain(|k| pattern.matches(k.as_bytes()));
        keys.sort_unstable();
        keys.dedup();
        Ok((keys, truncated))
    }

    /// Metadata for `keys`, fetched in batches with bounded concurrency.
    async fn summarize(
        &self,
        adapter: &dyn BackendAdapter,
        keys: &[Key],
    ) -> Result<Vec<KeySummary>> {
        let batches: Vec<Vec<KeySummary>> = futures::stream::iter(
            keys.chunks(self.options.metadata_batch.max(1)),
        )
        .map(|chunk| adapter.summarize(chunk))
        .buffered(self.options.metadata_concurrency.max(1))
        .try_collect()
        .await?;

        Ok(batches.into_iter().flatten().collect())
    }
}

fn page_slice<T>(items: &[T], offset: usize, page_size: usize) -> &[T] {
    let start = offset.min(items.len());
    let end = offset.saturating_add(page_size).min(items.len());
    &items[start..end]
}

/// Values without a sort key go last in both directions; ties fall back to
/// key order.
fn compare_summaries(a: &KeySummary, b: &KeySummary, field: SortField, order: SortOrder) -> Ordering {
    let by_field = match field {
        SortField::Key => Ordering::Equal,
        SortField::Ttl => compare_optional(a.ttl.remaining(), b.ttl.remaining(), order),
        SortField::Size => compare_optional(a.size, b.size, order),
    };
    by_field.then_with(|| match (field, order) {
        (SortField::Key, SortOrder::Desc) => b.key.cmp(&a.key),
        _ => a.key.cmp(&b.key),
    })
}

fn compare_optional<T: Ord>(a: Option<T>, b: Option<T>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => match order {
            SortOrder::Asc => x.cmp(&y),
            SortOrder::Desc => y.cmp(&x),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
