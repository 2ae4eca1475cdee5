//! Client-side paging over a ListWatcher's list capability.

use metrics::counter;
use tracing::{debug, warn};

use remora_core::Object;

use crate::{ClassifyError, ListOptions, ListWatcher};

/// Page limit requested per LIST call unless the caller overrides it.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// A fully assembled list: all pages stitched together.
#[derive(Debug, Clone, Default)]
pub struct PagedList {
    /// Resource version of the first page; the collection is consistent at
    /// this point in the server's change log.
    pub resource_version: String,
    /// Whether the server actually paginated the response.
    pub paginated: bool,
    pub items: Vec<Object>,
}

/// Follows continuation tokens until the collection is exhausted. A
/// continuation that expires between pages is unrecoverable server-side, so
/// the pager falls back to one full unpaged list with no resource version.
pub struct ListPager<'a, L: ListWatcher> {
    lw: &'a L,
    page_size: u32,
}

impl<'a, L: ListWatcher> ListPager<'a, L> {
    pub fn new(lw: &'a L) -> Self {
        Self { lw, page_size: DEFAULT_PAGE_SIZE }
    }

    /// Zero disables paging entirely.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// One logical LIST at `resource_version` (empty string means a
    /// consistent read, so the parameter is omitted on the wire).
    pub async fn list(&self, resource_version: &str) -> Result<PagedList, L::Error> {
        let rv = (!resource_version.is_empty()).then(|| resource_version.to_string());

        if self.page_size == 0 {
            let full = self
                .lw
                .list(ListOptions { resource_version: rv, ..Default::default() })
                .await?;
            return Ok(PagedList {
                resource_version: full.metadata.resource_version.unwrap_or_default(),
                paginated: false,
                items: full.items,
            });
        }

        let mut out = PagedList::default();
        let mut continue_token: Option<String> = None;
        loop {
            let first_page = continue_token.is_none();
            let opts = ListOptions {
                // Continuation tokens carry the read position; the RV only
                // belongs on the first page.
                resource_version: if first_page { rv.clone() } else { None },
                limit: Some(self.page_size),
                continue_token: continue_token.clone(),
            };
            let page = match self.lw.list(opts).await {
                Ok(page) => page,
                Err(e) if !first_page && e.is_expired() => {
                    warn!(error = %e, "continue token expired mid-list; falling back to a full list");
                    counter!("list_expired_fallback_total", 1u64);
                    let full = self.lw.list(ListOptions::default()).await?;
                    return Ok(PagedList {
                        resource_version: full.metadata.resource_version.unwrap_or_default(),
                        paginated: false,
                        items: full.items,
                    });
                }
                Err(e) => return Err(e),
            };

            counter!("list_pages_total", 1u64);
            if first_page {
                out.resource_version = page.metadata.resource_version.clone().unwrap_or_default();
                out.paginated = page.metadata.continue_token.is_some();
            }
            debug!(items = page.items.len(), "list page received");
            out.items.extend(page.items);

            match page.metadata.continue_token {
                Some(token) => continue_token = Some(token),
                None => break,
            }
        }
        Ok(out)
    }
}
