//! Scoped acquisition of a usable page bound to a browser (C5).
//!
//! Two modes: tab-pool (reuse idle pages within a browser, bounded by
//! `max_tabs_per_browser`) and context mode (one fresh browser context + one
//! page per capture, used as a fallback). Both expose the same scoped guard
//! so C6 never has to know which mode served a given capture.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::Page;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::browser_pool::{BrowserHandle, BrowserPool};
use crate::config::Settings;
use crate::error::ScreenshotError;

const TAB_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

struct PooledTab {
    tab_id: u64,
    page: Page,
    last_used: Instant,
    created_at: Instant,
    in_use: bool,
}

/// Tabs belonging to one browser, keyed by an index local to that browser
/// (per design notes: indices scoped to the owning browser, no back-pointers).
struct BrowserTabs {
    tabs: Vec<PooledTab>,
}

pub struct TabPool {
    pool: Arc<BrowserPool>,
    settings: Settings,
    per_browser: Mutex<HashMap<usize, BrowserTabs>>,
    next_tab_id: std::sync::atomic::AtomicU64,
}

/// On drop, guarantees either the tab is returned to its browser's idle list
/// (tab-pool mode) or the context/page is closed (context mode) — on every
/// exit path including cancellation.
pub enum PageGuard {
    TabPool {
        browser: BrowserHandle,
        page: Page,
        tab_id: u64,
        tab_pool: Arc<TabPool>,
        returned: bool,
    },
    Context {
        browser: BrowserHandle,
        page: Page,
        closed: bool,
    },
}

impl PageGuard {
    pub fn page(&self) -> &Page {
        match self {
            PageGuard::TabPool { page, .. } => page,
            PageGuard::Context { page, .. } => page,
        }
    }

    pub fn browser_index(&self) -> usize {
        match self {
            PageGuard::TabPool { browser, .. } => browser.instance_id,
            PageGuard::Context { browser, .. } => browser.instance_id,
        }
    }

    pub async fn mark_faulted(&mut self) {
        match self {
            PageGuard::TabPool { browser, .. } => browser.mark_faulted().await,
            PageGuard::Context { browser, .. } => browser.mark_faulted().await,
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        match self {
            PageGuard::TabPool {
                page,
                tab_pool,
                returned,
                browser,
                tab_id,
            } => {
                if *returned {
                    return;
                }
                *returned = true;
                let page = page.clone();
                let tab_pool = tab_pool.clone();
                let browser_index = browser.instance_id;
                let tab_id = *tab_id;
                tokio::spawn(async move {
                    tab_pool.reset_and_return(browser_index, tab_id, page).await;
                });
            }
            PageGuard::Context { page, closed, .. } => {
                if *closed {
                    return;
                }
                *closed = true;
                let page = page.clone();
                tokio::spawn(async move {
                    let _ = page.close().await;
                });
            }
        }
    }
}

impl TabPool {
    pub fn new(pool: Arc<BrowserPool>, settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            pool,
            settings,
            per_browser: Mutex::new(HashMap::new()),
            next_tab_id: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Acquires a page. Prefers tab-pool mode; falls back to context mode on
    /// timeout, failure, or when `enable_tab_reuse` is false (per the Open
    /// Question decision recorded in SPEC_FULL.md/DESIGN.md).
    pub async fn acquire(self: &Arc<Self>, acquire_timeout: Duration) -> Result<PageGuard, ScreenshotError> {
        if !self.settings.enable_tab_reuse {
            return self.acquire_context_mode(acquire_timeout).await;
        }

        match tokio::time::timeout(TAB_ACQUIRE_TIMEOUT, self.acquire_tab_pool_mode()).await {
            Ok(Ok(guard)) => Ok(guard),
            Ok(Err(err)) => {
                warn!(error = %err, "tab-pool acquisition failed, falling back to context mode");
                self.acquire_context_mode(acquire_timeout).await
            }
            Err(_) => {
                warn!("tab-pool acquisition timed out, falling back to context mode");
                self.acquire_context_mode(acquire_timeout).await
            }
        }
    }

    async fn acquire_tab_pool_mode(self: &Arc<Self>) -> Result<PageGuard, ScreenshotError> {
        let browser = self.pool.acquire(Duration::from_secs(10)).await?;
        let browser_index = browser.instance_id;

        let reused = {
            let mut map = self.per_browser.lock().await;
            let entry = map.entry(browser_index).or_insert_with(|| BrowserTabs { tabs: Vec::new() });
            entry
                .tabs
                .iter_mut()
                .find(|t| !t.in_use)
                .map(|t| {
                    t.in_use = true;
                    t.last_used = Instant::now();
                    (t.tab_id, t.page.clone())
                })
        };

        let (tab_id, page) = if let Some(found) = reused {
            found
        } else {
            let mut map = self.per_browser.lock().await;
            let entry = map.entry(browser_index).or_insert_with(|| BrowserTabs { tabs: Vec::new() });
            if entry.tabs.len() >= self.settings.max_tabs_per_browser {
                return Err(ScreenshotError::BrowserUnavailable);
            }
            drop(map);

            let new_page = browser
                .browser
                .lock()
                .await
                .new_page("about:blank")
                .await
                .map_err(|e| ScreenshotError::PageError(e.to_string()))?;
            let tab_id = self.next_tab_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            let mut map = self.per_browser.lock().await;
            let entry = map.entry(browser_index).or_insert_with(|| BrowserTabs { tabs: Vec::new() });
            entry.tabs.push(PooledTab {
                tab_id,
                page: new_page.clone(),
                last_used: Instant::now(),
                created_at: Instant::now(),
                in_use: true,
            });
            (tab_id, new_page)
        };

        Ok(PageGuard::TabPool {
            browser,
            page,
            tab_id,
            tab_pool: self.clone(),
            returned: false,
        })
    }

    async fn acquire_context_mode(self: &Arc<Self>, timeout: Duration) -> Result<PageGuard, ScreenshotError> {
        let browser = self.pool.acquire(timeout).await?;
        let page = browser
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| ScreenshotError::PageError(e.to_string()))?;
        Ok(PageGuard::Context {
            browser,
            page,
            closed: false,
        })
    }

    async fn reset_and_return(&self, browser_index: usize, tab_id: u64, page: Page) {
        let _ = page.goto("about:blank").await;
        let mut map = self.per_browser.lock().await;
        if let Some(entry) = map.get_mut(&browser_index) {
            if let Some(tab) = entry.tabs.iter_mut().find(|t| t.tab_id == tab_id) {
                tab.in_use = false;
                tab.last_used = Instant::now();
            }
        }
    }

    /// Background sweeper: closes tabs idle past `tab_idle_timeout` or aged
    /// past `tab_max_age`. Destruction of the owning browser invalidates its
    /// entry outright (no back-pointers to clean up).
    pub async fn sweep_idle(&self) {
        let mut map = self.per_browser.lock().await;
        for (_browser_index, entry) in map.iter_mut() {
            let mut keep = Vec::new();
            for tab in entry.tabs.drain(..) {
                let expired = !tab.in_use
                    && (tab.last_used.elapsed() > self.settings.tab_idle_timeout
                        || tab.created_at.elapsed() > self.settings.tab_max_age);
                if expired {
                    let _ = tab.page.close().await;
                    debug!("idle tab closed by sweeper");
                } else {
                    keep.push(tab);
                }
            }
            entry.tabs = keep;
        }
    }

    pub async fn drop_browser(&self, browser_index: usize) {
        self.per_browser.lock().await.remove(&browser_index);
    }
}

pub async fn run_sweep_task(tab_pool: Arc<TabPool>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        tab_pool.sweep_idle().await;
    }
}
