//! Background sweep that force-releases and force-recycles stuck browser
//! instances and idles out dead tabs (C11).
//!
//! Both hooks it calls — `BrowserPool::force_release_stuck` and
//! `TabPool::sweep_idle` — already exist; this module is just the periodic
//! driver plus logging, grounded on the teacher's cleanup-interval tasks in
//! `browser_pool.rs`/`resource_cache.rs`.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::browser_pool::BrowserPool;
use crate::tab_pool::TabPool;

pub struct Watchdog {
    pool: Arc<BrowserPool>,
    tab_pool: Arc<TabPool>,
    interval: Duration,
    force_release_after: Duration,
    hard_stuck_after: Duration,
    idle_timeout: Duration,
}

impl Watchdog {
    pub fn new(
        pool: Arc<BrowserPool>,
        tab_pool: Arc<TabPool>,
        interval: Duration,
        force_release_after: Duration,
        hard_stuck_after: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            tab_pool,
            interval,
            force_release_after,
            hard_stuck_after,
            idle_timeout,
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        })
    }

    async fn sweep_once(&self) {
        let (force_released, recycled) = self
            .pool
            .force_release_stuck(self.force_release_after, self.hard_stuck_after)
            .await;
        let idle_recycled = self.pool.recycle_idle(self.idle_timeout).await;
        self.tab_pool.sweep_idle().await;
        if force_released > 0 || recycled > 0 || idle_recycled > 0 {
            info!(
                force_released,
                recycled,
                idle_recycled,
                "watchdog sweep recovered stuck and idle resources"
            );
        }
    }
}
