//! Slot derivation: recurring schedules + committed bookings + live
//! holds in, chronological open/closed slots out. Deterministic for
//! fixed inputs, so the per-day results are safe to memoize.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::cache::{availability_key, CacheBackend};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::limits::{
    MAX_QUERY_WINDOW_MS, MAX_VALID_TIMESTAMP_MS, MIN_SLOT_MINUTES, MIN_VALID_TIMESTAMP_MS,
};
use crate::model::{now_ms, Ms, Resource, Slot, Window};
use crate::schedule::{self, DayPlan};
use crate::store::{Allocation, ResourceStore, TimeWindowStore};

// ── Interval algebra ─────────────────────────────────────────────

/// Merge sorted overlapping/adjacent windows into disjoint windows.
pub fn merge_overlapping(sorted: &[Window]) -> Vec<Window> {
    let mut merged: Vec<Window> = Vec::new();
    for &window in sorted {
        if let Some(last) = merged.last_mut()
            && window.start <= last.end
        {
            last.end = last.end.max(window.end);
            continue;
        }
        merged.push(window);
    }
    merged
}

/// Sweep line: time ranges where allocation count >= capacity.
/// Returns sorted, merged windows of fully-saturated time.
pub fn saturated_windows(allocs: &[Window], capacity: u32) -> Vec<Window> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        return merge_overlapping(allocs);
    }

    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        if *delta > 0 {
            count += *delta as u32;
        } else {
            count -= (-*delta) as u32;
        }

        if count >= capacity && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity
            && let Some(start) = saturated_start.take()
            && *time > start
        {
            result.push(Window::new(start, *time));
        }
    }

    result
}

/// Reduce live allocations to the windows no further booking fits into,
/// given the resource's concurrent capacity. Input must be sorted by
/// start.
pub fn busy_windows(allocations: &[Allocation], capacity: u32) -> Vec<Window> {
    let windows: Vec<Window> = allocations.iter().map(|a| a.window).collect();
    saturated_windows(&windows, capacity.max(1))
}

/// Partition a day's open window into fixed-size slots, marking each
/// against the busy set. The grid is anchored at the open minute; a
/// trailing remainder shorter than one slot is not emitted.
pub fn partition_day(day: &Window, slot_ms: Ms, busy: &[Window]) -> Vec<Slot> {
    let mut slots = Vec::new();
    let mut start = day.start;
    while start + slot_ms <= day.end {
        let window = Window::new(start, start + slot_ms);
        let occupied = busy.iter().any(|b| b.overlaps(&window));
        slots.push(Slot {
            start: window.start,
            end: window.end,
            available: !occupied,
        });
        start += slot_ms;
    }
    slots
}

// ── Calculator ───────────────────────────────────────────────────

pub struct AvailabilityCalculator {
    resources: Arc<dyn ResourceStore>,
    windows: TimeWindowStore,
    cache: Arc<dyn CacheBackend>,
    config: CoreConfig,
}

impl AvailabilityCalculator {
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        windows: TimeWindowStore,
        cache: Arc<dyn CacheBackend>,
        config: CoreConfig,
    ) -> Result<Self, CoreError> {
        if config.slot_minutes < MIN_SLOT_MINUTES {
            return Err(CoreError::Validation("slot granularity too fine"));
        }
        Ok(Self { resources, windows, cache, config })
    }

    pub(crate) async fn active_resource(&self, id: Ulid) -> Result<Resource, CoreError> {
        let resource = self
            .resources
            .get_resource(id)
            .await?
            .ok_or(CoreError::NotFound(id))?;
        if !resource.active {
            return Err(CoreError::Validation("resource inactive"));
        }
        Ok(resource)
    }

    /// Ordered open/closed slots for the query window. Per-day results
    /// are served from the cache when present; misses compute and store
    /// with a short TTL. Cache trouble degrades to recompute, never to
    /// an error.
    pub async fn compute_slots(
        &self,
        resource_id: Ulid,
        range: Window,
    ) -> Result<Vec<Slot>, CoreError> {
        validate_query(&range)?;
        let resource = self.active_resource(resource_id).await?;
        let now = now_ms();
        let started = Instant::now();

        let mut slots = Vec::new();
        for date in schedule::local_dates_covering(resource.timezone, &range)? {
            let day = self.day_slots(&resource, date, now).await?;
            slots.extend(day.into_iter().filter(|s| s.window().overlaps(&range)));
        }

        metrics::counter!(crate::observability::SLOTS_COMPUTED_TOTAL).increment(1);
        metrics::histogram!(crate::observability::SLOTS_COMPUTE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(slots)
    }

    async fn day_slots(
        &self,
        resource: &Resource,
        date: NaiveDate,
        now: Ms,
    ) -> Result<Vec<Slot>, CoreError> {
        let key = availability_key(resource.tenant, resource.id, date);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Slot>>(&raw) {
                Ok(slots) => {
                    metrics::counter!(crate::observability::CACHE_HITS_TOTAL).increment(1);
                    return Ok(slots);
                }
                Err(e) => tracing::debug!("undecodable cache entry {key}: {e}"),
            },
            Ok(None) => {}
            Err(e) => tracing::debug!("cache read {key} failed: {e}"),
        }
        metrics::counter!(crate::observability::CACHE_MISSES_TOTAL).increment(1);

        let slots = self.compute_day(resource, date, now).await?;
        match serde_json::to_string(&slots) {
            Ok(raw) => {
                if let Err(e) = self.cache.put(&key, raw, self.config.cache_ttl_ms).await {
                    tracing::debug!("cache write {key} failed: {e}");
                }
            }
            Err(e) => tracing::debug!("cache encode {key} failed: {e}"),
        }
        Ok(slots)
    }

    async fn compute_day(
        &self,
        resource: &Resource,
        date: NaiveDate,
        now: Ms,
    ) -> Result<Vec<Slot>, CoreError> {
        let rows = self
            .windows
            .schedules_between(resource.id, date, date)
            .await?;

        let hours = match schedule::resolve_day(&rows, date)? {
            DayPlan::Closed => return Ok(Vec::new()),
            DayPlan::Open(hours) => hours,
            DayPlan::Unscheduled => match self.config.fallback_hours {
                Some(hours) => hours,
                None => return Ok(Vec::new()),
            },
        };

        let day_window = schedule::day_window_utc(resource.timezone, date, hours)?;
        let allocations = self
            .windows
            .live_allocations(resource.id, &day_window, now)
            .await?;
        let busy = busy_windows(&allocations, resource.capacity);
        let slot_ms = Ms::from(self.config.slot_minutes) * 60_000;
        Ok(partition_day(&day_window, slot_ms, &busy))
    }

    /// Write-through invalidation: drop the memoized slot lists for the
    /// affected dates now, instead of waiting out the TTL. Cache errors
    /// are logged; the entry will age out regardless.
    pub async fn invalidate(&self, tenant: Ulid, resource_id: Ulid, dates: &[NaiveDate]) {
        for &date in dates {
            let key = availability_key(tenant, resource_id, date);
            if let Err(e) = self.cache.remove(&key).await {
                tracing::warn!("cache invalidation for {key} failed: {e}");
            }
        }
    }
}

fn validate_query(range: &Window) -> Result<(), CoreError> {
    if range.end <= range.start {
        return Err(CoreError::InvalidWindow("range start must precede end"));
    }
    if range.start < MIN_VALID_TIMESTAMP_MS || range.end > MAX_VALID_TIMESTAMP_MS {
        return Err(CoreError::LimitExceeded("timestamp out of range"));
    }
    if range.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(CoreError::LimitExceeded("query window too wide"));
    }
    Ok(())
}
