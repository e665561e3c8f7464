//! In-process aggregation of per-request statistics uploaded by edge nodes.
//!
//! Uploads are folded into one counter map per statistic kind and drained
//! periodically by `tasks::stats_flush`, which adds the counts onto the
//! stored rows.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::NaiveDate;
use common::api::HttpRequestStatUpload;

use crate::{error::invalid_argument, persistence::stats::HttpStatRow, Result};

pub const KIND_CITY: &str = "city";
pub const KIND_PROVIDER: &str = "provider";
pub const KIND_SYSTEM: &str = "system";
pub const KIND_BROWSER: &str = "browser";
pub const KIND_FIREWALL: &str = "firewallRuleGroup";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StatKey {
    server_id: i64,
    item: String,
    version: String,
    period: String,
}

type CounterMap = HashMap<StatKey, i64>;

/// Counter maps, each guarded by its own lock. Increments hold the lock for
/// the whole read-modify-write.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    cities: Mutex<CounterMap>,
    providers: Mutex<CounterMap>,
    systems: Mutex<CounterMap>,
    browsers: Mutex<CounterMap>,
    firewall_groups: Mutex<CounterMap>,
}

fn lock(map: &Mutex<CounterMap>) -> MutexGuard<'_, CounterMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

fn increment(map: &Mutex<CounterMap>, key: StatKey, count: i64) {
    let mut guard = lock(map);
    *guard.entry(key).or_insert(0) += count;
}

fn resolve_period(value: &str, len: usize, fallback: String, what: &str) -> Result<String> {
    if value.is_empty() {
        return Ok(fallback);
    }
    if value.len() != len || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid_argument(format!("invalid {what}: {value}")));
    }
    Ok(value.to_string())
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one upload into the maps. Missing month/day buckets default to
    /// `today`.
    pub fn add_upload(&self, upload: &HttpRequestStatUpload, today: NaiveDate) -> Result<()> {
        let month = resolve_period(
            &upload.month,
            6,
            today.format("%Y%m").to_string(),
            "month",
        )?;
        let day = resolve_period(
            &upload.day,
            8,
            today.format("%Y%m%d").to_string(),
            "day",
        )?;

        for stat in &upload.region_cities {
            if stat.country_name.is_empty() {
                continue;
            }
            let item = format!(
                "{}/{}/{}",
                stat.country_name, stat.province_name, stat.city_name
            );
            increment(
                &self.cities,
                StatKey {
                    server_id: stat.server_id,
                    item,
                    version: String::new(),
                    period: month.clone(),
                },
                stat.count,
            );
        }

        for stat in &upload.region_providers {
            if stat.name.is_empty() {
                continue;
            }
            increment(
                &self.providers,
                StatKey {
                    server_id: stat.server_id,
                    item: stat.name.clone(),
                    version: String::new(),
                    period: month.clone(),
                },
                stat.count,
            );
        }

        for (map, stats) in [
            (&self.systems, &upload.systems),
            (&self.browsers, &upload.browsers),
        ] {
            for stat in stats {
                if stat.name.is_empty() {
                    continue;
                }
                increment(
                    map,
                    StatKey {
                        server_id: stat.server_id,
                        item: stat.name.clone(),
                        version: stat.version.clone(),
                        period: month.clone(),
                    },
                    stat.count,
                );
            }
        }

        for stat in &upload.firewall_rule_groups {
            if stat.http_firewall_rule_group_id <= 0 {
                continue;
            }
            increment(
                &self.firewall_groups,
                StatKey {
                    server_id: stat.server_id,
                    item: stat.http_firewall_rule_group_id.to_string(),
                    version: stat.action.clone(),
                    period: day.clone(),
                },
                stat.count,
            );
        }

        Ok(())
    }

    /// Swap every map out and return the collected rows.
    pub fn drain(&self) -> Vec<HttpStatRow> {
        let mut rows = Vec::new();
        for (kind, map) in [
            (KIND_CITY, &self.cities),
            (KIND_PROVIDER, &self.providers),
            (KIND_SYSTEM, &self.systems),
            (KIND_BROWSER, &self.browsers),
            (KIND_FIREWALL, &self.firewall_groups),
        ] {
            let taken = std::mem::take(&mut *lock(map));
            rows.extend(taken.into_iter().map(|(key, count)| HttpStatRow {
                kind: kind.to_string(),
                server_id: key.server_id,
                item: key.item,
                version: key.version,
                period: key.period,
                count,
            }));
        }
        rows
    }

    pub fn is_empty(&self) -> bool {
        [
            &self.cities,
            &self.providers,
            &self.systems,
            &self.browsers,
            &self.firewall_groups,
        ]
        .iter()
        .all(|map| lock(map).is_empty())
    }
}
