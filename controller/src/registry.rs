//! registry.rs — registration table and start barrier
//!
//! The controller's whole mutable state lives here, behind one lock owned by
//! `main`. The table accumulates `(plane, ordinal, interval)` registrations
//! until every expected key is present (ACCUMULATING → RUNNING), at which
//! point `last_start` is latched and exactly one `start` broadcast fires.
//! The latch clears only when the table drains back to empty.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use leosat_types::{BoundFilter, HilTable, IntervalKey, SatIntervalKey};

pub struct Registry {
    num_planes: u32,
    num_sats: u32,
    /// `num_planes · num_sats · |intervals|`
    tot_sat_ints: usize,
    /// Key → last registration payload
    sat_ints: HashMap<SatIntervalKey, Value>,
    /// Latched when the table first fills; cleared when it drains to empty
    last_start: Option<f64>,
    hil: HilTable,
}

impl Registry {
    pub fn new(num_planes: u32, num_sats: u32, num_intervals: usize, hil: HilTable) -> Self {
        Self {
            num_planes,
            num_sats,
            tot_sat_ints: num_planes as usize * num_sats as usize * num_intervals,
            sat_ints: HashMap::new(),
            last_start: None,
            hil,
        }
    }

    pub fn num_planes(&self) -> u32 {
        self.num_planes
    }

    pub fn num_sats(&self) -> u32 {
        self.num_sats
    }

    pub fn count(&self) -> usize {
        self.sat_ints.len()
    }

    pub fn total(&self) -> usize {
        self.tot_sat_ints
    }

    pub fn last_start(&self) -> Option<f64> {
        self.last_start
    }

    pub fn hil(&self) -> &HilTable {
        &self.hil
    }

    /// Validate a registration payload against the constellation bounds.
    /// `plane` and `ordinal` are closed 1-based ranges; `interval` > 0.
    /// Numeric strings are coerced the way the legacy REST surface did.
    pub fn sat_int_params(&self, payload: &Value) -> Option<SatIntervalKey> {
        let plane = coerce_u32(payload.get("plane")?)?;
        let ordinal = coerce_u32(payload.get("ordinal")?)?;
        let interval = coerce_f64(payload.get("interval")?)?;

        if (1..=self.num_planes).contains(&plane)
            && (1..=self.num_sats).contains(&ordinal)
            && interval > 0.0
            && interval.is_finite()
        {
            Some(SatIntervalKey::new(plane, ordinal, interval))
        } else {
            None
        }
    }

    /// Insert (or replace) a registration. Returns the latched start time
    /// when this insertion completes the barrier — the `size < N →
    /// size == N` edge fires `start` exactly once; re-registering a known
    /// key replaces its payload without re-firing.
    pub fn register(&mut self, key: SatIntervalKey, payload: Value, now: f64) -> Option<f64> {
        let was_full = self.sat_ints.len() == self.tot_sat_ints;
        self.sat_ints.insert(key, payload);

        if !was_full && self.sat_ints.len() == self.tot_sat_ints {
            Some(*self.last_start.get_or_insert(now))
        } else {
            None
        }
    }

    /// Remove a registration. Returns false for unknown keys (reported as a
    /// warning, not an error). Draining the table clears the latch.
    pub fn unregister(&mut self, key: &SatIntervalKey) -> bool {
        let known = self.sat_ints.remove(key).is_some();
        if self.sat_ints.is_empty() {
            self.last_start = None;
        }
        known
    }

    /// Delete every row matching the plane/ordinal filters. No plane means
    /// the whole table goes (any ordinal is ignored); with a plane, an
    /// absent ordinal matches every satellite on it. Returns the number of
    /// rows removed; clears the latch if the table drains.
    pub fn remove_matching(
        &mut self,
        plane: Option<&BoundFilter>,
        ordinal: Option<&BoundFilter>,
    ) -> usize {
        let before = self.sat_ints.len();
        match plane {
            None => self.sat_ints.clear(),
            Some(plane) => {
                self.sat_ints.retain(|k, _| {
                    !(plane.contains(k.plane)
                        && ordinal.map_or(true, |o| o.contains(k.ordinal)))
                });
            }
        }
        if self.sat_ints.is_empty() {
            self.last_start = None;
        }
        before - self.sat_ints.len()
    }

    /// Latch (or re-use) the start time for a (re)broadcast of `start`.
    pub fn force_start(&mut self, now: f64) -> f64 {
        *self.last_start.get_or_insert(now)
    }

    /// Registration coverage line used in action acknowledgements.
    pub fn status_line(&self, verbose: bool) -> String {
        let count = self.sat_ints.len();
        let total = self.tot_sat_ints;
        if count == total {
            if verbose {
                format!("INFO: All {total} satellite intervals are registered.")
            } else {
                "OK".to_string()
            }
        } else if count > 0 {
            format!("WARNING: only {count} of {total} satellite intervals are registered.")
        } else {
            format!("WARNING: No satellite intervals out of {total} are registered.")
        }
    }

    /// Per-interval sorted `PP_SS` listing plus the coverage summary.
    pub fn info_report(&self) -> String {
        let mut by_interval: BTreeMap<IntervalKey, Vec<String>> = BTreeMap::new();
        for key in self.sat_ints.keys() {
            if let Some(interval) = IntervalKey::new(key.interval) {
                by_interval
                    .entry(interval)
                    .or_default()
                    .push(key.plane_ordinal_tag());
            }
        }

        let mut lines = Vec::with_capacity(by_interval.len() + 1);
        for (interval, mut tags) in by_interval {
            tags.sort();
            lines.push(format!("{interval}: {tags:?}"));
        }
        lines.push(self.status_line(true));
        lines.join("\n")
    }
}

fn coerce_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|u| u32::try_from(u).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reg_payload(plane: u32, ordinal: u32, interval: f64) -> Value {
        json!({"plane": plane, "ordinal": ordinal, "interval": interval})
    }

    fn fill(reg: &mut Registry, planes: u32, sats: u32, interval: f64) -> Option<f64> {
        let mut fired = None;
        for p in 1..=planes {
            for s in 1..=sats {
                let key = SatIntervalKey::new(p, s, interval);
                if let Some(ts) = reg.register(key, reg_payload(p, s, interval), 100.0) {
                    assert!(fired.is_none(), "start fired more than once");
                    fired = Some(ts);
                }
            }
        }
        fired
    }

    #[test]
    fn start_fires_exactly_once_on_the_full_edge() {
        let mut reg = Registry::new(2, 3, 1, HilTable::new());
        let fired = fill(&mut reg, 2, 3, 5.0);
        assert_eq!(fired, Some(100.0));
        assert_eq!(reg.count(), 6);
        assert_eq!(reg.last_start(), Some(100.0));
    }

    #[test]
    fn reregistration_is_idempotent_and_silent() {
        let mut reg = Registry::new(1, 2, 1, HilTable::new());
        fill(&mut reg, 1, 2, 10.0).unwrap();

        // Same key again with a fresh payload: replaced, no second start.
        let key = SatIntervalKey::new(1, 1, 10.0);
        assert_eq!(reg.register(key, reg_payload(1, 1, 10.0), 999.0), None);
        assert_eq!(reg.count(), 2);
        assert_eq!(reg.last_start(), Some(100.0));
    }

    #[test]
    fn register_unregister_roundtrip() {
        let mut reg = Registry::new(1, 2, 1, HilTable::new());
        let key = SatIntervalKey::new(1, 1, 10.0);
        assert_eq!(reg.register(key, reg_payload(1, 1, 10.0), 1.0), None);
        assert!(reg.unregister(&key));
        assert_eq!(reg.count(), 0);
        assert!(!reg.unregister(&key)); // unknown now — warning, not error
    }

    #[test]
    fn latch_clears_when_table_drains() {
        let mut reg = Registry::new(1, 1, 1, HilTable::new());
        let key = SatIntervalKey::new(1, 1, 10.0);
        assert_eq!(reg.register(key, reg_payload(1, 1, 10.0), 42.0), Some(42.0));
        assert!(reg.unregister(&key));
        assert_eq!(reg.last_start(), None);

        // Filling again latches a fresh time.
        assert_eq!(reg.register(key, reg_payload(1, 1, 10.0), 43.0), Some(43.0));
    }

    #[test]
    fn refill_after_partial_drain_does_not_refire_latched_time_change() {
        let mut reg = Registry::new(1, 2, 1, HilTable::new());
        fill(&mut reg, 1, 2, 10.0).unwrap();

        let key = SatIntervalKey::new(1, 2, 10.0);
        assert!(reg.unregister(&key));
        assert_eq!(reg.last_start(), Some(100.0)); // not empty — latch survives

        // Refilling fires start again but with the surviving latch time.
        assert_eq!(reg.register(key, reg_payload(1, 2, 10.0), 500.0), Some(100.0));
    }

    #[test]
    fn stop_filter_by_plane() {
        let mut reg = Registry::new(2, 3, 1, HilTable::new());
        fill(&mut reg, 2, 3, 5.0).unwrap();

        let removed = reg.remove_matching(Some(&BoundFilter::One(1)), None);
        assert_eq!(removed, 3);
        assert_eq!(reg.count(), 3);
        assert_eq!(reg.last_start(), Some(100.0)); // plane 2 still registered

        let removed = reg.remove_matching(None, None);
        assert_eq!(removed, 3);
        assert_eq!(reg.last_start(), None);
    }

    #[test]
    fn stop_filter_plane_narrowed_by_ordinal_range() {
        let mut reg = Registry::new(1, 4, 1, HilTable::new());
        fill(&mut reg, 1, 4, 5.0).unwrap();

        let removed =
            reg.remove_matching(Some(&BoundFilter::One(1)), Some(&BoundFilter::Range(2, 3)));
        assert_eq!(removed, 2);
        assert_eq!(reg.count(), 2);
    }

    #[test]
    fn stop_filter_without_plane_ignores_ordinal() {
        let mut reg = Registry::new(2, 3, 1, HilTable::new());
        fill(&mut reg, 2, 3, 5.0).unwrap();

        // No plane means the ordinal never narrows anything: all six go.
        let removed = reg.remove_matching(None, Some(&BoundFilter::One(2)));
        assert_eq!(removed, 6);
        assert_eq!(reg.count(), 0);
        assert_eq!(reg.last_start(), None);
    }

    #[test]
    fn cardinality_never_exceeds_total() {
        let mut reg = Registry::new(1, 2, 2, HilTable::new());
        fill(&mut reg, 1, 2, 5.0);
        fill(&mut reg, 1, 2, 9.0);
        assert!(reg.count() <= reg.total());
        assert_eq!(reg.count(), 4);
    }

    #[test]
    fn validation_rejects_out_of_range() {
        let reg = Registry::new(2, 3, 1, HilTable::new());
        assert!(reg.sat_int_params(&reg_payload(1, 1, 10.0)).is_some());
        assert!(reg.sat_int_params(&reg_payload(0, 1, 10.0)).is_none());
        assert!(reg.sat_int_params(&reg_payload(3, 1, 10.0)).is_none());
        assert!(reg.sat_int_params(&reg_payload(1, 4, 10.0)).is_none());
        assert!(reg.sat_int_params(&json!({"plane": 1, "ordinal": 1, "interval": 0})).is_none());
        assert!(reg.sat_int_params(&json!({"plane": 1, "ordinal": 1})).is_none());
        // String coercion is tolerated, as in the legacy surface.
        assert!(reg
            .sat_int_params(&json!({"plane": "2", "ordinal": "3", "interval": "5.0"}))
            .is_some());
    }

    #[test]
    fn info_report_groups_by_interval() {
        let mut reg = Registry::new(1, 2, 2, HilTable::new());
        fill(&mut reg, 1, 2, 5.0);
        fill(&mut reg, 1, 2, 10.0);
        let report = reg.info_report();
        assert!(report.contains("5: [\"01_01\", \"01_02\"]"));
        assert!(report.contains("10: [\"01_01\", \"01_02\"]"));
        assert!(report.contains("All 4 satellite intervals are registered."));
    }

    #[test]
    fn status_lines() {
        let mut reg = Registry::new(1, 2, 1, HilTable::new());
        assert!(reg.status_line(false).contains("No satellite intervals out of 2"));
        reg.register(
            SatIntervalKey::new(1, 1, 10.0),
            reg_payload(1, 1, 10.0),
            1.0,
        );
        assert!(reg.status_line(false).contains("only 1 of 2"));
        reg.register(
            SatIntervalKey::new(1, 2, 10.0),
            reg_payload(1, 2, 10.0),
            1.0,
        );
        assert_eq!(reg.status_line(false), "OK");
    }
}
