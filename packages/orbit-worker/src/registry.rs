//! registry.rs — per-process worker bookkeeping
//!
//! One mutex guards the producer table, the running and stop sets, and both
//! sidecar maps; producers take it briefly each tick and the bus listener
//! takes it to toggle sidecars or request stops. Debug CSV writers are
//! created lazily per key and closed on disable or stop.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use leosat_types::{colors, GeoSample, SatIntervalKey};

use crate::sink::{format_output_path, DebugCsv};

/// Take the worker-registry lock, recovering from a poisoned mutex (a
/// panicked producer must not wedge the rest of the process).
pub fn lock(registry: &Mutex<WorkerRegistry>) -> MutexGuard<'_, WorkerRegistry> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct WorkerRegistry {
    /// All spawned producer keys (the thread table)
    tasks: HashSet<SatIntervalKey>,
    /// Producers that reached their start-barrier wait
    running: HashSet<SatIntervalKey>,
    /// Keys asked to stop; checked by producers once per tick
    stopped: HashSet<SatIntervalKey>,
    debug_armed: HashSet<SatIntervalKey>,
    debug_sinks: HashMap<SatIntervalKey, DebugCsv>,
    exfilt_armed: HashSet<SatIntervalKey>,

    // Debug-sink construction inputs (frozen configuration)
    format_template: String,
    real_time: bool,
    num_sats: u32,
    num_planes: u32,
}

impl WorkerRegistry {
    pub fn new(format_template: String, real_time: bool, num_planes: u32, num_sats: u32) -> Self {
        Self {
            tasks: HashSet::new(),
            running: HashSet::new(),
            stopped: HashSet::new(),
            debug_armed: HashSet::new(),
            debug_sinks: HashMap::new(),
            exfilt_armed: HashSet::new(),
            format_template,
            real_time,
            num_sats,
            num_planes,
        }
    }

    pub fn format_template(&self) -> &str {
        &self.format_template
    }

    pub fn real_time(&self) -> bool {
        self.real_time
    }

    // ── Producer lifecycle ────────────────────────────────────────────────────

    pub fn add_task(&mut self, key: SatIntervalKey) {
        self.tasks.insert(key);
    }

    pub fn mark_running(&mut self, key: SatIntervalKey) {
        self.running.insert(key);
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_stopped(&self, key: &SatIntervalKey) -> bool {
        self.stopped.contains(key)
    }

    /// Mark every task matching the plane/ordinal predicate for stop.
    /// Returns true when every known task is now stopping.
    pub fn stop_matching<F>(&mut self, matches: F) -> bool
    where
        F: Fn(&SatIntervalKey) -> bool,
    {
        let hits: Vec<SatIntervalKey> = self.tasks.iter().filter(|k| matches(k)).copied().collect();
        for key in hits {
            self.stopped.insert(key);
        }
        self.all_stopped()
    }

    pub fn all_stopped(&self) -> bool {
        !self.tasks.is_empty() && self.stopped.len() >= self.tasks.len()
    }

    /// Keys matching a plane/ordinal predicate (sidecar toggling).
    pub fn keys_matching<F>(&self, matches: F) -> Vec<SatIntervalKey>
    where
        F: Fn(&SatIntervalKey) -> bool,
    {
        self.tasks.iter().filter(|k| matches(k)).copied().collect()
    }

    // ── Sidecars ──────────────────────────────────────────────────────────────

    pub fn arm_debug(&mut self, key: SatIntervalKey) {
        self.debug_armed.insert(key);
    }

    /// Disabling also closes the sink; re-enabling recreates the file.
    pub fn disarm_debug(&mut self, key: &SatIntervalKey) {
        self.debug_armed.remove(key);
        if let Some(mut sink) = self.debug_sinks.remove(key) {
            sink.close();
        }
    }

    pub fn arm_exfilt(&mut self, key: SatIntervalKey) {
        self.exfilt_armed.insert(key);
    }

    pub fn disarm_exfilt(&mut self, key: &SatIntervalKey) {
        self.exfilt_armed.remove(key);
    }

    pub fn debug_armed(&self, key: &SatIntervalKey) -> bool {
        self.debug_armed.contains(key)
    }

    pub fn exfilt_armed(&self, key: &SatIntervalKey) -> bool {
        self.exfilt_armed.contains(key)
    }

    pub fn close_all_debug_sinks(&mut self) {
        for (_, mut sink) in self.debug_sinks.drain() {
            sink.close();
        }
    }

    /// Apply sidecar state to one tick's sample: set the marker color, write
    /// the debug CSV row if armed, and report whether the exfiltration
    /// sidecar should fire (it runs outside this lock).
    pub fn apply_sidecars(&mut self, key: &SatIntervalKey, sample: &mut GeoSample, hil: bool) -> bool {
        if hil {
            sample.color = Some(colors::HIL.to_string());
        }

        let debug = self.debug_armed.contains(key);
        let exfilt = self.exfilt_armed.contains(key);
        match (debug, exfilt) {
            (true, true) => sample.color = Some(colors::DEBUG_AND_EXFILT.to_string()),
            (true, false) => sample.color = Some(colors::DEBUG.to_string()),
            (false, true) => sample.color = Some(colors::EXFILT.to_string()),
            (false, false) => {}
        }

        if debug {
            if !self.debug_sinks.contains_key(key) {
                let path =
                    format_output_path(&self.format_template, key, self.num_sats, self.num_planes);
                let sink = DebugCsv::create(&path, self.real_time);
                self.debug_sinks.insert(*key, sink);
            }
            if let Some(sink) = self.debug_sinks.get_mut(key) {
                sink.write_row(sample);
            }
        }

        exfilt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> WorkerRegistry {
        let dir = std::env::temp_dir().join("orbit-worker-registry-test");
        std::fs::create_dir_all(&dir).unwrap();
        let template = dir
            .join("reg_{plane}_{ordinal}_{interval}.csv")
            .to_string_lossy()
            .into_owned();
        WorkerRegistry::new(template, false, 2, 3)
    }

    fn sample_for(key: &SatIntervalKey) -> GeoSample {
        GeoSample {
            label: key.label(),
            plane: key.plane,
            ordinal: key.ordinal,
            interval: key.interval,
            time: 0.0,
            lat: 0.0,
            lon: 0.0,
            alt: 800.0,
            delx: 0.0,
            dely: 0.0,
            delz: 0.0,
            color: None,
        }
    }

    #[test]
    fn color_composition() {
        let mut reg = registry();
        let key = SatIntervalKey::new(1, 1, 10.0);
        reg.add_task(key);

        let mut s = sample_for(&key);
        assert!(!reg.apply_sidecars(&key, &mut s, false));
        assert_eq!(s.color, None);

        let mut s = sample_for(&key);
        reg.apply_sidecars(&key, &mut s, true);
        assert_eq!(s.color.as_deref(), Some(colors::HIL));

        reg.arm_exfilt(key);
        let mut s = sample_for(&key);
        assert!(reg.apply_sidecars(&key, &mut s, false));
        assert_eq!(s.color.as_deref(), Some(colors::EXFILT));

        reg.arm_debug(key);
        let mut s = sample_for(&key);
        assert!(reg.apply_sidecars(&key, &mut s, false));
        assert_eq!(s.color.as_deref(), Some(colors::DEBUG_AND_EXFILT));

        reg.disarm_exfilt(&key);
        let mut s = sample_for(&key);
        assert!(!reg.apply_sidecars(&key, &mut s, true));
        assert_eq!(s.color.as_deref(), Some(colors::DEBUG));
    }

    #[test]
    fn debug_rows_appear_and_stop_after_disarm() {
        let mut reg = registry();
        let key = SatIntervalKey::new(2, 3, 5.0);
        reg.add_task(key);
        reg.arm_debug(key);

        let path = format_output_path(&reg.format_template.clone(), &key, 3, 2);
        let mut s = sample_for(&key);
        reg.apply_sidecars(&key, &mut s, false);
        reg.apply_sidecars(&key, &mut s, false);
        reg.disarm_debug(&key);
        reg.apply_sidecars(&key, &mut s, false);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(!reg.debug_armed(&key));
    }

    #[test]
    fn stop_matching_and_all_stopped() {
        let mut reg = registry();
        let keys = [
            SatIntervalKey::new(1, 1, 10.0),
            SatIntervalKey::new(1, 2, 10.0),
            SatIntervalKey::new(2, 1, 10.0),
        ];
        for k in keys {
            reg.add_task(k);
        }

        assert!(!reg.stop_matching(|k| k.plane == 1));
        assert!(reg.is_stopped(&keys[0]));
        assert!(reg.is_stopped(&keys[1]));
        assert!(!reg.is_stopped(&keys[2]));

        assert!(reg.stop_matching(|_| true));
        assert!(reg.all_stopped());
    }

    #[test]
    fn running_tracks_readiness() {
        let mut reg = registry();
        let key = SatIntervalKey::new(1, 1, 10.0);
        reg.add_task(key);
        assert_eq!(reg.running_count(), 0);
        reg.mark_running(key);
        assert_eq!(reg.running_count(), 1);
        assert_eq!(reg.task_count(), 1);
    }
}
