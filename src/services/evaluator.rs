//! Membership evaluator - the per-tick scan over (user, zone) pairs
//!
//! For every enabled geofence and every user with a known location, the
//! evaluator determines containment, detects enter/exit transitions,
//! fires dwell/approach once per stay, and tunes adaptive radii.
//! Statistics are updated unconditionally; schedule and cooldown gates
//! only decide whether enter/exit actions are handed to the dispatcher.
//! Condition gating is asynchronous and is applied by the engine after
//! the scan, outside the zone lock.

use crate::domain::geodesy;
use crate::domain::geofence::{Eta, Geofence};
use crate::domain::types::{
    ActionList, GeofenceEventKind, GeofenceId, LatLng, LocationSample, PairKey, PairState, UserId,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::travel::TravelPatternAnalyzer;
use chrono::Local;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// Tuning constants for adaptive radius and display-name resolution
#[derive(Debug, Clone)]
pub struct EvalParams {
    pub accuracy_factor: f64,
    pub smoothing: f64,
    pub min_radius_m: f64,
    pub max_radius_m: f64,
    pub preferred_locale: String,
}

impl EvalParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            accuracy_factor: config.adaptive_accuracy_factor(),
            smoothing: config.adaptive_smoothing(),
            min_radius_m: config.min_radius_m(),
            max_radius_m: config.max_radius_m(),
            preferred_locale: config.preferred_locale().to_string(),
        }
    }
}

/// An event that passed the synchronous gates and awaits condition
/// evaluation and dispatch
#[derive(Debug, Clone)]
pub struct PendingDispatch {
    pub kind: GeofenceEventKind,
    pub geofence_id: GeofenceId,
    pub zone_name: String,
    pub user_id: UserId,
    pub actions: ActionList,
    /// Opaque conditions still to be evaluated externally (enter/exit only)
    pub conditions: Vec<serde_json::Value>,
    /// Event-specific trigger payload fields (distance, eta)
    pub extras: serde_json::Map<String, serde_json::Value>,
}

/// Per-(user, zone) membership state machine and transition detection
pub struct MembershipEvaluator {
    /// Pairs in a non-`Outside` state; absent means outside
    memberships: FxHashMap<PairKey, PairState>,
    params: EvalParams,
}

impl MembershipEvaluator {
    pub fn new(params: EvalParams) -> Self {
        Self { memberships: FxHashMap::default(), params }
    }

    /// Current state for a pair (for inspection and tests)
    pub fn pair_state(&self, user_id: &UserId, geofence_id: &GeofenceId) -> PairState {
        self.memberships
            .get(&PairKey::new(user_id.clone(), geofence_id.clone()))
            .copied()
            .unwrap_or(PairState::Outside)
    }

    /// Run one evaluation pass over the cross-product of enabled zones and
    /// known users
    ///
    /// Mutates zone statistics and adaptive radii in place; returns the
    /// dispatches that passed the synchronous gates, in deterministic
    /// (zone id, user id) order.
    pub fn evaluate(
        &mut self,
        zones: &mut FxHashMap<GeofenceId, Geofence>,
        users: &FxHashMap<UserId, LocationSample>,
        history: &[LocationSample],
        travel: &TravelPatternAnalyzer,
        now_ms: u64,
        metrics: &Metrics,
    ) -> Vec<PendingDispatch> {
        let mut out = Vec::new();

        let mut zone_ids: Vec<GeofenceId> = zones.keys().cloned().collect();
        zone_ids.sort_by(|a, b| a.0.cmp(&b.0));
        let mut user_ids: Vec<&UserId> = users.keys().collect();
        user_ids.sort_by(|a, b| a.0.cmp(&b.0));

        for zone_id in &zone_ids {
            let Some(zone) = zones.get_mut(zone_id) else {
                continue;
            };
            if !zone.enabled {
                continue;
            }
            for user_id in &user_ids {
                if !zone.applies_to(user_id) {
                    continue;
                }
                metrics.record_pair_evaluated();
                self.evaluate_pair(zone, user_id, &users[*user_id], history, travel, now_ms, metrics, &mut out);
            }
        }

        out
    }

    /// Evaluate a single (zone, user) pair
    #[allow(clippy::too_many_arguments)]
    fn evaluate_pair(
        &mut self,
        zone: &mut Geofence,
        user_id: &UserId,
        sample: &LocationSample,
        history: &[LocationSample],
        travel: &TravelPatternAnalyzer,
        now_ms: u64,
        metrics: &Metrics,
        out: &mut Vec<PendingDispatch>,
    ) {
        let d = geodesy::distance_m(sample.location, zone.location);
        let inside = d <= zone.radius;
        let key = PairKey::new(user_id.clone(), zone.id.clone());
        let prev = self.memberships.get(&key).copied().unwrap_or(PairState::Outside);

        if inside && !prev.is_inside() {
            // Enter: statistics update happens regardless of gating
            let prior_entered = zone.statistics.last_entered;
            zone.statistics.record_entry(now_ms);
            self.memberships.insert(key, PairState::Inside);
            metrics.record_event(GeofenceEventKind::Enter);

            info!(
                geofence = %zone.id,
                user = %user_id,
                distance_m = %format!("{d:.1}"),
                entries = %zone.statistics.entries,
                "geofence_entered"
            );

            if self.sync_gates_pass(zone, GeofenceEventKind::Enter, prior_entered, now_ms) {
                out.push(self.pending(zone, user_id, GeofenceEventKind::Enter, d, None));
            }
        } else if !inside && prev.is_inside() {
            // Exit: fold the completed stay into the running dwell mean
            let prior_exited = zone.statistics.last_exited;
            zone.statistics.record_exit(now_ms);
            self.memberships.remove(&key);
            metrics.record_event(GeofenceEventKind::Exit);

            info!(
                geofence = %zone.id,
                user = %user_id,
                distance_m = %format!("{d:.1}"),
                average_dwell_ms = %format!("{:.0}", zone.statistics.average_dwell_ms),
                "geofence_exited"
            );

            if self.sync_gates_pass(zone, GeofenceEventKind::Exit, prior_exited, now_ms) {
                out.push(self.pending(zone, user_id, GeofenceEventKind::Exit, d, None));
            }
        } else if inside {
            // Dwell: once per contiguous stay, no cooldown gate
            if prev == PairState::Inside {
                if let Some(entered) = zone.statistics.last_entered {
                    if now_ms.saturating_sub(entered) >= zone.settings.dwell_time_ms
                        && !zone.actions.on_dwell.is_empty()
                    {
                        self.memberships.insert(key, PairState::InsideDwelled);
                        metrics.record_event(GeofenceEventKind::Dwell);
                        info!(
                            geofence = %zone.id,
                            user = %user_id,
                            dwell_ms = %now_ms.saturating_sub(entered),
                            "geofence_dwell"
                        );
                        out.push(self.pending(zone, user_id, GeofenceEventKind::Dwell, d, None));
                    }
                }
            }
        } else if d <= zone.settings.approach_distance_m {
            // Approach: once while outside, requires net movement toward
            // the zone across the observed history window
            if prev == PairState::Outside
                && !zone.actions.on_approach.is_empty()
                && is_approaching(history, user_id, zone, sample.location)
            {
                let eta = travel.predict_arrival_time(user_id, d, sample.speed);
                self.memberships.insert(key, PairState::ApproachingNotified);
                metrics.record_event(GeofenceEventKind::Approach);
                info!(
                    geofence = %zone.id,
                    user = %user_id,
                    distance_m = %format!("{d:.1}"),
                    eta = %eta.formatted,
                    "geofence_approach"
                );
                out.push(self.pending(zone, user_id, GeofenceEventKind::Approach, d, Some(eta)));
            }
        } else if prev == PairState::ApproachingNotified {
            // Left the approach radius: rearm the approach notification
            self.memberships.remove(&key);
        }

        if zone.adaptive {
            self.adjust_radius(zone, sample);
        }
    }

    /// Schedule and cooldown gates for enter/exit dispatch
    ///
    /// `prior_fired` is the timestamp of the previous firing of this event
    /// kind, captured before the statistics update so the current event
    /// cannot suppress itself.
    fn sync_gates_pass(
        &self,
        zone: &Geofence,
        kind: GeofenceEventKind,
        prior_fired: Option<u64>,
        now_ms: u64,
    ) -> bool {
        if !zone.schedule_allows(Local::now()) {
            debug!(geofence = %zone.id, kind = %kind.as_str(), "dispatch_gated_schedule");
            return false;
        }
        if let Some(prior) = prior_fired {
            if now_ms.saturating_sub(prior) <= zone.settings.cooldown_ms {
                debug!(geofence = %zone.id, kind = %kind.as_str(), "dispatch_gated_cooldown");
                return false;
            }
        }
        true
    }

    fn pending(
        &self,
        zone: &Geofence,
        user_id: &UserId,
        kind: GeofenceEventKind,
        distance_m: f64,
        eta: Option<Eta>,
    ) -> PendingDispatch {
        let mut extras = serde_json::Map::new();
        extras.insert("distance".to_string(), serde_json::json!((distance_m * 10.0).round() / 10.0));
        if let Some(eta) = eta {
            extras.insert("eta".to_string(), serde_json::json!(eta.formatted));
            extras.insert("eta_seconds".to_string(), serde_json::json!(eta.seconds.round()));
        }

        // Conditions gate enter/exit only; dwell/approach are gated by
        // their once-per-stay flags alone
        let conditions = match kind {
            GeofenceEventKind::Enter | GeofenceEventKind::Exit => zone.conditions.clone(),
            GeofenceEventKind::Dwell | GeofenceEventKind::Approach => Vec::new(),
        };

        PendingDispatch {
            kind,
            geofence_id: zone.id.clone(),
            zone_name: zone.name.display(&self.params.preferred_locale).to_string(),
            user_id: user_id.clone(),
            actions: zone.actions.for_kind(kind).clone(),
            conditions,
            extras,
        }
    }

    /// Nudge an adaptive zone's radius toward a target derived from the
    /// user's reported accuracy
    fn adjust_radius(&self, zone: &mut Geofence, sample: &LocationSample) {
        let Some(accuracy) = sample.accuracy else {
            return;
        };
        let p = &self.params;
        let target = (accuracy * p.accuracy_factor).clamp(p.min_radius_m, p.max_radius_m);
        let next =
            (zone.radius + (target - zone.radius) * p.smoothing).clamp(p.min_radius_m, p.max_radius_m);
        if (next - zone.radius).abs() > f64::EPSILON {
            debug!(
                geofence = %zone.id,
                radius_m = %format!("{next:.1}"),
                target_m = %format!("{target:.1}"),
                "adaptive_radius_adjusted"
            );
            zone.radius = next;
        }
    }
}

/// Whether a user's observed movement trends toward a zone
///
/// Compares distance-to-center of the earliest same-user sample with the
/// current location; indeterminate (fewer than 2 samples) is `false`.
pub fn is_approaching(
    history: &[LocationSample],
    user_id: &UserId,
    zone: &Geofence,
    current: LatLng,
) -> bool {
    let mut samples = history.iter().filter(|s| &s.user_id == user_id);
    let Some(earliest) = samples.next() else {
        return false;
    };
    if samples.next().is_none() {
        return false;
    }

    let earliest_d = geodesy::distance_m(earliest.location, zone.location);
    let current_d = geodesy::distance_m(current, zone.location);
    current_d < earliest_d
}

/// Count inside/outside boundary transitions along an ordered path
///
/// Pure analytics helper, independent of live membership state.
pub fn count_boundary_crossings(path: &[LatLng], zone: &Geofence) -> usize {
    path.windows(2)
        .filter(|pair| {
            let a = geodesy::distance_m(pair[0], zone.location) <= zone.radius;
            let b = geodesy::distance_m(pair[1], zone.location) <= zone.radius;
            a != b
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geofence::{GeofenceActions, GeofenceSettings, GeofenceStatistics, Schedule};
    use crate::domain::types::{Action, LocaleText};
    use crate::io::settings::JsonFileStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    const CENTER: LatLng = LatLng { latitude: 59.3293, longitude: 18.0686 };

    // Offsets in degrees latitude; 0.001 deg ~ 111 m
    fn at(offset_deg: f64) -> LatLng {
        LatLng::new(CENTER.latitude + offset_deg, CENTER.longitude)
    }

    fn zone(id: &str) -> Geofence {
        Geofence {
            id: GeofenceId::from(id),
            name: LocaleText::single("en", "Test zone"),
            location: CENTER,
            radius: 100.0,
            enabled: true,
            adaptive: false,
            users: vec!["all".to_string()],
            schedule: None,
            conditions: Vec::new(),
            actions: GeofenceActions::default(),
            settings: GeofenceSettings {
                dwell_time_ms: 5_000,
                approach_distance_m: 500.0,
                cooldown_ms: 300_000,
                require_confirm: false,
            },
            statistics: GeofenceStatistics::default(),
        }
    }

    fn sample(user: &str, location: LatLng, ts: u64) -> LocationSample {
        LocationSample {
            user_id: UserId::from(user),
            location,
            accuracy: None,
            speed: 0.0,
            timestamp: ts,
        }
    }

    struct Harness {
        evaluator: MembershipEvaluator,
        zones: FxHashMap<GeofenceId, Geofence>,
        travel: TravelPatternAnalyzer,
        metrics: Metrics,
        #[allow(dead_code)]
        dir: TempDir,
    }

    impl Harness {
        fn new(fence: Geofence) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let settings = Arc::new(JsonFileStore::open(dir.path().join("s.json")).unwrap());
            let mut zones = FxHashMap::default();
            zones.insert(fence.id.clone(), fence);
            Self {
                evaluator: MembershipEvaluator::new(EvalParams::from_config(
                    &crate::infra::config::Config::default(),
                )),
                zones,
                travel: TravelPatternAnalyzer::new(settings, &crate::infra::config::Config::default()),
                metrics: Metrics::new(),
                dir,
            }
        }

        fn eval_at(&mut self, user: &str, location: LatLng, now_ms: u64) -> Vec<PendingDispatch> {
            self.eval_with_history(user, location, &[], now_ms)
        }

        fn eval_with_history(
            &mut self,
            user: &str,
            location: LatLng,
            history: &[LocationSample],
            now_ms: u64,
        ) -> Vec<PendingDispatch> {
            let mut users = FxHashMap::default();
            users.insert(UserId::from(user), sample(user, location, now_ms));
            self.evaluator.evaluate(
                &mut self.zones,
                &users,
                history,
                &self.travel,
                now_ms,
                &self.metrics,
            )
        }

        fn stats(&self) -> &GeofenceStatistics {
            &self.zones.values().next().unwrap().statistics
        }
    }

    #[test]
    fn test_enter_exit_idempotence() {
        let mut h = Harness::new(zone("g1"));

        // Repeated evaluation inside increments entries exactly once
        h.eval_at("u1", CENTER, 1_000);
        h.eval_at("u1", CENTER, 2_000);
        h.eval_at("u1", CENTER, 3_000);
        assert_eq!(h.stats().entries, 1);
        assert_eq!(h.stats().exits, 0);

        // Leaving and re-entering increments again
        h.eval_at("u1", at(0.01), 4_000); // ~1.1 km away
        assert_eq!(h.stats().exits, 1);
        h.eval_at("u1", CENTER, 5_000);
        assert_eq!(h.stats().entries, 2);
    }

    #[test]
    fn test_enter_dispatches_trigger_and_actions() {
        let mut fence = zone("g1");
        fence.actions.on_enter.push(Action::Notification { message: "hi".to_string() });
        let mut h = Harness::new(fence);

        let pendings = h.eval_at("u1", CENTER, 1_000);
        assert_eq!(pendings.len(), 1);
        assert_eq!(pendings[0].kind, GeofenceEventKind::Enter);
        assert_eq!(pendings[0].zone_name, "Test zone");
        assert_eq!(pendings[0].actions.len(), 1);
        assert!(pendings[0].extras.contains_key("distance"));
    }

    #[test]
    fn test_cooldown_suppression() {
        let mut h = Harness::new(zone("g1"));

        // First enter dispatches
        let first = h.eval_at("u1", CENTER, 1_000);
        assert_eq!(first.len(), 1);

        // Exit, then re-enter within cooldown: statistics count, no dispatch
        h.eval_at("u1", at(0.01), 2_000);
        let second = h.eval_at("u1", CENTER, 10_000);
        assert!(second.iter().all(|p| p.kind != GeofenceEventKind::Enter));
        assert_eq!(h.stats().entries, 2);

        // After the cooldown elapses a new enter dispatches again
        h.eval_at("u1", at(0.01), 320_000);
        let third = h.eval_at("u1", CENTER, 320_000 + 300_001);
        assert!(third.iter().any(|p| p.kind == GeofenceEventKind::Enter));
        assert_eq!(h.stats().entries, 3);
    }

    #[test]
    fn test_dwell_once_per_stay() {
        let mut fence = zone("g1");
        fence.actions.on_dwell.push(Action::Scene { scene_id: "night".to_string() });
        let mut h = Harness::new(fence);

        h.eval_at("u1", CENTER, 0);
        // Before the dwell threshold nothing fires
        assert!(h.eval_at("u1", CENTER, 4_000).is_empty());

        // Threshold crossed: exactly one dwell
        let fired = h.eval_at("u1", CENTER, 6_000);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, GeofenceEventKind::Dwell);

        // Never twice within the same stay
        assert!(h.eval_at("u1", CENTER, 60_000).is_empty());

        // A new stay rearms the dwell
        h.eval_at("u1", at(0.01), 70_000);
        h.eval_at("u1", CENTER, 80_000);
        let again = h.eval_at("u1", CENTER, 86_000);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].kind, GeofenceEventKind::Dwell);
    }

    #[test]
    fn test_dwell_requires_configured_actions() {
        let mut h = Harness::new(zone("g1"));
        h.eval_at("u1", CENTER, 0);
        assert!(h.eval_at("u1", CENTER, 10_000).is_empty());
        assert_eq!(h.evaluator.pair_state(&UserId::from("u1"), &GeofenceId::from("g1")), PairState::Inside);
    }

    #[test]
    fn test_is_approaching_monotonicity() {
        let fence = zone("g1");
        let user = UserId::from("u1");

        let decreasing =
            vec![sample("u1", at(0.02), 0), sample("u1", at(0.015), 10_000)];
        assert!(is_approaching(&decreasing, &user, &fence, at(0.01)));

        let increasing =
            vec![sample("u1", at(0.01), 0), sample("u1", at(0.015), 10_000)];
        assert!(!is_approaching(&increasing, &user, &fence, at(0.02)));

        // Fewer than two same-user samples is indeterminate
        let single = vec![sample("u1", at(0.02), 0), sample("u2", at(0.015), 10_000)];
        assert!(!is_approaching(&single, &user, &fence, at(0.01)));
    }

    #[test]
    fn test_approach_fires_once_and_rearms() {
        let mut fence = zone("g1");
        fence.actions.on_approach.push(Action::Notification { message: "near".to_string() });
        let mut h = Harness::new(fence);

        let history = vec![sample("u1", at(0.02), 0), sample("u1", at(0.01), 10_000)];

        // ~330 m out, moving closer: approach fires with an ETA
        let fired = h.eval_with_history("u1", at(0.003), &history, 20_000);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, GeofenceEventKind::Approach);
        assert!(fired[0].extras.contains_key("eta"));

        // Still outside within the approach radius: no repeat
        assert!(h.eval_with_history("u1", at(0.002), &history, 30_000).is_empty());

        // Beyond the approach radius the flag resets, then fires again
        h.eval_with_history("u1", at(0.02), &history, 40_000);
        let again = h.eval_with_history("u1", at(0.003), &history, 50_000);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].kind, GeofenceEventKind::Approach);
    }

    #[test]
    fn test_approach_flag_clears_on_entry() {
        let mut fence = zone("g1");
        fence.actions.on_approach.push(Action::Notification { message: "near".to_string() });
        let mut h = Harness::new(fence);

        let history = vec![sample("u1", at(0.02), 0), sample("u1", at(0.01), 10_000)];
        h.eval_with_history("u1", at(0.003), &history, 20_000);

        // Entering replaces the approach state
        h.eval_at("u1", CENTER, 30_000);
        assert_eq!(
            h.evaluator.pair_state(&UserId::from("u1"), &GeofenceId::from("g1")),
            PairState::Inside
        );
    }

    #[test]
    fn test_adaptive_radius_convergence() {
        let mut fence = zone("g1");
        fence.adaptive = true;
        fence.radius = 200.0;
        let mut h = Harness::new(fence);

        // High accuracy (5 m) trends toward the 50 m floor
        for i in 0..50u64 {
            let mut users = FxHashMap::default();
            let mut s = sample("u1", at(0.05), i * 1_000);
            s.accuracy = Some(5.0);
            users.insert(UserId::from("u1"), s);
            h.evaluator.evaluate(&mut h.zones, &users, &[], &h.travel, i * 1_000, &h.metrics);
        }
        let low = h.zones.values().next().unwrap().radius;
        assert!((50.0..=55.0).contains(&low), "got {low}");

        // Poor accuracy (200 m) trends toward the 500 m ceiling
        for i in 0..50u64 {
            let mut users = FxHashMap::default();
            let mut s = sample("u1", at(0.05), 100_000 + i * 1_000);
            s.accuracy = Some(200.0);
            users.insert(UserId::from("u1"), s);
            h.evaluator.evaluate(&mut h.zones, &users, &[], &h.travel, 100_000 + i * 1_000, &h.metrics);
        }
        let high = h.zones.values().next().unwrap().radius;
        assert!((495.0..=500.0).contains(&high), "got {high}");
    }

    #[test]
    fn test_adaptive_radius_requires_accuracy() {
        let mut fence = zone("g1");
        fence.adaptive = true;
        let mut h = Harness::new(fence);
        h.eval_at("u1", at(0.05), 1_000);
        assert_eq!(h.zones.values().next().unwrap().radius, 100.0);
    }

    #[test]
    fn test_user_filter_excludes_pair() {
        let mut fence = zone("g1");
        fence.users = vec!["alice".to_string()];
        let mut h = Harness::new(fence);

        h.eval_at("bob", CENTER, 1_000);
        assert_eq!(h.stats().entries, 0);

        h.eval_at("alice", CENTER, 2_000);
        assert_eq!(h.stats().entries, 1);
    }

    #[test]
    fn test_disabled_zone_skipped() {
        let mut fence = zone("g1");
        fence.enabled = false;
        let mut h = Harness::new(fence);
        h.eval_at("u1", CENTER, 1_000);
        assert_eq!(h.stats().entries, 0);
    }

    #[test]
    fn test_schedule_gating_keeps_statistics() {
        let mut fence = zone("g1");
        // Empty weekday set never allows dispatch
        fence.schedule = Some(Schedule { days: Some(vec![]), start_hour: None, end_hour: None });
        let mut h = Harness::new(fence);

        let pendings = h.eval_at("u1", CENTER, 1_000);
        assert!(pendings.is_empty());
        assert_eq!(h.stats().entries, 1);
        assert_eq!(h.stats().last_entered, Some(1_000));
    }

    #[test]
    fn test_count_boundary_crossings() {
        let fence = zone("g1");

        let path = vec![CENTER, at(0.01), CENTER, at(0.01)];
        assert_eq!(count_boundary_crossings(&path, &fence), 3);

        let inside_only = vec![CENTER, at(0.0002), CENTER];
        assert_eq!(count_boundary_crossings(&inside_only, &fence), 0);

        assert_eq!(count_boundary_crossings(&[], &fence), 0);
        assert_eq!(count_boundary_crossings(&[CENTER], &fence), 0);
    }
}
