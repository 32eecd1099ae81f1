//! Retention (`spec.md` §4.10): "keep N most recent per bucket
//! (hourly, daily, weekly, monthly, yearly); cap total; delete oldest
//! within a bucket when exceeded; never delete `keep-forever`
//! snapshots."

use std::collections::{HashMap, HashSet};

use capsule_core::time::{bucket_key, Granularity};
use capsule_snapshot::Snapshot;
use serde::{Deserialize, Serialize};

/// `spec.md` §6 `snapshots.retention`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub keep_hourly: u32,
    pub keep_daily: u32,
    pub keep_weekly: u32,
    pub keep_monthly: u32,
    pub keep_yearly: u32,
    pub max_total: Option<u32>,
}

/// Which snapshots in `snapshots` (all belonging to one capsule)
/// should be deleted under `policy`. Snapshots with `keep_forever` set
/// are never returned. A snapshot survives if it is the most recent
/// representative of its bucket for *any* granularity whose
/// `keep_*` count hasn't yet been exhausted by more-recent
/// representatives; everything else is a deletion candidate. If
/// survivors still exceed `max_total`, the oldest survivors (again,
/// excluding `keep_forever`) are added to the deletion list until the
/// cap is met.
pub fn prune(policy: &RetentionPolicy, snapshots: &[Snapshot]) -> Vec<Snapshot> {
    let mut eligible: Vec<&Snapshot> = snapshots.iter().filter(|s| !s.keep_forever).collect();
    eligible.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));

    let mut survivor_indices: HashSet<usize> = HashSet::new();
    for (granularity, keep_n) in [
        (Granularity::Hourly, policy.keep_hourly),
        (Granularity::Daily, policy.keep_daily),
        (Granularity::Weekly, policy.keep_weekly),
        (Granularity::Monthly, policy.keep_monthly),
        (Granularity::Yearly, policy.keep_yearly),
    ] {
        if keep_n == 0 {
            continue;
        }
        let mut seen_buckets = HashSet::new();
        let mut kept_buckets = 0u32;
        for (index, snapshot) in eligible.iter().enumerate() {
            let key = bucket_key(snapshot.taken_at, granularity);
            if !seen_buckets.insert(key) {
                continue; // not the most-recent representative of this bucket
            }
            if kept_buckets >= keep_n {
                continue;
            }
            kept_buckets += 1;
            survivor_indices.insert(index);
        }
    }

    if let Some(max_total) = policy.max_total {
        // `eligible` is newest-first; keep only the newest `max_total`
        // survivors, demoting the rest back into the deletion set.
        let mut kept_so_far = 0u32;
        for index in 0..eligible.len() {
            if survivor_indices.contains(&index) {
                if kept_so_far >= max_total {
                    survivor_indices.remove(&index);
                } else {
                    kept_so_far += 1;
                }
            }
        }
    }

    eligible
        .into_iter()
        .enumerate()
        .filter(|(index, _)| !survivor_indices.contains(index))
        .map(|(_, snapshot)| snapshot.clone())
        .collect()
}

/// Group a capsule's snapshots by retention bucket for a single
/// granularity, for callers (e.g. reporting tools) that want to see
/// the bucket structure without mutating anything.
pub fn buckets(snapshots: &[Snapshot], granularity: Granularity) -> HashMap<capsule_core::time::BucketKey, Vec<&Snapshot>> {
    let mut out: HashMap<capsule_core::time::BucketKey, Vec<&Snapshot>> = HashMap::new();
    for snapshot in snapshots {
        out.entry(bucket_key(snapshot.taken_at, granularity)).or_default().push(snapshot);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::Digest;
    use capsule_snapshot::{NetworkState, ProcessState};
    use chrono::{Duration as ChronoDuration, Utc};

    fn snap(hours_ago: i64, keep_forever: bool) -> Snapshot {
        Snapshot {
            capsule_id: "c1".into(),
            taken_at: Utc::now() - ChronoDuration::hours(hours_ago),
            memory_image_digest: Digest::of(b"mem"),
            filesystem_digest: Digest::of(b"fs"),
            network_state: NetworkState::default(),
            process_state: ProcessState {
                pid: 1,
                ppid: 0,
                threads: vec![],
                fds: vec![],
            },
            metadata: Default::default(),
            name: None,
            keep_forever,
        }
    }

    #[test]
    fn keep_forever_never_pruned() {
        let policy = RetentionPolicy::default();
        let snaps = vec![snap(100, true)];
        assert!(prune(&policy, &snaps).is_empty());
    }

    #[test]
    fn keeps_most_recent_per_hourly_bucket_up_to_n() {
        let policy = RetentionPolicy { keep_hourly: 2, ..Default::default() };
        let snaps: Vec<Snapshot> = (0..5).map(|h| snap(h, false)).collect();
        let deleted = prune(&policy, &snaps);
        // 5 hourly buckets exist (distinct hours ago), only 2 survive.
        assert_eq!(deleted.len(), 3);
    }

    #[test]
    fn max_total_caps_even_when_buckets_would_keep_more() {
        let policy = RetentionPolicy {
            keep_hourly: 10,
            max_total: Some(1),
            ..Default::default()
        };
        let snaps: Vec<Snapshot> = (0..5).map(|h| snap(h, false)).collect();
        let deleted = prune(&policy, &snaps);
        assert_eq!(deleted.len(), 4);
    }

    #[test]
    fn zero_keep_counts_prune_everything_not_kept_forever() {
        let policy = RetentionPolicy::default();
        let snaps = vec![snap(1, false), snap(2, true)];
        let deleted = prune(&policy, &snaps);
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].capsule_id, "c1");
    }
}
