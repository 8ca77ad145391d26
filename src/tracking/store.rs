//! Tracker State Store - last known pose per tracker
//!
//! Keeps one [`TrackerRecord`] per tracker id behind an `Arc<RwLock<_>>` so that any
//! number of readers can call [`TrackerStore::get`] while the update worker writes.
//!
//! ## Orientation Inversion
//!
//! Some senders encode rotations so that an axis occasionally jumps by close to
//! 180 degrees between two consecutive readings without any real motion. When a
//! rotation update differs from the stored rotation by more than the threshold on
//! any axis, every axis is shifted by 180 degrees and wrapped back into (-180, 180]
//! ([`CorrectionScope::FlippedAxes`] restricts the shift to the axes that jumped).
//! Without a stored record there is no baseline and the rotation is taken as-is.
//!
//! ## Write Discipline
//!
//! Only the pipeline's update worker calls [`TrackerStore::upsert`]. The merged
//! record is built outside of the map and inserted as one value, so readers see
//! either the previous record or the new one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{PosePayload, TrackerRecord, TrackerUpdate, Vec3};

/// Default per-axis jump that marks a rotation as flipped
pub const DEFAULT_INVERSION_THRESHOLD_DEG: f32 = 170.0;

/// Which axes are shifted once a rotation is detected as flipped
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionScope {
    /// Shift all three axes (wire-compatible behavior)
    #[default]
    AllAxes,
    /// Shift only the axes whose jump exceeded the threshold
    FlippedAxes,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InversionSettings {
    /// Per-axis difference in degrees above which a rotation counts as flipped
    pub threshold_deg: f32,
    pub scope: CorrectionScope,
}

impl Default for InversionSettings {
    fn default() -> Self {
        Self {
            threshold_deg: DEFAULT_INVERSION_THRESHOLD_DEG,
            scope: CorrectionScope::AllAxes,
        }
    }
}

/// Result of applying one update
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpsertOutcome {
    pub record: TrackerRecord,
    /// The incoming rotation was detected as flipped and corrected
    pub corrected: bool,
}

#[derive(Clone, Debug, Default)]
pub struct TrackerStore {
    trackers: Arc<RwLock<HashMap<u64, TrackerRecord>>>,
    settings: InversionSettings,
}

impl TrackerStore {
    pub fn new(settings: InversionSettings) -> Self {
        Self {
            trackers: Arc::new(RwLock::new(HashMap::new())),
            settings,
        }
    }

    /// Merges an update onto the stored record, correcting flipped rotations
    ///
    /// The write lock is held for the whole read-modify-write so the merge always
    /// starts from the latest stored value.
    pub async fn upsert(&self, update: TrackerUpdate) -> UpsertOutcome {
        let mut trackers = self.trackers.write().await;
        let previous = trackers.get(&update.id).copied();

        let mut record = previous.unwrap_or_else(|| TrackerRecord::empty(update.id));
        let mut corrected = false;

        match update.payload {
            PosePayload::Position(position) => {
                record.position = position;
                record.has_position = true;
            }
            PosePayload::Rotation(rotation) => {
                let rotation = match previous {
                    Some(prev)
                        if detect_inversion(
                            &prev.rotation,
                            &rotation,
                            self.settings.threshold_deg,
                        ) =>
                    {
                        let fixed = match self.settings.scope {
                            CorrectionScope::AllAxes => invert_orientation(&rotation),
                            CorrectionScope::FlippedAxes => invert_flipped_axes(
                                &prev.rotation,
                                &rotation,
                                self.settings.threshold_deg,
                            ),
                        };
                        debug!(
                            "Tracker {}: flipped rotation {:?} corrected to {:?} (previous {:?})",
                            update.id, rotation, fixed, prev.rotation
                        );
                        corrected = true;
                        fixed
                    }
                    _ => rotation,
                };
                record.rotation = rotation;
                record.has_rotation = true;
            }
        }

        trackers.insert(update.id, record);
        UpsertOutcome { record, corrected }
    }

    /// Returns a copy of the last known record for `id`
    pub async fn get(&self, id: u64) -> Option<TrackerRecord> {
        self.trackers.read().await.get(&id).copied()
    }

    /// All known records ordered by id
    pub async fn snapshot(&self) -> Vec<TrackerRecord> {
        let mut records: Vec<TrackerRecord> =
            self.trackers.read().await.values().copied().collect();
        records.sort_by_key(|record| record.id);
        records
    }
}

/// True if any axis moved by more than `threshold_deg` between two readings
pub fn detect_inversion(previous: &Vec3, current: &Vec3, threshold_deg: f32) -> bool {
    previous
        .iter()
        .zip(current.iter())
        .any(|(old, new)| (old - new).abs() > threshold_deg)
}

/// Rotates every axis by 180 degrees, keeping the result in (-180, 180]
pub fn invert_orientation(rotation: &Vec3) -> Vec3 {
    rotation.map(invert_axis)
}

/// Like [`invert_orientation`] but leaves axes below the threshold untouched
pub fn invert_flipped_axes(previous: &Vec3, current: &Vec3, threshold_deg: f32) -> Vec3 {
    let mut out = *current;
    for (axis, old) in out.iter_mut().zip(previous.iter()) {
        if (old - *axis).abs() > threshold_deg {
            *axis = invert_axis(*axis);
        }
    }
    out
}

fn invert_axis(value: f32) -> f32 {
    let shifted = value + 180.0;
    if shifted > 180.0 {
        shifted - 360.0
    } else {
        shifted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TrackerStore {
        TrackerStore::new(InversionSettings::default())
    }

    #[test]
    fn test_detect_inversion_threshold() {
        assert!(detect_inversion(&[0.0; 3], &[179.0, 0.0, 0.0], 170.0));
        assert!(detect_inversion(&[0.0; 3], &[0.0, 0.0, -171.0], 170.0));
        assert!(!detect_inversion(&[0.0; 3], &[170.0, 0.0, 0.0], 170.0));
        assert!(!detect_inversion(&[0.0; 3], &[10.0, -20.0, 30.0], 170.0));
    }

    #[test]
    fn test_invert_orientation_wraps() {
        assert_eq!(invert_orientation(&[179.0, 0.0, -90.0]), [-1.0, 180.0, 90.0]);
        assert_eq!(invert_orientation(&[-180.0, 1.0, 180.0]), [0.0, -179.0, 0.0]);
    }

    #[tokio::test]
    async fn test_first_rotation_is_not_corrected() {
        let store = store();
        let outcome = store.upsert(TrackerUpdate::rotation(1, [179.0, 0.0, 0.0])).await;
        assert!(!outcome.corrected);
        assert_eq!(store.get(1).await.unwrap().rotation, [179.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_flipped_rotation_is_corrected() {
        let store = store();
        store.upsert(TrackerUpdate::rotation(1, [0.0, 0.0, 0.0])).await;
        let outcome = store.upsert(TrackerUpdate::rotation(1, [179.0, 0.0, 0.0])).await;

        assert!(outcome.corrected);
        assert_eq!(outcome.record.rotation, [-1.0, 180.0, 180.0]);
        assert_eq!(store.get(1).await.unwrap().rotation, [-1.0, 180.0, 180.0]);
    }

    #[tokio::test]
    async fn test_small_rotation_change_is_kept() {
        let store = store();
        store.upsert(TrackerUpdate::rotation(1, [0.0, 0.0, 0.0])).await;
        let outcome = store.upsert(TrackerUpdate::rotation(1, [10.0, 0.0, 0.0])).await;

        assert!(!outcome.corrected);
        assert_eq!(store.get(1).await.unwrap().rotation, [10.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_position_then_rotation_merges() {
        let store = store();
        store.upsert(TrackerUpdate::position(4, [1.0, 2.0, 3.0])).await;
        store.upsert(TrackerUpdate::rotation(4, [5.0, 6.0, 7.0])).await;

        let record = store.get(4).await.unwrap();
        assert_eq!(record.position, [1.0, 2.0, 3.0]);
        assert_eq!(record.rotation, [5.0, 6.0, 7.0]);
        assert!(record.has_position);
        assert!(record.has_rotation);
    }

    #[tokio::test]
    async fn test_position_update_keeps_rotation_and_skips_detection() {
        let store = store();
        store.upsert(TrackerUpdate::rotation(2, [90.0, 0.0, 0.0])).await;
        let outcome = store.upsert(TrackerUpdate::position(2, [500.0, 0.0, 0.0])).await;

        assert!(!outcome.corrected);
        assert_eq!(outcome.record.rotation, [90.0, 0.0, 0.0]);
        assert_eq!(outcome.record.position, [500.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_rotation_after_position_only_compares_against_zero() {
        let store = store();
        store.upsert(TrackerUpdate::position(3, [1.0, 1.0, 1.0])).await;
        let outcome = store.upsert(TrackerUpdate::rotation(3, [175.0, 0.0, 0.0])).await;

        assert!(outcome.corrected);
        assert_eq!(outcome.record.rotation, [-5.0, 180.0, 180.0]);
        assert_eq!(outcome.record.position, [1.0, 1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_new_record_defaults_missing_field_to_zero() {
        let store = store();
        let outcome = store.upsert(TrackerUpdate::position(9, [1.0, 2.0, 3.0])).await;
        assert_eq!(outcome.record.rotation, [0.0; 3]);
        assert!(!outcome.record.has_rotation);
    }

    #[tokio::test]
    async fn test_custom_threshold() {
        let store = TrackerStore::new(InversionSettings {
            threshold_deg: 90.0,
            ..Default::default()
        });
        store.upsert(TrackerUpdate::rotation(1, [0.0, 0.0, 0.0])).await;
        let outcome = store.upsert(TrackerUpdate::rotation(1, [100.0, 0.0, 0.0])).await;
        assert!(outcome.corrected);
        assert_eq!(outcome.record.rotation, [-80.0, 180.0, 180.0]);
    }

    #[tokio::test]
    async fn test_flipped_axes_scope_only_touches_jumping_axis() {
        let store = TrackerStore::new(InversionSettings {
            scope: CorrectionScope::FlippedAxes,
            ..Default::default()
        });
        store.upsert(TrackerUpdate::rotation(1, [0.0, 0.0, 0.0])).await;
        let outcome = store.upsert(TrackerUpdate::rotation(1, [179.0, 0.0, 0.0])).await;
        assert!(outcome.corrected);
        assert_eq!(outcome.record.rotation, [-1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_invert_flipped_axes() {
        assert_eq!(
            invert_flipped_axes(&[170.0, 0.0, -10.0], &[-15.0, 5.0, 175.0], 170.0),
            [165.0, 5.0, -5.0]
        );
    }

    #[tokio::test]
    async fn test_get_unknown_and_snapshot() {
        let store = store();
        assert!(store.get(42).await.is_none());
        assert!(store.snapshot().await.is_empty());

        store.upsert(TrackerUpdate::position(5, [1.0, 0.0, 0.0])).await;
        store.upsert(TrackerUpdate::position(2, [2.0, 0.0, 0.0])).await;
        store.upsert(TrackerUpdate::position(5, [3.0, 0.0, 0.0])).await;

        let ids: Vec<u64> = store.snapshot().await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 5]);
        assert_eq!(store.get(5).await.unwrap().position, [3.0, 0.0, 0.0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reads_never_see_mixed_records() {
        let store = store();
        store.upsert(TrackerUpdate::position(1, [0.0; 3])).await;

        let writer_store = store.clone();
        let writer = tokio::spawn(async move {
            for i in 1..=2000u32 {
                let v = i as f32;
                writer_store.upsert(TrackerUpdate::position(1, [v, v, v])).await;
            }
        });

        let mut readers = Vec::new();
        for _ in 0..4 {
            let reader_store = store.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..2000 {
                    let record = reader_store.get(1).await.unwrap();
                    let [x, y, z] = record.position;
                    assert!(x == y && y == z, "mixed record: {:?}", record);
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(store.get(1).await.unwrap().position, [2000.0; 3]);
    }
}
