//! Machine domain types and the status generator.
//!
//! Machines are rows in the hosted store's `machines` table. aurod never
//! creates or deletes them; it only rewrites `status` and `updated_at`.

use chrono::DateTime;
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use strum::Display;

/// Operational status of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MachineStatus {
    Idle,
    InUse,
    Maintenance,
    OutOfOrder,
}

/// A machine row as stored in the `machines` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: i64,

    /// Machine category (washer, dryer, ...). Stored in the `type` column.
    #[serde(rename = "type")]
    pub kind: String,

    /// Free-form location description.
    pub location: String,

    pub status: MachineStatus,

    /// When the status was last assigned.
    pub updated_at: DateTime<Utc>,
}

/// Partial row submitted in an upsert batch.
///
/// Serializes exactly the three columns the refresh cycle is allowed to
/// touch, so the store patches rows in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub id: i64,
    pub status: MachineStatus,
    pub updated_at: DateTime<Utc>,
}

/// Categorical weights, in enumeration order. Must sum to 1.0.
const STATUS_WEIGHTS: [(MachineStatus, f64); 4] = [
    (MachineStatus::Idle, 0.60),
    (MachineStatus::InUse, 0.30),
    (MachineStatus::Maintenance, 0.08),
    (MachineStatus::OutOfOrder, 0.02),
];

/// Draw a random status from the fixed categorical distribution.
pub fn random_status() -> MachineStatus {
    status_for_draw(rand::rng().random::<f64>())
}

/// Map a uniform draw in [0, 1) onto the status distribution.
fn status_for_draw(draw: f64) -> MachineStatus {
    let mut sum = 0.0;
    for (status, weight) in STATUS_WEIGHTS {
        sum += weight;
        if draw < sum {
            return status;
        }
    }

    // Float drift can leave the final cumulative weight fractionally below
    // the draw; fall back to the first category rather than fail.
    MachineStatus::Idle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_boundaries() {
        assert_eq!(status_for_draw(0.0), MachineStatus::Idle);
        assert_eq!(status_for_draw(0.59), MachineStatus::Idle);
        assert_eq!(status_for_draw(0.60), MachineStatus::InUse);
        assert_eq!(status_for_draw(0.89), MachineStatus::InUse);
        assert_eq!(status_for_draw(0.90), MachineStatus::Maintenance);
        assert_eq!(status_for_draw(0.975), MachineStatus::Maintenance);
        assert_eq!(status_for_draw(0.98), MachineStatus::OutOfOrder);
        assert_eq!(status_for_draw(0.999), MachineStatus::OutOfOrder);
    }

    #[test]
    fn test_draw_past_final_weight_falls_back_to_idle() {
        // Guard against cumulative float drift.
        assert_eq!(status_for_draw(1.0), MachineStatus::Idle);
        assert_eq!(status_for_draw(1.5), MachineStatus::Idle);
    }

    #[test]
    fn test_distribution_converges() {
        const DRAWS: usize = 100_000;

        let mut counts = [0usize; 4];
        for _ in 0..DRAWS {
            match random_status() {
                MachineStatus::Idle => counts[0] += 1,
                MachineStatus::InUse => counts[1] += 1,
                MachineStatus::Maintenance => counts[2] += 1,
                MachineStatus::OutOfOrder => counts[3] += 1,
            }
        }

        let tolerance = 0.02;
        for (i, (_, weight)) in STATUS_WEIGHTS.iter().enumerate() {
            let observed = counts[i] as f64 / DRAWS as f64;
            assert!(
                (observed - weight).abs() < tolerance,
                "category {} observed {} expected {}",
                i,
                observed,
                weight
            );
        }
    }

    #[test]
    fn test_status_serde_spellings() {
        assert_eq!(
            serde_json::to_string(&MachineStatus::InUse).unwrap(),
            "\"in_use\""
        );
        assert_eq!(
            serde_json::to_string(&MachineStatus::OutOfOrder).unwrap(),
            "\"out_of_order\""
        );
        assert_eq!(
            serde_json::from_str::<MachineStatus>("\"maintenance\"").unwrap(),
            MachineStatus::Maintenance
        );
    }

    #[test]
    fn test_status_display_matches_store_spelling() {
        assert_eq!(MachineStatus::InUse.to_string(), "in_use");
        assert_eq!(MachineStatus::Idle.to_string(), "idle");
    }

    #[test]
    fn test_machine_row_serde() {
        let json = r#"{
            "id": 3,
            "type": "washer",
            "location": "Aisle 2",
            "status": "in_use",
            "updated_at": "2024-06-01T12:00:00Z"
        }"#;

        let machine: Machine = serde_json::from_str(json).unwrap();
        assert_eq!(machine.id, 3);
        assert_eq!(machine.kind, "washer");
        assert_eq!(machine.status, MachineStatus::InUse);

        // `kind` must round-trip through the store's `type` column.
        let out = serde_json::to_value(&machine).unwrap();
        assert_eq!(out["type"], "washer");
    }

    #[test]
    fn test_status_update_serializes_only_patch_columns() {
        let update = StatusUpdate {
            id: 7,
            status: MachineStatus::Idle,
            updated_at: Utc::now(),
        };

        let value = serde_json::to_value(&update).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&"id".to_string()));
        assert!(keys.contains(&"status".to_string()));
        assert!(keys.contains(&"updated_at".to_string()));
    }
}
