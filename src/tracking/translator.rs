//! Address translation for inbound tracker messages
//!
//! Accepts `/tracking/trackers/{id}/position` and `/tracking/trackers/{id}/rotation`
//! with exactly three float arguments. Everything else is dropped without an error.

use rosc::{OscMessage, OscType};
use tracing::debug;

use super::{TrackerUpdate, Vec3};

const ROOT_SEGMENT: &str = "tracking";
const GROUP_SEGMENT: &str = "trackers";

/// Turns an OSC message into a [`TrackerUpdate`]
///
/// Returns `None` for any message that does not match the tracker address
/// scheme. The classification looks for `"position"` anywhere in the address
/// before it looks for `"rotation"`, so an address containing both is a
/// position update.
pub fn translate(msg: &OscMessage) -> Option<TrackerUpdate> {
    let id = parse_tracker_id(&msg.addr)?;

    let values = match float_triple(&msg.args) {
        Some(values) => values,
        None => {
            debug!(
                "Rejecting {}: expected 3 float arguments, got {:?}",
                msg.addr, msg.args
            );
            return None;
        }
    };

    if msg.addr.contains("position") {
        Some(TrackerUpdate::position(id, values))
    } else if msg.addr.contains("rotation") {
        Some(TrackerUpdate::rotation(id, values))
    } else {
        debug!("Rejecting {}: neither position nor rotation", msg.addr);
        None
    }
}

fn parse_tracker_id(addr: &str) -> Option<u64> {
    let segments: Vec<&str> = addr.split('/').collect();
    if segments.len() < 4 || segments[1] != ROOT_SEGMENT || segments[2] != GROUP_SEGMENT {
        debug!("Rejecting {}: not a tracker address", addr);
        return None;
    }

    match segments[3].parse::<u64>() {
        Ok(id) => Some(id),
        Err(e) => {
            debug!("Rejecting {}: invalid tracker id ({})", addr, e);
            None
        }
    }
}

fn float_triple(args: &[OscType]) -> Option<Vec3> {
    match args {
        [OscType::Float(x), OscType::Float(y), OscType::Float(z)] => Some([*x, *y, *z]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::PosePayload;

    fn message(addr: &str, args: Vec<OscType>) -> OscMessage {
        OscMessage {
            addr: addr.to_string(),
            args,
        }
    }

    fn floats(values: [f32; 3]) -> Vec<OscType> {
        values.iter().copied().map(OscType::Float).collect()
    }

    #[test]
    fn test_position_message_is_accepted() {
        let msg = message("/tracking/trackers/3/position", floats([1.0, 2.0, 3.0]));
        let update = translate(&msg).expect("position should be accepted");
        assert_eq!(update.id, 3);
        assert_eq!(update.payload, PosePayload::Position([1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_rotation_message_is_accepted() {
        let msg = message("/tracking/trackers/0/rotation", floats([-90.0, 45.5, 180.0]));
        let update = translate(&msg).expect("rotation should be accepted");
        assert_eq!(update.id, 0);
        assert_eq!(update.payload, PosePayload::Rotation([-90.0, 45.5, 180.0]));
    }

    #[test]
    fn test_wrong_prefix_is_rejected() {
        for addr in [
            "/tracker/trackers/1/position",
            "/tracking/tracker/1/position",
            "tracking/trackers/1/position",
            "/tracking/trackers",
            "/",
            "",
        ] {
            assert!(translate(&message(addr, floats([1.0, 2.0, 3.0]))).is_none(), "{addr}");
        }
    }

    #[test]
    fn test_invalid_id_is_rejected() {
        for addr in [
            "/tracking/trackers/-1/position",
            "/tracking/trackers/head/position",
            "/tracking/trackers//position",
            "/tracking/trackers/1.5/rotation",
        ] {
            assert!(translate(&message(addr, floats([1.0, 2.0, 3.0]))).is_none(), "{addr}");
        }
    }

    #[test]
    fn test_ids_beyond_32_bits_are_accepted() {
        let msg = message("/tracking/trackers/4294967296/position", floats([1.0, 2.0, 3.0]));
        assert_eq!(translate(&msg).map(|update| update.id), Some(4_294_967_296));

        let overflow = message(
            "/tracking/trackers/18446744073709551616/position",
            floats([0.0; 3]),
        );
        assert!(translate(&overflow).is_none());
    }

    #[test]
    fn test_argument_count_and_type_mismatch_is_rejected() {
        let addr = "/tracking/trackers/1/position";
        assert!(translate(&message(addr, floats([1.0, 2.0, 3.0])[..2].to_vec())).is_none());

        let mut four = floats([1.0, 2.0, 3.0]);
        four.push(OscType::Float(4.0));
        assert!(translate(&message(addr, four)).is_none());

        let mixed = vec![OscType::Float(1.0), OscType::Int(2), OscType::Float(3.0)];
        assert!(translate(&message(addr, mixed)).is_none());

        let doubles = vec![OscType::Double(1.0); 3];
        assert!(translate(&message(addr, doubles)).is_none());

        assert!(translate(&message(addr, Vec::new())).is_none());
    }

    #[test]
    fn test_missing_kind_is_rejected() {
        let msg = message("/tracking/trackers/1/velocity", floats([1.0, 2.0, 3.0]));
        assert!(translate(&msg).is_none());

        let bare = message("/tracking/trackers/1", floats([1.0, 2.0, 3.0]));
        assert!(translate(&bare).is_none());
    }

    #[test]
    fn test_position_wins_over_rotation() {
        let msg = message(
            "/tracking/trackers/7/rotation/position",
            floats([1.0, 1.0, 1.0]),
        );
        let update = translate(&msg).expect("should be accepted");
        assert!(matches!(update.payload, PosePayload::Position(_)));
    }

    #[test]
    fn test_kind_may_appear_in_any_later_segment() {
        let msg = message("/tracking/trackers/2/hip/rotation", floats([0.0, 10.0, 0.0]));
        let update = translate(&msg).expect("should be accepted");
        assert_eq!(update.payload, PosePayload::Rotation([0.0, 10.0, 0.0]));
    }
}
