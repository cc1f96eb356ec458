//! Hand landmarks classified into a fixed gesture vocabulary by finger state.

use super::hands::{with_handedness, HAND_CONNECTIONS, HAND_MODEL, HAND_SCHEMA, HAND_SETTINGS};
use super::landmarker::{LandmarkDescriptor, LandmarkEstimate, LandmarkPlugin};
use crate::plugin::{Detection, LandmarkPoint, Plugin, PluginError};

const WRIST: usize = 0;
const THUMB_MCP: usize = 2;
const THUMB_TIP: usize = 4;
const PINKY_MCP: usize = 17;

/// (pip, tip) for index, middle, ring, pinky.
const FINGERS: [(usize, usize); 4] = [(6, 8), (10, 12), (14, 16), (18, 20)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerState {
    pub thumb: bool,
    /// index, middle, ring, pinky
    pub fingers: [bool; 4],
}

fn distance(a: &LandmarkPoint, b: &LandmarkPoint) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// A finger is extended when its tip is farther from the wrist than its middle joint.
/// The thumb is extended when its tip is farther from the pinky base than its own base.
pub fn finger_state(points: &[LandmarkPoint]) -> Option<FingerState> {
    if points.len() < HAND_MODEL.points {
        return None;
    }

    let wrist = &points[WRIST];
    let mut fingers = [false; 4];
    for (extended, &(pip, tip)) in fingers.iter_mut().zip(FINGERS.iter()) {
        *extended = distance(&points[tip], wrist) > distance(&points[pip], wrist);
    }

    let pinky_base = &points[PINKY_MCP];
    let thumb = distance(&points[THUMB_TIP], pinky_base) > distance(&points[THUMB_MCP], pinky_base);

    Some(FingerState { thumb, fingers })
}

pub fn classify_gesture(points: &[LandmarkPoint]) -> &'static str {
    let Some(state) = finger_state(points) else {
        return "None";
    };

    // image y grows downwards
    let thumb_up = points[THUMB_TIP].y < points[WRIST].y && points[THUMB_TIP].y < points[THUMB_MCP].y;

    match (state.thumb, state.fingers) {
        (_, [true, true, true, true]) => "Open_Palm",
        (true, [true, false, false, true]) => "ILoveYou",
        (_, [true, true, false, false]) => "Victory",
        (_, [true, false, false, false]) if points[8].y < points[WRIST].y => "Pointing_Up",
        (true, [false, false, false, false]) if thumb_up => "Thumb_Up",
        (true, [false, false, false, false]) => "Thumb_Down",
        (false, [false, false, false, false]) => "Closed_Fist",
        _ => "None",
    }
}

fn gesture_detection(estimate: &LandmarkEstimate) -> Detection {
    let label = classify_gesture(&estimate.points);
    with_handedness(Detection::new(label, estimate.presence), estimate)
}

static GESTURE_RECOGNIZER: LandmarkDescriptor = LandmarkDescriptor {
    id: "gesture_recognizer",
    display_name: "Gesture Recognizer",
    schema: HAND_SCHEMA,
    settings: HAND_SETTINGS,
    model: HAND_MODEL,
    connections: HAND_CONNECTIONS,
    count_key: "num_hands",
    detection: Some(gesture_detection),
};

pub fn create() -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(LandmarkPlugin::new(&GESTURE_RECOGNIZER)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    /// Upright hand with the wrist at the bottom. Fingers listed as extended point up,
    /// the rest curl back towards the palm.
    fn hand(thumb_out: bool, fingers: [bool; 4]) -> Vec<LandmarkPoint> {
        let mut points = vec![LandmarkPoint::new(0.5, 0.5, 0.0); 21];
        points[WRIST] = LandmarkPoint::new(0.5, 0.9, 0.0);

        let columns = [0.40, 0.47, 0.54, 0.61];
        for (i, (&x, &extended)) in columns.iter().zip(fingers.iter()).enumerate() {
            let base = 5 + i * 4;
            points[base] = LandmarkPoint::new(x, 0.70, 0.0);
            points[base + 1] = LandmarkPoint::new(x, 0.62, 0.0);
            if extended {
                points[base + 2] = LandmarkPoint::new(x, 0.55, 0.0);
                points[base + 3] = LandmarkPoint::new(x, 0.48, 0.0);
            } else {
                points[base + 2] = LandmarkPoint::new(x, 0.68, 0.0);
                points[base + 3] = LandmarkPoint::new(x, 0.76, 0.0);
            }
        }

        points[1] = LandmarkPoint::new(0.42, 0.85, 0.0);
        points[THUMB_MCP] = LandmarkPoint::new(0.36, 0.80, 0.0);
        if thumb_out {
            points[3] = LandmarkPoint::new(0.30, 0.74, 0.0);
            points[THUMB_TIP] = LandmarkPoint::new(0.25, 0.68, 0.0);
        } else {
            points[3] = LandmarkPoint::new(0.44, 0.74, 0.0);
            points[THUMB_TIP] = LandmarkPoint::new(0.52, 0.74, 0.0);
        }
        points
    }

    #[test]
    fn test_finger_state() {
        let state = finger_state(&hand(true, [true, false, true, false])).unwrap();
        assert!(state.thumb);
        assert_eq!(state.fingers, [true, false, true, false]);

        let state = finger_state(&hand(false, [false; 4])).unwrap();
        assert!(!state.thumb);
        assert_eq!(state.fingers, [false; 4]);
    }

    #[test]
    fn test_classify_gestures() {
        assert_eq!(classify_gesture(&hand(true, [true; 4])), "Open_Palm");
        assert_eq!(classify_gesture(&hand(false, [false; 4])), "Closed_Fist");
        assert_eq!(classify_gesture(&hand(false, [true, false, false, false])), "Pointing_Up");
        assert_eq!(classify_gesture(&hand(false, [true, true, false, false])), "Victory");
        assert_eq!(classify_gesture(&hand(true, [true, false, false, true])), "ILoveYou");
        assert_eq!(classify_gesture(&hand(true, [false; 4])), "Thumb_Up");
        assert_eq!(classify_gesture(&hand(false, [false, true, true, false])), "None");
    }

    #[test]
    fn test_thumb_down_when_hand_inverted() {
        let mut points = hand(true, [false; 4]);
        points[THUMB_TIP].y = 0.95;
        assert_eq!(classify_gesture(&points), "Thumb_Down");
    }

    #[test]
    fn test_too_few_points() {
        assert_eq!(classify_gesture(&[LandmarkPoint::new(0.0, 0.0, 0.0)]), "None");
    }

    #[test]
    fn test_detection_has_label_score_and_handedness() {
        let estimate = LandmarkEstimate {
            points: hand(true, [true; 4]),
            presence: 0.9,
            handedness: Some(0.7),
        };
        let detection = gesture_detection(&estimate);
        assert_eq!(detection.label, "Open_Palm");
        assert_eq!(detection.score, 0.9);
        assert_eq!(detection.attributes.get("handedness"), Some(&Value::from("Right")));
    }

    #[test]
    fn test_shares_hand_schema() {
        let plugin = create().unwrap();
        assert_eq!(plugin.plugin_id(), "gesture_recognizer");
        assert_eq!(plugin.settings_schema(), HAND_SCHEMA);
    }
}
