//! Movement and collision validation shared by the room and client
//! prediction.
//!
//! [`validate_move`] is the single rule deciding where an avatar may stand.
//! The server runs it against authoritative state; clients run it against
//! their local shadow so accepted moves can render before the round trip.

use serde::{Deserialize, Serialize};

/// Collision radius of an avatar.
pub const PLAYER_RADIUS: f64 = 0.4;

/// Collision radius of a resource node.
pub const RESOURCE_RADIUS: f64 = 0.6;

/// Keep-out distance between an avatar and a node centre.
pub const NODE_CLEARANCE: f64 = PLAYER_RADIUS + RESOURCE_RADIUS;

/// Keep-out distance between two avatars.
pub const PARTICIPANT_CLEARANCE: f64 = PLAYER_RADIUS * 2.0;

/// Distance kept from every grid edge.
pub const EDGE_MARGIN: f64 = 0.5;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A point on the continuous 2D plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Position {
    /// Creates a position.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Why a move was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    /// The target overlaps a resource node.
    BlockedByNode,
    /// The target overlaps another avatar.
    BlockedByParticipant,
}

/// Result of [`validate_move`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveOutcome {
    /// The avatar may stand at `position` looking along `facing`.
    Accepted {
        /// Clamped target.
        position: Position,
        /// Facing in radians.
        facing: f64,
    },
    /// Nothing changes.
    Rejected(MoveRejection),
}

impl MoveOutcome {
    /// Whether the move was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, MoveOutcome::Accepted { .. })
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Clamps `value` into the walkable band of a grid, falling back to
/// `current` when `value` is not finite.
fn sanitize_axis(value: f64, current: f64, grid_size: f64) -> f64 {
    let value = if value.is_finite() { value } else { current };
    value.max(EDGE_MARGIN).min(grid_size - EDGE_MARGIN)
}

/// Decides whether an avatar at `current` may move to the proposed point.
///
/// Distances exactly equal to a clearance are accepted.
pub fn validate_move(
    current: Position,
    facing: f64,
    proposed_x: f64,
    proposed_y: f64,
    grid_size: f64,
    others: impl IntoIterator<Item = Position>,
    nodes: impl IntoIterator<Item = Position>,
) -> MoveOutcome {
    let target = Position::new(
        sanitize_axis(proposed_x, current.x, grid_size),
        sanitize_axis(proposed_y, current.y, grid_size),
    );

    if nodes
        .into_iter()
        .any(|node| target.distance(node) < NODE_CLEARANCE)
    {
        return MoveOutcome::Rejected(MoveRejection::BlockedByNode);
    }
    if others
        .into_iter()
        .any(|other| target.distance(other) < PARTICIPANT_CLEARANCE)
    {
        return MoveOutcome::Rejected(MoveRejection::BlockedByParticipant);
    }

    let dx = target.x - current.x;
    let dy = target.y - current.y;
    let facing = if dx == 0.0 && dy == 0.0 {
        facing
    } else {
        dx.atan2(-dy)
    };
    MoveOutcome::Accepted {
        position: target,
        facing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    const GRID: f64 = 20.0;
    const START: Position = Position::new(10.5, 10.5);

    fn accepted(outcome: MoveOutcome) -> (Position, f64) {
        match outcome {
            MoveOutcome::Accepted { position, facing } => (position, facing),
            MoveOutcome::Rejected(why) => panic!("expected acceptance, got {why:?}"),
        }
    }

    #[test]
    fn test_open_move_accepted() {
        let (pos, _) = accepted(validate_move(START, 0.0, 12.0, 9.0, GRID, [], []));
        assert_eq!(pos, Position::new(12.0, 9.0));
    }

    #[test]
    fn test_clamped_to_grid() {
        let (pos, _) = accepted(validate_move(START, 0.0, -3.0, 25.0, GRID, [], []));
        assert_eq!(pos, Position::new(0.5, 19.5));
    }

    #[test]
    fn test_non_finite_axis_falls_back() {
        let (pos, _) = accepted(validate_move(START, 0.0, f64::NAN, 12.0, GRID, [], []));
        assert_eq!(pos, Position::new(10.5, 12.0));
        let (pos, _) = accepted(validate_move(
            START,
            0.0,
            f64::INFINITY,
            f64::NEG_INFINITY,
            GRID,
            [],
            [],
        ));
        assert_eq!(pos, START);
    }

    #[test]
    fn test_facing_follows_delta() {
        let (_, up) = accepted(validate_move(START, 1.0, 10.5, 9.5, GRID, [], []));
        assert!(up.abs() < 1e-12);
        let (_, right) = accepted(validate_move(START, 1.0, 11.5, 10.5, GRID, [], []));
        assert!((right - FRAC_PI_2).abs() < 1e-12);
        let (_, down) = accepted(validate_move(START, 1.0, 10.5, 11.5, GRID, [], []));
        assert!((down - PI).abs() < 1e-12);
    }

    #[test]
    fn test_zero_delta_keeps_facing() {
        let (pos, facing) = accepted(validate_move(START, 1.25, 10.5, 10.5, GRID, [], []));
        assert_eq!(pos, START);
        assert_eq!(facing, 1.25);
    }

    #[test]
    fn test_node_clearance_boundary() {
        let node = Position::new(5.0, 5.0);
        let from = Position::new(8.0, 5.0);
        assert!(validate_move(from, 0.0, 6.0, 5.0, GRID, [], [node]).is_accepted());
        assert_eq!(
            validate_move(from, 0.0, 5.9, 5.0, GRID, [], [node]),
            MoveOutcome::Rejected(MoveRejection::BlockedByNode)
        );
    }

    #[test]
    fn test_participant_clearance_boundary() {
        let other = Position::new(0.5, 0.5);
        let from = Position::new(3.0, 0.5);
        assert!(validate_move(from, 0.0, 1.3, 0.5, GRID, [other], []).is_accepted());
        assert_eq!(
            validate_move(from, 0.0, 1.2, 0.5, GRID, [other], []),
            MoveOutcome::Rejected(MoveRejection::BlockedByParticipant)
        );
    }

    #[test]
    fn test_clamping_happens_before_collision() {
        // Off-grid target clamps onto (0.5, 0.5), right next to the node.
        let node = Position::new(1.0, 1.0);
        let outcome = validate_move(START, 0.0, -10.0, -10.0, GRID, [], [node]);
        assert_eq!(outcome, MoveOutcome::Rejected(MoveRejection::BlockedByNode));
    }
}
