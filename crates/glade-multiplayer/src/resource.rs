//! Harvestable resource nodes: gather, deplete, respawn.
//!
//! ```text
//! Available --begin--> Gathering --success--> Depleted --respawn--> Available
//!                          |
//!                          +--cancel / failure--> Available
//! ```
//!
//! Nodes never own timers. The room schedules gather completion and respawn
//! and drives the transitions here with the current time.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use glade_net::ConnectionId;

use crate::movement::Position;
use crate::progression::SkillType;

/// Base chance that a completed gather yields a reward.
pub const BASE_SUCCESS_CHANCE: f64 = 0.3;

/// Extra success chance per skill level.
pub const SUCCESS_CHANCE_PER_LEVEL: f64 = 0.01;

// ---------------------------------------------------------------------------
// Identity and type
// ---------------------------------------------------------------------------

/// Stable identifier of a node within the static layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u16);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Kind of resource a node yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// Low tier, trains woodcutting.
    Tree,
    /// Mid tier, trains mining.
    Rock,
    /// Rare tier, trains mining.
    GoldRock,
}

impl ResourceType {
    /// Experience before the level multiplier.
    pub fn base_experience(self) -> u64 {
        match self {
            ResourceType::Tree => 25,
            ResourceType::Rock => 50,
            ResourceType::GoldRock => 1_500,
        }
    }

    /// Skill trained by gathering this resource.
    pub fn skill(self) -> SkillType {
        match self {
            ResourceType::Tree => SkillType::Woodcutting,
            ResourceType::Rock | ResourceType::GoldRock => SkillType::Mining,
        }
    }
}

/// Probability in `[0, 1]` that a gather at `level` succeeds.
pub fn success_chance(level: u8) -> f64 {
    (BASE_SUCCESS_CHANCE + SUCCESS_CHANCE_PER_LEVEL * f64::from(level)).clamp(0.0, 1.0)
}

/// Experience awarded for a successful gather at `level`.
pub fn gather_reward(kind: ResourceType, level: u8) -> u64 {
    kind.base_experience() * (1 + u64::from(level / 10))
}

// ---------------------------------------------------------------------------
// Success draws
// ---------------------------------------------------------------------------

/// Source of uniform draws in `[0, 1)` deciding gather success.
pub trait GatherRoll: Send {
    /// Next draw; a gather succeeds when the draw is below its chance.
    fn roll(&mut self) -> f64;
}

/// Draws from a `rand` generator.
pub struct RandomRoll {
    rng: StdRng,
}

impl RandomRoll {
    /// Generator seeded from the operating system.
    pub fn from_os() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Reproducible generator.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl GatherRoll for RandomRoll {
    fn roll(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}

/// Always returns the same draw. `FixedRoll(0.0)` always succeeds and
/// `FixedRoll(1.0)` always fails.
#[derive(Debug, Clone, Copy)]
pub struct FixedRoll(pub f64);

impl GatherRoll for FixedRoll {
    fn roll(&mut self) -> f64 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Node state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Free to gather.
    Available,
    /// Being gathered by one participant.
    Gathering {
        /// The participant holding the node.
        by: ConnectionId,
    },
    /// Exhausted until the deadline passes.
    Depleted {
        /// Wall-clock millisecond at which the node comes back.
        respawn_at_ms: u64,
    },
}

/// Why a gather could not start.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum GatherRejection {
    /// The node is being gathered or is depleted.
    #[error("node is not available")]
    NotAvailable,
    /// The participant stands too far away.
    #[error("too far from node: {distance:.2} > {max:.2}")]
    TooFar {
        /// Distance between participant and node.
        distance: f64,
        /// Interaction radius.
        max: f64,
    },
    /// The participant already gathers another node.
    #[error("already gathering another node")]
    AlreadyGathering,
    /// No node with that id exists.
    #[error("unknown node")]
    UnknownNode,
}

/// Result of a gather whose timer ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherOutcome {
    /// Reward earned; the node is now depleted.
    Success {
        /// Skill to credit.
        skill: SkillType,
        /// Experience to credit.
        amount: u64,
    },
    /// No reward; the node is available again.
    Failure,
}

/// A harvestable node at a fixed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Stable identifier.
    pub id: NodeId,
    /// What the node yields.
    pub kind: ResourceType,
    /// Fixed position on the grid.
    pub position: Position,
    /// Current lifecycle state.
    pub state: NodeState,
}

impl ResourceNode {
    /// A new available node.
    pub fn new(id: NodeId, kind: ResourceType, position: Position) -> Self {
        Self {
            id,
            kind,
            position,
            state: NodeState::Available,
        }
    }

    /// Whether the node can be gathered right now.
    pub fn is_available(&self) -> bool {
        self.state == NodeState::Available
    }

    /// Starts a gather by `who` standing at `from`.
    pub fn begin_gather(
        &mut self,
        who: ConnectionId,
        from: Position,
        interaction_radius: f64,
    ) -> Result<(), GatherRejection> {
        if !self.is_available() {
            return Err(GatherRejection::NotAvailable);
        }
        let distance = from.distance(self.position);
        if distance > interaction_radius {
            return Err(GatherRejection::TooFar {
                distance,
                max: interaction_radius,
            });
        }
        self.state = NodeState::Gathering { by: who };
        Ok(())
    }

    /// Abandons a gather in progress. Returns whether anything changed.
    pub fn cancel_gather(&mut self) -> bool {
        if matches!(self.state, NodeState::Gathering { .. }) {
            self.state = NodeState::Available;
            true
        } else {
            false
        }
    }

    /// Resolves a gather whose timer ran out, for a gatherer at `level`.
    ///
    /// Returns `None` if the node was not being gathered.
    pub fn complete_gather(
        &mut self,
        level: u8,
        roll: &mut dyn GatherRoll,
        now_ms: u64,
        respawn_ms: u64,
    ) -> Option<GatherOutcome> {
        if !matches!(self.state, NodeState::Gathering { .. }) {
            return None;
        }
        if roll.roll() < success_chance(level) {
            self.state = NodeState::Depleted {
                respawn_at_ms: now_ms + respawn_ms.max(1),
            };
            Some(GatherOutcome::Success {
                skill: self.kind.skill(),
                amount: gather_reward(self.kind, level),
            })
        } else {
            self.state = NodeState::Available;
            Some(GatherOutcome::Failure)
        }
    }

    /// Brings a depleted node back once its deadline has passed. Returns
    /// whether the node became available.
    pub fn respawn(&mut self, now_ms: u64) -> bool {
        match self.state {
            NodeState::Depleted { respawn_at_ms } if now_ms >= respawn_at_ms => {
                self.state = NodeState::Available;
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Static layout
// ---------------------------------------------------------------------------

const TREES: [(f64, f64); 10] = [
    (5.0, 5.0),
    (15.0, 5.0),
    (5.0, 15.0),
    (15.0, 15.0),
    (4.0, 4.0),
    (6.0, 4.0),
    (4.0, 6.0),
    (14.0, 4.0),
    (16.0, 4.0),
    (14.0, 6.0),
];

const ROCKS: [(f64, f64); 10] = [
    (10.0, 5.0),
    (5.0, 10.0),
    (15.0, 10.0),
    (10.0, 15.0),
    (9.0, 4.0),
    (11.0, 4.0),
    (9.0, 6.0),
    (11.0, 6.0),
    (4.0, 9.0),
    (4.0, 11.0),
];

const GOLD_ROCKS: [(f64, f64); 3] = [(18.0, 18.0), (17.0, 18.0), (18.0, 17.0)];

/// The fixed world layout: a forest, a mining area and a rare gold corner.
/// Ids are assigned in order: trees first, then rocks, then gold rocks.
pub fn default_layout() -> Vec<ResourceNode> {
    let groups = [
        (ResourceType::Tree, &TREES[..]),
        (ResourceType::Rock, &ROCKS[..]),
        (ResourceType::GoldRock, &GOLD_ROCKS[..]),
    ];
    groups
        .into_iter()
        .flat_map(|(kind, spots)| spots.iter().map(move |&(x, y)| (kind, Position::new(x, y))))
        .enumerate()
        .map(|(i, (kind, position))| ResourceNode::new(NodeId(i as u16), kind, position))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
