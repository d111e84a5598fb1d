//! Experience and level progression.
//!
//! Levels 1..=99 are derived from experience through a cumulative table
//! built once: the experience needed for level `L` is
//! `sum_{i=1}^{L-1} floor(i - 1 + 300 * 2^((i-1)/7))`. A skill's level is
//! never stored independently of its experience.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Highest reachable level.
pub const MAX_LEVEL: u8 = 99;

/// Experience cap per skill.
pub const MAX_EXPERIENCE: u64 = 200_000_000;

/// Cumulative experience required for each level; index 0 is unused.
static XP_TABLE: LazyLock<[u64; MAX_LEVEL as usize + 1]> = LazyLock::new(|| {
    let mut table = [0u64; MAX_LEVEL as usize + 1];
    let mut total = 0u64;
    for level in 2..=MAX_LEVEL as usize {
        let i = (level - 1) as f64;
        total += (i - 1.0 + 300.0 * 2f64.powf((i - 1.0) / 7.0)).floor() as u64;
        table[level] = total;
    }
    table
});

// ---------------------------------------------------------------------------
// Table lookups
// ---------------------------------------------------------------------------

/// Cumulative experience at which `level` begins. Levels outside 1..=99 are
/// clamped.
pub fn experience_for_level(level: u8) -> u64 {
    XP_TABLE[level.clamp(1, MAX_LEVEL) as usize]
}

/// The greatest level whose threshold does not exceed `xp`.
pub fn level_for_experience(xp: u64) -> u8 {
    (2..=MAX_LEVEL)
        .rev()
        .find(|&level| xp >= XP_TABLE[level as usize])
        .unwrap_or(1)
}

// ---------------------------------------------------------------------------
// SkillType
// ---------------------------------------------------------------------------

/// Trainable skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SkillType {
    /// Trained by chopping trees.
    Woodcutting,
    /// Trained by mining rocks.
    Mining,
}

impl SkillType {
    /// Every skill, in display order.
    pub const ALL: [SkillType; 2] = [SkillType::Woodcutting, SkillType::Mining];

    fn index(self) -> usize {
        match self {
            SkillType::Woodcutting => 0,
            SkillType::Mining => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Skill
// ---------------------------------------------------------------------------

/// Level and experience for one skill. Serializes as its experience only,
/// so a decoded skill always carries the matching level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub struct Skill {
    level: u8,
    experience: u64,
}

impl Default for Skill {
    fn default() -> Self {
        Self {
            level: 1,
            experience: 0,
        }
    }
}

impl From<u64> for Skill {
    fn from(experience: u64) -> Self {
        Self::with_experience(experience)
    }
}

impl From<Skill> for u64 {
    fn from(skill: Skill) -> Self {
        skill.experience
    }
}

impl Skill {
    /// A skill holding `experience` (capped), with its level derived.
    pub fn with_experience(experience: u64) -> Self {
        let experience = experience.min(MAX_EXPERIENCE);
        Self {
            level: level_for_experience(experience),
            experience,
        }
    }

    /// Current level.
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Current experience.
    pub fn experience(&self) -> u64 {
        self.experience
    }

    /// Adds experience, saturating at [`MAX_EXPERIENCE`], and recomputes the
    /// level.
    pub fn add_experience(&mut self, amount: u64) {
        self.experience = self.experience.saturating_add(amount).min(MAX_EXPERIENCE);
        self.level = level_for_experience(self.experience);
    }

    /// Experience at which the next level starts, or the cap at max level.
    pub fn next_level_experience(&self) -> u64 {
        if self.level >= MAX_LEVEL {
            MAX_EXPERIENCE
        } else {
            experience_for_level(self.level + 1)
        }
    }

    /// Percentage in `[0, 100]` of the way from this level to the next.
    pub fn progress_to_next_level(&self) -> f64 {
        if self.level >= MAX_LEVEL {
            return 100.0;
        }
        let current = experience_for_level(self.level);
        let next = experience_for_level(self.level + 1);
        let into_level = self.experience.saturating_sub(current) as f64;
        (into_level / (next - current) as f64 * 100.0).clamp(0.0, 100.0)
    }
}

// ---------------------------------------------------------------------------
// Skills
// ---------------------------------------------------------------------------

/// Level before and after an experience award.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    /// Level before the award.
    pub old_level: u8,
    /// Level after the award.
    pub new_level: u8,
}

impl LevelChange {
    /// Whether the award crossed at least one level boundary.
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }
}

/// One [`Skill`] per [`SkillType`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skills {
    skills: [Skill; 2],
}

impl Skills {
    /// The skill of the given type.
    pub fn get(&self, skill: SkillType) -> &Skill {
        &self.skills[skill.index()]
    }

    /// Level of the given skill.
    pub fn level(&self, skill: SkillType) -> u8 {
        self.get(skill).level()
    }

    /// Awards experience and reports the level transition.
    pub fn add_experience(&mut self, skill: SkillType, amount: u64) -> LevelChange {
        let entry = &mut self.skills[skill.index()];
        let old_level = entry.level();
        entry.add_experience(amount);
        LevelChange {
            old_level,
            new_level: entry.level(),
        }
    }

    /// Overwrites one skill, used when the authority reports a new total.
    pub fn set(&mut self, skill: SkillType, value: Skill) {
        self.skills[skill.index()] = value;
    }

    /// Iterates `(type, skill)` pairs in display order.
    pub fn iter(&self) -> impl Iterator<Item = (SkillType, &Skill)> {
        SkillType::ALL.into_iter().map(|t| (t, self.get(t)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_known_thresholds() {
        assert_eq!(experience_for_level(1), 0);
        assert_eq!(experience_for_level(2), 300);
        assert_eq!(experience_for_level(3), 632);
        assert_eq!(experience_for_level(5), 1_405);
        assert_eq!(experience_for_level(10), 4_177);
        assert_eq!(experience_for_level(99), 47_222_726);
    }

    #[test]
    fn test_level_boundaries() {
        assert_eq!(level_for_experience(0), 1);
        assert_eq!(level_for_experience(299), 1);
        assert_eq!(level_for_experience(300), 2);
        assert_eq!(level_for_experience(1_500), 5);
        assert_eq!(level_for_experience(MAX_EXPERIENCE), 99);
    }

    #[test]
    fn test_level_is_monotonic_and_bounded() {
        let mut previous = 1;
        let mut xp = 0u64;
        while xp <= MAX_EXPERIENCE {
            let level = level_for_experience(xp);
            assert!((1..=MAX_LEVEL).contains(&level));
            assert!(level >= previous, "level dropped at xp={xp}");
            previous = level;
            xp += 9_973;
        }
        for level in 1..MAX_LEVEL {
            assert!(experience_for_level(level) < experience_for_level(level + 1));
        }
    }

    #[test]
    fn test_add_experience_caps_and_tracks_level() {
        let mut skill = Skill::default();
        for amount in [0, 25, 275, 1_000_000, u64::MAX, 5] {
            let before = skill.experience();
            skill.add_experience(amount);
            assert!(skill.experience() >= before);
            assert!(skill.experience() <= MAX_EXPERIENCE);
            assert_eq!(skill.level(), level_for_experience(skill.experience()));
        }
        assert_eq!(skill.experience(), MAX_EXPERIENCE);
        assert_eq!(skill.level(), MAX_LEVEL);
    }

    #[test]
    fn test_progress_to_next_level() {
        let fresh = Skill::default();
        assert_eq!(fresh.progress_to_next_level(), 0.0);

        let halfway = Skill::with_experience(150);
        assert!((halfway.progress_to_next_level() - 50.0).abs() < 1e-9);

        let maxed = Skill::with_experience(MAX_EXPERIENCE);
        assert_eq!(maxed.progress_to_next_level(), 100.0);
        assert_eq!(maxed.next_level_experience(), MAX_EXPERIENCE);
        assert_eq!(fresh.next_level_experience(), 300);
    }

    #[test]
    fn test_skills_report_level_up() {
        let mut skills = Skills::default();
        let change = skills.add_experience(SkillType::Mining, 50);
        assert!(!change.leveled_up());

        let change = skills.add_experience(SkillType::Mining, 1_500);
        assert_eq!(change.old_level, 1);
        assert_eq!(change.new_level, 5);
        assert!(change.leveled_up());
        assert_eq!(skills.level(SkillType::Woodcutting), 1);
    }

    #[test]
    fn test_skill_decodes_with_consistent_level() {
        let json = serde_json::to_string(&Skill::with_experience(1_500)).unwrap();
        assert_eq!(json, "1500");
        let decoded: Skill = serde_json::from_str("632").unwrap();
        assert_eq!(decoded.level(), 3);
    }
}
