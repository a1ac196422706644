use serde::{Deserialize, Serialize};

/// Unit category an achievement counts completions in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Proba,
    Archi,
    Any,
}

impl Category {
    /// Whether a completed unit of `unit_type` counts toward this category.
    pub fn matches(&self, unit_type: &str) -> bool {
        match self {
            Category::Any => true,
            Category::Proba => unit_type == "proba",
            Category::Archi => unit_type == "archi",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Requirement {
    pub category: Category,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AchievementDefinition {
    pub key: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub requirement: Requirement,
}

pub const ACHIEVEMENTS: &[AchievementDefinition] = &[
    AchievementDefinition {
        key: "proba_master",
        title: "Probability Master",
        description: "Complete every probability unit",
        icon: "fas fa-chart-line",
        requirement: Requirement { category: Category::Proba, count: 5 },
    },
    AchievementDefinition {
        key: "archi_expert",
        title: "Architecture Expert",
        description: "Complete every architecture unit",
        icon: "fas fa-microchip",
        requirement: Requirement { category: Category::Archi, count: 2 },
    },
    AchievementDefinition {
        key: "first_steps",
        title: "First Steps",
        description: "Complete your first unit",
        icon: "fas fa-footsteps",
        requirement: Requirement { category: Category::Any, count: 1 },
    },
    AchievementDefinition {
        key: "dedicated_learner",
        title: "Dedicated Learner",
        description: "Complete 3 different units",
        icon: "fas fa-book",
        requirement: Requirement { category: Category::Any, count: 3 },
    },
];

pub fn find(key: &str) -> Option<&'static AchievementDefinition> {
    ACHIEVEMENTS.iter().find(|a| a.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_matches() {
        assert!(Category::Any.matches("archi"));
        assert!(Category::Proba.matches("proba"));
        assert!(!Category::Proba.matches("archi"));
        assert!(!Category::Archi.matches("quiz"));
    }

    #[test]
    fn test_keys_are_unique() {
        let mut keys: Vec<_> = ACHIEVEMENTS.iter().map(|a| a.key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), ACHIEVEMENTS.len());
        assert_eq!(find("first_steps").map(|a| a.requirement.count), Some(1));
    }
}
