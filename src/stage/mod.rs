//! Stage definitions and the fixed deployment catalog.
//!
//! This module provides:
//! - `Stage` — one immutable catalog entry
//! - `Target` — deployment destination used to filter applicable stages
//! - `catalog()` — the fixed, ordered list of all 11 stages
//! - `select()` — pure filtering that always preserves catalog order

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod command;
pub mod registry;
pub mod validator;

pub use registry::{StageContext, StageExecutor, StageOutput, StageRegistry, StageValidator};

/// Stage id of the optional toxicity-training stage (`--skip-toxicity`).
pub const TOXICITY_STAGE: u32 = 4;
/// Stage id of the optional UI-deployment stage (`--skip-ui`).
pub const UI_STAGE: u32 = 10;

/// Deployment destination. `Both` unions the local and cloud stage sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Local,
    Cloud,
    Both,
}

impl Target {
    pub fn includes_cloud(&self) -> bool {
        matches!(self, Target::Cloud | Target::Both)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Local => write!(f, "local"),
            Target::Cloud => write!(f, "cloud"),
            Target::Both => write!(f, "both"),
        }
    }
}

/// One immutable catalog entry. Stages are fixed program data: never created
/// or destroyed at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub id: u32,
    pub name: &'static str,
    pub description: &'static str,
    /// Rough wall-clock estimate; the execution timeout is derived from it.
    pub estimated_secs: u64,
    /// Which targets this stage applies to. A stage listing only `Cloud`
    /// never runs for `--target local`.
    pub targets: &'static [Target],
    /// Optional stages degrade to skip instead of abort on failure in
    /// automated mode.
    pub optional: bool,
}

impl Stage {
    pub fn applies_to(&self, target: Target) -> bool {
        match target {
            Target::Both => true,
            t => self.targets.contains(&t) || self.targets.contains(&Target::Both),
        }
    }
}

const LOCAL_AND_CLOUD: &[Target] = &[Target::Local, Target::Cloud];
const CLOUD_ONLY: &[Target] = &[Target::Cloud];

static STAGES: &[Stage] = &[
    Stage {
        id: 0,
        name: "Environment Setup",
        description: "Create venv and install pipeline dependencies",
        estimated_secs: 300,
        targets: LOCAL_AND_CLOUD,
        optional: false,
    },
    Stage {
        id: 1,
        name: "Data Preprocessing",
        description: "Download dataset, clean, create train/val/test splits",
        estimated_secs: 180,
        targets: LOCAL_AND_CLOUD,
        optional: false,
    },
    Stage {
        id: 2,
        name: "Baseline Training",
        description: "Train TF-IDF + Logistic Regression + Linear SVM",
        estimated_secs: 240,
        targets: LOCAL_AND_CLOUD,
        optional: false,
    },
    Stage {
        id: 3,
        name: "Transformer Training",
        description: "Fine-tune DistilBERT with the selected profile",
        estimated_secs: 1200,
        targets: LOCAL_AND_CLOUD,
        optional: false,
    },
    Stage {
        id: 4,
        name: "Toxicity Training",
        description: "Train multi-label toxicity classifier (6 categories)",
        estimated_secs: 1800,
        targets: LOCAL_AND_CLOUD,
        optional: true,
    },
    Stage {
        id: 5,
        name: "Local API Testing",
        description: "Start API server, probe endpoints, shut it down",
        estimated_secs: 120,
        targets: LOCAL_AND_CLOUD,
        optional: false,
    },
    Stage {
        id: 6,
        name: "Container Build",
        description: "Build backend and UI images via docker-compose",
        estimated_secs: 720,
        targets: LOCAL_AND_CLOUD,
        optional: false,
    },
    Stage {
        id: 7,
        name: "Integration Tests",
        description: "Run the full pytest suite",
        estimated_secs: 240,
        targets: LOCAL_AND_CLOUD,
        optional: false,
    },
    Stage {
        id: 8,
        name: "Artifact Upload",
        description: "Upload trained models to cloud storage",
        estimated_secs: 180,
        targets: CLOUD_ONLY,
        optional: true,
    },
    Stage {
        id: 9,
        name: "Remote Provisioning",
        description: "Provision the VM and roll out the API container",
        estimated_secs: 1500,
        targets: CLOUD_ONLY,
        optional: true,
    },
    Stage {
        id: 10,
        name: "UI Deployment",
        description: "Deploy the dashboard UI to the VM",
        estimated_secs: 600,
        targets: CLOUD_ONLY,
        optional: true,
    },
];

/// The fixed, ordered stage catalog.
pub fn catalog() -> &'static [Stage] {
    STAGES
}

pub fn stage_by_id(id: u32) -> Option<&'static Stage> {
    STAGES.iter().find(|s| s.id == id)
}

/// Filter inputs for `select`. Mirrors the CLI surface.
#[derive(Debug, Clone, Default)]
pub struct StageFilter {
    pub only_stage: Option<u32>,
    pub skip_stages: Vec<u32>,
    pub skip_toxicity: bool,
    pub skip_ui: bool,
}

/// Build the ordered execution plan: catalog order restricted to the filtered
/// subset. Pure and stable — identical inputs always yield identical plans.
pub fn select(target: Target, filter: &StageFilter) -> Vec<&'static Stage> {
    if let Some(id) = filter.only_stage {
        return STAGES.iter().filter(|s| s.id == id).collect();
    }

    STAGES
        .iter()
        .filter(|s| s.applies_to(target))
        .filter(|s| !filter.skip_stages.contains(&s.id))
        .filter(|s| !(filter.skip_toxicity && s.id == TOXICITY_STAGE))
        .filter(|s| !(filter.skip_ui && s.id == UI_STAGE))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ids_are_dense_and_ordered() {
        let ids: Vec<u32> = catalog().iter().map(|s| s.id).collect();
        assert_eq!(ids, (0..11).collect::<Vec<u32>>());
    }

    #[test]
    fn select_local_excludes_cloud_only_stages() {
        let plan = select(Target::Local, &StageFilter::default());
        assert!(plan.iter().all(|s| s.id <= 7), "cloud stages in local plan");
        assert_eq!(plan.len(), 8);
    }

    #[test]
    fn select_both_unions_everything() {
        let plan = select(Target::Both, &StageFilter::default());
        assert_eq!(plan.len(), catalog().len());
    }

    #[test]
    fn select_preserves_catalog_order_under_any_filter() {
        let filter = StageFilter {
            skip_stages: vec![1, 6],
            skip_toxicity: true,
            ..Default::default()
        };
        let plan = select(Target::Both, &filter);
        let ids: Vec<u32> = plan.iter().map(|s| s.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted, "plan must preserve catalog order");
        assert!(!ids.contains(&1));
        assert!(!ids.contains(&6));
        assert!(!ids.contains(&TOXICITY_STAGE));
    }

    #[test]
    fn select_is_stable_under_repeated_calls() {
        let filter = StageFilter {
            skip_stages: vec![2],
            ..Default::default()
        };
        let a: Vec<u32> = select(Target::Cloud, &filter).iter().map(|s| s.id).collect();
        let b: Vec<u32> = select(Target::Cloud, &filter).iter().map(|s| s.id).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn only_stage_selects_exactly_one() {
        let filter = StageFilter {
            only_stage: Some(3),
            ..Default::default()
        };
        let plan = select(Target::Local, &filter);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].id, 3);
    }

    #[test]
    fn only_stage_unknown_id_yields_empty_plan() {
        let filter = StageFilter {
            only_stage: Some(99),
            ..Default::default()
        };
        assert!(select(Target::Both, &filter).is_empty());
    }

    #[test]
    fn skip_ui_removes_stage_10() {
        let filter = StageFilter {
            skip_ui: true,
            ..Default::default()
        };
        let plan = select(Target::Cloud, &filter);
        assert!(plan.iter().all(|s| s.id != UI_STAGE));
    }

    #[test]
    fn scenario_b_skip_one_stage_runs_rest_in_order() {
        // target=local, skip [2] over local-applicable stages 0..=3 prefix.
        let filter = StageFilter {
            skip_stages: vec![2],
            ..Default::default()
        };
        let ids: Vec<u32> = select(Target::Local, &filter)
            .iter()
            .map(|s| s.id)
            .filter(|id| *id <= 3)
            .collect();
        assert_eq!(ids, vec![0, 1, 3]);
    }

    #[test]
    fn optional_flags_match_catalog() {
        assert!(stage_by_id(TOXICITY_STAGE).unwrap().optional);
        assert!(stage_by_id(UI_STAGE).unwrap().optional);
        assert!(!stage_by_id(0).unwrap().optional);
    }
}
