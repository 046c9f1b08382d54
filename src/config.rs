use gpucap_record::SchedulerConfig;
use serde::{Deserialize, Serialize};

/// Top-level capture settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub scheduler: SchedulerConfig,
}
