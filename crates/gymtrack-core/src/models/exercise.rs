use serde::{Deserialize, Serialize};

/// An exercise from the catalog, as listed per muscle group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Exercise {
    pub id: i64,
    pub name: String,
    pub series: u32,
    pub repetitions: String,
    pub group: String,
    pub demo: String,
    pub thumb: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Exercise {
    /// One-line summary shown under the exercise name
    pub fn display_summary(&self) -> String {
        let sets = if self.series == 1 { "set" } else { "sets" };
        format!("{} {} x {} reps", self.series, sets, self.repetitions)
    }

    pub fn thumb_url(&self, api_url: &str) -> String {
        format!("{}/exercise/thumb/{}", api_url.trim_end_matches('/'), self.thumb)
    }

    pub fn demo_url(&self, api_url: &str) -> String {
        format!("{}/exercise/demo/{}", api_url.trim_end_matches('/'), self.demo)
    }
}
