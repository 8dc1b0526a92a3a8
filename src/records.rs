use serde::{Deserialize, Serialize};

/// Header shared by the input and intermediate files.
pub const URL_HEADER: [&str; 2] = ["tactic_id", "impression_pixel_json"];
/// Header shared by the combined results and failures files.
pub const RESULT_HEADER: [&str; 4] = ["tactic_id", "status", "code", "impression_pixel_json"];

/// Code written for rows that never produced an HTTP status.
pub const SENTINEL_CODE: u16 = 404;

/// One row of the input CSV.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InputRecord {
    pub tactic_id: String,
    pub impression_pixel_json: String,
}

/// One URL of the work list, tagged with the tactic it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedUrlRecord {
    pub tactic_id: String,
    #[serde(rename = "impression_pixel_json")]
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Failed,
    Unreachable,
    Unclassified,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Failed => "FAILED",
            Status::Unreachable => "UNREACHABLE",
            Status::Unclassified => "UNCLASSIFIED",
        }
    }
}

/// A pixel field that could not be decoded; lands in the failures file only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub tactic_id: String,
    pub status: Status,
    pub code: u16,
    #[serde(rename = "impression_pixel_json")]
    pub reason: String,
}

impl FailureRecord {
    pub fn invalid_json(tactic_id: &str, raw: &str) -> Self {
        Self {
            tactic_id: tactic_id.to_string(),
            status: Status::Failed,
            code: SENTINEL_CODE,
            reason: format!("INVALID_URL: {}", raw),
        }
    }
}

/// One completed check, written to the combined file (and the failures
/// file when it did not pass).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRecord {
    pub tactic_id: String,
    pub status: Status,
    pub code: u16,
    #[serde(rename = "impression_pixel_json")]
    pub url: String,
}

impl ResultRecord {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, Status::Failed | Status::Unreachable)
    }
}
