//! Shared wire types

use serde::{Deserialize, Serialize};

/// Task lifecycle states.
///
/// `completed` is a wire alias of `screenshot_taken`; the store only ever
/// writes `screenshot_taken`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Playing,
    ScreenshotTaken,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Playing => "playing",
            TaskStatus::ScreenshotTaken => "screenshot_taken",
            TaskStatus::Failed => "failed",
        }
    }

    /// Parse a wire value, folding the `completed` alias.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "playing" => Some(TaskStatus::Playing),
            "screenshot_taken" | "completed" => Some(TaskStatus::ScreenshotTaken),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inferred transition for one space between consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Arrive,
    Leave,
    Unknown,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Arrive => "arrive",
            ChangeType::Leave => "leave",
            ChangeType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "arrive" => Some(ChangeType::Arrive),
            "leave" => Some(ChangeType::Leave),
            "unknown" => Some(ChangeType::Unknown),
            _ => None,
        }
    }
}

/// Standard API envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}

/// Paged query result
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub items: Vec<T>,
}

/// Clamp pagination parameters to the supported window.
///
/// Page is 1-based; page_size is held to [10, 50].
pub fn clamp_paging(page: u32, page_size: u32) -> (u32, u32) {
    let page = page.max(1);
    let page_size = page_size.clamp(10, 50);
    (page, page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_alias() {
        assert_eq!(TaskStatus::parse("completed"), Some(TaskStatus::ScreenshotTaken));
        assert_eq!(TaskStatus::parse("screenshot_taken"), Some(TaskStatus::ScreenshotTaken));
        assert_eq!(TaskStatus::ScreenshotTaken.as_str(), "screenshot_taken");
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_paging_clamp() {
        assert_eq!(clamp_paging(0, 0), (1, 10));
        assert_eq!(clamp_paging(3, 20), (3, 20));
        assert_eq!(clamp_paging(1, 500), (1, 50));
    }
}
