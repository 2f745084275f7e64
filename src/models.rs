//! Record types flowing through the capture pipeline.
//!
//! A listing tile becomes a [`JobReference`], a captured detail view becomes
//! a [`JobRecord`], and every processed reference resolves to exactly one
//! [`ProcessingOutcome`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A listing entry discovered during traversal, before detail capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReference {
    /// Site-assigned posting identifier.
    pub id: String,
    /// Permalink to the posting, absolute or site-relative.
    pub href: String,
}

impl JobReference {
    pub fn new(id: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            href: href.into(),
        }
    }
}

/// How a record's detail view was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    Modal,
    DirectUrl,
}

impl CaptureMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Modal => "modal",
            Self::DirectUrl => "direct_url",
        }
    }
}

/// Hourly vs fixed-price engagement, as labeled on the posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkType {
    Hourly,
    Fixed,
    Unknown,
}

impl Default for WorkType {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Pay structure as displayed on the posting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentTerms {
    pub work_type: WorkType,
    /// Rate or budget text, e.g. `"$15.00 - $35.00"` or `"$500"`.
    pub amount: Option<String>,
    /// Expected duration text for hourly work.
    pub duration: Option<String>,
}

/// Reputation block for the posting client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub payment_verified: bool,
    pub rating: Option<f64>,
    /// Review summary text, e.g. `"4.95 of 212 reviews"`.
    pub reviews: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    /// Client-local clock text as rendered by the site.
    pub local_time: Option<String>,
    pub jobs_posted: Option<String>,
    pub hire_rate: Option<String>,
    pub total_spent: Option<String>,
    pub hires: Option<String>,
    pub industry: Option<String>,
    pub company_size: Option<String>,
    pub member_since: Option<String>,
}

/// One prior engagement from the client's visible history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub title: Option<String>,
    /// Engagement period text, e.g. `"Jan 2024 - Mar 2024"`.
    pub period: Option<String>,
    pub feedback_to_freelancer: Option<String>,
    pub feedback_to_client: Option<String>,
    pub freelancer_name: Option<String>,
    /// Total paid or hourly rate text for the engagement.
    pub payment: Option<String>,
}

/// Structured result of a successful detail capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    /// Site-reported posting age text, e.g. `"Posted 2 hours ago"`.
    pub posted_date: Option<String>,
    pub location: Option<String>,
    pub project_type: Option<String>,
    pub experience_level: Option<String>,
    pub required_connects: Option<u32>,
    pub payment: PaymentTerms,
    pub skills: Vec<String>,
    pub screening_questions: Vec<String>,
    pub featured: bool,
    pub client: ClientProfile,
    /// Prior engagements in the order the site lists them.
    pub client_history: Vec<Engagement>,
    pub scraped_at: DateTime<Utc>,
    pub method: CaptureMethod,
}

impl JobRecord {
    /// A record may be persisted only when both headline fields are present.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.description.trim().is_empty()
    }

    /// Names of required fields that are missing or blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if self.description.trim().is_empty() {
            missing.push("description");
        }
        missing
    }
}

/// Terminal result of processing one job reference.
#[derive(Debug, Clone)]
pub enum ProcessingOutcome {
    Success(JobRecord),
    Skipped {
        job_id: String,
        reason: String,
    },
    Failed {
        job_id: String,
        error: String,
        url: String,
        at: DateTime<Utc>,
    },
}

impl ProcessingOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Success(record) => &record.job_id,
            Self::Skipped { job_id, .. } => job_id,
            Self::Failed { job_id, .. } => job_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, description: &str) -> JobRecord {
        JobRecord {
            job_id: "01abc".into(),
            url: "https://example.com/jobs/~01abc".into(),
            title: title.into(),
            description: description.into(),
            posted_date: None,
            location: None,
            project_type: None,
            experience_level: None,
            required_connects: None,
            payment: PaymentTerms::default(),
            skills: Vec::new(),
            screening_questions: Vec::new(),
            featured: false,
            client: ClientProfile::default(),
            client_history: Vec::new(),
            scraped_at: Utc::now(),
            method: CaptureMethod::Modal,
        }
    }

    #[test]
    fn validity_requires_title_and_description() {
        assert!(record("Rust engineer", "Build a scraper").is_valid());
        assert!(!record("", "Build a scraper").is_valid());
        assert!(!record("Rust engineer", "").is_valid());
        assert!(!record("   ", "Build a scraper").is_valid());
    }

    #[test]
    fn missing_fields_names_blank_requirements() {
        assert_eq!(record("", "").missing_fields(), vec!["title", "description"]);
        assert!(record("t", "d").missing_fields().is_empty());
    }

    #[test]
    fn capture_method_serializes_snake_case() {
        let json = serde_json::to_string(&CaptureMethod::DirectUrl).unwrap();
        assert_eq!(json, "\"direct_url\"");
    }
}
