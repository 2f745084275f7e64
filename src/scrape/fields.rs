//! Detail-view field extraction.
//!
//! Every site selector lives in [`FieldMap`], so markup drift is a one-table
//! change and tests can swap in their own map. [`PageReader::read`] turns an
//! HTML snapshot into a [`JobRecord`]; it is synchronous on purpose, parsed
//! documents never cross an await point.

use chrono::Utc;
use scraper::{ElementRef, Html, Selector};

use crate::models::{CaptureMethod, ClientProfile, Engagement, JobRecord, PaymentTerms, WorkType};

/// CSS selectors for every field read from a detail view.
///
/// Comma-separated selector lists are tried as one group; slices are tried
/// in order with the first match winning.
#[derive(Debug, Clone)]
pub struct FieldMap {
    pub title: &'static str,
    pub featured_marker: &'static str,
    pub description: &'static str,
    pub screening_questions: &'static str,
    pub posted_date: &'static str,
    pub location: &'static str,
    pub project_type: &'static str,
    pub experience_level: &'static str,
    pub connects: &'static [&'static str],
    pub hourly_marker: &'static str,
    pub fixed_marker: &'static str,
    pub budget_amounts: &'static str,
    pub duration: &'static str,
    pub fixed_budget: &'static str,
    pub skills: &'static str,
    pub payment_verified: &'static str,
    pub client_rating: &'static str,
    pub client_reviews: &'static str,
    pub client_country: &'static str,
    pub client_city: &'static str,
    pub client_local_time: &'static str,
    pub client_spend: &'static str,
    pub client_hires: &'static str,
    pub client_jobs_posted: &'static str,
    pub client_hire_rate: &'static str,
    pub client_industry: &'static str,
    pub client_company_size: &'static str,
    pub client_member_since: &'static str,
    pub history_section: &'static str,
    pub history_item: &'static str,
    pub history_title: &'static str,
    pub history_title_fallback: &'static str,
    pub history_freelancer: &'static str,
    pub history_freelancer_fallback: &'static str,
    pub history_feedback_to_freelancer: &'static str,
    pub history_feedback_to_client: &'static str,
    pub history_period: &'static str,
    pub history_payment: &'static str,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            title: ".air3-card-sections h4 span.flex-1",
            featured_marker: "#featured-job",
            description: ".break .text-body-sm",
            screening_questions: "[data-test=\"Questions\"] ol li",
            posted_date: "[data-test=\"PostedOn\"] span",
            location: "[data-test=\"LocationLabel\"] span.text-light-on-muted",
            project_type: "[data-test=\"Segmentations\"] span",
            experience_level: "[data-test=\"Features\"] li [data-cy=\"expertise\"] + strong",
            connects: &[
                "[data-test=\"ConnectsDesktop\"] span:nth-child(2)",
                "[data-test=\"ConnectsAuction\"] div strong",
                "[data-test=\"ConnectsMobile\"] .flex-sm-1",
            ],
            hourly_marker: "[data-cy=\"clock-hourly\"]",
            fixed_marker: "[data-cy=\"fixed-price\"]",
            budget_amounts: "[data-test=\"BudgetAmount\"] strong",
            duration: "[data-cy=\"duration1\"] + strong, [data-cy=\"duration2\"] + strong",
            fixed_budget: "[data-cy=\"fixed-price\"] + div [data-test=\"BudgetAmount\"] strong",
            skills: ".skills-list .air3-badge",
            payment_verified: ".payment-verified",
            client_rating: "[data-ev-sublocation=\"!rating\"] .air3-rating-value-text",
            client_reviews: ".rating .nowrap",
            client_country: "[data-qa=\"client-location\"] strong",
            client_city: "[data-qa=\"client-location\"] .nowrap:first-child",
            client_local_time: "[data-qa=\"client-location\"] .nowrap:last-child",
            client_spend: "[data-qa=\"client-spend\"] span span",
            client_hires: "[data-qa=\"client-hires\"]",
            client_jobs_posted: "[data-qa=\"client-job-posting-stats\"] strong",
            client_hire_rate: "[data-qa=\"client-job-posting-stats\"] div",
            client_industry: "[data-qa=\"client-company-profile-industry\"]",
            client_company_size: "[data-qa=\"client-company-profile-size\"]",
            client_member_since: "[data-qa=\"client-contract-date\"] small",
            history_section: "[data-cy=\"jobs\"]",
            history_item: "[data-cy=\"job\"]",
            history_title: ".js-job-link",
            history_title_fallback: "[data-cy=\"job-title\"]",
            history_freelancer: "[data-test=\"FreelancerLink\"] a",
            history_freelancer_fallback: "[data-test=\"FreelancerLink\"]",
            history_feedback_to_freelancer:
                "[data-test=\"FeedbackToFreelancer\"] span[id^=\"air3-truncation\"]",
            history_feedback_to_client: ".air3-truncation span[id^=\"air3-truncation\"]",
            history_period: "[data-cy=\"date\"] .text-body-sm",
            history_payment: "[data-cy=\"stats\"]",
        }
    }
}

/// Reads detail-view snapshots into records using a [`FieldMap`].
#[derive(Debug, Clone, Default)]
pub struct PageReader {
    map: FieldMap,
}

impl PageReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_map(map: FieldMap) -> Self {
        Self { map }
    }

    /// Extracts a record from an HTML snapshot. Absent optional fields become
    /// `None`; an absent title or description leaves the record invalid for
    /// the capture layer to report.
    pub fn read(&self, html: &str, job_id: &str, url: &str, method: CaptureMethod) -> JobRecord {
        let doc = Html::parse_document(html);
        let root = doc.root_element();
        JobRecord {
            job_id: job_id.to_string(),
            url: url.to_string(),
            title: text(root, self.map.title).unwrap_or_default(),
            description: raw_text(root, self.map.description).unwrap_or_default(),
            posted_date: text(root, self.map.posted_date),
            location: text(root, self.map.location),
            project_type: text(root, self.map.project_type),
            experience_level: text(root, self.map.experience_level),
            required_connects: self.connects(root),
            payment: self.payment(root),
            skills: texts(root, self.map.skills),
            screening_questions: texts(root, self.map.screening_questions),
            featured: first(root, self.map.featured_marker).is_some(),
            client: self.client(root),
            client_history: self.history(root),
            scraped_at: Utc::now(),
            method,
        }
    }

    fn connects(&self, root: ElementRef<'_>) -> Option<u32> {
        for selector in self.map.connects {
            if let Some(value) = text(root, selector).as_deref().and_then(first_number) {
                return Some(value);
            }
        }
        None
    }

    fn payment(&self, root: ElementRef<'_>) -> PaymentTerms {
        if first(root, self.map.hourly_marker).is_some() {
            let rates = texts(root, self.map.budget_amounts);
            // A rate range renders as exactly two amounts; anything else is
            // some other budget widget and is left out.
            let amount = match rates.as_slice() {
                [min, max] => Some(format!("{} - {}", min, max)),
                _ => None,
            };
            return PaymentTerms {
                work_type: WorkType::Hourly,
                amount,
                duration: text(root, self.map.duration),
            };
        }
        if first(root, self.map.fixed_marker).is_some() {
            return PaymentTerms {
                work_type: WorkType::Fixed,
                amount: text(root, self.map.fixed_budget),
                duration: None,
            };
        }
        PaymentTerms::default()
    }

    fn client(&self, root: ElementRef<'_>) -> ClientProfile {
        ClientProfile {
            payment_verified: first(root, self.map.payment_verified).is_some(),
            rating: text(root, self.map.client_rating).and_then(|t| t.parse().ok()),
            reviews: text(root, self.map.client_reviews),
            country: text(root, self.map.client_country),
            city: text(root, self.map.client_city),
            local_time: text(root, self.map.client_local_time),
            jobs_posted: text(root, self.map.client_jobs_posted),
            hire_rate: text(root, self.map.client_hire_rate),
            total_spent: text(root, self.map.client_spend),
            hires: text(root, self.map.client_hires),
            industry: text(root, self.map.client_industry),
            company_size: text(root, self.map.client_company_size),
            member_since: text(root, self.map.client_member_since),
        }
    }

    fn history(&self, root: ElementRef<'_>) -> Vec<Engagement> {
        let section = match first(root, self.map.history_section) {
            Some(section) => section,
            None => return Vec::new(),
        };
        let item_sel = match Selector::parse(self.map.history_item) {
            Ok(sel) => sel,
            Err(_) => return Vec::new(),
        };
        section
            .select(&item_sel)
            .filter_map(|item| {
                // An entry without a title is a layout artifact, not a job.
                let title = text(item, self.map.history_title)
                    .or_else(|| text(item, self.map.history_title_fallback))?;
                Some(Engagement {
                    title: Some(title),
                    period: text(item, self.map.history_period),
                    feedback_to_freelancer: text(item, self.map.history_feedback_to_freelancer),
                    feedback_to_client: text(item, self.map.history_feedback_to_client),
                    freelancer_name: text(item, self.map.history_freelancer)
                        .or_else(|| text(item, self.map.history_freelancer_fallback)),
                    payment: text(item, self.map.history_payment),
                })
            })
            .collect()
    }
}

fn first<'a>(scope: ElementRef<'a>, selector: &str) -> Option<ElementRef<'a>> {
    let sel = Selector::parse(selector).ok()?;
    scope.select(&sel).next()
}

/// First match's text with whitespace collapsed; `None` when absent or blank.
fn text(scope: ElementRef<'_>, selector: &str) -> Option<String> {
    let element = first(scope, selector)?;
    let joined = element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

/// First match's text, trimmed but with inner whitespace preserved.
fn raw_text(scope: ElementRef<'_>, selector: &str) -> Option<String> {
    let element = first(scope, selector)?;
    let collected = element.text().collect::<String>();
    let trimmed = collected.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Collapsed text of every match, blanks dropped.
fn texts(scope: ElementRef<'_>, selector: &str) -> Vec<String> {
    let sel = match Selector::parse(selector) {
        Ok(sel) => sel,
        Err(_) => return Vec::new(),
    };
    scope
        .select(&sel)
        .filter_map(|el| {
            let joined = el
                .text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            (!joined.is_empty()).then_some(joined)
        })
        .collect()
}

/// First run of ASCII digits in the text, e.g. `"12 Connects"` -> `12`.
fn first_number(text: &str) -> Option<u32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOURLY_PAGE: &str = r#"
    <html><body>
      <div class="air3-card-sections"><h4><span class="flex-1">Rust scraper engineer</span></h4></div>
      <span id="featured-job"></span>
      <div class="break"><div class="text-body-sm">Need a Rust engineer to build a polite scraper.</div></div>
      <div data-test="PostedOn"><span>Posted 2 hours ago</span></div>
      <div data-test="LocationLabel"><span class="text-light-on-muted">Worldwide</span></div>
      <div data-test="Segmentations"><span>Ongoing project</span></div>
      <ul data-test="Features"><li><div data-cy="expertise"></div><strong>Expert</strong></li></ul>
      <div data-test="ConnectsDesktop"><span>Send a proposal for:</span><span>12 Connects</span></div>
      <div data-cy="clock-hourly"></div>
      <div data-test="BudgetAmount"><strong>$15.00</strong></div>
      <div data-test="BudgetAmount"><strong>$35.00</strong></div>
      <div data-cy="duration1"></div><strong>3 to 6 months</strong>
      <div class="skills-list">
        <span class="air3-badge">Rust</span>
        <span class="air3-badge">Web Scraping</span>
        <span class="air3-badge">Redis</span>
      </div>
      <div data-test="Questions"><ol><li>Describe a scraper you built.</li><li>Time zone?</li></ol></div>
      <div class="payment-verified"></div>
      <div data-ev-sublocation="!rating"><span class="air3-rating-value-text">4.95</span></div>
      <div class="rating"><span class="nowrap">4.95 of 212 reviews</span></div>
      <div data-qa="client-location"><strong>Germany</strong>
        <div><span class="nowrap">Berlin</span><span class="nowrap">10:23 AM</span></div>
      </div>
      <div data-qa="client-spend"><span><span>$10K+</span> total spent</span></div>
      <div data-qa="client-hires">15 hires, 3 active</div>
      <div data-qa="client-job-posting-stats"><strong>42 jobs posted</strong><div>60% hire rate, 1 open job</div></div>
      <div data-qa="client-company-profile-industry">Tech &amp; IT</div>
      <div data-qa="client-company-profile-size">10-99 people</div>
      <div data-qa="client-contract-date"><small>Member since Feb 12, 2019</small></div>
      <section data-cy="jobs">
        <div data-cy="job">
          <a class="js-job-link">Build API
            scraper</a>
          <div data-test="FreelancerLink"><a>Jane D.</a></div>
          <div data-test="FeedbackToFreelancer"><span id="air3-truncation-1">Great work</span></div>
          <div class="air3-truncation"><span id="air3-truncation-2">Good client</span></div>
          <div data-cy="date"><span class="text-body-sm">Jan 2024 -
            Mar 2024</span></div>
          <div data-cy="stats">$1,200.00 earned</div>
        </div>
        <div data-cy="job"><div data-cy="stats">$50 earned</div></div>
      </section>
    </body></html>
    "#;

    fn read(html: &str) -> JobRecord {
        PageReader::new().read(html, "~01abc", "https://jobs.example/jobs/~01abc", CaptureMethod::Modal)
    }

    #[test]
    fn reads_headline_fields() {
        let record = read(HOURLY_PAGE);
        assert_eq!(record.title, "Rust scraper engineer");
        assert_eq!(
            record.description,
            "Need a Rust engineer to build a polite scraper."
        );
        assert!(record.is_valid());
        assert!(record.featured);
        assert_eq!(record.posted_date.as_deref(), Some("Posted 2 hours ago"));
        assert_eq!(record.location.as_deref(), Some("Worldwide"));
        assert_eq!(record.project_type.as_deref(), Some("Ongoing project"));
        assert_eq!(record.experience_level.as_deref(), Some("Expert"));
        assert_eq!(record.required_connects, Some(12));
    }

    #[test]
    fn reads_hourly_payment_terms() {
        let record = read(HOURLY_PAGE);
        assert_eq!(record.payment.work_type, WorkType::Hourly);
        assert_eq!(record.payment.amount.as_deref(), Some("$15.00 - $35.00"));
        assert_eq!(record.payment.duration.as_deref(), Some("3 to 6 months"));
    }

    #[test]
    fn reads_fixed_payment_terms() {
        let html = r#"
        <div data-cy="fixed-price"></div>
        <div><div data-test="BudgetAmount"><strong>$500</strong></div></div>
        "#;
        let record = read(html);
        assert_eq!(record.payment.work_type, WorkType::Fixed);
        assert_eq!(record.payment.amount.as_deref(), Some("$500"));
        assert_eq!(record.payment.duration, None);
    }

    #[test]
    fn reads_lists_and_client_profile() {
        let record = read(HOURLY_PAGE);
        assert_eq!(record.skills, vec!["Rust", "Web Scraping", "Redis"]);
        assert_eq!(record.screening_questions.len(), 2);
        assert!(record.client.payment_verified);
        assert_eq!(record.client.rating, Some(4.95));
        assert_eq!(record.client.country.as_deref(), Some("Germany"));
        assert_eq!(record.client.city.as_deref(), Some("Berlin"));
        assert_eq!(record.client.local_time.as_deref(), Some("10:23 AM"));
        assert_eq!(record.client.total_spent.as_deref(), Some("$10K+"));
        assert_eq!(record.client.hires.as_deref(), Some("15 hires, 3 active"));
        assert_eq!(record.client.jobs_posted.as_deref(), Some("42 jobs posted"));
        assert_eq!(
            record.client.hire_rate.as_deref(),
            Some("60% hire rate, 1 open job")
        );
        assert_eq!(record.client.industry.as_deref(), Some("Tech & IT"));
        assert_eq!(record.client.company_size.as_deref(), Some("10-99 people"));
        assert_eq!(
            record.client.member_since.as_deref(),
            Some("Member since Feb 12, 2019")
        );
    }

    #[test]
    fn history_drops_entries_without_a_title() {
        let record = read(HOURLY_PAGE);
        assert_eq!(record.client_history.len(), 1);
        let engagement = &record.client_history[0];
        assert_eq!(engagement.title.as_deref(), Some("Build API scraper"));
        assert_eq!(engagement.period.as_deref(), Some("Jan 2024 - Mar 2024"));
        assert_eq!(engagement.freelancer_name.as_deref(), Some("Jane D."));
        assert_eq!(engagement.feedback_to_freelancer.as_deref(), Some("Great work"));
        assert_eq!(engagement.feedback_to_client.as_deref(), Some("Good client"));
        assert_eq!(engagement.payment.as_deref(), Some("$1,200.00 earned"));
    }

    #[test]
    fn missing_headline_fields_leave_record_invalid() {
        let record = read("<html><body><p>nothing here</p></body></html>");
        assert!(!record.is_valid());
        assert_eq!(record.missing_fields(), vec!["title", "description"]);
        assert_eq!(record.required_connects, None);
        assert_eq!(record.payment.work_type, WorkType::Unknown);
        assert!(record.client_history.is_empty());
        assert!(!record.client.payment_verified);
    }

    #[test]
    fn first_number_pulls_leading_run() {
        assert_eq!(first_number("12 Connects"), Some(12));
        assert_eq!(first_number("Connects required: 8"), Some(8));
        assert_eq!(first_number("no digits"), None);
    }
}
