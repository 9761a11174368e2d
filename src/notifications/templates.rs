//! Mail bodies for the opname notifications.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Values substituted into a mail body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateData {
    pub submitter: String,
    pub reviewer: String,
    pub site_name: String,
    pub completed_date: String,
    /// Link to the review page (reviewers only)
    pub verification_link: String,
    /// Link to the session report page (initiator only)
    pub page_link: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTemplate {
    OpnameSubmitted,
    OpnameReviewManager,
    OpnameEscalated,
    OpnameVerificationNeeded,
    OpnameVerified,
    OpnameRejected,
    OpnameCancelled,
}

impl MessageTemplate {
    pub fn name(self) -> &'static str {
        match self {
            MessageTemplate::OpnameSubmitted => "opname_submitted",
            MessageTemplate::OpnameReviewManager => "opname_review_manager",
            MessageTemplate::OpnameEscalated => "opname_escalated",
            MessageTemplate::OpnameVerificationNeeded => "opname_verification_needed",
            MessageTemplate::OpnameVerified => "opname_verified",
            MessageTemplate::OpnameRejected => "opname_rejected",
            MessageTemplate::OpnameCancelled => "opname_cancelled",
        }
    }

    /// Renders the HTML body of the mail.
    pub fn render(self, data: &TemplateData) -> String {
        let site = escape(&data.site_name);
        let submitter = escape(&data.submitter);
        let reviewer = escape(&data.reviewer);
        let date = escape(&data.completed_date);

        let (heading, paragraph, link) = match self {
            MessageTemplate::OpnameSubmitted => (
                "Opname submitted",
                format!(
                    "Hi {submitter}, your opname for <b>{site}</b> was submitted on {date} \
                     and is waiting for review by {reviewer}."
                ),
                Some(("View report", &data.page_link)),
            ),
            MessageTemplate::OpnameReviewManager => (
                "Opname waiting for your review",
                format!(
                    "Hi {reviewer}, {submitter} completed the opname for <b>{site}</b> on {date}. \
                     Please review it."
                ),
                Some(("Review opname", &data.verification_link)),
            ),
            MessageTemplate::OpnameEscalated => (
                "Opname approved by your manager",
                format!(
                    "Hi {submitter}, {reviewer} approved the opname for <b>{site}</b>. \
                     It now awaits verification by L1 Support."
                ),
                Some(("View report", &data.page_link)),
            ),
            MessageTemplate::OpnameVerificationNeeded => (
                "Opname needs your verification",
                format!(
                    "The opname for <b>{site}</b> by {submitter}, completed on {date}, \
                     was approved by {reviewer} and needs verification."
                ),
                Some(("Verify opname", &data.verification_link)),
            ),
            MessageTemplate::OpnameVerified => (
                "Opname verified",
                format!(
                    "Hi {submitter}, the opname for <b>{site}</b> was verified by the L1 Support Team."
                ),
                Some(("View report", &data.page_link)),
            ),
            MessageTemplate::OpnameRejected => (
                "Opname rejected",
                format!(
                    "Hi {submitter}, the opname for <b>{site}</b> completed on {date} \
                     was rejected by {reviewer}."
                ),
                Some(("View report", &data.page_link)),
            ),
            MessageTemplate::OpnameCancelled => (
                "Opname cancelled",
                format!(
                    "Hi {submitter}, your opname for <b>{site}</b> was cancelled by {reviewer}. \
                     Its recorded changes were discarded."
                ),
                None,
            ),
        };

        let mut body = format!(
            "<!DOCTYPE html><html><body style=\"font-family: sans-serif\">\
             <h2>{heading}</h2><p>{paragraph}</p>"
        );
        if let Some((label, href)) = link.filter(|(_, href)| !href.is_empty()) {
            body.push_str(&format!(
                "<p><a href=\"{}\">{}</a></p>",
                escape(href),
                label
            ));
        }
        body.push_str("</body></html>");
        body
    }
}

impl fmt::Display for MessageTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> TemplateData {
        TemplateData {
            submitter: "Sari".into(),
            reviewer: "Budi".into(),
            site_name: "Plant A".into(),
            completed_date: "Fri, 01 Mar 2024 09:00:00".into(),
            verification_link: "https://app.example.com/opname/3/review".into(),
            page_link: String::new(),
        }
    }

    #[test]
    fn review_mail_links_to_review_page() {
        let body = MessageTemplate::OpnameReviewManager.render(&data());
        assert!(body.contains("Sari completed the opname for <b>Plant A</b>"));
        assert!(body.contains("href=\"https://app.example.com/opname/3/review\""));
    }

    #[test]
    fn empty_links_are_left_out() {
        let body = MessageTemplate::OpnameSubmitted.render(&data());
        assert!(!body.contains("<a href"));
    }

    #[test]
    fn names_match_template_ids() {
        assert_eq!(
            MessageTemplate::OpnameVerificationNeeded.to_string(),
            "opname_verification_needed"
        );
        let json = serde_json::to_string(&MessageTemplate::OpnameRejected).unwrap();
        assert_eq!(json, "\"opname_rejected\"");
    }

    #[test]
    fn values_are_escaped() {
        let mut d = data();
        d.site_name = "<script>".into();
        let body = MessageTemplate::OpnameVerified.render(&d);
        assert!(body.contains("&lt;script&gt;"));
    }
}
