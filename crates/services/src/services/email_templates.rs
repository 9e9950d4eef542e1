//! Plain-text and HTML bodies for the emails the platform sends.

use chrono::NaiveDate;

use super::sendgrid::EmailMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl EmailContent {
    pub fn to(self, email: &str, name: Option<&str>) -> EmailMessage {
        EmailMessage {
            to_email: email.to_string(),
            to_name: name.map(str::to_string),
            subject: self.subject,
            text: self.text,
            html: self.html,
        }
    }
}

/// Link an evaluator follows to answer an assignment.
pub fn evaluation_url(app_url: &str, access_token: &str) -> String {
    format!("{}/e/evaluate/{access_token}", app_url.trim_end_matches('/'))
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(heading: &str, paragraphs: &[String], action: Option<(&str, &str)>) -> String {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<p>{}</p>", escape_html(p).replace('\n', "<br>")))
        .collect();
    let button = action
        .map(|(label, url)| {
            format!(
                r#"<p><a href="{}" style="background:#2563eb;color:#fff;padding:10px 18px;border-radius:6px;text-decoration:none">{}</a></p>"#,
                escape_html(url),
                escape_html(label)
            )
        })
        .unwrap_or_default();
    format!(
        r#"<div style="font-family:Arial,sans-serif;max-width:600px;margin:0 auto"><h2>{}</h2>{body}{button}<p style="color:#6b7280;font-size:12px">QSights</p></div>"#,
        escape_html(heading)
    )
}

pub struct AssignmentEmail<'a> {
    pub evaluator_name: &'a str,
    pub evaluatee_name: &'a str,
    pub event_name: &'a str,
    pub end_date: NaiveDate,
    pub url: &'a str,
}

impl AssignmentEmail<'_> {
    fn subject_line(&self) -> String {
        if self.evaluator_name == self.evaluatee_name {
            "a self evaluation".to_string()
        } else {
            format!("an evaluation of {}", self.evaluatee_name)
        }
    }
}

pub fn evaluation_invitation(email: &AssignmentEmail<'_>) -> EmailContent {
    let paragraphs = vec![
        format!("Hello {},", email.evaluator_name),
        format!(
            "You have been asked to complete {} as part of \"{}\".",
            email.subject_line(),
            email.event_name
        ),
        format!("Please submit your responses by {}.", email.end_date.format("%B %-d, %Y")),
    ];
    EmailContent {
        subject: format!("Evaluation Request: {}", email.event_name),
        text: format!("{}\n\nStart here: {}", paragraphs.join("\n\n"), email.url),
        html: layout("Evaluation request", &paragraphs, Some(("Start evaluation", email.url))),
    }
}

pub fn evaluation_reminder(email: &AssignmentEmail<'_>, days_remaining: i64) -> EmailContent {
    let when = match days_remaining {
        d if d <= 0 => "today".to_string(),
        1 => "tomorrow".to_string(),
        d => format!("in {d} days"),
    };
    let paragraphs = vec![
        format!("Hello {},", email.evaluator_name),
        format!(
            "This is a reminder to complete {} for \"{}\". The deadline is {when} ({}).",
            email.subject_line(),
            email.event_name,
            email.end_date.format("%B %-d, %Y")
        ),
    ];
    EmailContent {
        subject: format!("Reminder: Complete Evaluation - {}", email.event_name),
        text: format!("{}\n\nContinue here: {}", paragraphs.join("\n\n"), email.url),
        html: layout("Evaluation reminder", &paragraphs, Some(("Continue evaluation", email.url))),
    }
}

pub fn missed_deadline(email: &AssignmentEmail<'_>) -> EmailContent {
    let paragraphs = vec![
        format!("Hello {},", email.evaluator_name),
        format!(
            "The deadline for {} in \"{}\" passed on {} and it has been marked overdue.",
            email.subject_line(),
            email.event_name,
            email.end_date.format("%B %-d, %Y")
        ),
        "Please contact your program administrator if you still need to submit it.".to_string(),
    ];
    EmailContent {
        subject: format!("Missed Deadline: {}", email.event_name),
        text: paragraphs.join("\n\n"),
        html: layout("Evaluation deadline missed", &paragraphs, None),
    }
}

pub fn team_message(sender_name: &str, subject: &str, message: &str) -> EmailContent {
    let paragraphs = vec![message.to_string(), format!("Sent by {sender_name}")];
    EmailContent {
        subject: subject.to_string(),
        text: paragraphs.join("\n\n"),
        html: layout(subject, &paragraphs, None),
    }
}

pub fn test_email(recipient: &str) -> EmailContent {
    let paragraphs = vec![format!(
        "This is a test message sent to {recipient} to confirm the email settings work."
    )];
    EmailContent {
        subject: "QSights test email".to_string(),
        text: paragraphs.join("\n\n"),
        html: layout("Email settings test", &paragraphs, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment<'a>(evaluatee: &'a str, url: &'a str) -> AssignmentEmail<'a> {
        AssignmentEmail {
            evaluator_name: "Ana",
            evaluatee_name: evaluatee,
            event_name: "Q3 <Review>",
            end_date: NaiveDate::from_ymd_opt(2025, 9, 30).unwrap(),
            url,
        }
    }

    #[test]
    fn invitation_escapes_html_but_not_text() {
        let url = evaluation_url("https://app.qsights.com/", "tok");
        assert_eq!(url, "https://app.qsights.com/e/evaluate/tok");

        let email = evaluation_invitation(&assignment("Bo", &url));
        assert_eq!(email.subject, "Evaluation Request: Q3 <Review>");
        assert!(email.text.contains("an evaluation of Bo as part of \"Q3 <Review>\""));
        assert!(email.text.contains("September 30, 2025"));
        assert!(email.html.contains("Q3 &lt;Review&gt;"));
        assert!(!email.html.contains("<Review>"));
        assert!(email.html.contains(r#"href="https://app.qsights.com/e/evaluate/tok""#));
    }

    #[test]
    fn reminder_wording_tracks_days_left() {
        let self_review = assignment("Ana", "u");
        assert!(evaluation_reminder(&self_review, 0).text.contains("a self evaluation"));
        assert!(evaluation_reminder(&self_review, 0).text.contains("deadline is today"));
        assert!(evaluation_reminder(&self_review, 1).text.contains("tomorrow"));
        assert!(evaluation_reminder(&self_review, 3).text.contains("in 3 days"));
    }

    #[test]
    fn team_message_keeps_line_breaks() {
        let email = team_message("Lead", "Kickoff", "Line one\nLine <two>").to("a@b.c", Some("A"));
        assert_eq!(email.subject, "Kickoff");
        assert_eq!(email.to_name.as_deref(), Some("A"));
        assert!(email.html.contains("Line one<br>Line &lt;two&gt;"));
        assert!(email.text.ends_with("Sent by Lead"));
    }
}
