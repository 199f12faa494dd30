//! Update report bodies sent to the data supplier after a run finishes.

use chrono::Local;

use bdr_job::Job;

pub struct Report {
    pub subject: String,
    pub body: String,
}

impl Report {
    /// Subject with the configured suffix (e.g. a site short-name) appended.
    pub fn subject_with(&self, suffix: Option<&str>) -> String {
        match suffix {
            Some(s) => format!("{}{}", self.subject, s),
            None => self.subject.clone(),
        }
    }
}

fn group_line(name: &str, layers: usize, state: &str) -> String {
    format!("  * {name} [{layers} layers]: {state}\n")
}

fn footer(job_id: i64) -> String {
    format!(
        "\nThis report was automatically generated by the BDE relay tool. \
         Any problems, please raise a support ticket and reference \
         \"BDE-RELAY {job_id}\".\n"
    )
}

pub fn success_report(job: &Job, site: &str) -> Report {
    let mut body = format!(
        "Hi,\n\n\
         Here's your BDE update report for {date} for {site}.\n\n\
         Objective: All configured BDE-related layers and tables updated & published.\n\n\
         Summary: Success\n\n",
        date = Local::now().format("%d %b %Y"),
    );
    for (name, group) in &job.groups {
        body += &group_line(name, group.layer_versions.len(), "Completed successfully");
    }
    body += &footer(job.id);

    Report {
        subject: "[SUCCESS]".to_string(),
        body,
    }
}

pub fn error_report(job: &Job, site: &str) -> Report {
    let ticket_info = match &job.zendesk_ticket {
        Some(ticket) => format!(
            "See support request {ticket} for latest status and details."
        ),
        None => "Expect a support email with the latest status and details shortly.".to_string(),
    };
    let yes_no = |b: bool| if b { "Yes" } else { "No" };

    let mut body = format!(
        "Hi,\n\n\
         Here's your BDE update report for {date} for {site}.\n\n\
         Objective: All configured BDE-related layers and tables updated & published.\n\n\
         Summary: Errors Encountered\n\n\
         {ticket_info}\n\n\
         \x20 * Import Errors: {import_errors}\n\
         \x20 * Publish Errors: {publish_errors}\n",
        date = Local::now().format("%d %b %Y"),
        import_errors = yes_no(job.has_import_errors),
        publish_errors = yes_no(job.has_publish_errors),
    );
    for (name, group) in &job.groups {
        let state = match (&group.error, &group.publish_state) {
            (Some(error), _) => error.as_str(),
            (None, Some(state)) => state.as_str(),
            (None, None) => "not created",
        };
        body += &group_line(name, group.layer_versions.len(), state);
    }
    body += &footer(job.id);

    Report {
        subject: "[ERRORS]".to_string(),
        body,
    }
}
