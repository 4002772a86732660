//! Run outcomes and their rendering for the operator.
//!
//! [`ProvisioningReport`] is built once by the orchestrator at the end of a
//! run and never changed afterwards. [`SummaryReporter`] turns it into text;
//! it does no I/O, so the caller decides where the text goes.

use std::fmt::{self, Write};

use chrono::{DateTime, Utc};
use strum::Display;
use uuid::Uuid;

use crate::config::{Configuration, LEGACY_SSH_PORT, UserMode};

/// What happened to one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StepStatus {
    Skipped,
    Applied,
    Failed,
}

/// Recorded result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// 1-based position in the run.
    pub ordinal: usize,
    pub name: String,
    pub status: StepStatus,
    pub message: Option<String>,
    /// False for failures that did not stop the run.
    pub critical: bool,
    pub timestamp: DateTime<Utc>,
}

impl StepOutcome {
    pub fn new(
        ordinal: usize,
        name: impl Into<String>,
        status: StepStatus,
        message: Option<String>,
        critical: bool,
    ) -> Self {
        Self {
            ordinal,
            name: name.into(),
            status,
            message,
            critical,
            timestamp: Utc::now(),
        }
    }
}

/// Overall result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed {
        ordinal: usize,
        step: String,
        message: String,
    },
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failed { ordinal, step, .. } => write!(f, "failed at step {} ({})", ordinal, step),
        }
    }
}

/// The configuration facts an operator needs after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryFacts {
    pub hostname: String,
    pub fqdns: Vec<String>,
    pub ssh_port: u16,
    pub user_mode: UserMode,
    pub target_user: String,
    pub keep_legacy_port: bool,
}

impl SummaryFacts {
    pub fn new(config: &Configuration, fqdns: Vec<String>, target_user: impl Into<String>) -> Self {
        Self {
            hostname: config.short_hostname.clone(),
            fqdns,
            ssh_port: config.ssh_port,
            user_mode: config.user_mode,
            target_user: target_user.into(),
            keep_legacy_port: config.keep_legacy_port,
        }
    }
}

/// Immutable record of a whole provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub outcomes: Vec<StepOutcome>,
    /// Steps that never ran because an earlier step failed.
    pub not_run: Vec<String>,
    pub summary: SummaryFacts,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProvisioningReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Failures that were recorded without stopping the run.
    pub fn warnings(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == StepStatus::Failed && !o.critical)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn outcome(&self, name: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }
}

/// Renders a [`ProvisioningReport`] as operator-facing text.
pub struct SummaryReporter;

impl SummaryReporter {
    pub fn render(report: &ProvisioningReport) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = match &report.status {
            RunStatus::Success => Self::render_success(&mut out, report),
            RunStatus::Failed { .. } => Self::render_failure(&mut out, report),
        };
        out
    }

    fn render_success(out: &mut String, report: &ProvisioningReport) -> fmt::Result {
        let s = &report.summary;
        writeln!(out, "hostprep run {}: {}", report.run_id, report.status)?;
        if report.dry_run {
            writeln!(out, "  (dry run: no changes were made)")?;
        }
        writeln!(out, "  hostname:    {}", s.hostname)?;
        writeln!(out, "  fqdns:       {}", s.fqdns.join(", "))?;
        writeln!(out, "  ssh port:    {}", s.ssh_port)?;
        writeln!(out, "  user mode:   {}", s.user_mode)?;
        writeln!(out, "  target user: {}", s.target_user)?;
        writeln!(
            out,
            "  steps:       {} applied, {} skipped, {} failed",
            report.count(StepStatus::Applied),
            report.count(StepStatus::Skipped),
            report.count(StepStatus::Failed)
        )?;

        if s.keep_legacy_port && s.ssh_port != LEGACY_SSH_PORT {
            writeln!(out, "follow-up:")?;
            writeln!(
                out,
                "  - port {} is still open; after confirming `ssh -p {} {}@{}` works, \
                 set KEEP_PORT_22=false and run hostprep apply again",
                LEGACY_SSH_PORT,
                s.ssh_port,
                s.target_user,
                s.fqdns.first().unwrap_or(&s.hostname)
            )?;
        }

        let warnings: Vec<&StepOutcome> = report.warnings().collect();
        if !warnings.is_empty() {
            writeln!(out, "warnings:")?;
            for outcome in warnings {
                writeln!(
                    out,
                    "  - {}: {}",
                    outcome.name,
                    outcome.message.as_deref().unwrap_or("failed")
                )?;
            }
        }
        Ok(())
    }

    fn render_failure(out: &mut String, report: &ProvisioningReport) -> fmt::Result {
        writeln!(out, "hostprep run {}: {}", report.run_id, report.status)?;
        if let RunStatus::Failed { message, .. } = &report.status {
            writeln!(out, "  cause: {}", message)?;
        }
        let completed: Vec<String> = report
            .outcomes
            .iter()
            .filter(|o| o.status != StepStatus::Failed || !o.critical)
            .map(|o| format!("{} ({})", o.name, o.status))
            .collect();
        if !completed.is_empty() {
            writeln!(out, "  completed:   {}", completed.join(", "))?;
        }
        if !report.not_run.is_empty() {
            writeln!(out, "  not run:     {}", report.not_run.join(", "))?;
        }
        writeln!(out, "  no rollback was attempted; fix the cause and run hostprep apply again")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(keep_legacy_port: bool) -> SummaryFacts {
        SummaryFacts {
            hostname: "web1".to_string(),
            fqdns: vec!["web1.example.com".to_string(), "web1.corp.test".to_string()],
            ssh_port: 22222,
            user_mode: UserMode::Manage,
            target_user: "superadmin".to_string(),
            keep_legacy_port,
        }
    }

    fn report(status: RunStatus, outcomes: Vec<StepOutcome>, keep_legacy_port: bool) -> ProvisioningReport {
        let now = Utc::now();
        ProvisioningReport {
            run_id: Uuid::nil(),
            status,
            outcomes,
            not_run: vec![],
            summary: summary(keep_legacy_port),
            dry_run: false,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn success_lists_facts() {
        let text = SummaryReporter::render(&report(
            RunStatus::Success,
            vec![StepOutcome::new(1, "update-packages", StepStatus::Applied, None, true)],
            false,
        ));
        assert!(text.contains(": success"));
        assert!(text.contains("hostname:    web1"));
        assert!(text.contains("fqdns:       web1.example.com, web1.corp.test"));
        assert!(text.contains("ssh port:    22222"));
        assert!(text.contains("user mode:   manage"));
        assert!(text.contains("target user: superadmin"));
        assert!(text.contains("1 applied, 0 skipped, 0 failed"));
        assert!(!text.contains("follow-up"));
    }

    #[test]
    fn legacy_port_adds_follow_up() {
        let text = SummaryReporter::render(&report(RunStatus::Success, vec![], true));
        assert!(text.contains("follow-up:"));
        assert!(text.contains("port 22 is still open"));
        assert!(text.contains("ssh -p 22222 superadmin@web1.example.com"));
        assert!(text.contains("KEEP_PORT_22=false"));
    }

    #[test]
    fn non_critical_failures_become_warnings() {
        let outcomes = vec![StepOutcome::new(
            8,
            "unattended-upgrades",
            StepStatus::Failed,
            Some("unit not found".to_string()),
            false,
        )];
        let r = report(RunStatus::Success, outcomes, false);
        assert!(r.is_success());
        let text = SummaryReporter::render(&r);
        assert!(text.contains("warnings:\n  - unattended-upgrades: unit not found"));
    }

    #[test]
    fn failure_names_step_and_cause() {
        let outcomes = vec![
            StepOutcome::new(1, "update-packages", StepStatus::Applied, None, true),
            StepOutcome::new(2, "set-hostname", StepStatus::Skipped, None, true),
            StepOutcome::new(3, "mesh-vpn", StepStatus::Failed, Some("boom".into()), true),
        ];
        let mut r = report(
            RunStatus::Failed {
                ordinal: 3,
                step: "mesh-vpn".to_string(),
                message: "boom".to_string(),
            },
            outcomes,
            true,
        );
        r.not_run = vec!["manage-user".to_string(), "authorized-keys".to_string()];
        let text = SummaryReporter::render(&r);
        assert!(text.contains("failed at step 3 (mesh-vpn)"));
        assert!(text.contains("cause: boom"));
        assert!(text.contains("completed:   update-packages (applied), set-hostname (skipped)"));
        assert!(text.contains("not run:     manage-user, authorized-keys"));
        assert!(!text.contains("follow-up"));
    }

    #[test]
    fn dry_run_is_flagged() {
        let mut r = report(RunStatus::Success, vec![], false);
        r.dry_run = true;
        assert!(SummaryReporter::render(&r).contains("dry run"));
    }
}
