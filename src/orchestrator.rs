//! Ordered, stop-on-first-failure step execution.
//!
//! For each step the orchestrator logs its intent, evaluates the
//! precondition, applies the step and checks its postcondition, then records
//! a [`StepOutcome`]. The first critical failure ends the run; nothing is
//! rolled back. Failures that are not critical are recorded and the run
//! continues.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::config::Configuration;
use crate::error::ProvisionError;
use crate::facts::{HostFactGatherer, HostFacts};
use crate::host::Host;
use crate::report::{ProvisioningReport, RunStatus, StepOutcome, StepStatus, SummaryFacts};
use crate::step::{Criticality, Precondition, Step, StepContext};

/// How a step that did not fail ended.
enum Completion {
    Applied,
    Skipped(String),
}

/// Returns true if `err` raised by `step` must halt the run.
fn is_critical<S: Step>(step: &S, err: &anyhow::Error) -> bool {
    if step.criticality() == Criticality::NonCritical {
        return false;
    }
    err.chain()
        .find_map(|e| e.downcast_ref::<ProvisionError>())
        .is_none_or(ProvisionError::is_fatal)
}

/// Runs a sequence of steps against one host.
pub struct Orchestrator<'a, S: Step> {
    steps: &'a [S],
}

impl<'a, S: Step> Orchestrator<'a, S> {
    pub fn new(steps: &'a [S]) -> Self {
        Self { steps }
    }

    /// Gathers host facts and runs every step.
    ///
    /// # Errors
    ///
    /// Fails only if the host facts cannot be gathered; step failures are
    /// reported in the returned [`ProvisioningReport`].
    pub fn run(&self, config: &Configuration, host: &Host) -> Result<ProvisioningReport, ProvisionError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", id = %run_id);
        let _guard = span.enter();

        let facts = HostFactGatherer::new(host).gather(config)?;
        Ok(self.run_with_facts(run_id, config, &facts, host))
    }

    /// Runs every step with already gathered facts.
    pub fn run_with_facts(
        &self,
        run_id: Uuid,
        config: &Configuration,
        facts: &HostFacts,
        host: &Host,
    ) -> ProvisioningReport {
        let started_at = Utc::now();
        let ctx = StepContext { config, facts, host };
        let total = self.steps.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut status = RunStatus::Success;

        info!("starting provisioning of {} ({} step(s))", config.short_hostname, total);

        for (index, step) in self.steps.iter().enumerate() {
            let ordinal = index + 1;
            let name = step.name();
            info!("running step {}/{}: {}", ordinal, total, name);

            match self.run_step(step, &ctx) {
                Ok(Completion::Applied) => {
                    info!("step {} applied", name);
                    outcomes.push(StepOutcome::new(ordinal, &*name, StepStatus::Applied, None, true));
                }
                Ok(Completion::Skipped(reason)) => {
                    info!("skipping step {}: {}", name, reason);
                    outcomes.push(StepOutcome::new(
                        ordinal,
                        &*name,
                        StepStatus::Skipped,
                        Some(reason),
                        true,
                    ));
                }
                Err(err) => {
                    let critical = is_critical(step, &err);
                    let message = format!("{:#}", err);
                    outcomes.push(StepOutcome::new(
                        ordinal,
                        &*name,
                        StepStatus::Failed,
                        Some(message.clone()),
                        critical,
                    ));
                    if !critical {
                        warn!("step {} failed (non-critical): {}", name, message);
                        continue;
                    }
                    error!("step {}/{} {} failed: {}", ordinal, total, name, message);
                    status = RunStatus::Failed {
                        ordinal,
                        step: name.into_owned(),
                        message,
                    };
                    break;
                }
            }
        }

        let not_run = self
            .steps
            .iter()
            .skip(outcomes.len())
            .map(|s| s.name().into_owned())
            .collect();

        ProvisioningReport {
            run_id,
            status,
            outcomes,
            not_run,
            summary: SummaryFacts::new(config, facts.fqdns.clone(), facts.target_user.clone()),
            dry_run: host.dry_run(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn run_step(&self, step: &S, ctx: &StepContext<'_>) -> Result<Completion> {
        match step.precondition(ctx).context("failed to evaluate precondition")? {
            Precondition::Satisfied(reason) => return Ok(Completion::Skipped(reason)),
            Precondition::NotApplicable(reason) => {
                return Ok(Completion::Skipped(format!("not applicable: {}", reason)));
            }
            Precondition::Pending => {}
        }

        step.apply(ctx)?;

        if ctx.host.dry_run() {
            tracing::debug!("dry run: skipping postcondition of {}", step.name());
        } else {
            step.verify(ctx).context("postcondition not met")?;
        }
        Ok(Completion::Applied)
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::sync::{Arc, Mutex};

    use anyhow::bail;

    use super::*;
    use crate::config::{KeySource, Secret, UserMode};
    use crate::executor::{CommandExecutor, CommandSpec, ExecutionResult};

    struct NoopExecutor;

    impl CommandExecutor for NoopExecutor {
        fn execute(&self, _spec: &CommandSpec) -> Result<ExecutionResult> {
            Ok(ExecutionResult::default())
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Behavior {
        Apply,
        Satisfied,
        FailApply,
        FailVerify,
        FailNonCritical,
    }

    #[derive(Debug)]
    struct FakeStep {
        name: &'static str,
        behavior: Behavior,
        criticality: Criticality,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Step for FakeStep {
        fn name(&self) -> Cow<'_, str> {
            Cow::Borrowed(self.name)
        }

        fn criticality(&self) -> Criticality {
            self.criticality
        }

        fn precondition(&self, _ctx: &StepContext<'_>) -> Result<Precondition> {
            self.log.lock().unwrap().push(format!("pre:{}", self.name));
            Ok(match self.behavior {
                Behavior::Satisfied => Precondition::Satisfied("already done".to_string()),
                _ => Precondition::Pending,
            })
        }

        fn apply(&self, _ctx: &StepContext<'_>) -> Result<()> {
            self.log.lock().unwrap().push(format!("apply:{}", self.name));
            match self.behavior {
                Behavior::FailApply => bail!("{} exploded", self.name),
                Behavior::FailNonCritical => Err(ProvisionError::NonCriticalService {
                    service: self.name.to_string(),
                    message: "unit missing".to_string(),
                }
                .into()),
                _ => Ok(()),
            }
        }

        fn verify(&self, _ctx: &StepContext<'_>) -> Result<()> {
            self.log.lock().unwrap().push(format!("verify:{}", self.name));
            if self.behavior == Behavior::FailVerify {
                bail!("{} did not stick", self.name);
            }
            Ok(())
        }
    }

    fn config() -> Configuration {
        Configuration {
            short_hostname: "h".to_string(),
            primary_domain: "d".to_string(),
            extra_domains: vec![],
            user_mode: UserMode::Manage,
            new_user: "superadmin".to_string(),
            target_user: None,
            ssh_port: 22222,
            keep_legacy_port: true,
            key_source: KeySource::DiscoverLocally,
            mesh_auth_key: Secret::new("k"),
            invoking_user: None,
        }
    }

    fn facts() -> HostFacts {
        HostFacts {
            fqdns: vec!["h.d".to_string()],
            target_user: "superadmin".to_string(),
            target_home: None,
            local_keys: None,
        }
    }

    fn steps(spec: &[(&'static str, Behavior)], log: &Arc<Mutex<Vec<String>>>) -> Vec<FakeStep> {
        spec.iter()
            .map(|&(name, behavior)| FakeStep {
                name,
                behavior,
                criticality: if behavior == Behavior::FailNonCritical {
                    Criticality::NonCritical
                } else {
                    Criticality::Fatal
                },
                log: Arc::clone(log),
            })
            .collect()
    }

    fn run(steps: &[FakeStep], dry_run: bool) -> ProvisioningReport {
        let host = Host::new("/nonexistent", Arc::new(NoopExecutor), dry_run);
        Orchestrator::new(steps).run_with_facts(Uuid::nil(), &config(), &facts(), &host)
    }

    #[test]
    fn records_applied_and_skipped_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps = steps(&[("a", Behavior::Apply), ("b", Behavior::Satisfied)], &log);
        let report = run(&steps, false);
        assert!(report.is_success());
        let statuses: Vec<_> = report.outcomes.iter().map(|o| (o.ordinal, o.status)).collect();
        assert_eq!(statuses, vec![(1, StepStatus::Applied), (2, StepStatus::Skipped)]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["pre:a", "apply:a", "verify:a", "pre:b"]
        );
    }

    #[test]
    fn halts_at_first_critical_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps = steps(
            &[
                ("one", Behavior::Apply),
                ("two", Behavior::Apply),
                ("three", Behavior::FailApply),
                ("four", Behavior::Apply),
                ("five", Behavior::Apply),
            ],
            &log,
        );
        let report = run(&steps, false);
        match &report.status {
            RunStatus::Failed { ordinal, step, message } => {
                assert_eq!(*ordinal, 3);
                assert_eq!(step, "three");
                assert!(message.contains("three exploded"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.not_run, vec!["four", "five"]);
        assert!(!log.lock().unwrap().iter().any(|e| e.ends_with(":four")));
    }

    #[test]
    fn postcondition_failure_is_critical() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps = steps(&[("a", Behavior::FailVerify), ("b", Behavior::Apply)], &log);
        let report = run(&steps, false);
        assert!(!report.is_success());
        let message = report.outcomes[0].message.as_deref().unwrap();
        assert!(message.contains("postcondition not met"));
        assert!(message.contains("a did not stick"));
    }

    #[test]
    fn non_critical_failure_continues() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps = steps(
            &[("a", Behavior::FailNonCritical), ("b", Behavior::Apply)],
            &log,
        );
        let report = run(&steps, false);
        assert!(report.is_success());
        assert_eq!(report.outcomes[0].status, StepStatus::Failed);
        assert!(!report.outcomes[0].critical);
        assert_eq!(report.outcomes[1].status, StepStatus::Applied);
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn dry_run_skips_postconditions() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps = steps(&[("a", Behavior::FailVerify)], &log);
        let report = run(&steps, true);
        assert!(report.is_success());
        assert!(report.dry_run);
        assert_eq!(*log.lock().unwrap(), vec!["pre:a", "apply:a"]);
    }

    #[test]
    fn typed_non_fatal_error_from_fatal_step_is_not_critical() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let step = FakeStep {
            name: "svc",
            behavior: Behavior::FailNonCritical,
            criticality: Criticality::Fatal,
            log,
        };
        let err: anyhow::Error = ProvisionError::NonCriticalService {
            service: "svc".to_string(),
            message: "x".to_string(),
        }
        .into();
        assert!(!is_critical(&step, &err.context("wrapped")));
        assert!(is_critical(&step, &anyhow::anyhow!("plain failure")));
    }
}
