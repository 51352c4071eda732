//! Pipeline run execution.

use super::{
    ActionExecutor, ActionInvocation, ActionOutcome, ActionRecord, ApprovalDecision, ApprovalGate,
    ApprovalRequest, ArtifactStore, CommitEvent, RunOutcome, RunReport,
};
use crate::core::{ActionKind, ActionSpec, ActionStatus, ArtifactRevision, RejectionReason, RunState, SourceTrigger};
use crate::events::{
    run_payload, EventSink, NoOpEventSink, ACTION_COMPLETED, ACTION_STARTED, APPROVAL_REQUESTED,
    APPROVAL_RESOLVED, COMMIT_IGNORED, RUN_COMPLETED, RUN_STARTED, STAGE_COMPLETED, STAGE_STARTED,
};
use crate::pipeline::PipelineDefinition;
use crate::utils::{generate_uuid, iso_timestamp};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Visited run states, checked against the legal transitions.
#[derive(Debug)]
struct StateTrail {
    states: Vec<RunState>,
}

impl StateTrail {
    fn new() -> Self {
        Self {
            states: vec![RunState::Pending],
        }
    }

    fn advance(&mut self, execution_id: Uuid, next: RunState) {
        if let Some(current) = self.states.last() {
            if !current.can_transition_to(&next) {
                warn!(
                    execution_id = %execution_id,
                    from = %current.label(),
                    to = %next.label(),
                    "Unexpected run state transition"
                );
            }
        }
        info!(execution_id = %execution_id, state = %next.label(), "Run state changed");
        self.states.push(next);
    }
}

/// Drives pipeline runs through the stages of a definition.
///
/// Stages run in declaration order. Inside a stage, actions are grouped by
/// run order; a group runs concurrently and the next group starts only after
/// every action of the current one has finished. The first failure or
/// rejection ends the run and nothing after it is scheduled.
pub struct Orchestrator {
    definition: Arc<PipelineDefinition>,
    executor: Arc<dyn ActionExecutor>,
    approvals: Arc<ApprovalGate>,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    /// Creates an orchestrator with its own approval gate and no event sink.
    #[must_use]
    pub fn new(definition: PipelineDefinition, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            definition: Arc::new(definition),
            executor,
            approvals: Arc::new(ApprovalGate::new()),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Uses a shared approval gate.
    #[must_use]
    pub fn with_approval_gate(mut self, approvals: Arc<ApprovalGate>) -> Self {
        self.approvals = approvals;
        self
    }

    /// Sends run lifecycle events to `events`.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the approval gate operators answer through.
    #[must_use]
    pub fn approvals(&self) -> Arc<ApprovalGate> {
        self.approvals.clone()
    }

    /// Returns the pipeline definition.
    #[must_use]
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// The branch and trigger of the first source action.
    #[must_use]
    pub fn tracked_branch(&self) -> Option<(&str, SourceTrigger)> {
        self.definition.actions().find_map(|(_, action)| match &action.kind {
            ActionKind::Source { branch, trigger, .. } => Some((branch.as_str(), *trigger)),
            _ => None,
        })
    }

    /// Starts a run if `event` is a push to the tracked branch.
    ///
    /// Returns `None` when the branch does not match or the source is not
    /// triggered by commits.
    pub async fn on_commit(&self, event: CommitEvent) -> Option<RunReport> {
        match self.tracked_branch() {
            Some((branch, trigger)) if trigger != SourceTrigger::None && branch == event.branch => {
                Some(self.run(event).await)
            }
            tracked => {
                debug!(
                    branch = %event.branch,
                    commit_id = %event.commit_id,
                    tracked = ?tracked,
                    "Commit does not start a run"
                );
                self.events.try_emit(
                    COMMIT_IGNORED,
                    Some(json!({ "branch": event.branch, "commit_id": event.commit_id })),
                );
                None
            }
        }
    }

    /// Runs the pipeline for `commit` until it succeeds, fails or is rejected.
    pub async fn run(&self, commit: CommitEvent) -> RunReport {
        let execution_id = generate_uuid();
        let started_at = iso_timestamp();
        let store = ArtifactStore::new();
        let mut trail = StateTrail::new();
        let mut records: Vec<ActionRecord> = self
            .definition
            .actions()
            .map(|(stage, action)| pending_record(stage, action))
            .collect();

        info!(
            execution_id = %execution_id,
            pipeline = %self.definition.name(),
            branch = %commit.branch,
            commit_id = %commit.commit_id,
            "Pipeline run started"
        );
        self.events
            .emit(
                RUN_STARTED,
                Some(run_payload(
                    execution_id,
                    json!({
                        "pipeline": self.definition.name(),
                        "branch": commit.branch,
                        "commit_id": commit.commit_id,
                    }),
                )),
            )
            .await;

        let mut outcome = RunOutcome::Succeeded;

        'stages: for stage in self.definition.stages() {
            self.events
                .emit(STAGE_STARTED, Some(run_payload(execution_id, json!({ "stage": stage.name }))))
                .await;

            for (run_order, group) in stage.run_order_groups() {
                let names: Vec<String> = group.iter().map(|a| a.name.clone()).collect();
                let state = if group.iter().any(|a| a.is_approval()) {
                    RunState::Waiting {
                        stage: stage.name.clone(),
                        actions: names,
                    }
                } else {
                    RunState::Running {
                        stage: stage.name.clone(),
                        actions: names,
                    }
                };
                debug!(execution_id = %execution_id, stage = %stage.name, run_order, "Starting group");
                trail.advance(execution_id, state);

                let finished = join_all(
                    group
                        .iter()
                        .map(|action| self.run_action(execution_id, &commit, &stage.name, action, &store)),
                )
                .await;

                for (record, rejection) in finished {
                    if outcome == RunOutcome::Succeeded {
                        match (record.status, rejection) {
                            (ActionStatus::Failed, _) => {
                                outcome = RunOutcome::Failed {
                                    stage: record.stage.clone(),
                                    action: record.action.clone(),
                                    reason: record.message.clone().unwrap_or_default(),
                                };
                            }
                            (ActionStatus::Rejected, Some(reason)) => {
                                outcome = RunOutcome::Rejected {
                                    stage: record.stage.clone(),
                                    action: record.action.clone(),
                                    reason,
                                };
                            }
                            _ => {}
                        }
                    }
                    if let Some(slot) = records
                        .iter_mut()
                        .find(|r| r.stage == record.stage && r.action == record.action)
                    {
                        *slot = record;
                    }
                }

                if outcome != RunOutcome::Succeeded {
                    break 'stages;
                }
            }

            self.events
                .emit(STAGE_COMPLETED, Some(run_payload(execution_id, json!({ "stage": stage.name }))))
                .await;
        }

        for record in records.iter_mut().filter(|r| r.status == ActionStatus::Pending) {
            record.status = ActionStatus::Skipped;
        }
        trail.advance(execution_id, outcome.to_state());

        match &outcome {
            RunOutcome::Succeeded => {
                info!(execution_id = %execution_id, "Pipeline run succeeded");
            }
            other => {
                warn!(execution_id = %execution_id, outcome = ?other, "Pipeline run did not succeed");
            }
        }
        self.events
            .emit(
                RUN_COMPLETED,
                Some(run_payload(execution_id, json!({ "outcome": outcome }))),
            )
            .await;

        RunReport {
            execution_id,
            pipeline: self.definition.name().to_string(),
            commit,
            outcome,
            states: trail.states,
            actions: records,
            artifacts: store.snapshot(),
            started_at,
            finished_at: iso_timestamp(),
        }
    }

    async fn run_action(
        &self,
        execution_id: Uuid,
        commit: &CommitEvent,
        stage: &str,
        action: &ActionSpec,
        store: &ArtifactStore,
    ) -> (ActionRecord, Option<RejectionReason>) {
        let mut record = pending_record(stage, action);
        record.status = ActionStatus::Running;
        record.started_at = Some(iso_timestamp());
        self.events
            .emit(
                ACTION_STARTED,
                Some(run_payload(
                    execution_id,
                    json!({ "stage": stage, "action": action.name, "run_order": action.run_order }),
                )),
            )
            .await;

        let rejection = match &action.kind {
            ActionKind::ManualApproval { timeout, notes } => {
                record.status = ActionStatus::Waiting;
                let request = ApprovalRequest::new(execution_id, stage, action.name.clone(), notes.clone(), *timeout);
                self.events
                    .emit(
                        APPROVAL_REQUESTED,
                        Some(run_payload(
                            execution_id,
                            json!({
                                "request_id": request.id.to_string(),
                                "stage": stage,
                                "action": action.name,
                                "timeout_secs": timeout.as_secs(),
                            }),
                        )),
                    )
                    .await;

                let decision = self.approvals.request(request).await;
                self.events
                    .emit(
                        APPROVAL_RESOLVED,
                        Some(run_payload(
                            execution_id,
                            json!({ "stage": stage, "action": action.name, "decision": decision }),
                        )),
                    )
                    .await;

                match decision {
                    ApprovalDecision::Approved => {
                        record.status = ActionStatus::Succeeded;
                        None
                    }
                    ApprovalDecision::Rejected(reason) => {
                        record.status = ActionStatus::Rejected;
                        record.message = Some(format!("Approval {reason}"));
                        Some(reason)
                    }
                }
            }
            _ => {
                self.execute(execution_id, commit, stage, action, store, &mut record)
                    .await;
                None
            }
        };

        record.finished_at = Some(iso_timestamp());
        self.events
            .emit(
                ACTION_COMPLETED,
                Some(run_payload(
                    execution_id,
                    json!({ "stage": stage, "action": action.name, "status": record.status }),
                )),
            )
            .await;
        (record, rejection)
    }

    async fn execute(
        &self,
        execution_id: Uuid,
        commit: &CommitEvent,
        stage: &str,
        action: &ActionSpec,
        store: &ArtifactStore,
        record: &mut ActionRecord,
    ) {
        let mut inputs = Vec::with_capacity(action.inputs.len());
        for input in &action.inputs {
            match store.get(input.name()) {
                Some(revision) => inputs.push(revision),
                None => return fail(record, format!("Input artifact '{input}' is not available")),
            }
        }

        let invocation = ActionInvocation {
            execution_id,
            commit: commit.clone(),
            stage: stage.to_string(),
            action: action.clone(),
            inputs,
        };

        let outcome = match &action.kind {
            ActionKind::Build { project } => {
                match tokio::time::timeout(project.timeout, self.executor.execute(invocation)).await {
                    Ok(outcome) => outcome,
                    Err(_) => ActionOutcome::failed(format!(
                        "Build timed out after {} minutes",
                        project.timeout_minutes()
                    )),
                }
            }
            _ => self.executor.execute(invocation).await,
        };

        match outcome {
            ActionOutcome::Failed { message, log } => {
                record.log = log;
                fail(record, message);
            }
            ActionOutcome::Succeeded { outputs } => {
                let produced_by = format!("{stage}/{}", action.name);
                for declared in &action.outputs {
                    let Some(revision_id) = outputs.get(declared.name()) else {
                        return fail(
                            record,
                            format!("Action did not produce declared output '{declared}'"),
                        );
                    };
                    let revision = ArtifactRevision::new(declared.name(), produced_by.clone(), revision_id.clone());
                    if let Err(err) = store.put(revision) {
                        return fail(record, err.to_string());
                    }
                    debug!(artifact = %declared, revision = %revision_id, producer = %produced_by, "Stored artifact");
                    record.outputs.push(declared.name().to_string());
                }
                for extra in outputs
                    .keys()
                    .filter(|name| !action.outputs.iter().any(|a| a.name() == name.as_str()))
                {
                    warn!(action = %produced_by, artifact = %extra, "Ignoring undeclared output");
                }
                record.status = ActionStatus::Succeeded;
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipeline", &self.definition.name())
            .field("approvals", &self.approvals)
            .finish_non_exhaustive()
    }
}

fn pending_record(stage: &str, action: &ActionSpec) -> ActionRecord {
    ActionRecord {
        stage: stage.to_string(),
        action: action.name.clone(),
        category: action.category(),
        run_order: action.run_order,
        status: ActionStatus::Pending,
        message: None,
        log: None,
        outputs: Vec::new(),
        started_at: None,
        finished_at: None,
    }
}

fn fail(record: &mut ActionRecord, message: String) {
    warn!(stage = %record.stage, action = %record.action, error = %message, "Action failed");
    record.status = ActionStatus::Failed;
    record.message = Some(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildspec::{BuildProject, BuildSpec};
    use crate::config::PipelineConfig;
    use crate::core::Artifact;
    use crate::events::CollectingEventSink;
    use crate::orchestrator::ScriptedExecutor;
    use crate::pipeline::{
        define_source_stage, sample_pipeline, PipelineBuilder, StageSpec, BUILD_ACTION, BUILD_STAGE,
        CHANGE_SET_ACTION, DEPLOY_STAGE, EXECUTE_ACTION, OUTPUT_ARTIFACT, REVIEW_ACTION, SOURCE_ACTION,
        SOURCE_ARTIFACT, SOURCE_STAGE,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    fn orchestrator(config: &PipelineConfig, executor: Arc<ScriptedExecutor>) -> Orchestrator {
        Orchestrator::new(sample_pipeline(config).unwrap(), executor)
    }

    fn answer_next(gate: Arc<ApprovalGate>, approve: bool) -> JoinHandle<ApprovalRequest> {
        tokio::spawn(async move {
            let request = gate.next_pending().await;
            if approve {
                gate.approve(request.id);
            } else {
                gate.reject(request.id);
            }
            request
        })
    }

    #[tokio::test]
    async fn test_approved_run_succeeds() {
        let executor = Arc::new(ScriptedExecutor::new());
        let orch = orchestrator(&PipelineConfig::default(), executor.clone());
        let approver = answer_next(orch.approvals(), true);

        let report = orch.run(CommitEvent::new("master", "C1")).await;

        assert!(report.is_success());
        assert_eq!(
            executor.invoked(),
            vec![SOURCE_ACTION, BUILD_ACTION, CHANGE_SET_ACTION, EXECUTE_ACTION]
        );
        assert_eq!(report.artifact(SOURCE_ARTIFACT).unwrap().revision_id, "C1");
        assert_eq!(report.artifact(OUTPUT_ARTIFACT).unwrap().revision_id, "output_data@C1");
        assert_eq!(
            report.artifact(OUTPUT_ARTIFACT).unwrap().produced_by,
            format!("{BUILD_STAGE}/{BUILD_ACTION}")
        );

        let request = approver.await.unwrap();
        assert_eq!(request.stage, DEPLOY_STAGE);
        assert_eq!(request.action, REVIEW_ACTION);
        assert_eq!(request.execution_id, report.execution_id);
    }

    #[tokio::test]
    async fn test_state_trail() {
        let orch = orchestrator(&PipelineConfig::default(), Arc::new(ScriptedExecutor::new()));
        let _approver = answer_next(orch.approvals(), true);

        let report = orch.run(CommitEvent::new("master", "C1")).await;

        assert_eq!(
            report.state_labels(),
            vec![
                "pending",
                "Source:CodeCommit_Source(running)",
                "Build:build_action(running)",
                "CloudFormation_Deploy:CreateCFnChangeSet(running)",
                "CloudFormation_Deploy:Review(waiting)",
                "CloudFormation_Deploy:DeployResources(running)",
                "succeeded",
            ]
        );
        for pair in report.states.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{pair:?}");
        }
    }

    #[tokio::test]
    async fn test_rejection_prevents_execute() {
        let executor = Arc::new(ScriptedExecutor::new());
        let orch = orchestrator(&PipelineConfig::default(), executor.clone());
        let _approver = answer_next(orch.approvals(), false);

        let report = orch.run(CommitEvent::new("master", "C1")).await;

        assert_eq!(
            report.outcome,
            RunOutcome::Rejected {
                stage: DEPLOY_STAGE.to_string(),
                action: REVIEW_ACTION.to_string(),
                reason: RejectionReason::Rejected,
            }
        );
        assert!(!executor.invoked().contains(&EXECUTE_ACTION.to_string()));

        let execute = report.action(DEPLOY_STAGE, EXECUTE_ACTION).unwrap();
        assert_eq!(execute.status, ActionStatus::Skipped);
        assert!(!execute.was_scheduled());
        assert_eq!(
            report.action(DEPLOY_STAGE, CHANGE_SET_ACTION).unwrap().status,
            ActionStatus::Succeeded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_approval_expires() {
        let config = PipelineConfig::default().with_approval_timeout_minutes(60);
        let executor = Arc::new(ScriptedExecutor::new());
        let orch = orchestrator(&config, executor.clone());

        let started = tokio::time::Instant::now();
        let report = orch.run(CommitEvent::new("master", "C1")).await;

        assert!(started.elapsed() >= Duration::from_secs(60 * 60));
        assert!(matches!(
            report.outcome,
            RunOutcome::Rejected {
                reason: RejectionReason::Expired,
                ..
            }
        ));
        assert!(!executor.invoked().contains(&EXECUTE_ACTION.to_string()));
        assert_eq!(orch.approvals().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_build_failure_halts_run() {
        let executor = Arc::new(ScriptedExecutor::new().with_failure(BUILD_ACTION, "cdk synth failed"));
        let orch = orchestrator(&PipelineConfig::default(), executor.clone());

        let report = orch.run(CommitEvent::new("master", "C1")).await;

        assert_eq!(
            report.outcome,
            RunOutcome::Failed {
                stage: BUILD_STAGE.to_string(),
                action: BUILD_ACTION.to_string(),
                reason: "cdk synth failed".to_string(),
            }
        );
        let build = report.action(BUILD_STAGE, BUILD_ACTION).unwrap();
        assert!(build.log.as_deref().unwrap().contains("cdk synth failed"));
        assert_eq!(executor.invoked(), vec![SOURCE_ACTION, BUILD_ACTION]);
        assert_eq!(
            report.action(DEPLOY_STAGE, REVIEW_ACTION).unwrap().status,
            ActionStatus::Skipped
        );
        assert!(report.artifact(OUTPUT_ARTIFACT).is_none());
        assert_eq!(orch.approvals().pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_timeout() {
        let executor =
            Arc::new(ScriptedExecutor::new().with_delay(BUILD_ACTION, Duration::from_secs(11 * 60)));
        let orch = orchestrator(&PipelineConfig::default(), executor);

        let report = orch.run(CommitEvent::new("master", "C1")).await;

        match &report.outcome {
            RunOutcome::Failed { stage, reason, .. } => {
                assert_eq!(stage, BUILD_STAGE);
                assert_eq!(reason, "Build timed out after 10 minutes");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_declared_output_fails() {
        let executor = Arc::new(ScriptedExecutor::new().withholding_outputs(SOURCE_ACTION));
        let orch = orchestrator(&PipelineConfig::default(), executor.clone());

        let report = orch.run(CommitEvent::new("master", "C1")).await;

        assert!(matches!(
            &report.outcome,
            RunOutcome::Failed { stage, .. } if stage == SOURCE_STAGE
        ));
        assert_eq!(executor.invoked(), vec![SOURCE_ACTION]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_run_order_runs_concurrently() {
        let config = PipelineConfig::default();
        let (source, source_output) = define_source_stage(&config);
        let project = BuildProject::new("project", BuildSpec::synth("cdk.out", "**/*"));
        let build = StageSpec::new("Build").with_actions([
            ActionSpec::build("unit", project.clone(), &source_output, &[Artifact::new("unit_out")]),
            ActionSpec::build("lint", project, &source_output, &[Artifact::new("lint_out")]),
        ]);
        let definition = PipelineBuilder::new("stack", "parallel")
            .stage(source)
            .unwrap()
            .stage(build)
            .unwrap()
            .build()
            .unwrap();
        let executor = Arc::new(
            ScriptedExecutor::new()
                .with_delay("unit", Duration::from_secs(5 * 60))
                .with_delay("lint", Duration::from_secs(5 * 60)),
        );
        let orch = Orchestrator::new(definition, executor);

        let started = tokio::time::Instant::now();
        let report = orch.run(CommitEvent::new("master", "C1")).await;

        assert!(report.is_success());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5 * 60) && elapsed < Duration::from_secs(10 * 60));
        assert_eq!(
            report.state_labels()[2],
            "Build:unit+lint(running)".to_string()
        );
        assert!(report.artifact("unit_out").is_some());
        assert!(report.artifact("lint_out").is_some());
    }

    #[tokio::test]
    async fn test_on_commit_filters_branch() {
        let executor = Arc::new(ScriptedExecutor::new().with_failure(SOURCE_ACTION, "stop"));
        let orch = orchestrator(&PipelineConfig::default(), executor.clone());

        assert!(orch.on_commit(CommitEvent::new("develop", "D1")).await.is_none());
        assert!(executor.invoked().is_empty());

        let report = orch.on_commit(CommitEvent::new("master", "C1")).await.unwrap();
        assert_eq!(report.commit.commit_id, "C1");
        assert_eq!(executor.invoked(), vec![SOURCE_ACTION]);
    }

    #[tokio::test]
    async fn test_on_commit_ignored_without_trigger() {
        let config = PipelineConfig::default().with_trigger(SourceTrigger::None);
        let sink = Arc::new(CollectingEventSink::new());
        let orch = orchestrator(&config, Arc::new(ScriptedExecutor::new())).with_event_sink(sink.clone());

        assert!(orch.on_commit(CommitEvent::new("master", "C1")).await.is_none());
        assert_eq!(sink.event_types(), vec![COMMIT_IGNORED]);
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let sink = Arc::new(CollectingEventSink::new());
        let orch = orchestrator(&PipelineConfig::default(), Arc::new(ScriptedExecutor::new()))
            .with_event_sink(sink.clone());
        let _approver = answer_next(orch.approvals(), true);

        orch.run(CommitEvent::new("master", "C1")).await;

        let types = sink.event_types();
        assert_eq!(types.first().map(String::as_str), Some(RUN_STARTED));
        assert_eq!(types.last().map(String::as_str), Some(RUN_COMPLETED));
        assert_eq!(sink.events_of_type("stage.started").len(), 3);
        assert_eq!(sink.events_of_type("action.started").len(), 5);
        assert_eq!(sink.events_of_type("approval.").len(), 2);
    }
}
