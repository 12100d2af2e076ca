//! The action dispatcher.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::core::bindings::{Bindings, resolve_args};
use crate::core::contract::validate_action;
use crate::core::types::ActionOutcome;
use crate::error::{ExecutionFailure, RecordKind, SchemaViolation, UnresolvedCapability};
use crate::exec::EngineContext;
use crate::io::timer::WaitOutcome;
use crate::tree::{Action, ActionState, ActionStatus};

/// Dispatch one pending action, retrying failed attempts up to the ceiling.
///
/// Contract violations, unresolvable bindings and missing executors fail the
/// action without an attempt. Executor errors and panics count as failed
/// attempts. A cancelled wait returns the action to `pending` with its attempt
/// count kept. The persisted `input_args` are never modified.
#[instrument(skip_all, fields(capability = %action.capability(), max_attempts = ctx.retry.max_attempts))]
pub fn run_action(action: &mut Action, bindings: &Bindings, ctx: &EngineContext<'_>) -> ActionOutcome {
    if action.state != ActionState::Pending {
        return ActionOutcome::Rejected(SchemaViolation::new(
            RecordKind::Action,
            "state",
            format!("must be 'pending' to dispatch (found '{}')", action.state.as_str()),
        )
        .at(action.capability()));
    }
    if let Err(violation) = validate_action(action, ctx.contracts) {
        let violation = violation.at(action.capability());
        warn!(%violation, "action rejected by contract");
        fail_without_attempt(action, violation.to_string());
        return ActionOutcome::Rejected(violation);
    }
    let args = match dispatch_args(action, bindings, ctx) {
        Ok(args) => args,
        Err(violation) => {
            warn!(%violation, "action arguments could not be resolved");
            fail_without_attempt(action, violation.to_string());
            return ActionOutcome::Rejected(violation);
        }
    };

    action.state = ActionState::Active;
    let Some(executor) = ctx.registry.resolve(&action.source, &action.name) else {
        let unresolved = UnresolvedCapability {
            capability_source: action.source.clone(),
            capability_name: action.name.clone(),
        };
        warn!(%unresolved, "no executor for action");
        fail_without_attempt(action, unresolved.to_string());
        return ActionOutcome::Unresolved(unresolved);
    };

    if !ctx.retry.action_delay.is_zero()
        && ctx.timer.wait(ctx.retry.action_delay) == WaitOutcome::Cancelled
    {
        action.state = ActionState::Pending;
        info!("action delay cancelled");
        return ActionOutcome::Interrupted {
            attempts: action.attempts,
        };
    }

    loop {
        if action.attempts >= ctx.retry.max_attempts {
            return exhaust(action);
        }
        action.attempts += 1;
        debug!(attempt = action.attempts, "invoking executor");

        let failure = match catch_unwind(AssertUnwindSafe(|| executor.invoke(&args))) {
            Ok(Ok(outcome)) if outcome.success => {
                action.state = ActionState::Complete;
                action.status = ActionStatus::Success;
                action.last_error = None;
                action.output = outcome.output;
                action.completed_at = Some(Utc::now());
                info!(attempts = action.attempts, "action complete");
                return ActionOutcome::Succeeded {
                    attempts: action.attempts,
                };
            }
            Ok(Ok(outcome)) => outcome
                .error
                .unwrap_or_else(|| "executor reported failure".to_string()),
            Ok(Err(err)) => format!("executor error: {:#}", err),
            Err(payload) => format!("executor panicked: {}", panic_message(payload.as_ref())),
        };
        warn!(attempt = action.attempts, error = %failure, "attempt failed");
        action.status = ActionStatus::Failed;
        action.last_error = Some(failure);

        if action.attempts >= ctx.retry.max_attempts {
            return exhaust(action);
        }
        if ctx.timer.wait(ctx.retry.retry_delay) == WaitOutcome::Cancelled {
            action.state = ActionState::Pending;
            info!(attempts = action.attempts, "retry wait cancelled");
            return ActionOutcome::Interrupted {
                attempts: action.attempts,
            };
        }
    }
}

/// Resolve bindings into a copy of `input_args` and add contract defaults the
/// tree does not carry.
fn dispatch_args(
    action: &Action,
    bindings: &Bindings,
    ctx: &EngineContext<'_>,
) -> Result<Map<String, Value>, SchemaViolation> {
    let mut args = resolve_args(&action.input_args, bindings).map_err(|reason| {
        SchemaViolation::new(RecordKind::Action, "input_args", reason).at(action.capability())
    })?;
    if let Some(contract) = ctx.contracts.get(&action.source, &action.name) {
        for (arg, value) in &contract.defaults {
            args.entry(arg.clone()).or_insert_with(|| value.clone());
        }
    }
    Ok(args)
}

fn fail_without_attempt(action: &mut Action, error: String) {
    action.state = ActionState::Failed;
    action.status = ActionStatus::Failed;
    action.last_error = Some(error);
    action.completed_at = Some(Utc::now());
}

fn exhaust(action: &mut Action) -> ActionOutcome {
    let message = action
        .last_error
        .get_or_insert_with(|| "attempt ceiling reached".to_string())
        .clone();
    action.state = ActionState::Failed;
    action.status = ActionStatus::Failed;
    action.completed_at = Some(Utc::now());
    warn!(attempts = action.attempts, "action failed after final attempt");
    ActionOutcome::Exhausted(ExecutionFailure {
        message,
        attempts: action.attempts,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{InstantTimer, Scripted, TestEngine, action};
    use serde_json::json;
    use std::time::Duration;

    fn click() -> Action {
        action("mouse", "click", json!({"x": 10, "y": 20}))
    }

    #[test]
    fn success_records_output_and_completion() {
        let engine = TestEngine::new(vec![Scripted::Succeed(Some(json!({"clicked": true})))]);
        let mut click = click();

        let outcome = run_action(&mut click, &Bindings::new(), &engine.ctx());
        assert_eq!(outcome, ActionOutcome::Succeeded { attempts: 1 });
        assert_eq!(click.state, ActionState::Complete);
        assert_eq!(click.status, ActionStatus::Success);
        assert_eq!(click.output, Some(json!({"clicked": true})));
        assert!(click.last_error.is_none());
        assert!(click.completed_at.is_some());
        assert_eq!(engine.executor.calls(), vec![click.input_args.clone()]);
    }

    #[test]
    fn failed_attempts_are_retried_after_the_retry_delay() {
        let engine = TestEngine::new(vec![
            Scripted::Fail("missed".to_string()),
            Scripted::Fail("missed again".to_string()),
            Scripted::Succeed(None),
        ]);
        let mut click = click();

        let outcome = run_action(&mut click, &Bindings::new(), &engine.ctx());
        assert_eq!(outcome, ActionOutcome::Succeeded { attempts: 3 });
        assert_eq!(click.attempts, 3);
        assert!(click.last_error.is_none());
        assert_eq!(
            engine.timer.waits(),
            vec![engine.retry.retry_delay, engine.retry.retry_delay]
        );
        assert_eq!(engine.executor.call_count(), 3);
    }

    #[test]
    fn attempt_ceiling_is_never_exceeded() {
        let mut engine = TestEngine::new(vec![
            Scripted::Fail("one".to_string()),
            Scripted::Fail("two".to_string()),
            Scripted::Fail("three".to_string()),
        ]);
        engine.retry.max_attempts = 2;
        let mut click = click();

        let outcome = run_action(&mut click, &Bindings::new(), &engine.ctx());
        assert_eq!(
            outcome,
            ActionOutcome::Exhausted(ExecutionFailure {
                message: "two".to_string(),
                attempts: 2,
            })
        );
        assert_eq!(click.state, ActionState::Failed);
        assert_eq!(click.status, ActionStatus::Failed);
        assert_eq!(click.attempts, 2);
        assert_eq!(click.last_error.as_deref(), Some("two"));
        assert_eq!(engine.executor.call_count(), 2);
        assert_eq!(engine.timer.waits().len(), 1);
    }

    #[test]
    fn contract_violation_rejects_before_executor_is_invoked() {
        let engine = TestEngine::new(Vec::new());
        let mut click = action("mouse", "click", json!({"x": 10}));
        let before = click.input_args.clone();

        let outcome = run_action(&mut click, &Bindings::new(), &engine.ctx());
        let ActionOutcome::Rejected(violation) = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert_eq!(violation.field, "input_args");
        assert_eq!(click.state, ActionState::Failed);
        assert_eq!(click.attempts, 0);
        assert!(click.last_error.as_deref().is_some_and(|e| e.contains("y")));
        assert_eq!(click.input_args, before);
        assert_eq!(engine.executor.call_count(), 0);
    }

    #[test]
    fn unresolved_capability_fails_without_retry() {
        let mut engine = TestEngine::new(Vec::new());
        engine.contracts.insert(
            "vision",
            crate::core::contract::ActionContract {
                name: "find".to_string(),
                ..Default::default()
            },
        );
        let mut find = action("vision", "find", json!({}));

        let outcome = run_action(&mut find, &Bindings::new(), &engine.ctx());
        assert_eq!(
            outcome,
            ActionOutcome::Unresolved(UnresolvedCapability {
                capability_source: "vision".to_string(),
                capability_name: "find".to_string(),
            })
        );
        assert_eq!(find.state, ActionState::Failed);
        assert_eq!(find.attempts, 0);
        assert_eq!(
            find.last_error.as_deref(),
            Some("no executor registered for 'vision.find'")
        );
        assert!(engine.timer.waits().is_empty());
    }

    #[test]
    fn executor_errors_and_panics_are_failed_attempts() {
        let engine = TestEngine::new(vec![
            Scripted::Error("socket closed".to_string()),
            Scripted::Panic("driver crashed".to_string()),
            Scripted::Fail("still broken".to_string()),
        ]);
        let mut click = click();

        let outcome = run_action(&mut click, &Bindings::new(), &engine.ctx());
        assert!(matches!(outcome, ActionOutcome::Exhausted(ref failure) if failure.attempts == 3));
        assert_eq!(engine.executor.call_count(), 3);
        assert_eq!(click.last_error.as_deref(), Some("still broken"));
    }

    #[test]
    fn panic_message_becomes_last_error() {
        let mut engine = TestEngine::new(vec![Scripted::Panic("driver crashed".to_string())]);
        engine.retry.max_attempts = 1;
        let mut click = click();

        run_action(&mut click, &Bindings::new(), &engine.ctx());
        assert_eq!(
            click.last_error.as_deref(),
            Some("executor panicked: driver crashed")
        );
        assert_eq!(click.state, ActionState::Failed);
    }

    #[test]
    fn cancelled_retry_wait_returns_action_to_pending() {
        let mut engine = TestEngine::new(vec![Scripted::Fail("missed".to_string())]);
        engine.timer = InstantTimer::cancelling_on(1);
        let mut click = click();

        let outcome = run_action(&mut click, &Bindings::new(), &engine.ctx());
        assert_eq!(outcome, ActionOutcome::Interrupted { attempts: 1 });
        assert_eq!(click.state, ActionState::Pending);
        assert_eq!(click.status, ActionStatus::Failed);
        assert_eq!(click.attempts, 1);
        assert_eq!(click.last_error.as_deref(), Some("missed"));

        engine.timer = InstantTimer::new();
        let outcome = run_action(&mut click, &Bindings::new(), &engine.ctx());
        assert_eq!(outcome, ActionOutcome::Succeeded { attempts: 2 });
    }

    #[test]
    fn action_delay_runs_before_first_attempt() {
        let mut engine = TestEngine::new(Vec::new());
        engine.retry.action_delay = Duration::from_millis(250);
        let mut click = click();

        run_action(&mut click, &Bindings::new(), &engine.ctx());
        assert_eq!(engine.timer.waits(), vec![Duration::from_millis(250)]);
        assert_eq!(click.state, ActionState::Complete);
    }

    #[test]
    fn bindings_and_defaults_reach_executor_without_changing_the_tree() {
        let engine = TestEngine::new(Vec::new());
        let mut type_text = action("keyboard", "type_text", json!({"text": "$read.text"}));
        let mut bindings = Bindings::new();
        bindings.insert("read", json!({"text": "hello"}));

        let outcome = run_action(&mut type_text, &bindings, &engine.ctx());
        assert!(outcome.succeeded());
        assert_eq!(
            engine.executor.calls()[0],
            json!({"text": "hello", "delay_ms": 20})
                .as_object()
                .cloned()
                .expect("object")
        );
        assert_eq!(type_text.input_args.get("text"), Some(&json!("$read.text")));
        assert!(!type_text.input_args.contains_key("delay_ms"));
    }

    #[test]
    fn unresolved_binding_rejects_the_action() {
        let engine = TestEngine::new(Vec::new());
        let mut type_text = action(
            "keyboard",
            "type_text",
            json!({"text": "$missing", "delay_ms": 5}),
        );

        let outcome = run_action(&mut type_text, &Bindings::new(), &engine.ctx());
        assert!(matches!(outcome, ActionOutcome::Rejected(_)));
        assert_eq!(type_text.state, ActionState::Failed);
        assert!(
            type_text
                .last_error
                .as_deref()
                .is_some_and(|e| e.contains("unresolved binding '$missing'"))
        );
        assert_eq!(engine.executor.call_count(), 0);
    }

    #[test]
    fn only_pending_actions_are_dispatched() {
        let engine = TestEngine::new(Vec::new());
        let mut click = click();
        click.state = ActionState::Complete;
        click.status = ActionStatus::Success;
        let before = click.clone();

        let outcome = run_action(&mut click, &Bindings::new(), &engine.ctx());
        assert!(matches!(outcome, ActionOutcome::Rejected(_)));
        assert_eq!(click, before);
        assert_eq!(engine.executor.call_count(), 0);
    }
}
