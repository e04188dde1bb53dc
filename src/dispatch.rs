//! Event dispatch from hardware callbacks to configured actions.

use std::{
    process::{Command, Stdio},
    sync::Arc,
    thread,
};

use log::{debug, error, info, warn};

use crate::{
    binding::ActionSet,
    error::DispatchError,
    event::{Event, EventBus},
    gpio::{Edge, EdgeHandler},
};

/// Runs one action string.
///
/// Called from pin factory threads, concurrently with the reconciliation loop.
#[cfg_attr(test, mockall::automock)]
pub trait ActionExecutor: Send + Sync {
    fn dispatch(&self, action: &str) -> Result<(), DispatchError>;
}

/// Logs actions instead of running them. Used on hosts without an executor.
#[derive(Debug, Default)]
pub struct LogExecutor;

impl ActionExecutor for LogExecutor {
    fn dispatch(&self, action: &str) -> Result<(), DispatchError> {
        info!("action: {action}");
        Ok(())
    }
}

/// Spawns each action as a program with whitespace-separated arguments.
///
/// No shell is involved; the child is reaped on a detached thread.
#[derive(Debug, Default)]
pub struct ProcessExecutor;

impl ActionExecutor for ProcessExecutor {
    fn dispatch(&self, action: &str) -> Result<(), DispatchError> {
        let mut argv = action.split_whitespace();
        let program = argv.next().ok_or(DispatchError::Empty)?;

        let mut child = Command::new(program)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| DispatchError::Spawn {
                action: action.to_string(),
                source,
            })?;

        let action = action.to_string();
        thread::spawn(move || match child.wait() {
            Ok(status) if status.success() => debug!("`{action}` finished"),
            Ok(status) => warn!("`{action}` exited with {status}"),
            Err(e) => warn!("failed to wait for `{action}`: {e}"),
        });
        Ok(())
    }
}

/// Routes hardware events of bound pins to the action executor.
#[derive(Clone)]
pub struct EventDispatcher {
    executor: Arc<dyn ActionExecutor>,
    event_bus: Option<EventBus>,
}

impl EventDispatcher {
    pub fn new(executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            executor,
            event_bus: None,
        }
    }

    /// Also publishes [`Event::ButtonTriggered`] for every fired edge.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Runs `actions` in order. A failing action is logged and the rest still
    /// run. Returns the number of failures.
    pub fn run_actions(&self, actions: &[String]) -> usize {
        actions
            .iter()
            .filter(|action| match self.executor.dispatch(action) {
                Ok(()) => false,
                Err(e) => {
                    error!("{e}");
                    true
                }
            })
            .count()
    }

    /// Builds the handler for one edge of a binding.
    ///
    /// The handler owns `actions`, a snapshot taken at bind time. Returns
    /// `None` when the edge has nothing to run.
    pub fn handler(
        &self,
        id: u32,
        pin: u32,
        edge: Edge,
        actions: &Arc<ActionSet>,
    ) -> Option<EdgeHandler> {
        if actions.for_edge(edge).is_empty() {
            return None;
        }

        let dispatcher = self.clone();
        let actions = Arc::clone(actions);
        Some(Arc::new(move || {
            debug!("button #{id} (GPIO {pin}) {edge}");
            if let Some(bus) = &dispatcher.event_bus {
                bus.notify(Event::ButtonTriggered { id, pin, edge });
            }
            dispatcher.run_actions(actions.for_edge(edge));
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    fn actions() -> Arc<ActionSet> {
        Arc::new(ActionSet {
            on_press: vec!["first".into(), "second".into()],
            on_release: vec![],
            on_hold: vec!["hold".into()],
        })
    }

    #[test]
    fn failing_action_does_not_stop_the_rest() {
        let mut executor = MockActionExecutor::new();
        executor
            .expect_dispatch()
            .with(eq("first"))
            .times(1)
            .returning(|action| {
                Err(DispatchError::Failed {
                    action: action.to_string(),
                    reason: "boom".into(),
                })
            });
        executor
            .expect_dispatch()
            .with(eq("second"))
            .times(1)
            .returning(|_| Ok(()));

        let dispatcher = EventDispatcher::new(Arc::new(executor));
        let failures = dispatcher.run_actions(&["first".into(), "second".into()]);
        assert_eq!(failures, 1);
    }

    #[test]
    fn no_handler_for_edges_without_actions() {
        let dispatcher = EventDispatcher::new(Arc::new(LogExecutor));
        let actions = actions();

        assert!(dispatcher.handler(1, 17, Edge::Release, &actions).is_none());
        assert!(dispatcher.handler(1, 17, Edge::Press, &actions).is_some());
    }

    #[test]
    fn handler_runs_snapshot_and_publishes() {
        let mut executor = MockActionExecutor::new();
        executor
            .expect_dispatch()
            .with(eq("hold"))
            .times(1)
            .returning(|_| Ok(()));

        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let dispatcher = EventDispatcher::new(Arc::new(executor)).with_event_bus(bus);

        let handler = dispatcher.handler(3, 4, Edge::Hold, &actions()).unwrap();
        handler();

        match events.try_recv().unwrap() {
            Event::ButtonTriggered { id, pin, edge } => assert_eq!((id, pin, edge), (3, 4, Edge::Hold)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn process_executor_rejects_empty_and_missing_programs() {
        let executor = ProcessExecutor;
        assert!(matches!(executor.dispatch("   "), Err(DispatchError::Empty)));
        assert!(matches!(
            executor.dispatch("/nonexistent/gpio-monitord-action --flag"),
            Err(DispatchError::Spawn { .. })
        ));
    }
}
