//! Action queue and dispatch loop
//!
//! Issuers hand actions to the [`ActionBus`]; one [`ActionDispatcher`] drains the
//! queue and runs each action on its own task.

use crate::action::{
    Action, ActionError, ActionHandler, ActionKind, ActionOutput, ActionResult, HandlerContext,
    HandlerRegistry, Origin, ResultHandle,
};
use crate::shutdown::Shutdown;
use crate::{ACTION_TARGET, ERROR_TARGET};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Submission side of the action queue
#[derive(Clone)]
pub struct ActionBus {
    tx: Sender<Action>,
}

impl ActionBus {
    /// Create a bus with a bounded queue and return the receiving end for the dispatcher
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<Action>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue an action, waiting only for queue capacity.
    ///
    /// If the dispatcher is gone the action is dropped and the handle resolves
    /// to `ActionError::Dropped`.
    pub async fn submit(&self, origin: Origin, kind: ActionKind) -> ResultHandle {
        let (action, handle) = Action::new(origin, kind);
        if let Err(mpsc::error::SendError(action)) = self.tx.send(action).await {
            warn!(
                target: ACTION_TARGET,
                action_id = %action.id,
                action_type = %action.get_type(),
                "Action bus closed, dropping action"
            );
        }
        handle
    }
}

/// Reads the action queue and runs handlers
pub struct ActionDispatcher {
    registry: Arc<HandlerRegistry>,
    ctx: HandlerContext,
    /// Bound on a single handler run
    action_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, ctx: HandlerContext, action_timeout: Duration) -> Self {
        Self {
            registry,
            ctx,
            action_timeout,
        }
    }

    /// Dispatch until shutdown or until every bus handle is dropped
    pub async fn run(self, mut rx: Receiver<Action>, mut shutdown: Shutdown) {
        info!(
            target: ACTION_TARGET,
            timeout_ms = self.action_timeout.as_millis(),
            "Action dispatcher started"
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(action) => {
                        self.dispatch(action, shutdown.clone());
                    }
                    None => break,
                },
            }
        }

        info!(target: ACTION_TARGET, "Action dispatcher stopped");
    }

    /// Spawn the handler for one action. Returns `None` if the action was dropped.
    fn dispatch(&self, action: Action, shutdown: Shutdown) -> Option<JoinHandle<()>> {
        let Some(handler) = self.registry.get(action.get_type()) else {
            warn!(
                target: ACTION_TARGET,
                action_id = %action.id,
                action_type = %action.get_type(),
                "No handler registered, dropping action"
            );
            return None;
        };

        let ctx = self.ctx.clone();
        let timeout = self.action_timeout;
        Some(tokio::spawn(execute(handler, ctx, action, timeout, shutdown)))
    }
}

/// Run one handler and deliver its result exactly once
async fn execute(
    handler: Arc<dyn ActionHandler>,
    ctx: HandlerContext,
    action: Action,
    timeout: Duration,
    mut shutdown: Shutdown,
) {
    let started = Instant::now();

    let result = tokio::select! {
        () = shutdown.cancelled() => Err(ActionError::Cancelled),
        outcome = tokio::time::timeout(timeout, handler.handle(&ctx, &action)) => {
            outcome.unwrap_or(Err(ActionError::Timeout(timeout)))
        }
    };

    log_result(&action, &result, started.elapsed());

    let action_id = action.id;
    if !action.complete(result) {
        debug!(target: ACTION_TARGET, action_id = %action_id, "Issuer stopped waiting for result");
    }
}

fn log_result(action: &Action, result: &ActionResult<ActionOutput>, elapsed: Duration) {
    let elapsed_ms = elapsed.as_millis();
    match result {
        Ok(_) => debug!(
            target: ACTION_TARGET,
            action_id = %action.id,
            action_type = %action.get_type(),
            origin = %action.origin,
            elapsed_ms,
            "Action completed"
        ),
        Err(e) if e.is_user_error() => debug!(
            target: ACTION_TARGET,
            action_id = %action.id,
            action_type = %action.get_type(),
            origin = %action.origin,
            error = %e,
            "Action rejected"
        ),
        Err(e) => error!(
            target: ERROR_TARGET,
            action_id = %action.id,
            action_type = %action.get_type(),
            origin = %action.origin,
            error = %e,
            elapsed_ms,
            "Action failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::filter::FilterSet;
    use crate::rcon::{Broadcaster, TcpDialer};
    use crate::shutdown::ShutdownTrigger;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingHandler;

    #[async_trait::async_trait]
    impl ActionHandler for FailingHandler {
        async fn handle(&self, _ctx: &HandlerContext, _action: &Action) -> ActionResult<ActionOutput> {
            Err(ActionError::NotFound("nobody".to_string()))
        }
    }

    struct StuckHandler;

    #[async_trait::async_trait]
    impl ActionHandler for StuckHandler {
        async fn handle(&self, _ctx: &HandlerContext, _action: &Action) -> ActionResult<ActionOutput> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ActionOutput::None)
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl ActionHandler for CountingHandler {
        async fn handle(&self, _ctx: &HandlerContext, _action: &Action) -> ActionResult<ActionOutput> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ActionOutput::None)
        }
    }

    fn context() -> HandlerContext {
        HandlerContext::new(
            Arc::new(MemoryStore::new()),
            Broadcaster::new(
                Arc::new(TcpDialer),
                Duration::from_millis(50),
                Duration::from_millis(50),
            ),
            Arc::new(FilterSet::new()),
        )
    }

    fn start(
        registry: HandlerRegistry,
        timeout: Duration,
    ) -> (ActionBus, ShutdownTrigger, JoinHandle<()>) {
        let (bus, rx) = ActionBus::new(16);
        let (trigger, shutdown) = ShutdownTrigger::new();
        let dispatcher = ActionDispatcher::new(Arc::new(registry), context(), timeout);
        let task = tokio::spawn(dispatcher.run(rx, shutdown));
        (bus, trigger, task)
    }

    #[tokio::test]
    async fn test_handler_error_is_delivered() {
        let mut registry = HandlerRegistry::empty();
        registry.register(ActionType::Servers, Arc::new(FailingHandler));
        let (bus, _trigger, _task) = start(registry, Duration::from_secs(1));

        let result = bus.submit(Origin::Web, ActionKind::Servers).await.wait().await;
        assert!(matches!(result, Err(ActionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unhandled_type_reports_dropped() {
        let (bus, _trigger, _task) = start(HandlerRegistry::empty(), Duration::from_secs(1));

        let result = bus
            .submit(Origin::Core, ActionKind::Servers)
            .await
            .wait_timeout(Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ActionError::Dropped)));
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let mut registry = HandlerRegistry::empty();
        registry.register(ActionType::Servers, Arc::new(StuckHandler));
        let (bus, _trigger, _task) = start(registry, Duration::from_millis(50));

        let result = bus.submit(Origin::Web, ActionKind::Servers).await.wait().await;
        assert!(matches!(result, Err(ActionError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_actions() {
        let mut registry = HandlerRegistry::empty();
        registry.register(ActionType::Servers, Arc::new(StuckHandler));
        let (bus, trigger, task) = start(registry, Duration::from_secs(3600));

        let handle = bus.submit(Origin::Web, ActionKind::Servers).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();

        let result = handle.wait_timeout(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ActionError::Cancelled)));
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        // Nothing is listening any more
        let late = bus.submit(Origin::Web, ActionKind::Servers).await;
        assert!(matches!(late.wait().await, Err(ActionError::Dropped)));
    }

    #[tokio::test]
    async fn test_every_action_gets_one_result() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::empty();
        registry.register(ActionType::Servers, Arc::new(CountingHandler(count.clone())));
        let (bus, _trigger, _task) = start(registry, Duration::from_secs(1));

        let mut handles = Vec::new();
        for _ in 0..50 {
            handles.push(bus.submit(Origin::Core, ActionKind::Servers).await);
        }
        for handle in handles {
            assert!(matches!(handle.wait().await, Ok(ActionOutput::None)));
        }
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }
}
