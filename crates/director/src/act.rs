//! Act trait and registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::types::{ActResult, RunIntent, Ticket};

/// What an Act is asked to run.
#[derive(Debug, Clone)]
pub struct ActRequest {
    pub intent: RunIntent,
    /// The lease authorizing the run. Eligibility requires a live one.
    pub ticket: Option<Ticket>,
}

impl ActRequest {
    /// A request backed by a leased ticket.
    #[must_use]
    pub const fn leased(intent: RunIntent, ticket: Ticket) -> Self {
        Self {
            intent,
            ticket: Some(ticket),
        }
    }

    /// Whether a live ticket backs this request.
    #[must_use]
    pub fn has_live_ticket(&self) -> bool {
        self.ticket.as_ref().is_some_and(Ticket::is_live)
    }
}

/// A named, stateless unit of scripted multi-party execution.
///
/// All per-run state lives inside one `execute` call. Implementations must
/// return a result on every path, cancellation included.
#[async_trait]
pub trait Act: Send + Sync {
    /// Stable name used for registry lookup.
    fn name(&self) -> &str;

    /// Cheap, side-effect-free precondition check.
    fn is_eligible(&self, request: &ActRequest) -> bool;

    /// Run the Act once.
    async fn execute(&self, request: &ActRequest, cancel: CancellationToken) -> ActResult;
}

/// Name to Act mapping, built once at startup and shared read-only.
#[derive(Default)]
pub struct ActRegistry {
    acts: HashMap<String, Arc<dyn Act>>,
}

impl ActRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an Act under its own name. Replaces any previous entry.
    pub fn register(&mut self, act: Arc<dyn Act>) {
        self.acts.insert(act.name().to_string(), act);
    }

    /// Builder form of [`ActRegistry::register`].
    #[must_use]
    pub fn with(mut self, act: Arc<dyn Act>) -> Self {
        self.register(act);
        self
    }

    /// Look up an Act by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Act>> {
        self.acts.get(name).cloned()
    }

    /// Whether an Act with this name exists.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.acts.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.acts.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered Acts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.acts.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.acts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActReason;

    struct Noop(&'static str);

    #[async_trait]
    impl Act for Noop {
        fn name(&self) -> &str {
            self.0
        }

        fn is_eligible(&self, request: &ActRequest) -> bool {
            request.has_live_ticket()
        }

        async fn execute(&self, _request: &ActRequest, _cancel: CancellationToken) -> ActResult {
            ActResult::failed(ActReason::NoContent, "nothing to say", 0)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ActRegistry::new()
            .with(Arc::new(Noop("Walk")))
            .with(Arc::new(Noop("GroupChat")));

        assert_eq!(registry.len(), 2);
        assert!(registry.has("GroupChat"));
        assert!(registry.get("Duel").is_none());
        assert_eq!(registry.names(), vec!["GroupChat".to_string(), "Walk".to_string()]);
    }

    #[test]
    fn test_request_without_ticket_has_no_live_ticket() {
        let request = ActRequest {
            intent: RunIntent::new("GroupChat", ["pawn:1", "pawn:2"]),
            ticket: None,
        };
        assert!(!request.has_live_ticket());
        assert!(!Noop("GroupChat").is_eligible(&request));
    }
}
