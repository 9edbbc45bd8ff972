//! Stepping a request tree.
//!
//! A step walks the tree depth-first, children before parents, and moves
//! every context as far as it can without I/O. Walks repeat while anything
//! changed, so a context unblocked by a child finishing in the same step
//! continues right away. The step ends when the root is terminal or every
//! live context waits for I/O the caller has not delivered yet.

use crate::config::{EngineConfig, Verification};
use crate::context::{ContextKind, ContextState, Purpose};
use crate::payload;
use crate::tree::{RequestTree, ROOT};
use meshrpc_core::{Action, Collaborators, ContextId, EngineError, EngineResult};
use meshrpc_registry::{RegistryHandle, Selection};
use meshrpc_types::{Address, NodeFilter, NodeProps};
use rand::RngCore;
use tracing::{debug, trace};

/// Upper bound on walks per step.
const MAX_PASSES: usize = 32;

/// Everything a step reads besides the tree.
pub struct StepEnv<'a> {
    /// Registry of the tree's chain.
    pub registry: &'a RegistryHandle,
    /// Verifiers and cache stores.
    pub collaborators: &'a Collaborators,
    /// Execution configuration.
    pub config: &'a EngineConfig,
    /// Randomness for node selection and refresh seeds.
    pub rng: &'a mut dyn RngCore,
    /// Current unix time in seconds.
    pub now: u64,
}

/// Where a step left the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The root succeeded; read its results.
    Done,
    /// Perform these actions, feed the results back, and step again.
    ///
    /// Empty when actions of an earlier step are still outstanding.
    Waiting(Vec<Action>),
}

/// What advancing one context achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Advance {
    /// Nothing to do until I/O or a child completes.
    Idle,
    /// State changed.
    Progress,
    /// New or reused children were linked and must be visited first.
    Spawned,
}

impl RequestTree {
    /// Advance the tree as far as possible without I/O.
    ///
    /// Returns the root's terminal error as `Err`.
    pub fn step(&mut self, env: &mut StepEnv<'_>) -> EngineResult<StepOutcome> {
        let mut actions = Vec::new();
        for pass in 0..MAX_PASSES {
            let progressed = self.pass(env, &mut actions);
            if self.state().is_terminal() || !progressed {
                break;
            }
            trace!(pass, "Tree changed, walking again");
        }

        match self.state() {
            ContextState::Success => {
                self.finish(true);
                Ok(StepOutcome::Done)
            }
            ContextState::Error => {
                self.finish(false);
                Err(self
                    .error()
                    .cloned()
                    .unwrap_or_else(|| EngineError::remote("request failed")))
            }
            ContextState::WaitingToSend | ContextState::WaitingForResponse => {
                Ok(StepOutcome::Waiting(actions))
            }
        }
    }

    fn finish(&mut self, success: bool) {
        if !std::mem::replace(&mut self.finished, true) {
            meshrpc_metrics::record_request_finished(success);
        }
    }

    /// One post-order walk from the root. Returns true if anything changed.
    fn pass(&mut self, env: &mut StepEnv<'_>, actions: &mut Vec<Action>) -> bool {
        let mut progressed = false;
        let mut visited = vec![false; self.len()];
        let mut stack = vec![(ROOT, false)];

        while let Some((id, expanded)) = stack.pop() {
            if !expanded {
                let i = id.0 as usize;
                if i >= visited.len() {
                    visited.resize(self.len(), false);
                }
                if std::mem::replace(&mut visited[i], true) {
                    continue;
                }
                stack.push((id, true));
                if !self.ctx(id).state.is_terminal() {
                    self.push_children(id, &visited, &mut stack);
                }
                continue;
            }

            match self.advance(id, env, actions) {
                Advance::Idle => {}
                Advance::Progress => progressed = true,
                Advance::Spawned => {
                    progressed = true;
                    visited.resize(self.len(), false);
                    stack.push((id, true));
                    self.push_children(id, &visited, &mut stack);
                }
            }
        }
        progressed
    }

    fn push_children(&self, id: ContextId, visited: &[bool], stack: &mut Vec<(ContextId, bool)>) {
        for &child in self.ctx(id).required.iter().rev() {
            if !visited.get(child.0 as usize).copied().unwrap_or(false) {
                stack.push((child, false));
            }
        }
    }

    fn advance(
        &mut self,
        id: ContextId,
        env: &mut StepEnv<'_>,
        actions: &mut Vec<Action>,
    ) -> Advance {
        let ctx = self.ctx(id);
        if ctx.state.is_terminal() {
            return Advance::Idle;
        }
        if matches!(ctx.kind, ContextKind::Sign { .. }) {
            self.advance_sign(id, actions)
        } else {
            self.advance_rpc(id, env, actions)
        }
    }

    fn advance_sign(&mut self, id: ContextId, actions: &mut Vec<Action>) -> Advance {
        let ctx = self.ctx_mut(id);
        let ContextKind::Sign {
            message,
            account,
            digest,
        } = &ctx.kind
        else {
            return Advance::Idle;
        };
        if ctx.state != ContextState::WaitingToSend {
            return Advance::Idle;
        }
        actions.push(Action::Sign {
            context: id,
            message: message.clone(),
            account: *account,
            digest: *digest,
        });
        ctx.state = ContextState::WaitingForResponse;
        debug!(context = ?id, %account, "Requesting signature");
        Advance::Progress
    }

    fn advance_rpc(
        &mut self,
        id: ContextId,
        env: &mut StepEnv<'_>,
        actions: &mut Vec<Action>,
    ) -> Advance {
        if let Some(child) = self.ctx(id).update_child {
            if self.ctx(child).state.is_terminal() {
                self.resolve_update(id, child, env);
                return Advance::Progress;
            }
        }

        let ctx = self.ctx(id);
        if ctx
            .required
            .iter()
            .any(|&c| !self.ctx(c).state.is_terminal())
        {
            return Advance::Idle;
        }

        let (state, filled) = (ctx.state, ctx.all_slots_filled());
        match state {
            ContextState::WaitingToSend => {
                if self.attach_update_if_due(id, env) {
                    return Advance::Spawned;
                }
                self.dispatch(id, env, actions)
            }
            ContextState::WaitingForResponse if filled => self.evaluate(id, env),
            _ => Advance::Idle,
        }
    }

    /// Select nodes for a new attempt and emit the send.
    fn dispatch(
        &mut self,
        id: ContextId,
        env: &mut StepEnv<'_>,
        actions: &mut Vec<Action>,
    ) -> Advance {
        let config = env.config;
        let ctx = self.ctx(id);
        let (filter, count, signer_count) = match (ctx.purpose, &ctx.explicit_nodes) {
            (_, Some(only)) => (NodeFilter::default().only(only.iter().copied()), 1, 0),
            (Purpose::NodeListUpdate, None) => (NodeFilter::default(), 1, 0),
            (Purpose::Call, None) => (
                config.data_filter(),
                config.effective_request_count(),
                config.signature_count as usize,
            ),
        };

        let now = env.now;
        let rng = &mut *env.rng;
        let picked = env
            .registry
            .with_mut(|r| -> EngineResult<(Selection, Vec<Address>)> {
                let data = r.pick(&filter, count, now, &config.selection, &mut *rng)?;
                if signer_count == 0 {
                    return Ok((data, Vec::new()));
                }
                let signer_filter = NodeFilter::new(NodeProps::SIGNER)
                    .excluding(data.nodes.iter().map(|n| n.address));
                let signers = r
                    .pick(&signer_filter, signer_count, now, &config.selection, &mut *rng)?
                    .nodes
                    .into_iter()
                    .map(|n| n.address)
                    .collect();
                Ok((data, signers))
            });

        let (selection, signers) = match picked {
            Ok(picked) => picked,
            Err(e) => {
                let ctx = self.ctx_mut(id);
                if let Some(last) = ctx.last_failure.take() {
                    debug!(context = ?id, error = %last, "No nodes left to retry on");
                }
                ctx.fail(e);
                return Advance::Progress;
            }
        };

        let verification = match ctx.purpose {
            Purpose::Call => config.verification,
            Purpose::NodeListUpdate => Verification::None,
        };
        let body = payload::build(ctx.requests(), &signers, verification);
        let method = ctx.requests().first().map(|r| r.method.clone()).unwrap_or_default();
        let urls: Vec<String> = selection.nodes.iter().map(|n| n.url.clone()).collect();
        let slots = urls.len();

        let ctx = self.ctx_mut(id);
        ctx.attempt += 1;
        debug!(
            context = ?id,
            %method,
            attempt = ctx.attempt,
            nodes = slots,
            signers = signers.len(),
            "Dispatching request"
        );
        ctx.nodes = selection.nodes;
        ctx.signers = signers;
        ctx.raw = vec![None; slots];
        ctx.parsed = vec![None; slots];
        ctx.outcomes = vec![None; slots];
        ctx.timings_recorded = false;
        ctx.state = ContextState::WaitingForResponse;
        meshrpc_metrics::record_request_attempt(&method);
        actions.push(Action::Send {
            context: id,
            urls,
            payload: body,
        });
        Advance::Progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshrpc_core::DigestKind;
    use meshrpc_registry::RegistryLease;
    use meshrpc_test_helpers::TestNodes;
    use meshrpc_types::ChainId;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tracing_test::traced_test;

    fn registry() -> RegistryLease {
        RegistryLease::private(TestNodes::new(3, 1).registry(ChainId(1), 10))
    }

    #[traced_test]
    #[test]
    fn test_step_emits_send_then_waits() {
        let registry = registry();
        let collaborators = Collaborators::new();
        let config = EngineConfig::default().with_request_count(2);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut env = StepEnv {
            registry: &registry,
            collaborators: &collaborators,
            config: &config,
            rng: &mut rng,
            now: 1_000,
        };
        let mut tree = RequestTree::parse(r#"{"method":"eth_chainId","params":[]}"#).unwrap();

        let StepOutcome::Waiting(actions) = tree.step(&mut env).unwrap() else {
            panic!("expected a send");
        };
        assert_eq!(actions.len(), 1);
        let Action::Send { context, urls, .. } = &actions[0] else {
            panic!("expected a send");
        };
        assert_eq!(*context, ROOT);
        assert_eq!(urls.len(), 2);
        assert!(logs_contain("Dispatching request"));

        // nothing new until the responses arrive
        assert_eq!(tree.step(&mut env).unwrap(), StepOutcome::Waiting(vec![]));
        assert_eq!(tree.state(), ContextState::WaitingForResponse);
        assert_eq!(tree.root().attempt(), 1);
    }

    #[test]
    fn test_sign_child_emits_sign_action() {
        let registry = registry();
        let collaborators = Collaborators::new();
        let config = EngineConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut env = StepEnv {
            registry: &registry,
            collaborators: &collaborators,
            config: &config,
            rng: &mut rng,
            now: 1_000,
        };
        let mut tree = RequestTree::parse(r#"{"method":"eth_chainId","params":[]}"#).unwrap();
        let account = Address::new([4; 20]);
        let child = tree.push(
            ContextKind::Sign {
                message: b"hello".to_vec(),
                account,
                digest: DigestKind::PrefixedMessage,
            },
            None,
            Purpose::Call,
        );
        tree.ctx_mut(ROOT).required.push(child);

        let outcome = tree.step(&mut env).unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Waiting(vec![Action::Sign {
                context: child,
                message: b"hello".to_vec(),
                account,
                digest: DigestKind::PrefixedMessage,
            }])
        );
        // the root waits for its requirement before dispatching
        assert_eq!(tree.state(), ContextState::WaitingToSend);

        tree.add_signature(child, Ok(vec![1, 2, 3])).unwrap();
        assert_eq!(tree.context(child).unwrap().signature(), Some(&[1u8, 2, 3][..]));
        let StepOutcome::Waiting(actions) = tree.step(&mut env).unwrap() else {
            panic!("expected the root to dispatch");
        };
        assert!(matches!(actions[..], [Action::Send { context: ROOT, .. }]));
    }
}
