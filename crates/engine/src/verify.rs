//! Judging node answers.
//!
//! Every filled response slot is judged once per attempt: transport status,
//! body shape, node-side errors, then the registered verifiers. The first
//! slot that passes answers the context.

use crate::config::Verification;
use crate::context::{ContextState, Purpose, SlotOutcome};
use crate::deps::TreeDeps;
use crate::execute::{Advance, StepEnv};
use crate::payload;
use crate::tree::RequestTree;
use meshrpc_core::{
    is_user_error, rpc_error_message, ContextId, EngineError, ErrorKind, ResponseMeta, Verdict,
    VerifyContext,
};
use meshrpc_registry::NodeLocator;
use meshrpc_types::Address;
use tracing::{debug, warn};

/// Outer message once every attempt failed.
pub const GIVE_UP_PREFIX: &str = "reaching max_attempts and giving up";

/// Judgement of one slot.
#[derive(Debug)]
enum Judgement {
    /// Every item passed. Carries the nodes the answering node reported offline.
    Accepted(Vec<Address>),
    /// The node misbehaved; another slot or attempt may still succeed.
    Failed(EngineError),
    /// A verifier is waiting for sub-requests that were just linked.
    Pending,
    /// The context cannot succeed.
    Fatal(EngineError),
}

impl RequestTree {
    /// Judge the filled slots of a dispatched context.
    pub(crate) fn evaluate(&mut self, id: ContextId, env: &mut StepEnv<'_>) -> Advance {
        self.record_timings(id, env);

        let mut pending = false;
        for slot in 0..self.ctx(id).raw.len() {
            if self.ctx(id).outcomes[slot].is_some() {
                continue;
            }
            match self.judge_slot(id, slot, env) {
                Judgement::Accepted(offline) => {
                    self.accept(id, slot, offline, env);
                    return Advance::Progress;
                }
                Judgement::Failed(e) => {
                    debug!(context = ?id, slot, error = %e, "Response rejected");
                    self.ctx_mut(id).outcomes[slot] = Some(SlotOutcome::Failed(e));
                }
                Judgement::Pending => pending = true,
                Judgement::Fatal(e) => {
                    self.ctx_mut(id).fail(e);
                    return Advance::Progress;
                }
            }
        }
        if pending {
            return Advance::Spawned;
        }

        let max_attempts = env.config.max_attempts;
        let ctx = self.ctx_mut(id);
        let last = ctx
            .outcomes
            .iter()
            .rev()
            .find_map(|o| match o {
                Some(SlotOutcome::Failed(e)) => Some(e.clone()),
                _ => None,
            })
            .unwrap_or_else(|| EngineError::remote("no response"));

        if ctx.attempt < max_attempts {
            debug!(context = ?id, attempt = ctx.attempt, error = %last, "Retrying on fresh nodes");
            meshrpc_metrics::record_request_retry(retry_reason(last.kind()));
            ctx.reset_attempt();
            ctx.last_failure = Some(last);
        } else {
            warn!(context = ?id, attempts = ctx.attempt, error = %last, "Giving up");
            ctx.fail(last.context(GIVE_UP_PREFIX));
        }
        Advance::Progress
    }

    fn record_timings(&mut self, id: ContextId, env: &StepEnv<'_>) {
        let ctx = self.ctx_mut(id);
        if ctx.timings_recorded {
            return;
        }
        ctx.timings_recorded = true;
        let samples: Vec<(Address, u32)> = ctx
            .nodes
            .iter()
            .zip(&ctx.raw)
            .filter_map(|(node, raw)| {
                raw.as_ref()
                    .filter(|r| r.is_success())
                    .map(|r| (node.address, r.elapsed_ms))
            })
            .collect();
        let now = env.now;
        env.registry.with_mut(|r| {
            for (address, elapsed) in &samples {
                r.record_response_time(address, *elapsed, now);
            }
        });
    }

    fn judge_slot(&mut self, id: ContextId, slot: usize, env: &StepEnv<'_>) -> Judgement {
        let ctx = self.ctx(id);
        let node = ctx.nodes[slot].clone();
        let Some(raw) = ctx.raw[slot].clone() else {
            return Judgement::Failed(EngineError::remote("no response"));
        };
        let requests = ctx.requests().to_vec();
        let signers = ctx.signers.clone();
        let purpose = ctx.purpose;

        if !raw.is_success() {
            blacklist(env, &node.address, "transport");
            return Judgement::Failed(EngineError::remote(format!(
                "{} failed with {}: {}",
                node.url, raw.status, raw.body
            )));
        }

        let items = match ctx.parsed[slot].clone() {
            Some(items) => items,
            None => match payload::split_body(&raw.body, requests.len()) {
                Ok(items) => {
                    self.ctx_mut(id).parsed[slot] = Some(items.clone());
                    items
                }
                Err(e) => {
                    blacklist(env, &node.address, "malformed");
                    return Judgement::Failed(e);
                }
            },
        };

        let mut pending = false;
        let mut linked = false;
        let mut offline = Vec::new();
        for (request, item) in requests.iter().zip(&items) {
            if let Some(message) = rpc_error_message(item) {
                if is_user_error(&message) {
                    continue;
                }
                blacklist(env, &node.address, "server_error");
                return Judgement::Failed(EngineError::remote(message));
            }

            let mut deps = TreeDeps::new(self, id, env.config.max_contexts);
            let verdict = {
                let mut cx = VerifyContext::new(request, item, node.address, &signers, &mut deps);
                env.collaborators.verify(&mut cx)
            };
            linked |= deps.linked;
            offline.extend(deps.offline);

            match verdict {
                Ok(None) if purpose == Purpose::NodeListUpdate => {}
                Ok(None) if env.config.verification == Verification::None => {}
                Ok(None) => {
                    return Judgement::Fatal(EngineError::new(
                        ErrorKind::Unverifiable,
                        format!("no verifier accepted {}", request.method),
                    ))
                }
                Ok(Some(Verdict::Accept)) => {}
                Ok(Some(Verdict::Reject(reason))) => {
                    blacklist(env, &node.address, "verification");
                    return Judgement::Failed(EngineError::new(ErrorKind::Unverifiable, reason));
                }
                Ok(Some(Verdict::Pending)) => pending = true,
                Err(e) => return Judgement::Fatal(e),
            }
        }

        if !pending {
            return Judgement::Accepted(offline);
        }
        let waiting = linked
            || self
                .ctx(id)
                .required
                .iter()
                .any(|&c| !self.ctx(c).state.is_terminal());
        if waiting {
            Judgement::Pending
        } else {
            // nothing left to wait for
            Judgement::Failed(EngineError::new(
                ErrorKind::Unverifiable,
                "verification did not complete",
            ))
        }
    }

    fn accept(&mut self, id: ContextId, slot: usize, offline: Vec<Address>, env: &StepEnv<'_>) {
        let ctx = self.ctx_mut(id);
        ctx.outcomes[slot] = Some(SlotOutcome::Accepted);
        let node = ctx.nodes[slot].address;
        ctx.responses = ctx.parsed[slot].take().unwrap_or_default();
        ctx.answered_by = Some(node);
        ctx.state = ContextState::Success;
        ctx.required.clear();
        debug!(context = ?id, %node, attempt = ctx.attempt, "Response accepted");

        if ctx.purpose != Purpose::Call {
            return;
        }
        let meta = ctx.responses.iter().find_map(ResponseMeta::from_response);
        let (now, ttl, staleness) = (env.now, env.config.blacklist_ttl_secs, &env.config.staleness);
        env.registry.with_mut(|r| {
            for peer in offline {
                r.report_offline(node, peer, ttl, now);
            }
            if let Some(meta) = meta {
                r.observe_response_meta(node, meta, now, staleness);
            }
        });
    }
}

fn blacklist(env: &StepEnv<'_>, address: &Address, reason: &str) {
    let (ttl, now) = (env.config.blacklist_ttl_secs, env.now);
    if env
        .registry
        .with_mut(|r| r.blacklist(NodeLocator::Address(address), ttl, now))
    {
        meshrpc_metrics::record_node_blacklisted(reason);
    }
}

fn retry_reason(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Unverifiable => "unverifiable",
        _ => "remote_rejected",
    }
}
