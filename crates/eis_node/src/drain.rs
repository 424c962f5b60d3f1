//! End-of-recording drain.
//!
//! When recording stops, requests still waiting on their lookahead partner are
//! re-dispatched as flushes. The first flush fills the ring for every
//! unpublished request up to the end-of-stream request. Slots within the
//! lookahead window get the stored transform of `r + lookahead`, or a fresh
//! engine step when none was computed. Later slots repeat the previous one.
//! A recording stopped before any lookahead transform was published drains
//! every slot to the identity bundle.

use contracts::{
    DegradeReason, EngineInput, MetadataQuery, MetadataTag, MetadataValue, ProcessOutcome,
    ProcessRequest, RequestId, TransformBundle,
};
use tracing::instrument;

use crate::lookahead::{lock, LookaheadRing, RingState};
use crate::node::EisNode;
use crate::phases::{Step, SOURCE_IDENTITY, SOURCE_RING};

/// Write `identity` into every unpublished slot up to `end_of_stream`
fn fill_identity(
    state: &mut RingState,
    identity: &TransformBundle,
    end_of_stream: RequestId,
) -> u64 {
    let first = state.last_published + 1;
    for request_id in first..=end_of_stream {
        state.write(request_id, identity.clone());
    }
    end_of_stream.saturating_sub(state.last_published)
}

impl EisNode {
    #[instrument(level = "debug", name = "eis_drain", skip_all, fields(request_id = request.request_id))]
    pub(crate) fn drain(
        &self,
        ring: &LookaheadRing,
        request: &ProcessRequest,
        outcome: &mut ProcessOutcome,
    ) -> Step {
        let request_id = request.request_id;
        outcome.bypass = self.config.bypassable;
        outcome.early_metadata_done = self
            .metadata
            .get(&MetadataQuery::new(MetadataTag::EisTransform, request_id))
            .is_some();

        let end_of_stream = self.end_of_stream().unwrap_or(request_id).max(request_id);
        let lookahead = ring.lookahead();
        let input = self.stream().input;

        // ring before adapter, publish never takes them in the other order
        let usable = ring.with_state(|state| {
            if state.filled {
                return !state.identity_only;
            }
            let short = state.last_published <= lookahead;
            let filled = if short {
                let identity = self.identity.bundle(input);
                fill_identity(state, &identity, end_of_stream)
            } else {
                self.fill_ring(state, lookahead, end_of_stream)
            };
            state.filled = true;
            state.identity_only = short;
            state.last_published = state.last_published.max(end_of_stream);
            observability::record_drain(filled);
            tracing::info!(
                end_of_stream,
                frames = filled,
                identity = short,
                "Lookahead ring drained"
            );
            !short
        });
        self.update_recording(false);

        let bundle = if !usable || self.is_disabled(request_id, 0) {
            outcome.degrade(DegradeReason::Disabled);
            self.publish_tags(request_id, &self.identity.bundle(input), SOURCE_IDENTITY);
            None
        } else {
            match ring.with_state(|state| state.read(request_id).cloned()) {
                Some(bundle) => Some(bundle),
                None => {
                    tracing::error!(request_id, "Flushed request has no ring entry");
                    outcome.degrade(DegradeReason::MissingTransform);
                    self.publish_tags(request_id, &self.identity.bundle(input), SOURCE_IDENTITY);
                    None
                }
            }
        };
        if let Some(bundle) = bundle {
            self.publish_tags(request_id, &bundle, SOURCE_RING);
        }
        outcome.published = true;

        ring.cancel(request_id);
        Step::Done
    }

    /// Write every unpublished slot up to `end_of_stream`, returns how many
    fn fill_ring(&self, state: &mut RingState, lookahead: u64, end_of_stream: RequestId) -> u64 {
        let first = state.last_published + 1;
        let skip = first + lookahead;
        let mut count = 0;

        for request_id in first..=end_of_stream {
            if request_id < skip {
                let bundle = self.lookahead_bundle(request_id + lookahead);
                state.write(request_id, bundle);
            } else {
                state.copy_previous(request_id);
            }
            count += 1;
        }
        count
    }

    /// Transform computed for `source`, running the engine if it never did
    fn lookahead_bundle(&self, source: RequestId) -> TransformBundle {
        let stored = self
            .metadata
            .get(&MetadataQuery::new(MetadataTag::EisTransform, source))
            .and_then(MetadataValue::into_transform);
        if let Some(bundle) = stored {
            return bundle;
        }

        let input = self.stream().input;
        if !self.motion_available() || self.config.overrides.default_grid_transform {
            return self.identity.bundle(input);
        }

        let mut adapter = lock(&self.adapter);
        if !adapter.is_ready() {
            return self.identity.bundle(input);
        }
        let result = adapter.execute(&EngineInput::frame_only(source));
        drop(adapter);

        match result {
            Ok(output) => self.bundle_from_output(source, Some(&output)),
            Err(e) => {
                tracing::warn!(frame_id = source, error = %e, "Drain engine step failed");
                self.identity.bundle(input)
            }
        }
    }
}
