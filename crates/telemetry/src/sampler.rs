//! Sampling policy for rbx services.

use std::fmt;
use std::sync::Arc;

use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::{Sampler, ShouldSample};

/// Probability applied to spans that start a new trace.
pub const ROOT_SAMPLING_RATIO: f64 = 0.5;

/// Arguments of a single sampling decision, handed to exclusion predicates.
#[derive(Debug)]
pub struct SampleRequest<'a> {
    pub parent_context: Option<&'a Context>,
    pub trace_id: TraceId,
    pub name: &'a str,
    pub span_kind: &'a SpanKind,
    pub attributes: &'a [KeyValue],
    pub links: &'a [Link],
}

impl SampleRequest<'_> {
    /// Look up a string attribute by key.
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.as_str().into_owned())
    }
}

type ExclusionPredicate = Arc<dyn Fn(&SampleRequest<'_>) -> bool + Send + Sync>;

/// Parent-based sampler with an optional exclusion seam.
///
/// When an exclusion predicate is installed it is consulted first and a match
/// drops the span. Everything else goes to the wrapped parent-based sampler
/// unchanged. No predicate is installed by default.
#[derive(Clone)]
pub struct RbxSampler {
    delegate: Sampler,
    exclude: Option<ExclusionPredicate>,
}

impl RbxSampler {
    /// Wrap `root` in a parent-based sampler: root spans use `root`, child
    /// spans inherit the parent's decision.
    pub fn new(root: Sampler) -> Self {
        Self {
            delegate: Sampler::ParentBased(Box::new(root)),
            exclude: None,
        }
    }

    pub fn with_exclusion<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&SampleRequest<'_>) -> bool + Send + Sync + 'static,
    {
        self.exclude = Some(Arc::new(predicate));
        self
    }

    pub fn has_exclusion(&self) -> bool {
        self.exclude.is_some()
    }
}

impl Default for RbxSampler {
    fn default() -> Self {
        Self::new(Sampler::TraceIdRatioBased(ROOT_SAMPLING_RATIO))
    }
}

impl fmt::Debug for RbxSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RbxSampler")
            .field("delegate", &self.delegate)
            .field("exclusion", &self.exclude.is_some())
            .finish()
    }
}

impl ShouldSample for RbxSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        if let Some(exclude) = &self.exclude {
            let request = SampleRequest {
                parent_context,
                trace_id,
                name,
                span_kind,
                attributes,
                links,
            };
            if exclude(&request) {
                return SamplingResult {
                    decision: SamplingDecision::Drop,
                    attributes: Vec::new(),
                    trace_state: parent_trace_state(parent_context),
                };
            }
        }

        self.delegate.should_sample(
            parent_context,
            trace_id,
            name,
            span_kind,
            attributes,
            links,
        )
    }
}

fn parent_trace_state(parent_context: Option<&Context>) -> TraceState {
    parent_context
        .filter(|cx| cx.has_active_span())
        .map(|cx| cx.span().span_context().trace_state().clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use opentelemetry::trace::{SpanContext, SpanId, TraceFlags};

    use super::*;

    fn decide(sampler: &RbxSampler, parent: Option<&Context>, attributes: &[KeyValue]) -> SamplingDecision {
        let trace_id = TraceId::from_bytes(rand::random::<[u8; 16]>());
        sampler
            .should_sample(parent, trace_id, "span", &SpanKind::Server, attributes, &[])
            .decision
    }

    fn remote_parent(flags: TraceFlags) -> Context {
        let span_context = SpanContext::new(
            TraceId::from_bytes(rand::random::<[u8; 16]>()),
            SpanId::from_bytes([7; 8]),
            flags,
            true,
            TraceState::default(),
        );
        Context::new().with_remote_span_context(span_context)
    }

    #[test]
    fn root_spans_are_sampled_about_half_the_time() {
        let sampler = RbxSampler::default();
        let total = 20_000;
        let sampled = (0..total)
            .filter(|_| decide(&sampler, None, &[]) == SamplingDecision::RecordAndSample)
            .count();

        let ratio = sampled as f64 / total as f64;
        assert!((0.45..=0.55).contains(&ratio), "sampled ratio was {ratio}");
    }

    #[test]
    fn child_spans_inherit_parent_decision() {
        let sampler = RbxSampler::default();

        let sampled_parent = remote_parent(TraceFlags::SAMPLED);
        for _ in 0..100 {
            assert_eq!(
                decide(&sampler, Some(&sampled_parent), &[]),
                SamplingDecision::RecordAndSample
            );
        }

        let dropped_parent = remote_parent(TraceFlags::default());
        for _ in 0..100 {
            assert_eq!(
                decide(&sampler, Some(&dropped_parent), &[]),
                SamplingDecision::Drop
            );
        }
    }

    #[test]
    fn exclusion_predicate_drops_matching_spans() {
        let sampler = RbxSampler::new(Sampler::AlwaysOn)
            .with_exclusion(|request| request.attribute("url.path").as_deref() == Some("/metrics"));
        assert!(sampler.has_exclusion());

        let scrape = [KeyValue::new("url.path", "/metrics")];
        let api = [KeyValue::new("url.path", "/api/orders")];

        assert_eq!(decide(&sampler, None, &scrape), SamplingDecision::Drop);
        assert_eq!(
            decide(&sampler, None, &api),
            SamplingDecision::RecordAndSample
        );
    }

    #[test]
    fn exclusion_keeps_parent_trace_state() {
        let state = TraceState::from_key_value([("rbx", "1")]).unwrap();
        let parent = Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_bytes([1; 16]),
            SpanId::from_bytes([2; 8]),
            TraceFlags::SAMPLED,
            true,
            state.clone(),
        ));
        let sampler = RbxSampler::default().with_exclusion(|_| true);

        let result = sampler.should_sample(
            Some(&parent),
            TraceId::from_bytes([1; 16]),
            "span",
            &SpanKind::Internal,
            &[],
            &[],
        );
        assert_eq!(result.decision, SamplingDecision::Drop);
        assert_eq!(result.trace_state, state);
    }

    #[test]
    fn default_sampler_has_no_exclusion() {
        assert!(!RbxSampler::default().has_exclusion());
    }
}
