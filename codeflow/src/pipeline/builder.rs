//! Copy-on-extend pipeline builders.
//!
//! Every extension returns a new handle over a copy of the previous state,
//! so a partial pipeline can serve as the common head of several pipelines.

use std::sync::Arc;

use crate::archive::ModuleRole;
use crate::errors::AssemblyError;
use crate::introspect::ClosureCapsule;

use super::{CodeModuleFactory, PipelineState, Stage, Step};

/// Entry point for assembling pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    factory: Arc<CodeModuleFactory>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new(Arc::new(CodeModuleFactory::default()))
    }
}

impl PipelineBuilder {
    /// Creates a builder whose closure-backed steps are built by `factory`.
    #[must_use]
    pub const fn new(factory: Arc<CodeModuleFactory>) -> Self {
        Self { factory }
    }

    /// The code module factory.
    #[must_use]
    pub fn factory(&self) -> &Arc<CodeModuleFactory> {
        &self.factory
    }

    /// Starts a pipeline from a named source.
    #[must_use]
    pub fn source(&self, stage: Stage) -> PartialPipeline {
        self.start(stage.into())
    }

    /// Starts a pipeline from a closure-backed source. The source is step 0.
    #[must_use]
    pub fn source_code(&self, capsule: &ClosureCapsule) -> PartialPipeline {
        let module = self.factory.build(capsule, 0, ModuleRole::Source);
        self.start(module.into())
    }

    fn start(&self, source: Step) -> PartialPipeline {
        let mut state = PipelineState::new();
        state.set_source(source);
        PartialPipeline {
            state,
            factory: Arc::clone(&self.factory),
        }
    }
}

/// A pipeline with a source and zero or more processors.
#[derive(Debug, Clone)]
pub struct PartialPipeline {
    state: PipelineState,
    factory: Arc<CodeModuleFactory>,
}

impl PartialPipeline {
    /// Appends a named processor.
    #[must_use]
    pub fn process(&self, stage: Stage) -> Self {
        self.extend(stage.into())
    }

    /// Appends a closure-backed processor.
    #[must_use]
    pub fn process_code(&self, capsule: &ClosureCapsule) -> Self {
        let module = self
            .factory
            .build(capsule, self.state.step_count(), ModuleRole::Processor);
        self.extend(module.into())
    }

    /// Appends a processor over the whole message stream.
    #[must_use]
    pub fn process_stream(&self, bytes: impl Into<Arc<[u8]>>, declaring_symbol: impl Into<String>) -> Self {
        self.process_code(&ClosureCapsule::stream_processor(bytes, declaring_symbol))
    }

    /// Attaches a named sink.
    #[must_use]
    pub fn sink(&self, stage: Stage) -> DeployablePipeline {
        self.finish(stage.into())
    }

    /// Attaches a closure-backed sink.
    #[must_use]
    pub fn sink_code(&self, capsule: &ClosureCapsule) -> DeployablePipeline {
        let module = self.factory.build(capsule, self.state.step_count(), ModuleRole::Sink);
        self.finish(module.into())
    }

    /// The accumulated state.
    #[must_use]
    pub const fn state(&self) -> &PipelineState {
        &self.state
    }

    fn extend(&self, step: Step) -> Self {
        let mut state = self.state.clone();
        state.push_processor(step);
        state.advance();
        Self {
            state,
            factory: Arc::clone(&self.factory),
        }
    }

    fn finish(&self, step: Step) -> DeployablePipeline {
        let mut state = self.state.clone();
        state.set_sink(step);
        DeployablePipeline { state }
    }
}

/// A complete pipeline, ready to deploy.
#[derive(Debug, Clone)]
pub struct DeployablePipeline {
    state: PipelineState,
}

impl DeployablePipeline {
    /// The accumulated state.
    #[must_use]
    pub const fn state(&self) -> &PipelineState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut PipelineState {
        &mut self.state
    }

    /// Whether any step is closure-backed.
    #[must_use]
    pub const fn uses_code_modules(&self) -> bool {
        self.state.uses_code_modules()
    }

    /// Renders the pipeline definition.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Unbound`] if closure-backed steps have not
    /// been bound to a pipeline name yet.
    pub fn definition(&self) -> Result<String, AssemblyError> {
        self.state.definition()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_named_pipeline() {
        let pipeline = PipelineBuilder::default()
            .source(Stage::time())
            .process(Stage::custom("uppercase-processor"))
            .sink(Stage::log());
        assert_eq!(pipeline.definition().unwrap(), "time | uppercase-processor | log");
        assert!(!pipeline.uses_code_modules());
        assert!(pipeline.state().is_deployable());
    }

    #[test]
    fn test_extension_does_not_mutate_head() {
        let head = PipelineBuilder::default().source(Stage::time());
        let one = head.process(Stage::transform("a"));
        let two = head.process(Stage::transform("b"));

        assert!(head.state().processors().is_empty());
        assert_eq!(head.state().step_count(), 1);
        assert_eq!(one.state().step_count(), 2);
        assert_eq!(one.sink(Stage::log()).definition().unwrap(), "time | transform --expression=a | log");
        assert_eq!(two.sink(Stage::log()).definition().unwrap(), "time | transform --expression=b | log");
    }

    #[test]
    fn test_step_ids_follow_step_count() {
        let builder = PipelineBuilder::default();
        let capsule = ClosureCapsule::function(vec![0], "com.acme.App");
        let mut pipeline = builder
            .source_code(&ClosureCapsule::supplier(vec![0], "com.acme.App"))
            .process(Stage::transform("payload"))
            .process_code(&capsule)
            .sink_code(&capsule);

        let ids: Vec<usize> = pipeline.state().code_modules().map(|m| m.id()).collect();
        assert_eq!(ids, vec![0, 2, 3]);

        pipeline.state_mut().bind_code_modules("demo").unwrap();
        assert_eq!(
            pipeline.definition().unwrap(),
            "demo-code-0 | transform --expression=payload | demo-code-2 | demo-code-3"
        );
    }

    #[test]
    fn test_stream_processor_step() {
        let pipeline = PipelineBuilder::default()
            .source(Stage::time())
            .process_stream(vec![1], "com.acme.Rx")
            .sink(Stage::log());
        let module = pipeline.state().code_modules().next().unwrap();
        assert_eq!(module.kind(), crate::pipeline::CodeKind::StreamProcessor);
        assert_eq!(module.role(), ModuleRole::Processor);
    }
}
