//! Accumulated pipeline state.

use crate::errors::AssemblyError;

use super::{CodeModule, Stage};

/// One pipeline step.
#[derive(Debug, Clone)]
pub enum Step {
    /// A platform-provided stage.
    Named(Stage),
    /// A closure-backed module.
    Code(CodeModule),
}

impl Step {
    /// Whether the step is closure-backed.
    #[must_use]
    pub const fn is_code(&self) -> bool {
        matches!(self, Self::Code(_))
    }

    /// The code module, if closure-backed.
    #[must_use]
    pub const fn as_code(&self) -> Option<&CodeModule> {
        match self {
            Self::Code(module) => Some(module),
            Self::Named(_) => None,
        }
    }

    fn as_code_mut(&mut self) -> Option<&mut CodeModule> {
        match self {
            Self::Code(module) => Some(module),
            Self::Named(_) => None,
        }
    }

    /// The step's segment of the pipeline definition.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Unbound`] for a code module not yet bound.
    pub fn definition(&self) -> Result<String, AssemblyError> {
        match self {
            Self::Named(stage) => Ok(stage.to_string()),
            Self::Code(module) => module.remote_name(),
        }
    }
}

impl From<Stage> for Step {
    fn from(stage: Stage) -> Self {
        Self::Named(stage)
    }
}

impl From<CodeModule> for Step {
    fn from(module: CodeModule) -> Self {
        Self::Code(module)
    }
}

/// Source, processors and sink of a pipeline under construction.
///
/// Cloning produces an independent copy; builders clone on every extension
/// so a shared prefix is never mutated through one of its extensions.
#[derive(Debug, Clone)]
pub struct PipelineState {
    source: Option<Step>,
    processors: Vec<Step>,
    sink: Option<Step>,
    step_count: usize,
    uses_code_modules: bool,
    is_created: bool,
    is_deployable: bool,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            source: None,
            processors: Vec::new(),
            sink: None,
            step_count: 1,
            uses_code_modules: false,
            is_created: false,
            is_deployable: false,
        }
    }
}

impl PipelineState {
    /// Creates an empty state. Step ids after the source start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The source step.
    #[must_use]
    pub const fn source(&self) -> Option<&Step> {
        self.source.as_ref()
    }

    /// Processor steps in attachment order.
    #[must_use]
    pub fn processors(&self) -> &[Step] {
        &self.processors
    }

    /// The sink step.
    #[must_use]
    pub const fn sink(&self) -> Option<&Step> {
        self.sink.as_ref()
    }

    /// Id the next attached step receives.
    #[must_use]
    pub const fn step_count(&self) -> usize {
        self.step_count
    }

    /// Whether any step is closure-backed.
    #[must_use]
    pub const fn uses_code_modules(&self) -> bool {
        self.uses_code_modules
    }

    /// Whether the pipeline definition was confirmed created remotely.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.is_created
    }

    /// Whether a sink is attached.
    #[must_use]
    pub const fn is_deployable(&self) -> bool {
        self.is_deployable
    }

    /// Every step, source first and sink last.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.source
            .iter()
            .chain(self.processors.iter())
            .chain(self.sink.iter())
    }

    /// Every code module, in step order.
    pub fn code_modules(&self) -> impl Iterator<Item = &CodeModule> {
        self.steps().filter_map(Step::as_code)
    }

    /// Renders `source | processor ... | sink`.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::MissingSource`] without a source,
    /// [`AssemblyError::NotDeployable`] without a sink, or
    /// [`AssemblyError::Unbound`] if a code module has no pipeline name yet.
    pub fn definition(&self) -> Result<String, AssemblyError> {
        if self.source.is_none() {
            return Err(AssemblyError::MissingSource);
        }
        if self.sink.is_none() {
            return Err(AssemblyError::NotDeployable);
        }
        let segments = self.steps().map(Step::definition).collect::<Result<Vec<_>, _>>()?;
        Ok(segments.join(" | "))
    }

    /// Binds every code module to `pipeline`.
    ///
    /// # Errors
    ///
    /// Returns the first binding conflict.
    pub fn bind_code_modules(&mut self, pipeline: &str) -> Result<(), AssemblyError> {
        let steps = self
            .source
            .iter_mut()
            .chain(self.processors.iter_mut())
            .chain(self.sink.iter_mut());
        for module in steps.filter_map(Step::as_code_mut) {
            module.bind(pipeline)?;
        }
        Ok(())
    }

    pub(crate) fn set_source(&mut self, step: Step) {
        self.uses_code_modules |= step.is_code();
        self.source = Some(step);
    }

    pub(crate) fn push_processor(&mut self, step: Step) {
        self.uses_code_modules |= step.is_code();
        self.processors.push(step);
    }

    pub(crate) fn set_sink(&mut self, step: Step) {
        self.uses_code_modules |= step.is_code();
        self.sink = Some(step);
        self.is_deployable = true;
    }

    pub(crate) fn advance(&mut self) {
        self.step_count += 1;
    }

    pub(crate) fn mark_created(&mut self) {
        self.is_created = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ModuleRole;
    use crate::pipeline::CodeKind;

    #[test]
    fn test_definition_grammar() {
        let mut state = PipelineState::new();
        state.set_source(Stage::time().into());
        state.push_processor(Stage::transform("payload").into());
        state.push_processor(Stage::custom("uppercase-processor").into());
        state.set_sink(Stage::log().into());
        assert_eq!(
            state.definition().unwrap(),
            "time | transform --expression=payload | uppercase-processor | log"
        );
    }

    #[test]
    fn test_source_and_sink_only() {
        let mut state = PipelineState::new();
        state.set_source(Stage::time().into());
        assert_eq!(state.definition().unwrap_err(), AssemblyError::NotDeployable);
        assert!(!state.is_deployable());
        state.set_sink(Stage::log().into());
        assert_eq!(state.definition().unwrap(), "time | log");
        assert!(state.is_deployable());
    }

    #[test]
    fn test_code_modules_render_bound_names() {
        let mut state = PipelineState::new();
        state.set_source(CodeModule::new(0, CodeKind::Supplier, ModuleRole::Source).into());
        state.set_sink(Stage::log().into());
        assert!(state.uses_code_modules());
        assert_eq!(state.definition().unwrap_err(), AssemblyError::Unbound(0));

        state.bind_code_modules("demo").unwrap();
        assert_eq!(state.definition().unwrap(), "demo-code-0 | log");
        assert_eq!(state.code_modules().count(), 1);
    }

    #[test]
    fn test_missing_source() {
        let state = PipelineState::new();
        assert_eq!(state.definition().unwrap_err(), AssemblyError::MissingSource);
        assert_eq!(state.step_count(), 1);
    }
}
