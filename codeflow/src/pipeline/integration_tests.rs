//! End-to-end assembly and deployment against the in-memory control plane.

#[cfg(test)]
mod tests {
    use crate::archive::{
        list_entries, read_entry, ArchiveCustomizer, ModuleRole, TemplateCatalog, TemplateSource,
    };
    use crate::classfile::{ClassFile, TypeDescriptor};
    use crate::errors::{DeployError, PackagingError, RemoteError};
    use crate::introspect::ClosureCapsule;
    use crate::pipeline::{CodeKind, CodeModuleFactory, Deployer, PipelineBuilder, Stage};
    use crate::remote::DeploymentClient;
    use crate::resources::{SymbolPath, SymbolRoot};
    use crate::testing::fixtures::{
        calling_class, placeholder_class, serialized_lambda, TemplateBuilder, DEFAULT_SLOT,
    };
    use crate::testing::{ControlPlaneCall, InMemoryControlPlane, ManualClock};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn symbol_path() -> SymbolPath {
        SymbolPath::new().with_root(SymbolRoot::memory([
            (
                "com.acme.App",
                calling_class("com/acme/App", &[("com/acme/Helper", "twice", "(I)I")]),
            ),
            ("com.acme.Helper", placeholder_class("com/acme/Helper", "java/lang/Object")),
        ]))
    }

    fn factory() -> Arc<CodeModuleFactory> {
        let catalog = TemplateCatalog::new().with_template(
            CodeKind::Function,
            ModuleRole::Processor,
            TemplateSource::Bytes(Arc::from(TemplateBuilder::lambda_processor().build())),
        );
        Arc::new(
            CodeModuleFactory::new(ArchiveCustomizer::new(catalog), symbol_path()).without_support_symbols(),
        )
    }

    fn deployer(plane: &Arc<InMemoryControlPlane>) -> Deployer {
        let client = DeploymentClient::new(plane.clone()).with_clock(Arc::new(ManualClock::new()));
        Deployer::new(client, factory())
    }

    fn integer() -> TypeDescriptor {
        TypeDescriptor::object("java.lang.Integer").unwrap()
    }

    #[tokio::test]
    async fn test_named_pipeline_creates_definition_only() {
        let plane = Arc::new(InMemoryControlPlane::new());
        let deployer = deployer(&plane);
        let mut pipeline = PipelineBuilder::new(factory())
            .source(Stage::time())
            .process(Stage::custom("uppercase-processor"))
            .sink(Stage::log());

        let deployed = deployer.deploy(&mut pipeline, "demo", true).await.unwrap();

        assert_eq!(deployed.definition(), "time | uppercase-processor | log");
        let calls = plane.calls();
        assert!(calls.contains(&ControlPlaneCall::CreatePipeline {
            name: "demo".to_string(),
            definition: "time | uppercase-processor | log".to_string(),
            deploy: true,
        }));
        assert!(!calls
            .iter()
            .any(|c| matches!(c, ControlPlaneCall::UploadModule { .. })));
        assert!(plane.uploads().is_empty());
        assert!(deployed.report().modules.is_empty());
        assert!(deployed.is_deployed().await.unwrap());
    }

    #[tokio::test]
    async fn test_function_processor_publishes_one_typed_module() {
        let plane = Arc::new(InMemoryControlPlane::new());
        let deployer = deployer(&plane);
        let capsule = ClosureCapsule::function(
            serialized_lambda(&["(Ljava/lang/Integer;)Ljava/lang/Integer;"]),
            "com.acme.App",
        );
        let mut pipeline = PipelineBuilder::new(factory())
            .source(Stage::time())
            .process_code(&capsule)
            .sink(Stage::log());

        let deployed = deployer.deploy(&mut pipeline, "demo", false).await.unwrap();

        let uploads = plane.uploads();
        assert_eq!(uploads.len(), 1);
        let upload = &uploads[0];
        assert_eq!(upload.name, "demo-code-1");
        assert_eq!(upload.role, ModuleRole::Processor);
        assert_eq!(deployed.report().modules[0].kind, CodeKind::Function);
        assert_eq!(deployed.definition(), "time | demo-code-1 | log");

        let glue = ClassFile::parse(&read_entry(&upload.archive, DEFAULT_SLOT).unwrap().unwrap()).unwrap();
        let transform = glue
            .method("transform", "(Ljava/lang/Integer;)Ljava/lang/Integer;")
            .unwrap();
        assert!(transform.code.is_some());

        let entries = list_entries(&upload.archive).unwrap();
        for expected in ["lambda.ser", "com/acme/App.class", "com/acme/Helper.class"] {
            assert!(entries.iter().any(|e| e == expected), "missing {expected}");
        }

        // publication precedes creation
        let calls = plane.calls();
        let upload_at = calls
            .iter()
            .position(|c| matches!(c, ControlPlaneCall::UploadModule { .. }))
            .unwrap();
        let create_at = calls
            .iter()
            .position(|c| matches!(c, ControlPlaneCall::CreatePipeline { .. }))
            .unwrap();
        assert!(upload_at < create_at);
    }

    #[tokio::test]
    async fn test_shared_head_deploys_independently() {
        let plane = Arc::new(InMemoryControlPlane::new());
        let deployer = deployer(&plane);
        let capsule = ClosureCapsule::function(vec![1], "com.acme.App").with_types(integer(), integer());
        let head = PipelineBuilder::new(factory())
            .source(Stage::time())
            .process_code(&capsule);

        let mut to_log = head.sink(Stage::log());
        let mut to_file = head.sink(Stage::file());
        assert_eq!(
            to_log.state().processors().len(),
            to_file.state().processors().len()
        );

        deployer.deploy(&mut to_log, "first", false).await.unwrap();
        deployer.deploy(&mut to_file, "second", false).await.unwrap();

        let names: Vec<String> = plane.uploads().into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["first-code-1".to_string(), "second-code-1".to_string()]);
        assert_eq!(to_file.definition().unwrap(), "time | second-code-1 | file");
        assert!(head.state().code_modules().all(|m| m.pipeline_name().is_none()));
    }

    #[tokio::test]
    async fn test_redeploy_under_other_name_is_rejected() {
        let plane = Arc::new(InMemoryControlPlane::new());
        let deployer = deployer(&plane);
        let capsule = ClosureCapsule::function(vec![1], "com.acme.App");
        let mut pipeline = PipelineBuilder::new(factory())
            .source(Stage::time())
            .process_code(&capsule)
            .sink(Stage::log());

        deployer.deploy(&mut pipeline, "demo", false).await.unwrap();
        let err = deployer.deploy(&mut pipeline, "other", false).await.unwrap_err();
        assert!(matches!(err, DeployError::Assembly(_)));
    }

    #[tokio::test]
    async fn test_replace_existing_removes_old_modules() {
        let plane = Arc::new(
            InMemoryControlPlane::new()
                .with_pipeline("demo", "time | demo-code-1 | log", true)
                .with_module(ModuleRole::Processor, "demo-code-1")
                .with_module(ModuleRole::Sink, "keep"),
        );
        let deployer = deployer(&plane);
        let capsule = ClosureCapsule::function(vec![1], "com.acme.App");
        let mut pipeline = PipelineBuilder::new(factory())
            .source(Stage::time())
            .process_code(&capsule)
            .sink(Stage::log());

        deployer.deploy(&mut pipeline, "demo", true).await.unwrap();

        assert_eq!(plane.uploads().len(), 1);
        let modules: Vec<String> = plane.modules().into_iter().map(|m| m.name).collect();
        assert_eq!(modules, vec!["keep".to_string(), "demo-code-1".to_string()]);
        assert_eq!(plane.pipelines().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_fails_when_old_pipeline_survives() {
        let plane = Arc::new(InMemoryControlPlane::new().with_pipeline("demo", "time | old | log", true));
        plane.fail_next(RemoteError::Transport("destroy timed out".into()));
        let deployer = deployer(&plane);
        let mut pipeline = PipelineBuilder::new(factory())
            .source(Stage::time())
            .process(Stage::custom("uppercase-processor"))
            .sink(Stage::log());

        let err = deployer.deploy(&mut pipeline, "demo", true).await.unwrap_err();

        assert!(matches!(err, DeployError::CreationUnconfirmed(ref name) if name == "demo"));
        let pipelines = plane.pipelines();
        assert_eq!(pipelines.len(), 1);
        assert_eq!(pipelines[0].definition, "time | old | log");
    }

    #[tokio::test]
    async fn test_packaging_failure_aborts_before_creation() {
        let plane = Arc::new(InMemoryControlPlane::new());
        let deployer = deployer(&plane);
        let supplier = ClosureCapsule::supplier(vec![1], "com.acme.App");
        let mut pipeline = PipelineBuilder::new(factory())
            .source_code(&supplier)
            .sink(Stage::log());

        let err = deployer.deploy(&mut pipeline, "demo", false).await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::Packaging {
                ref module,
                source: PackagingError::TemplateNotRegistered { .. }
            } if module == "demo-code-0"
        ));
        assert!(plane.pipelines().is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_earlier_modules() {
        let plane = Arc::new(InMemoryControlPlane::new());
        let deployer = deployer(&plane);
        let capsule = ClosureCapsule::function(vec![1], "com.acme.App");
        let mut pipeline = PipelineBuilder::new(factory())
            .source(Stage::time())
            .process_code(&capsule)
            .process_code(&capsule)
            .sink(Stage::log());

        plane.reject_upload("demo-code-2");
        let err = deployer.deploy(&mut pipeline, "demo", false).await.unwrap_err();
        assert!(matches!(err, DeployError::Remote(RemoteError::Status { status: 500, .. })));
        let modules: Vec<String> = plane.modules().into_iter().map(|m| m.name).collect();
        assert_eq!(modules, vec!["demo-code-1".to_string()]);
        assert!(plane.pipelines().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_nonexistent_pipeline() {
        let plane = Arc::new(InMemoryControlPlane::new());
        let deployer = deployer(&plane);
        assert!(!deployer.client().destroy_pipeline("nonexistent").await.unwrap());
    }

    #[tokio::test]
    async fn test_deployed_pipeline_destroy_and_cleanup() {
        let plane = Arc::new(InMemoryControlPlane::new().with_pipeline("code-old", "time | log", true));
        let deployer = deployer(&plane);
        let capsule = ClosureCapsule::function(vec![1], "com.acme.App");
        let mut pipeline = PipelineBuilder::new(factory())
            .source(Stage::time())
            .process_code(&capsule)
            .sink(Stage::log());

        let deployed = deployer.deploy(&mut pipeline, "demo", false).await.unwrap();
        assert!(deployed.destroy().await.unwrap());
        assert!(plane.modules().is_empty());
        assert_eq!(plane.pipelines().len(), 1);

        assert_eq!(deployer.cleanup().await.unwrap(), 1);
        assert!(plane.pipelines().is_empty());
    }
}
