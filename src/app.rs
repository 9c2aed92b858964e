//! Component assembly.
//!
//! Wires the coordinate space, persona engine, compliance verifier and
//! workflow machine together from one [`RegnavConfig`].

use std::sync::Arc;

use tracing::info;

use crate::analysis::{create_backend, AnalysisBackend, BackendKind};
use crate::compliance::ComplianceVerifier;
use crate::config::RegnavConfig;
use crate::error::Result;
use crate::persona::{PersonaConsensusEngine, PersonaRegistry};
use crate::space::{CoordinateMapper, CoordinateSpace, InMemoryStore, RegulatoryStore};
use crate::workflow::{QueryRequest, QueryResponse, RegulatoryStages, RegulatoryWorkflow};

/// The mapped corpus: enough for lookups that never consult a persona.
pub struct Corpus {
    pub mapper: Arc<CoordinateMapper>,
    pub store: Arc<dyn RegulatoryStore>,
    pub space: Arc<CoordinateSpace>,
}

impl Corpus {
    /// Load `[storage] corpus_path`, or the bundled sample corpus.
    pub fn load(config: &RegnavConfig) -> Result<Self> {
        let mapper = Arc::new(CoordinateMapper::new(config.coordinates.clone())?);
        let store: Arc<dyn RegulatoryStore> = match config.corpus_path() {
            Some(path) => Arc::new(InMemoryStore::from_json_file(&path, &mapper)?),
            None => Arc::new(InMemoryStore::bundled(&mapper)?),
        };
        let space = Arc::new(CoordinateSpace::from_store(store.as_ref()));
        Ok(Self { mapper, store, space })
    }
}

/// A fully wired engine instance.
pub struct Regnav {
    config: RegnavConfig,
    corpus: Corpus,
    registry: Arc<PersonaRegistry>,
    verifier: Arc<ComplianceVerifier>,
    workflow: RegulatoryWorkflow,
}

impl Regnav {
    /// Build from configuration with the configured backend and corpus.
    pub fn from_config(config: RegnavConfig) -> Result<Self> {
        let backend = create_backend(config.backend.kind, &config.openai)?;
        Self::with_backend(config, backend)
    }

    /// Build with an explicit backend kind, e.g. from a CLI override.
    pub fn with_backend_kind(config: RegnavConfig, kind: BackendKind) -> Result<Self> {
        let backend = create_backend(kind, &config.openai)?;
        Self::with_backend(config, backend)
    }

    /// Build around an already constructed backend.
    pub fn with_backend(config: RegnavConfig, backend: Arc<dyn AnalysisBackend>) -> Result<Self> {
        config.validate()?;

        let corpus = Corpus::load(&config)?;
        let Corpus { mapper, store, space } = &corpus;

        let registry = Arc::new(PersonaRegistry::new(config.personas.clone())?);
        let engine = Arc::new(PersonaConsensusEngine::new(
            registry.clone(),
            backend.clone(),
            config.consensus_settings(),
        ));
        let verifier = Arc::new(ComplianceVerifier::new(
            space.clone(),
            store.clone(),
            config.compliance_settings(),
        ));

        let stages = RegulatoryStages::new(
            space.clone(),
            store.clone(),
            mapper.clone(),
            engine,
            verifier.clone(),
            config.stage_settings(),
        );
        let workflow = RegulatoryWorkflow::new(stages, config.transition_table()?, config.machine_settings());

        info!(
            items = store.len(),
            personas = registry.len(),
            backend = backend.name(),
            "Engine assembled"
        );

        Ok(Self {
            config,
            corpus,
            registry,
            verifier,
            workflow,
        })
    }

    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        self.workflow.process_query(request).await
    }

    pub fn config(&self) -> &RegnavConfig {
        &self.config
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.corpus.mapper
    }

    pub fn store(&self) -> &dyn RegulatoryStore {
        self.corpus.store.as_ref()
    }

    pub fn space(&self) -> &CoordinateSpace {
        &self.corpus.space
    }

    pub fn registry(&self) -> &PersonaRegistry {
        &self.registry
    }

    pub fn verifier(&self) -> &ComplianceVerifier {
        &self.verifier
    }

    pub fn workflow(&self) -> &RegulatoryWorkflow {
        &self.workflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::MockBackend;

    fn engine() -> Regnav {
        Regnav::with_backend(RegnavConfig::default(), Arc::new(MockBackend::new())).unwrap()
    }

    #[test]
    fn test_assembles_bundled_corpus() {
        let app = engine();
        assert_eq!(app.store().len(), app.space().len());
        assert!(app.space().contains("reg-cyber-001"));
        assert_eq!(app.registry().len(), 3);
    }

    #[test]
    fn test_missing_corpus_file_fails() {
        let mut config = RegnavConfig::default();
        config.storage.corpus_path = Some("/nonexistent/corpus.json".to_string());
        assert!(Regnav::with_backend(config, Arc::new(MockBackend::new())).is_err());
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let app = engine();
        let response = app
            .query(QueryRequest::new("What are the cybersecurity program requirements?"))
            .await
            .unwrap();
        assert!(!response.response_text.is_empty());
        assert!(response.confidence_score >= 0.0 && response.confidence_score <= 1.0);
    }
}
