use crate::bindings::{BindingGraph, GraphError};
use crate::deployments::{Dashboard, Deployment};
use crate::figures::Plotter;
use crate::layout::{Layout, LayoutError};
use crate::queries::QueryCatalog;
use crate::reference::{BootstrapError, ReferenceData};
use crate::source::Sources;
use crate::status::StatusSpec;
use chrono::NaiveDate;
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::info;

/// Anything that stops the process from serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error("invalid bindings: {0}")]
    Graph(#[from] GraphError),
    #[error("layout does not match bindings: {0}")]
    Layout(#[from] LayoutError),
}

#[derive(Clone)]
pub struct AppState {
    pub base_path: Arc<str>,
    pub layout: Arc<Layout>,
    pub graph: Arc<BindingGraph<Dashboard>>,
    pub dashboard: Arc<Dashboard>,
    pub status: Arc<[StatusSpec]>,
}

impl AppState {
    /// Loads reference data, builds the page and checks it against the
    /// deployment's bindings.
    pub async fn assemble(
        deployment: &Deployment,
        query_dir: impl Into<PathBuf>,
        sources: Sources,
        today: NaiveDate,
    ) -> Result<Self, StartupError> {
        let queries = QueryCatalog::new(query_dir, deployment.queries);
        let plotter = Plotter::new(queries, sources, deployment.series, deployment.profiles);

        let reference = ReferenceData::load(&plotter, deployment.reference).await?;
        let graph = (deployment.bindings)()?;
        let layout = (deployment.layout)(&reference, today);
        layout.check(graph.inputs(), graph.outputs())?;
        info!(
            deployment = deployment.kind.name(),
            bindings = graph.bindings().len(),
            "dashboard assembled"
        );

        Ok(Self {
            base_path: Arc::from(deployment.base_path),
            layout: Arc::new(layout),
            graph: Arc::new(graph),
            dashboard: Arc::new(Dashboard { plotter, reference }),
            status: deployment.status.clone().into(),
        })
    }
}
