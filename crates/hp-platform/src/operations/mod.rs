//! Operations Module
//!
//! Use cases following the Command pattern. Each use case validates its
//! command, builds a unit of work and saves it through the interceptor so
//! every raised event reaches its handlers.
//!
//! # Example
//!
//! ```ignore
//! let command = CreateProjectCommand {
//!     name: "Shop".to_string(),
//!     repository: "acme/shop".to_string(),
//!     location: None,
//!     tier: None,
//!     services: vec![],
//! };
//!
//! let provisioned = create_project.execute(command, &ctx).await?;
//! println!("Created {} on {:?}", provisioned.project.id, provisioned.project.server_id);
//! ```

mod deployment;
mod project;

pub use deployment::{
    CancelDeploymentCommand, CancelDeploymentUseCase, DeployProjectCommand, DeployProjectUseCase,
    DeploymentQueries, DeploymentTicket,
};
pub use project::{
    CreateProjectCommand, CreateProjectUseCase, ProvisionedProject, ReportServicesCommand,
    ReportServicesUseCase,
};

use hp_events::CancelSignal;

use crate::domain::{new_id, Project};
use crate::error::{PlatformError, Result};

/// Who is executing a use case, and how to stop it
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub correlation_id: String,
    pub principal_id: String,
    pub cancel: CancelSignal,
}

impl ExecutionContext {
    pub fn create(principal_id: impl Into<String>) -> Self {
        let execution_id = new_id();
        Self {
            correlation_id: execution_id.clone(),
            execution_id,
            principal_id: principal_id.into(),
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }
}

pub(crate) fn ensure_owner(project: &Project, ctx: &ExecutionContext) -> Result<()> {
    if project.owner_id != ctx.principal_id {
        return Err(PlatformError::forbidden(format!(
            "project {} is not owned by {}",
            project.id, ctx.principal_id
        )));
    }
    Ok(())
}
