use async_graphql::{
    Context, EmptySubscription, Enum, ErrorExtensions, Json, Object, Schema, SimpleObject,
};

use crate::domain::types::{OperationKind, OperationState};
use crate::domain::update_manager::{UpdateError, UpdateManager};

pub type RolloutSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
pub enum Operation {
    OsUpdate,
    RuntimeUpgrade,
}

impl From<Operation> for OperationKind {
    fn from(op: Operation) -> Self {
        match op {
            Operation::OsUpdate => OperationKind::OsUpdate,
            Operation::RuntimeUpgrade => OperationKind::RuntimeUpgrade,
        }
    }
}

#[derive(SimpleObject)]
pub struct StartResult {
    pub operation: String,
    pub node_order: Vec<String>,
}

fn gql_error(e: UpdateError) -> async_graphql::Error {
    let code = match e {
        UpdateError::AlreadyInProgress | UpdateError::ResetWhileRunning => "CONFLICT",
        UpdateError::MissingTargetVersion | UpdateError::InvalidTargetVersion(_) => "BAD_REQUEST",
        UpdateError::Inventory(_) | UpdateError::Check(_) => "INTERNAL",
    };
    async_graphql::Error::new(e.to_string()).extend_with(|_, ext| ext.set("code", code))
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Full orchestrator state snapshot.
    async fn status(&self, ctx: &Context<'_>) -> async_graphql::Result<Json<OperationState>> {
        let updates = ctx.data::<UpdateManager>()?;
        Ok(Json(updates.status().await))
    }

    /// Order `operation` would process the current nodes in. Read-only.
    async fn node_order(
        &self,
        ctx: &Context<'_>,
        operation: Operation,
    ) -> async_graphql::Result<Vec<String>> {
        let updates = ctx.data::<UpdateManager>()?;
        updates.plan(operation.into()).await.map_err(gql_error)
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn check(&self, ctx: &Context<'_>) -> async_graphql::Result<Json<OperationState>> {
        let updates = ctx.data::<UpdateManager>()?;
        updates.check().await.map(Json).map_err(gql_error)
    }

    async fn start_os_update(&self, ctx: &Context<'_>) -> async_graphql::Result<StartResult> {
        let updates = ctx.data::<UpdateManager>()?;
        let started = updates
            .start(OperationKind::OsUpdate, None)
            .await
            .map_err(gql_error)?;
        Ok(StartResult {
            operation: started.operation.to_string(),
            node_order: started.node_order,
        })
    }

    async fn start_runtime_upgrade(
        &self,
        ctx: &Context<'_>,
        version: String,
    ) -> async_graphql::Result<StartResult> {
        let updates = ctx.data::<UpdateManager>()?;
        let started = updates
            .start(OperationKind::RuntimeUpgrade, Some(version))
            .await
            .map_err(gql_error)?;
        Ok(StartResult {
            operation: started.operation.to_string(),
            node_order: started.node_order,
        })
    }

    async fn reset(&self, ctx: &Context<'_>) -> async_graphql::Result<bool> {
        let updates = ctx.data::<UpdateManager>()?;
        updates.reset().await.map_err(gql_error)?;
        Ok(true)
    }
}

pub fn build_schema(updates: UpdateManager) -> RolloutSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(updates)
        .finish()
}
