//! Transform: one script run inside the working store

use async_trait::async_trait;

use crate::adapter::{Adapters, Destination};
use crate::ast::TransformDef;
use crate::error::OperationError;

use super::{Operation, OperationKind};

/// Idempotent script that drops and recreates its own output
#[derive(Debug, Clone)]
pub struct Transformer {
    name: String,
    script: String,
    inputs: Vec<String>,
    output: String,
}

impl Transformer {
    pub fn new(
        name: impl Into<String>,
        script: impl Into<String>,
        inputs: Vec<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            inputs,
            output: output.into(),
        }
    }

    pub fn from_def(def: &TransformDef) -> Self {
        Self::new(
            def.name.clone(),
            def.script.clone(),
            def.inputs.clone(),
            def.output.clone(),
        )
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub async fn transform(&self, destination: &dyn Destination) -> Result<(), OperationError> {
        destination
            .exec(&self.script)
            .await
            .map_err(|cause| OperationError::Transform {
                operation: self.name.clone(),
                cause,
            })
    }
}

#[async_trait]
impl Operation for Transformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Transform
    }

    async fn run(&self, adapters: &Adapters) -> Result<(), OperationError> {
        self.transform(adapters.destination.as_ref()).await
    }
}
