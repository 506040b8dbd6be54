use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::sanitizer::validate_table_name;
use crate::db::schema_manager::SchemaManager;
use crate::error::GatewayError;
use crate::llm::LlmManager;
use crate::llm::models::Task;

#[derive(Debug, Serialize)]
pub struct ScaffoldFiles {
    pub model: String,
    pub handlers: String,
}

/// Generates a model module and a handler module for an existing table and
/// writes them under the scaffold directory.
pub struct ScaffoldService<'a> {
    llm: &'a LlmManager,
    schema: &'a SchemaManager,
    output_dir: &'a Path,
}

impl<'a> ScaffoldService<'a> {
    pub fn new(llm: &'a LlmManager, schema: &'a SchemaManager, output_dir: &'a Path) -> Self {
        Self {
            llm,
            schema,
            output_dir,
        }
    }

    pub async fn generate(&self, table: &str) -> Result<ScaffoldFiles, GatewayError> {
        let table = validate_table_name(table)?;
        let table_schema = self.schema.table_schema(table).await?;
        let prompts = self.llm.prompts();

        let model_prompt = prompts.scaffold_model(table, &table_schema)?;
        let model_code = self.llm.generate(Task::Code { prompt: &model_prompt }).await?;
        let model_path = self.write("models", table, &model_code).await?;

        let handlers_prompt = prompts.scaffold_handlers(table, &table_schema)?;
        let handlers_code = self
            .llm
            .generate(Task::Code {
                prompt: &handlers_prompt,
            })
            .await?;
        let handlers_path = self.write("handlers", table, &handlers_code).await?;

        info!("Scaffold for {} written to {}", table, self.output_dir.display());
        Ok(ScaffoldFiles {
            model: model_path.display().to_string(),
            handlers: handlers_path.display().to_string(),
        })
    }

    async fn write(&self, kind: &str, table: &str, code: &str) -> Result<PathBuf, GatewayError> {
        let dir = self.output_dir.join(kind);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}.rs", table));
        let mut contents = code.to_string();
        if !contents.ends_with('\n') {
            contents.push('\n');
        }
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }
}
