//! Schema command - define and evolve content schemas

use crate::cli::output::{format_millis, print_json, print_table};
use crate::cli::{find_schema, read_json, CliContext};
use anyhow::Result;
use clap::Subcommand;
use contentive::{SchemaInput, SchemaPatch};
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum SchemaAction {
    /// Create a schema from a JSON file ({name, slug, kind, fields})
    Create { file: PathBuf },
    /// Update a schema from a JSON patch; a `fields` list replaces all fields
    Update {
        /// Schema id or slug
        schema: String,
        file: PathBuf,
    },
    /// List schemas
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one schema with its fields
    Show { schema: String },
    /// Delete a schema with all of its entries and versions
    Delete {
        schema: String,
        /// Required when the schema still has entries
        #[arg(long)]
        force: bool,
    },
}

pub async fn run(ctx: &CliContext, action: SchemaAction) -> Result<()> {
    match action {
        SchemaAction::Create { file } => {
            let input: SchemaInput = read_json(&file)?;
            let schema = ctx.engine.create_schema(input, ctx.actor).await?;
            print_json(&schema)
        }
        SchemaAction::Update { schema, file } => {
            let schema = find_schema(&ctx.engine, &schema).await?;
            let patch: SchemaPatch = read_json(&file)?;
            if patch.is_empty() {
                anyhow::bail!("Nothing to update: the patch sets none of name, slug, kind, fields");
            }
            let update = ctx.engine.update_schema(schema.id, patch, ctx.actor).await?;
            print_json(&update)
        }
        SchemaAction::List { json } => list(ctx, json).await,
        SchemaAction::Show { schema } => {
            let schema = find_schema(&ctx.engine, &schema).await?;
            print_json(&schema)
        }
        SchemaAction::Delete { schema, force } => {
            let schema = find_schema(&ctx.engine, &schema).await?;
            let entries = ctx.engine.db().count_entries(schema.id).await?;
            if entries > 0 && !force {
                anyhow::bail!(
                    "Schema '{}' has {} entries; re-run with --force to delete them too",
                    schema.slug,
                    entries
                );
            }
            let deleted = ctx.engine.delete_schema(schema.id, ctx.actor).await?;
            println!("Deleted schema '{}' ({} entries)", deleted.slug, entries);
            Ok(())
        }
    }
}

async fn list(ctx: &CliContext, json: bool) -> Result<()> {
    let schemas = ctx.engine.list_schemas().await?;
    if json {
        return print_json(&schemas);
    }

    if schemas.is_empty() {
        println!("No schemas defined.");
        println!();
        println!("Create one with:");
        println!("  contentive schema create schema.json");
        return Ok(());
    }

    let mut rows = Vec::with_capacity(schemas.len());
    for schema in &schemas {
        let entries = ctx.engine.db().count_entries(schema.id).await?;
        rows.push(vec![
            schema.slug.clone(),
            schema.name.clone(),
            schema.kind.to_string(),
            schema.fields.len().to_string(),
            entries.to_string(),
            format_millis(schema.updated_at),
        ]);
    }
    print_table(&["SLUG", "NAME", "KIND", "FIELDS", "ENTRIES", "UPDATED"], rows);
    println!();
    println!("{} schemas", schemas.len());
    Ok(())
}
