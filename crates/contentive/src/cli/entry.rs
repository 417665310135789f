//! Entry command - create, edit, publish and browse content entries

use crate::cli::output::{format_millis, print_json, print_table, yes_no};
use crate::cli::{find_entry, find_schema, read_json, CliContext};
use anyhow::Result;
use clap::Subcommand;
use contentive::{Document, EntryOrder, EntryPatch, EntryQuery, PublishState, SortDirection};
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum EntryAction {
    /// Create an entry from a JSON document
    Create {
        /// Schema id or slug
        schema: String,
        slug: String,
        file: PathBuf,
    },
    /// Merge a partial JSON document into an entry
    Update {
        /// Entry id or <schema>/<slug>
        entry: String,
        #[arg(long)]
        slug: Option<String>,
        #[arg(long)]
        data: Option<PathBuf>,
    },
    Publish { entry: String },
    Unpublish { entry: String },
    /// List a schema's entries
    List {
        schema: String,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "10")]
        page_size: u32,
        /// created_at, updated_at or slug
        #[arg(long, default_value = "created_at", value_parser = parse_order)]
        order_by: EntryOrder,
        /// asc or desc
        #[arg(long, default_value = "desc", value_parser = parse_direction)]
        direction: SortDirection,
        /// published or draft
        #[arg(long, value_parser = parse_status)]
        status: Option<PublishState>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        json: bool,
    },
    Show { entry: String },
    Delete { entry: String },
}

fn parse_order(value: &str) -> Result<EntryOrder, String> {
    EntryOrder::parse(value).ok_or_else(|| format!("expected created_at, updated_at or slug, got '{}'", value))
}

fn parse_direction(value: &str) -> Result<SortDirection, String> {
    SortDirection::parse(value).ok_or_else(|| format!("expected asc or desc, got '{}'", value))
}

fn parse_status(value: &str) -> Result<PublishState, String> {
    PublishState::parse(value).ok_or_else(|| format!("expected published or draft, got '{}'", value))
}

pub async fn run(ctx: &CliContext, action: EntryAction) -> Result<()> {
    match action {
        EntryAction::Create { schema, slug, file } => {
            let schema = find_schema(&ctx.engine, &schema).await?;
            let data: Document = read_json(&file)?;
            let entry = ctx.engine.create_entry(schema.id, &slug, data, ctx.actor).await?;
            print_json(&entry)
        }
        EntryAction::Update { entry, slug, data } => {
            let entry = find_entry(&ctx.engine, &entry).await?;
            let patch = EntryPatch {
                slug,
                data: data.map(|path| read_json::<Document>(&path)).transpose()?,
            };
            if patch.is_empty() {
                anyhow::bail!("Nothing to update: pass --slug and/or --data");
            }
            let updated = ctx.engine.update_entry(entry.id, patch, ctx.actor).await?;
            print_json(&updated)
        }
        EntryAction::Publish { entry } => {
            let entry = find_entry(&ctx.engine, &entry).await?;
            print_json(&ctx.engine.publish_entry(entry.id, ctx.actor).await?)
        }
        EntryAction::Unpublish { entry } => {
            let entry = find_entry(&ctx.engine, &entry).await?;
            print_json(&ctx.engine.unpublish_entry(entry.id, ctx.actor).await?)
        }
        EntryAction::List {
            schema,
            page,
            page_size,
            order_by,
            direction,
            status,
            search,
            json,
        } => {
            let schema = find_schema(&ctx.engine, &schema).await?;
            let query = EntryQuery {
                page,
                page_size,
                order_by,
                direction,
                status,
                search,
            };
            let page = ctx.engine.list_entries(schema.id, &query).await?;
            if json {
                return print_json(&page);
            }

            let rows = page
                .entries
                .iter()
                .map(|e| {
                    vec![
                        e.id.to_string(),
                        e.slug.clone(),
                        yes_no(e.is_published),
                        e.current_version.to_string(),
                        format_millis(e.updated_at),
                    ]
                })
                .collect();
            print_table(&["ID", "SLUG", "PUBLISHED", "VERSION", "UPDATED"], rows);
            println!();
            println!(
                "Page {} of {} ({} entries)",
                page.page,
                page.total_pages.max(1),
                page.total
            );
            Ok(())
        }
        EntryAction::Show { entry } => print_json(&find_entry(&ctx.engine, &entry).await?),
        EntryAction::Delete { entry } => {
            let entry = find_entry(&ctx.engine, &entry).await?;
            let deleted = ctx.engine.delete_entry(entry.id, ctx.actor).await?;
            println!("Deleted entry '{}' ({})", deleted.slug, deleted.id);
            Ok(())
        }
    }
}
