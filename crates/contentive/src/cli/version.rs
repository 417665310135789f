//! Version command - entry history, restore, publish and diff

use crate::cli::output::{format_millis, print_json, print_table};
use crate::cli::{find_entry, read_json, CliContext};
use anyhow::Result;
use clap::Subcommand;
use contentive::{Document, NewVersion, VersionStatus};
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum VersionAction {
    /// List versions of an entry, newest first
    List {
        /// Entry id or <schema>/<slug>
        entry: String,
        #[arg(long)]
        json: bool,
    },
    Show { entry: String, version: i64 },
    /// Save a version; without --data the live document is snapshotted
    Create {
        entry: String,
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long, default_value = "draft", value_parser = parse_status)]
        status: VersionStatus,
    },
    /// Make a version live again (records a new version)
    Restore { entry: String, version: i64 },
    /// Make a version live and published (records a new version)
    Publish { entry: String, version: i64 },
    Delete { entry: String, version: i64 },
    /// Per-field differences between two versions
    Diff { entry: String, from: i64, to: i64 },
}

fn parse_status(value: &str) -> Result<VersionStatus, String> {
    VersionStatus::parse(value).ok_or_else(|| format!("expected draft or published, got '{}'", value))
}

pub async fn run(ctx: &CliContext, action: VersionAction) -> Result<()> {
    match action {
        VersionAction::List { entry, json } => {
            let entry = find_entry(&ctx.engine, &entry).await?;
            let history = ctx.engine.version_history(entry.id).await?;
            if json {
                return print_json(&history);
            }

            let rows = history
                .iter()
                .map(|v| {
                    let marker = if v.version == entry.current_version { "*" } else { "" };
                    vec![
                        format!("{}{}", v.version, marker),
                        v.status.to_string(),
                        v.comment.clone().unwrap_or_default(),
                        v.created_by.to_string(),
                        format_millis(v.created_at),
                    ]
                })
                .collect();
            print_table(&["VERSION", "STATUS", "COMMENT", "CREATED BY", "CREATED"], rows);
            Ok(())
        }
        VersionAction::Show { entry, version } => {
            let entry = find_entry(&ctx.engine, &entry).await?;
            print_json(&ctx.engine.get_version(entry.id, version).await?)
        }
        VersionAction::Create {
            entry,
            data,
            comment,
            status,
        } => {
            let entry = find_entry(&ctx.engine, &entry).await?;
            let new = NewVersion {
                data: data.map(|path| read_json::<Document>(&path)).transpose()?,
                comment,
                status,
                schema_revision: None,
            };
            print_json(&ctx.engine.create_version(entry.id, new, ctx.actor).await?)
        }
        VersionAction::Restore { entry, version } => {
            let entry = find_entry(&ctx.engine, &entry).await?;
            print_json(&ctx.engine.restore_version(entry.id, version, ctx.actor).await?)
        }
        VersionAction::Publish { entry, version } => {
            let entry = find_entry(&ctx.engine, &entry).await?;
            print_json(&ctx.engine.publish_version(entry.id, version, ctx.actor).await?)
        }
        VersionAction::Delete { entry, version } => {
            let entry = find_entry(&ctx.engine, &entry).await?;
            ctx.engine.delete_version(entry.id, version, ctx.actor).await?;
            println!("Deleted version {} of '{}'", version, entry.slug);
            Ok(())
        }
        VersionAction::Diff { entry, from, to } => {
            let entry = find_entry(&ctx.engine, &entry).await?;
            print_json(&ctx.engine.diff_versions(entry.id, from, to).await?)
        }
    }
}
