//! Media command - media metadata records

use crate::cli::output::{format_millis, format_size, print_json, print_table};
use crate::cli::CliContext;
use anyhow::{Context, Result};
use clap::Subcommand;
use contentive::{MediaId, NewMedia};

#[derive(Subcommand, Debug, Clone)]
pub enum MediaAction {
    /// Record a media item (metadata only)
    Register {
        name: String,
        #[arg(long)]
        mime_type: String,
        /// Size in bytes
        #[arg(long)]
        size: u64,
    },
    Show { id: String },
    List {
        #[arg(long)]
        json: bool,
    },
    Delete { id: String },
}

fn parse_media_id(raw: &str) -> Result<MediaId> {
    MediaId::parse(raw).with_context(|| format!("Invalid media id '{}'", raw))
}

pub async fn run(ctx: &CliContext, action: MediaAction) -> Result<()> {
    match action {
        MediaAction::Register { name, mime_type, size } => {
            let media = ctx
                .engine
                .register_media(NewMedia { name, mime_type, size }, ctx.actor)
                .await?;
            print_json(&media)
        }
        MediaAction::Show { id } => print_json(&ctx.engine.get_media(parse_media_id(&id)?).await?),
        MediaAction::List { json } => {
            let media = ctx.engine.list_media().await?;
            if json {
                return print_json(&media);
            }
            let rows = media
                .iter()
                .map(|m| {
                    vec![
                        m.id.to_string(),
                        m.name.clone(),
                        m.mime_type.clone(),
                        format_size(m.size),
                        format_millis(m.created_at),
                    ]
                })
                .collect();
            print_table(&["ID", "NAME", "TYPE", "SIZE", "CREATED"], rows);
            Ok(())
        }
        MediaAction::Delete { id } => {
            let media = ctx.engine.delete_media(parse_media_id(&id)?).await?;
            println!("Deleted media '{}' ({})", media.name, media.id);
            Ok(())
        }
    }
}
