//! One-shot migration between storage backends. Source and destination
//! drivers read the same parameter table; any error aborts the run.

use anyhow::{Context, Result};
use tracing::{info, warn};

use trackwatch_core::config::Config;
use trackwatch_core::storage::{build_storage, Driver};

pub fn run(config: &Config, from: Driver, to: Driver) -> Result<()> {
    let source =
        build_storage(from, &config.db.params).with_context(|| format!("source {from}"))?;
    let dest = build_storage(to, &config.db.params).with_context(|| format!("destination {to}"))?;
    info!(%from, %to, "connected");

    let offset = source.crawl_offset().context("reading offset")?;
    dest.update_crawl_offset(offset).context("writing offset")?;
    info!(offset, "offset migrated");

    for chat in source.chats().context("reading chats")? {
        dest.add_chat(chat).context("writing chat")?;
    }
    info!("chats migrated");

    for admin in source.admins().context("reading admins")? {
        dest.add_admin(admin).context("writing admin")?;
    }
    info!("admins migrated");

    let torrents = source.torrents().context("bulk export")?;
    if torrents.is_empty() {
        warn!("there are no torrents to migrate");
    }
    for torrent in &torrents {
        let files = source
            .torrent_files(torrent.id)
            .with_context(|| format!("files of {}", torrent.id))?;
        dest.put_torrent(torrent, &files)
            .with_context(|| format!("importing {}", torrent.id))?;
        let meta = source
            .torrent_meta(torrent.id)
            .with_context(|| format!("meta of {}", torrent.id))?;
        dest.add_torrent_meta(torrent.id, &meta)
            .with_context(|| format!("importing meta of {}", torrent.id))?;
        info!(id = torrent.id, name = torrent.name, "torrent migrated");
    }

    source.close();
    dest.close();
    info!("migration complete");
    Ok(())
}
