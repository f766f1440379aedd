//! Chat-bot sink: announces releases to attached chats and serves
//! administrative commands over a Telegram-style bot API.

mod api;
mod totp;

pub use api::{BotApi, DEFAULT_API_URL};

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{format_file_size, format_indexes, render_template, Sink, SinkError};
use crate::storage::Storage;
use crate::torrent::{fetch_poster, HttpPageSource, PageSource, TorrentDescriptor};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatSinkConfig {
    pub bottoken: String,
    #[serde(default = "default_api_url")]
    pub apiurl: String,
    /// Raw TOTP seed for `/setadmin`; loaded once at init.
    #[serde(default)]
    pub otpseed: String,
    /// Long-poll timeout of the update pump, seconds.
    #[serde(default = "default_poll_timeout")]
    pub polltimeout: u64,
    #[serde(default)]
    pub msg: Messages,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_poll_timeout() -> u64 {
    25
}

/// User-facing texts; every field can be overridden from the sink config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub announce: String,
    pub added: String,
    pub updated: String,
    pub milestone: String,
    pub state: String,
    pub singleindex: String,
    pub multipleindexes: String,
    pub greeting: String,
    pub attached: String,
    pub detached: String,
    pub admin_granted: String,
    pub admin_revoked: String,
    pub unauthorized: String,
    pub saved: String,
    pub notfound: String,
    pub error: String,
    /// Literal substring replacements applied to names before rendering.
    pub replacements: HashMap<String, String>,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            announce: "{action}\n{name}\nSize: {size}, files: {filecount}\n{meta}{newindexes}\n{url}"
                .to_string(),
            added: "New release".to_string(),
            updated: "Release updated".to_string(),
            milestone: "GET {index}!".to_string(),
            state: "watching: {watch}\nadmin: {admin}\noffset: {index}".to_string(),
            singleindex: "New file: {newindexes}\n".to_string(),
            multipleindexes: "New files: {newindexes}\n".to_string(),
            greeting: "Commands: /attach /detach /state".to_string(),
            attached: "Watching".to_string(),
            detached: "Not watching anymore".to_string(),
            admin_granted: "Admin granted".to_string(),
            admin_revoked: "Admin revoked".to_string(),
            unauthorized: "Unauthorized".to_string(),
            saved: "Saved".to_string(),
            notfound: "Not found".to_string(),
            error: "Command failed".to_string(),
            replacements: HashMap::new(),
        }
    }
}

/// State shared between the sink surface and the update pump.
struct ChatCore {
    api: BotApi,
    storage: Arc<dyn Storage>,
    messages: Messages,
    otp_seed: Vec<u8>,
    pages: Arc<dyn PageSource>,
}

pub struct ChatSink {
    core: Arc<ChatCore>,
    shutdown: watch::Sender<bool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ChatSink {
    pub async fn from_file(path: &str, storage: Arc<dyn Storage>) -> Result<Self, SinkError> {
        let raw = std::fs::read_to_string(Path::new(path))
            .map_err(|e| SinkError::Config(format!("{path}: {e}")))?;
        let config: ChatSinkConfig =
            serde_json::from_str(&raw).map_err(|e| SinkError::Config(format!("{path}: {e}")))?;
        Self::start(config, storage)
    }

    pub fn start(config: ChatSinkConfig, storage: Arc<dyn Storage>) -> Result<Self, SinkError> {
        if config.bottoken.is_empty() {
            return Err(SinkError::Config("bot token not set".to_string()));
        }
        let client = reqwest::Client::new();
        let core = Arc::new(ChatCore {
            api: BotApi::new(client.clone(), &config.apiurl, &config.bottoken),
            storage,
            messages: config.msg,
            otp_seed: config.otpseed.into_bytes(),
            pages: Arc::new(HttpPageSource::new(client)),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let pump = tokio::spawn(Arc::clone(&core).pump(shutdown_rx, config.polltimeout));
        info!("chat sink started");
        Ok(Self {
            core,
            shutdown,
            pump: Mutex::new(Some(pump)),
        })
    }
}

impl ChatCore {
    /// Long-poll loop consuming command messages.
    async fn pump(self: Arc<Self>, mut shutdown: watch::Receiver<bool>, poll_timeout: u64) {
        let mut offset = match self.storage.chat_offset() {
            Ok(offset) => offset,
            Err(e) => {
                warn!(error = %e, "chat offset unavailable, starting from 0");
                0
            }
        };
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                updates = self.api.get_updates(offset + 1, poll_timeout) => match updates {
                    Ok(updates) => {
                        for update in updates {
                            offset = offset.max(update.update_id);
                            if let Some(message) = update.message {
                                self.dispatch(message).await;
                            }
                        }
                        if let Err(e) = self.storage.update_chat_offset(offset) {
                            warn!(error = %e, "chat offset not persisted");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "update poll failed");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                },
            }
        }
        debug!("chat update pump stopped");
    }

    async fn dispatch(&self, message: api::Message) {
        let Some(text) = message.text else { return };
        if !text.starts_with('/') {
            return;
        }
        if let Some(reply) = self.handle_command(message.chat.id, &text).await {
            if let Err(e) = self.api.send_message(message.chat.id, &reply).await {
                warn!(chat = message.chat.id, error = %e, "reply not sent");
            }
        }
    }

    /// Execute one command; the returned text is the reply.
    async fn handle_command(&self, chat: i64, text: &str) -> Option<String> {
        let (command, args) = match text.split_once(char::is_whitespace) {
            Some((command, args)) => (command, args.trim()),
            None => (text, ""),
        };
        let result = match command {
            "/start" => Ok(Some(self.messages.greeting.clone())),
            "/attach" => self
                .storage
                .add_chat(chat)
                .map(|()| Some(self.messages.attached.clone()))
                .map_err(SinkError::from),
            "/detach" => self
                .storage
                .del_chat(chat)
                .map(|()| Some(self.messages.detached.clone()))
                .map_err(SinkError::from),
            "/state" => self.state(chat),
            "/setadmin" => self.set_admin(chat, args),
            "/rmadmin" => self.rm_admin(chat),
            "/lsadmins" => self.list_roster(chat, true),
            "/lschats" => self.list_roster(chat, false),
            "/lsreleases" => self.list_releases(chat, args),
            "/uploadposter" => self.upload_poster(chat, args).await,
            _ => Ok(None),
        };
        match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!(chat, command, error = %e, "command failed");
                Some(self.messages.error.clone())
            }
        }
    }

    fn state(&self, chat: i64) -> Result<Option<String>, SinkError> {
        let mut values = HashMap::new();
        values.insert("watch", self.storage.chat_exists(chat)?.to_string());
        values.insert("admin", self.storage.admin_exists(chat)?.to_string());
        values.insert("index", self.storage.crawl_offset()?.to_string());
        Ok(Some(render_template(&self.messages.state, &values)))
    }

    fn set_admin(&self, chat: i64, code: &str) -> Result<Option<String>, SinkError> {
        if self.otp_seed.is_empty() || !totp::verify(&self.otp_seed, code, unix_now()) {
            info!(chat, "setadmin rejected");
            return Ok(Some(self.messages.unauthorized.clone()));
        }
        self.storage.add_admin(chat)?;
        info!(chat, "admin granted");
        Ok(Some(self.messages.admin_granted.clone()))
    }

    fn rm_admin(&self, chat: i64) -> Result<Option<String>, SinkError> {
        if !self.storage.admin_exists(chat)? {
            return Ok(Some(self.messages.unauthorized.clone()));
        }
        self.storage.del_admin(chat)?;
        Ok(Some(self.messages.admin_revoked.clone()))
    }

    fn list_roster(&self, chat: i64, admins: bool) -> Result<Option<String>, SinkError> {
        if !self.storage.admin_exists(chat)? {
            return Ok(Some(self.messages.unauthorized.clone()));
        }
        let ids = if admins {
            self.storage.admins()?
        } else {
            self.storage.chats()?
        };
        let listing = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(if listing.is_empty() {
            self.messages.notfound.clone()
        } else {
            listing
        }))
    }

    fn list_releases(&self, chat: i64, pattern: &str) -> Result<Option<String>, SinkError> {
        if !self.storage.admin_exists(chat)? {
            return Ok(Some(self.messages.unauthorized.clone()));
        }
        let torrents = self.storage.find_torrents(pattern)?;
        if torrents.is_empty() {
            return Ok(Some(self.messages.notfound.clone()));
        }
        let listing = torrents
            .iter()
            .map(|t| format!("{}: {}", t.id, t.name))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(listing))
    }

    async fn upload_poster(&self, chat: i64, args: &str) -> Result<Option<String>, SinkError> {
        if !self.storage.admin_exists(chat)? {
            return Ok(Some(self.messages.unauthorized.clone()));
        }
        let Some((id, url)) = args.split_once(char::is_whitespace) else {
            return Ok(Some(self.messages.error.clone()));
        };
        let Ok(id) = id.trim().parse::<i64>() else {
            return Ok(Some(self.messages.error.clone()));
        };
        if !self.storage.check_torrent(id)? {
            return Ok(Some(self.messages.notfound.clone()));
        }
        let poster = fetch_poster(self.pages.as_ref(), url.trim(), 0)
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        self.storage.add_torrent_image(id, &poster)?;
        Ok(Some(self.messages.saved.clone()))
    }

    fn render_announcement(&self, is_new: bool, torrent: &TorrentDescriptor) -> String {
        let action = if is_new {
            &self.messages.added
        } else {
            &self.messages.updated
        };
        let mut name = torrent.name.clone();
        for (from, to) in &self.messages.replacements {
            name = name.replace(from, to);
        }
        let indexes = torrent.new_file_indexes();
        let newindexes = if indexes.is_empty() {
            String::new()
        } else {
            let template = if indexes.len() == 1 {
                &self.messages.singleindex
            } else {
                &self.messages.multipleindexes
            };
            let mut values = HashMap::new();
            values.insert("newindexes", format_indexes(&indexes));
            render_template(template, &values)
        };
        let mut meta: Vec<_> = torrent.meta.iter().collect();
        meta.sort();
        let meta = meta
            .iter()
            .map(|(key, value)| format!("{key}: {value}\n"))
            .collect::<String>();

        let mut values = HashMap::new();
        values.insert("action", action.clone());
        values.insert("name", name);
        values.insert("size", format_file_size(torrent.length));
        values.insert("url", torrent.url.clone());
        values.insert("filecount", torrent.files.len().to_string());
        values.insert("meta", meta);
        values.insert("newindexes", newindexes);
        render_template(&self.messages.announce, &values)
    }

    async fn broadcast(&self, text: &str, photo: &[u8]) -> Result<(), SinkError> {
        for chat in self.storage.chats()? {
            let delivery = if photo.is_empty() {
                self.api.send_message(chat, text).await
            } else {
                self.api.send_photo(chat, text, photo).await
            };
            if let Err(e) = delivery {
                warn!(chat, error = %e, "announcement not delivered");
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink for ChatSink {
    async fn send(&self, is_new: bool, torrent: &TorrentDescriptor) -> Result<(), SinkError> {
        if self.core.messages.announce.is_empty() {
            warn!("announce message not set");
            return Ok(());
        }
        let text = self.core.render_announcement(is_new, torrent);
        debug!(name = torrent.name, is_new, "announcing to chats");
        self.core.broadcast(&text, &torrent.image).await
    }

    async fn send_milestone(&self, offset: u64) -> Result<(), SinkError> {
        if self.core.messages.milestone.is_empty() {
            return Ok(());
        }
        let mut values = HashMap::new();
        values.insert("index", offset.to_string());
        let text = render_template(&self.core.messages.milestone, &values);
        self.core.broadcast(&text, &[]).await
    }

    async fn close(&self) {
        let _ = self.shutdown.send(true);
        let pump = self.pump.lock().unwrap().take();
        if let Some(pump) = pump {
            let _ = pump.await;
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn core_with_storage() -> (Arc<ChatCore>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let core = Arc::new(ChatCore {
            api: BotApi::new(reqwest::Client::new(), DEFAULT_API_URL, "test-token"),
            storage: Arc::clone(&storage) as Arc<dyn Storage>,
            messages: Messages::default(),
            otp_seed: b"12345678901234567890".to_vec(),
            pages: Arc::new(crate::testing::MockPageSource::new()),
        });
        (core, storage)
    }

    #[tokio::test]
    async fn test_attach_detach() {
        let (core, storage) = core_with_storage();
        let reply = core.handle_command(7, "/attach").await.unwrap();
        assert_eq!(reply, Messages::default().attached);
        assert!(storage.chat_exists(7).unwrap());

        core.handle_command(7, "/detach").await.unwrap();
        assert!(!storage.chat_exists(7).unwrap());
    }

    #[tokio::test]
    async fn test_state_reports_roster_and_offset() {
        let (core, storage) = core_with_storage();
        storage.add_chat(7).unwrap();
        storage.update_crawl_offset(41).unwrap();

        let reply = core.handle_command(7, "/state").await.unwrap();
        assert!(reply.contains("watching: true"));
        assert!(reply.contains("admin: false"));
        assert!(reply.contains("offset: 41"));
    }

    #[tokio::test]
    async fn test_setadmin_requires_valid_totp() {
        let (core, storage) = core_with_storage();
        let reply = core.handle_command(7, "/setadmin 000000").await.unwrap();
        assert_eq!(reply, Messages::default().unauthorized);
        assert!(!storage.admin_exists(7).unwrap());

        let code = totp::totp_at(b"12345678901234567890", unix_now()).to_string();
        let reply = core
            .handle_command(7, &format!("/setadmin {code}"))
            .await
            .unwrap();
        assert_eq!(reply, Messages::default().admin_granted);
        assert!(storage.admin_exists(7).unwrap());
    }

    #[tokio::test]
    async fn test_admin_only_commands_reject_plain_chats() {
        let (core, _storage) = core_with_storage();
        for command in ["/lsadmins", "/lschats", "/lsreleases x", "/uploadposter 1 u"] {
            let reply = core.handle_command(7, command).await.unwrap();
            assert_eq!(reply, Messages::default().unauthorized, "{command}");
        }
    }

    #[tokio::test]
    async fn test_lsreleases_lists_matches() {
        let (core, storage) = core_with_storage();
        storage.add_admin(7).unwrap();
        storage
            .add_torrent("Some Release", b"raw", &["/Some Release".to_string()])
            .unwrap();
        storage.add_torrent("Other", b"raw", &[]).unwrap();

        let reply = core.handle_command(7, "/lsreleases Some").await.unwrap();
        assert!(reply.contains("1: Some Release"));
        assert!(!reply.contains("Other"));
    }

    #[tokio::test]
    async fn test_uploadposter_stores_image() {
        let (core, storage) = core_with_storage();
        storage.add_admin(7).unwrap();
        let id = storage.add_torrent("A", b"raw", &[]).unwrap();

        let pages = crate::testing::MockPageSource::new();
        pages.put("http://x/p.jpg", b"jpeg-bytes".to_vec());
        let core = Arc::new(ChatCore {
            api: BotApi::new(reqwest::Client::new(), DEFAULT_API_URL, "test-token"),
            storage: Arc::clone(&storage) as Arc<dyn Storage>,
            messages: Messages::default(),
            otp_seed: Vec::new(),
            pages: Arc::new(pages),
        });

        let reply = core
            .handle_command(7, &format!("/uploadposter {id} http://x/p.jpg"))
            .await
            .unwrap();
        assert_eq!(reply, Messages::default().saved);
        assert_eq!(storage.torrent_image(id).unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_unknown_command_is_ignored() {
        let (core, _storage) = core_with_storage();
        assert!(core.handle_command(7, "/frobnicate").await.is_none());
    }

    #[test]
    fn test_render_announcement_fields() {
        let (core, _storage) = core_with_storage();
        let mut torrent = TorrentDescriptor::new("Rel".to_string());
        torrent.length = 2048;
        torrent.url = "https://tracker.example/t/1".to_string();
        torrent.files.insert("/Rel/a".to_string(), false);
        torrent.files.insert("/Rel/b".to_string(), true);
        torrent
            .meta
            .insert("genre".to_string(), "ambient".to_string());

        let text = core.render_announcement(false, &torrent);
        assert!(text.contains("Release updated"));
        assert!(text.contains("Rel"));
        assert!(text.contains("2.00 KiB"));
        assert!(text.contains("files: 2"));
        assert!(text.contains("genre: ambient"));
        assert!(text.contains("New file: 2"));
        assert!(text.contains("https://tracker.example/t/1"));
    }
}
