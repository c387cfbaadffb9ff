use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use teloxide::{
    dispatching2::UpdateFilterExt, prelude2::*, types::InputFile, utils::command::BotCommand,
};
use tokio::sync::Mutex;

use crate::envelope::{StickerKind, SubmissionEnvelope};
use crate::error::CollectorError;
use crate::queue::{RedisQueue, SubmissionQueue};
use crate::strings;

/// Everything the handlers share, built once at startup and passed through
/// the dispatcher's dependency map.
pub struct BotContext {
    queue: RedisQueue,
    video: InstructionVideo,
}

impl BotContext {
    pub fn new(queue: RedisQueue, video_path: PathBuf) -> Self {
        Self {
            queue,
            video: InstructionVideo::new(video_path),
        }
    }
}

/// Run the dispatcher until the process is interrupted.
pub async fn dispatch(bot: Bot, context: Arc<BotContext>) {
    let cmd_handler = Update::filter_message()
        .filter_command::<Command>()
        .branch(dptree::endpoint(command_handler));
    let sticker_handler = Update::filter_message().branch(
        dptree::filter(|message: Message| message.sticker().is_some())
            .endpoint(sticker_message_handler),
    );

    let handler = dptree::entry().branch(cmd_handler).branch(sticker_handler);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![context])
        .build()
        .setup_ctrlc_handler()
        .dispatch()
        .await;
}

async fn command_handler(
    bot: Bot,
    message: Message,
    context: Arc<BotContext>,
) -> Result<(), CollectorError> {
    let command = Command::parse(
        message.text().ok_or(CollectorError::CommandParseError(None))?,
        "sticker_collector_bot",
    )?;

    match command {
        Command::Start => {
            reply_msg(bot.clone(), message.clone(), strings::WELCOME).await?;
            context.video.send(&bot, &message).await?;
        }
        Command::Help => {
            reply_msg(bot, message, Command::descriptions()).await?;
        }
    }
    Ok(())
}

async fn sticker_message_handler(
    bot: Bot,
    message: Message,
    context: Arc<BotContext>,
) -> Result<(), CollectorError> {
    let sticker = match message.sticker() {
        Some(s) => s.clone(),
        None => return Ok(()),
    };

    // only stickers that belong to a pack can be submitted
    let set_name = match &sticker.set_name {
        Some(name) => name.clone(),
        None => {
            reply_msg(bot, message, strings::NO_STICKER_SET).await?;
            return Ok(());
        }
    };

    let sender = match message.from() {
        Some(user) => user.clone(),
        None => {
            reply_msg(bot, message, strings::SENDER_UNKNOWN).await?;
            return Ok(());
        }
    };

    match submit_pack(&bot, &context, &set_name, sender.id).await {
        Ok(short_name) => {
            info!("Queued sticker pack '{short_name}' from user {}", sender.id);
            reply_msg(bot, message, strings::THANKS).await?;
        }
        Err(err) => {
            error!(
                "Failed to submit sticker pack '{set_name}' from user {}: {err}",
                sender.id
            );
            reply_msg(bot, message, strings::SUBMIT_FAILED).await?;
        }
    }
    Ok(())
}

/// Resolve the sticker set into a canonical envelope and enqueue it.
///
/// The enqueue returns as soon as Redis acknowledges the push, so the sender
/// gets their reply without waiting for the worker to persist anything.
async fn submit_pack(
    bot: &Bot,
    context: &BotContext,
    set_name: &str,
    user_id: i64,
) -> Result<String, CollectorError> {
    let set = bot.get_sticker_set(set_name.to_owned()).send().await?;

    let envelope = SubmissionEnvelope {
        short_name: set.name.clone(),
        name: set.title.clone(),
        sticker_type: pack_kind(set.contains_masks),
        link: pack_link(&set.name),
        user_id,
    };

    let payload = serde_json::to_string(&envelope)?;
    context.queue.enqueue(payload).await?;

    Ok(set.name)
}

fn pack_link(short_name: &str) -> String {
    format!("https://t.me/addstickers/{short_name}")
}

// This client version predates the sticker_type field on sticker sets; mask
// sets are the only kind distinguishable here, custom emoji arrive as regular.
fn pack_kind(contains_masks: bool) -> StickerKind {
    if contains_masks {
        StickerKind::Mask
    } else {
        StickerKind::Regular
    }
}

/// The instruction video shown on /start, with a single-slot cache of its
/// uploaded Telegram file id. A stale or rejected id falls back to a fresh
/// upload; a missing file falls back to a text reply.
struct InstructionVideo {
    path: PathBuf,
    cached_file_id: Mutex<Option<String>>,
}

impl InstructionVideo {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            cached_file_id: Mutex::new(None),
        }
    }

    async fn send(&self, bot: &Bot, message: &Message) -> Result<(), CollectorError> {
        let mut cached = self.cached_file_id.lock().await;

        if let Some(file_id) = cached.clone() {
            match send_video(bot, message, InputFile::file_id(file_id)).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    warn!("Cached instruction video rejected, re-uploading: {err}");
                    *cached = None;
                }
            }
        }

        if !self.path.exists() {
            warn!("Instruction video not found at {}", self.path.display());
            reply_msg(bot.clone(), message.clone(), strings::VIDEO_MISSING).await?;
            return Ok(());
        }

        let sent = send_video(bot, message, InputFile::file(self.path.clone())).await?;
        if let Some(video) = sent.video() {
            *cached = Some(video.file_id.clone());
            info!("Instruction video uploaded, file id cached");
        }
        Ok(())
    }
}

async fn send_video(
    bot: &Bot,
    message: &Message,
    video: InputFile,
) -> Result<Message, CollectorError> {
    let mut send_video = bot.send_video(message.chat.id, video);
    send_video.caption = Some(strings::VIDEO_CAPTION.to_owned());
    Ok(send_video.send().await?)
}

async fn reply_msg<S: AsRef<str>>(bot: Bot, message: Message, text: S) -> Result<(), CollectorError> {
    let mut send_message = bot.send_message(message.chat.id, text.as_ref());
    send_message.reply_to_message_id = Some(message.id);
    send_message.send().await?;
    Ok(())
}

#[derive(BotCommand, Debug)]
#[command(rename = "lowercase", description = "Commands:")]
enum Command {
    #[command(description = "show the welcome message and instructions.")]
    Start,

    #[command(description = "get help message")]
    Help,
}
