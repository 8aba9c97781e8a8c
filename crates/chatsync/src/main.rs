use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{bail, Context as _};
use chatsync_core::{
    channel::{ChannelData, ChannelType},
    config::Config,
    domain::{ChannelId, User},
    model::{MessageDraft, PendingFile},
    ports::AccountSlot,
    snowflake::Snowflake,
    App, Context,
};
use chatsync_rest::RestTransport;
use tracing::info;

const USAGE: &str = "usage: chatsync send <channel_id> <content> [file ...]\n       chatsync typing <channel_id>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chatsync_core::logging::init("chatsync")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let cfg = Arc::new(Config::load()?);
    let account_id = cfg
        .account_id
        .context("CHATSYNC_ACCOUNT_ID is required to stamp outgoing messages")?;
    let account = AccountSlot::new(Some(User::new(account_id, cfg.account_name.clone())));

    let transport = Arc::new(RestTransport::new(&cfg)?);
    let ctx = Arc::new(Context::with_account(cfg.clone(), transport, account));
    let app = App::new(ctx);

    match command.as_str() {
        "send" => {
            let channel_id = parse_channel(args.get(1))?;
            let content = args.get(2).cloned().unwrap_or_default();
            let mut files = Vec::new();
            for path in args.iter().skip(3) {
                files.push(read_file(Path::new(path)).await?);
            }

            app.add_channel(ChannelData::new(channel_id, ChannelType::GuildText))
                .await;
            let queued = app
                .send_message(channel_id, MessageDraft::text(content).with_files(files))
                .await
                .map_err(|e| anyhow::anyhow!(e.user_notice()))?;

            info!(nonce = %queued.nonce, status = queued.status.as_str(), "send finished");
            match queued.failure_reason() {
                Some(reason) => bail!("message {} failed: {reason}", queued.nonce),
                None => println!("{} {}", queued.nonce, queued.status.as_str()),
            }
        }
        "typing" => {
            let channel_id = parse_channel(args.get(1))?;
            app.add_channel(ChannelData::new(channel_id, ChannelType::GuildText))
                .await;
            app.start_typing(channel_id).await;
            // Let the server show it for a moment before exiting.
            tokio::time::sleep(Duration::from_secs(1)).await;
            app.stop_typing(channel_id).await;
        }
        _ => bail!(USAGE),
    }

    Ok(())
}

fn parse_channel(arg: Option<&String>) -> anyhow::Result<ChannelId> {
    let raw = arg.context(USAGE)?;
    let id: Snowflake = raw
        .parse()
        .with_context(|| format!("invalid channel id: {raw}"))?;
    Ok(ChannelId(id))
}

async fn read_file(path: &Path) -> anyhow::Result<PendingFile> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();
    Ok(PendingFile::new(name, data))
}
