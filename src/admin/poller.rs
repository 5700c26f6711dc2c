use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AdminContext, CommandRegistry};
use crate::sink::TelegramSink;

/// Pause after a failed `getUpdates` call.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Long-poll the Bot API for operator messages until `shutdown` is cancelled.
///
/// Replies go out through the context's [`DeliverySink`](crate::sink::DeliverySink).
pub async fn poll_updates(
    telegram: Arc<TelegramSink>,
    registry: CommandRegistry,
    ctx: AdminContext,
    shutdown: CancellationToken,
) {
    info!("Admin update poller started");
    let mut offset = 0;

    loop {
        let updates = tokio::select! {
            () = shutdown.cancelled() => break,
            result = telegram.get_updates(offset) => result,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                warn!("Failed to fetch updates: {e}");
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(ERROR_BACKOFF) => continue,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(message) = update.message else {
                continue;
            };
            debug!(chat_id = message.chat.id, "Handling admin message");

            if let Some(reply) = registry.handle(&ctx, &message).await {
                if let Err(e) = ctx.sink.reply_to(message.chat.id, &reply).await {
                    warn!(chat_id = message.chat.id, "Failed to send reply: {e}");
                }
            }
        }
    }

    info!("Admin update poller stopped");
}
