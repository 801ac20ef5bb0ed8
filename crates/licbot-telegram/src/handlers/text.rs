use std::sync::Arc;

use teloxide::prelude::*;

use licbot_core::{
    domain::UserId,
    gate::GateDecision,
    memory::{ChatTurn, Role},
};
use licbot_openrouter::ChatMessage;

use crate::router::AppState;

const KEY_FORMAT_HINT: &str =
    "Send your license key as XXXX-XXXX-XXXX-XXXX, or use /activate KEY.";

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text().map(|s| s.to_string()) else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let chat_id = msg.chat.id;

    // Every message goes through the gate first; only Allowed reaches the
    // model relay.
    let decision = match state.gate.check(user_id, &text) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("gate check failed for user {}: {e}", user_id.0);
            bot.send_message(chat_id, "A technical error occurred. Please try again later.")
                .await?;
            return Ok(());
        }
    };

    match decision {
        GateDecision::Activated { plan, expires_at } => {
            let human = expires_at.format("%Y-%m-%d %H:%M UTC");
            bot.send_message(
                chat_id,
                format!("Activated: {plan} plan.\nExpires: {human}."),
            )
            .await?;
        }
        GateDecision::ActivationRejected => {
            bot.send_message(chat_id, "Invalid or already used key.")
                .await?;
        }
        GateDecision::MissingKey => {
            bot.send_message(chat_id, KEY_FORMAT_HINT).await?;
        }
        GateDecision::SubscriptionExpired => {
            bot.send_message(
                chat_id,
                "Your subscription has expired. Send a new key to renew.",
            )
            .await?;
        }
        GateDecision::NeedKey => {
            bot.send_message(
                chat_id,
                format!("This service requires a license key. {KEY_FORMAT_HINT}"),
            )
            .await?;
        }
        GateDecision::Allowed => {
            relay_chat(&bot, chat_id, user_id, &text, &state).await?;
        }
    }

    Ok(())
}

async fn relay_chat(
    bot: &Bot,
    chat_id: teloxide::types::ChatId,
    user_id: UserId,
    text: &str,
    state: &AppState,
) -> ResponseResult<()> {
    let _ = bot
        .send_chat_action(chat_id, teloxide::types::ChatAction::Typing)
        .await;

    let mut messages = vec![ChatMessage::new("system", state.prompt.current().await)];
    for turn in state.memory.history(user_id).await {
        messages.push(ChatMessage::new(turn.role.as_str(), turn.content));
    }
    messages.push(ChatMessage::new("user", text));

    let reply = match state.model.chat(&state.cfg.chat_model, &messages).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("model call failed for user {}: {e}", user_id.0);
            bot.send_message(chat_id, "The model is unavailable right now. Please try again.")
                .await?;
            return Ok(());
        }
    };

    bot.send_message(chat_id, &reply.text).await?;

    state
        .memory
        .push(
            user_id,
            ChatTurn {
                role: Role::User,
                content: text.to_string(),
            },
        )
        .await;
    state
        .memory
        .push(
            user_id,
            ChatTurn {
                role: Role::Assistant,
                content: reply.text.clone(),
            },
        )
        .await;

    // Best-effort metering; never disturbs the chat flow.
    state
        .gate
        .track_usage(user_id, &state.cfg.chat_model, reply.usage);

    Ok(())
}
