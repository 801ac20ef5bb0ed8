//! Button-driven admin bot.
//!
//! Every action sits behind the login gate; navigation is inline-keyboard
//! only. Free-text input is only consumed when a flow asked for it
//! (password entry, password change, prompt text) and the expectation has
//! not timed out.

use std::sync::Arc;

use teloxide::{
    dispatching::Dispatcher,
    dptree,
    net::Download,
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup},
};

use licbot_core::{
    admin::{AdminAuth, AdminConversations, PendingInput},
    domain::{KeyStatus, Plan, UserId},
    license::LicenseService,
    prompt::PromptFile,
    usage::UsageLedger,
};

const PAGE_SIZE: usize = 10;

pub struct AdminDeps {
    pub auth: AdminAuth,
    pub conversations: AdminConversations,
    pub licenses: Arc<LicenseService>,
    pub ledger: Arc<UsageLedger>,
    pub prompt: Arc<PromptFile>,
}

pub async fn run_polling(bot: Bot, deps: Arc<AdminDeps>) -> anyhow::Result<()> {
    if let Ok(me) = bot.get_me().await {
        tracing::info!("admin bot started: @{}", me.username());
    }

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![deps])
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("Generate key", "gen")],
        vec![InlineKeyboardButton::callback("List keys", "list:0")],
        vec![InlineKeyboardButton::callback("Active clients", "clients")],
        vec![InlineKeyboardButton::callback("Usage summary", "usage")],
        vec![InlineKeyboardButton::callback("Update prompt", "prompt")],
        vec![InlineKeyboardButton::callback("Change password", "pw")],
        vec![InlineKeyboardButton::callback("Log out", "logout")],
    ])
}

fn back_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback("Back", "menu")]])
}

fn login_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback("Log in", "login")]])
}

fn plan_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("1 minute", "gen:minute"),
            InlineKeyboardButton::callback("1 hour", "gen:hour"),
        ],
        vec![
            InlineKeyboardButton::callback("1 day", "gen:day"),
            InlineKeyboardButton::callback("1 week", "gen:week"),
        ],
        vec![
            InlineKeyboardButton::callback("1 month", "gen:month"),
            InlineKeyboardButton::callback("1 year", "gen:year"),
        ],
        vec![InlineKeyboardButton::callback("Back", "menu")],
    ])
}

async fn ask_login(bot: &Bot, chat_id: ChatId) -> ResponseResult<()> {
    bot.send_message(chat_id, "Please log in first.")
        .reply_markup(login_menu())
        .await?;
    Ok(())
}

fn is_logged_in(deps: &AdminDeps, user: UserId) -> bool {
    deps.auth.is_logged_in(user).unwrap_or(false)
}

async fn handle_callback(bot: Bot, q: CallbackQuery, deps: Arc<AdminDeps>) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let Some(chat_id) = q.message.as_ref().map(|m| m.chat.id) else {
        bot.answer_callback_query(cb_id).await?;
        return Ok(());
    };
    let user = UserId(q.from.id.0 as i64);
    let data = q.data.clone().unwrap_or_default();

    // Login is the only action available to strangers.
    if data == "login" {
        bot.answer_callback_query(cb_id).await?;
        deps.conversations
            .expect(user, PendingInput::LoginPassword)
            .await;
        bot.send_message(chat_id, "Enter the admin password:")
            .reply_markup(back_menu())
            .await?;
        return Ok(());
    }

    if data == "menu" {
        bot.answer_callback_query(cb_id).await?;
        deps.conversations.clear(user).await;
        if is_logged_in(&deps, user) {
            bot.send_message(chat_id, "Admin menu:")
                .reply_markup(main_menu())
                .await?;
        } else {
            ask_login(&bot, chat_id).await?;
        }
        return Ok(());
    }

    if !is_logged_in(&deps, user) {
        bot.answer_callback_query(cb_id).await?;
        return ask_login(&bot, chat_id).await;
    }

    bot.answer_callback_query(cb_id).await?;

    match data.as_str() {
        "gen" => {
            bot.send_message(chat_id, "Pick the key duration:")
                .reply_markup(plan_menu())
                .await?;
        }
        "clients" => {
            let text = match deps.licenses.all_clients() {
                Ok(clients) if clients.is_empty() => "No active clients.".to_string(),
                Ok(clients) => clients
                    .iter()
                    .map(|c| {
                        format!(
                            "{} | {} | expires {}",
                            c.user_id.0,
                            c.plan,
                            c.expires_at.format("%Y-%m-%d %H:%M UTC")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => format!("Failed to load clients: {e}"),
            };
            bot.send_message(chat_id, text)
                .reply_markup(back_menu())
                .await?;
        }
        "usage" => {
            let text = match deps.ledger.summary() {
                Ok(s) => format!(
                    "Estimated spend: {} USD\nModels tracked: {}\nUsers tracked: {}",
                    s.consumed_usd,
                    s.models.len(),
                    s.by_user.len()
                ),
                Err(e) => format!("Failed to load usage: {e}"),
            };
            bot.send_message(chat_id, text)
                .reply_markup(back_menu())
                .await?;
        }
        "pw" => {
            deps.conversations
                .expect(user, PendingInput::OldPassword)
                .await;
            bot.send_message(chat_id, "Enter the current password:")
                .reply_markup(back_menu())
                .await?;
        }
        "prompt" => {
            let kb = InlineKeyboardMarkup::new(vec![
                vec![
                    InlineKeyboardButton::callback("Send new text", "prompt_text"),
                    InlineKeyboardButton::callback("Upload .txt file", "prompt_file"),
                ],
                vec![InlineKeyboardButton::callback("Back", "menu")],
            ]);
            bot.send_message(chat_id, "How do you want to update the system prompt?")
                .reply_markup(kb)
                .await?;
        }
        "prompt_text" => {
            deps.conversations.expect(user, PendingInput::PromptText).await;
            bot.send_message(chat_id, "Send the new prompt text:")
                .reply_markup(back_menu())
                .await?;
        }
        "prompt_file" => {
            deps.conversations.expect(user, PendingInput::PromptFile).await;
            bot.send_message(chat_id, "Upload a .txt file now:")
                .reply_markup(back_menu())
                .await?;
        }
        "logout" => {
            let _ = deps.auth.logout(user);
            deps.conversations.clear(user).await;
            bot.send_message(chat_id, "Logged out.").await?;
        }
        other => {
            if let Some(plan) = other.strip_prefix("gen:").and_then(Plan::parse) {
                generate_key(&bot, chat_id, &deps, plan).await?;
            } else if let Some(page) = other.strip_prefix("list:").and_then(|p| p.parse().ok()) {
                render_keys(&bot, chat_id, &deps, page).await?;
            } else if let Some(key) = other.strip_prefix("rev:") {
                let text = match deps.licenses.revoke_key(key) {
                    Ok(true) => "Key revoked.",
                    Ok(false) => "Key not found.",
                    Err(_) => "Revoke failed.",
                };
                bot.send_message(chat_id, text).reply_markup(back_menu()).await?;
            } else if let Some(key) = other.strip_prefix("del:") {
                let text = match deps.licenses.delete_key(key) {
                    Ok(true) => "Key deleted.",
                    Ok(false) => "Key not found.",
                    Err(_) => "Delete failed.",
                };
                bot.send_message(chat_id, text).reply_markup(back_menu()).await?;
            }
        }
    }

    Ok(())
}

async fn generate_key(
    bot: &Bot,
    chat_id: ChatId,
    deps: &AdminDeps,
    plan: Plan,
) -> ResponseResult<()> {
    let text = match deps.licenses.generate_key(plan, "founder", 1) {
        Ok(k) => format!(
            "Key created:\n{}\nPlan: {}\nStatus: {}",
            k.key,
            k.plan,
            k.status.as_str()
        ),
        Err(e) => format!("Key generation failed: {e}"),
    };
    bot.send_message(chat_id, text)
        .reply_markup(back_menu())
        .await?;
    Ok(())
}

async fn render_keys(
    bot: &Bot,
    chat_id: ChatId,
    deps: &AdminDeps,
    page: usize,
) -> ResponseResult<()> {
    let mut keys = match deps.licenses.list_keys() {
        Ok(v) => v,
        Err(e) => {
            bot.send_message(chat_id, format!("Failed to load keys: {e}"))
                .reply_markup(back_menu())
                .await?;
            return Ok(());
        }
    };
    // Expired keys are hidden here; newest first.
    keys.retain(|k| k.status != KeyStatus::Expired);
    keys.reverse();

    if keys.is_empty() {
        bot.send_message(chat_id, "No keys on file.")
            .reply_markup(back_menu())
            .await?;
        return Ok(());
    }

    let pages = keys.len().div_ceil(PAGE_SIZE);
    let page = page.min(pages - 1);
    let slice = &keys[page * PAGE_SIZE..((page + 1) * PAGE_SIZE).min(keys.len())];

    let lines = slice
        .iter()
        .map(|k| {
            let owner = k
                .owner_id
                .map(|uid| format!(" | uid:{uid}"))
                .unwrap_or_default();
            let expiry = k
                .expires_at
                .map(|t| format!(" | expires {}", t.format("%Y-%m-%d %H:%M UTC")))
                .unwrap_or_default();
            format!("{} | {} | {}{owner}{expiry}", k.key, k.plan, k.status.as_str())
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut rows: Vec<Vec<InlineKeyboardButton>> = slice
        .iter()
        .map(|k| {
            vec![
                InlineKeyboardButton::callback(
                    format!("Revoke {}", key_prefix(&k.key)),
                    format!("rev:{}", k.key),
                ),
                InlineKeyboardButton::callback("Delete", format!("del:{}", k.key)),
            ]
        })
        .collect();

    let mut nav = Vec::new();
    if page > 0 {
        nav.push(InlineKeyboardButton::callback(
            "Prev",
            format!("list:{}", page - 1),
        ));
    }
    nav.push(InlineKeyboardButton::callback(
        format!("Page {}/{}", page + 1, pages),
        "menu",
    ));
    if page + 1 < pages {
        nav.push(InlineKeyboardButton::callback(
            "Next",
            format!("list:{}", page + 1),
        ));
    }
    rows.push(nav);
    rows.push(vec![InlineKeyboardButton::callback("Back", "menu")]);

    bot.send_message(chat_id, lines)
        .reply_markup(InlineKeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, deps: Arc<AdminDeps>) -> ResponseResult<()> {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let user = UserId(from.id.0 as i64);
    let chat_id = msg.chat.id;

    // Prompt upload flow consumes the next document.
    if let Some(doc) = msg.document() {
        if matches!(deps.conversations.take(user).await, Some(PendingInput::PromptFile)) {
            if !is_logged_in(&deps, user) {
                return ask_login(&bot, chat_id).await;
            }
            return receive_prompt_file(&bot, chat_id, &deps, doc).await;
        }
        return Ok(());
    }

    let Some(text) = msg.text().map(|s| s.trim().to_string()) else {
        return Ok(());
    };

    if text == "/start" {
        deps.conversations.clear(user).await;
        if is_logged_in(&deps, user) {
            bot.send_message(chat_id, "Admin menu:")
                .reply_markup(main_menu())
                .await?;
        } else {
            bot.send_message(chat_id, "This is the admin panel. Log in to continue.")
                .reply_markup(login_menu())
                .await?;
        }
        return Ok(());
    }

    let Some(pending) = deps.conversations.take(user).await else {
        if is_logged_in(&deps, user) {
            bot.send_message(chat_id, "Admin menu:")
                .reply_markup(main_menu())
                .await?;
        } else {
            ask_login(&bot, chat_id).await?;
        }
        return Ok(());
    };

    match pending {
        PendingInput::LoginPassword => {
            if deps.auth.verify(&text).unwrap_or(false) {
                let _ = deps.auth.login(user);
                bot.send_message(chat_id, "Logged in.")
                    .reply_markup(main_menu())
                    .await?;
            } else {
                deps.conversations
                    .expect(user, PendingInput::LoginPassword)
                    .await;
                bot.send_message(chat_id, "Wrong password. Try again:")
                    .reply_markup(back_menu())
                    .await?;
            }
        }
        PendingInput::OldPassword => {
            deps.conversations
                .expect(user, PendingInput::NewPassword { old: text })
                .await;
            bot.send_message(chat_id, "Enter the new password:")
                .reply_markup(back_menu())
                .await?;
        }
        PendingInput::NewPassword { old } => {
            let changed = deps.auth.change_password(&old, &text).unwrap_or(false);
            let reply = if changed {
                "Password changed."
            } else {
                "Change failed: the current password was wrong."
            };
            bot.send_message(chat_id, reply)
                .reply_markup(main_menu())
                .await?;
        }
        PendingInput::PromptText => {
            let reply = match deps.prompt.write(&text).await {
                Ok(()) => "System prompt updated.".to_string(),
                Err(e) => format!("Prompt update failed: {e}"),
            };
            bot.send_message(chat_id, reply)
                .reply_markup(main_menu())
                .await?;
        }
        PendingInput::PromptFile => {
            bot.send_message(chat_id, "Upload the prompt as a .txt document.")
                .reply_markup(back_menu())
                .await?;
        }
    }

    Ok(())
}

async fn receive_prompt_file(
    bot: &Bot,
    chat_id: ChatId,
    deps: &AdminDeps,
    doc: &teloxide::types::Document,
) -> ResponseResult<()> {
    let name_ok = doc
        .file_name
        .as_deref()
        .map(|n| n.to_lowercase().ends_with(".txt"))
        .unwrap_or(false);
    if !name_ok {
        bot.send_message(chat_id, "Only .txt files are accepted.")
            .reply_markup(back_menu())
            .await?;
        return Ok(());
    }

    let file = bot.get_file(doc.file.id.clone()).await?;
    let mut buf = std::io::Cursor::new(Vec::new());
    bot.download_file(&file.path, &mut buf).await?;

    let reply = match String::from_utf8(buf.into_inner()) {
        Ok(text) => match deps.prompt.write(text.trim()).await {
            Ok(()) => "System prompt updated from file.".to_string(),
            Err(e) => format!("Prompt update failed: {e}"),
        },
        Err(_) => "The file is not valid UTF-8 text.".to_string(),
    };
    bot.send_message(chat_id, reply)
        .reply_markup(main_menu())
        .await?;
    Ok(())
}

/// First key group for button labels. Stored keys normally follow the
/// XXXX-XXXX-XXXX-XXXX shape, but a hand-edited licenses.json may hold
/// shorter strings; never panic on those.
fn key_prefix(key: &str) -> &str {
    key.get(..4).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::key_prefix;

    #[test]
    fn key_prefix_truncates_well_formed_keys() {
        assert_eq!(key_prefix("AB12-CD34-EF56-GH78"), "AB12");
    }

    #[test]
    fn key_prefix_keeps_short_keys_whole() {
        assert_eq!(key_prefix("AB"), "AB");
        assert_eq!(key_prefix(""), "");
    }
}
