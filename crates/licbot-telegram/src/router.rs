use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use licbot_core::{
    config::Config, gate::AccessGate, memory::MemoryRegistry, prompt::PromptFile,
};
use licbot_openrouter::OpenRouterClient;

use crate::handlers;

/// Shared services for the user-facing bot.
pub struct AppState {
    pub cfg: Arc<Config>,
    pub gate: Arc<AccessGate>,
    pub model: Arc<OpenRouterClient>,
    pub memory: Arc<MemoryRegistry>,
    pub prompt: Arc<PromptFile>,
}

pub async fn run_polling(bot: Bot, state: Arc<AppState>) -> anyhow::Result<()> {
    if let Ok(me) = bot.get_me().await {
        tracing::info!("chat bot started: @{}", me.username());
    }

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
