use std::sync::Arc;

use teloxide::Bot;

use licbot_core::{
    admin::{AdminAuth, AdminConversations},
    config::Config,
    gate::AccessGate,
    license::LicenseService,
    memory::MemoryRegistry,
    prompt::PromptFile,
    store::Store,
    sweeper::ExpirySweeper,
    usage::UsageLedger,
};
use licbot_openrouter::OpenRouterClient;
use licbot_telegram::{admin::AdminDeps, router::AppState};

#[tokio::main]
async fn main() -> Result<(), licbot_core::Error> {
    licbot_core::logging::init("licbot")?;

    let cfg = Arc::new(Config::load()?);

    let store = Store::new(&cfg.data_dir);
    let licenses = Arc::new(LicenseService::new(store.clone()));
    let ledger = Arc::new(UsageLedger::new(store));
    let gate = Arc::new(AccessGate::new(licenses.clone(), ledger.clone()));

    let model = Arc::new(OpenRouterClient::new(
        cfg.openrouter_api_key.clone(),
        cfg.request_timeout,
    ));
    let memory = Arc::new(MemoryRegistry::new(cfg.memory_limit));
    let prompt = Arc::new(PromptFile::load(&cfg.prompt_file)?);

    // Runs for the lifetime of the process.
    let _sweeper = ExpirySweeper::start(licenses.clone(), cfg.sweep_interval, cfg.purge_expired);

    // Admin bot is optional; config guarantees a password when it's on.
    if let (Some(token), Some(password)) = (&cfg.admin_bot_token, &cfg.admin_password) {
        let deps = Arc::new(AdminDeps {
            auth: AdminAuth::provision(&cfg.data_dir, password)?,
            conversations: AdminConversations::default(),
            licenses: licenses.clone(),
            ledger: ledger.clone(),
            prompt: prompt.clone(),
        });
        let admin_bot = Bot::new(token.clone());
        tokio::spawn(async move {
            if let Err(e) = licbot_telegram::admin::run_polling(admin_bot, deps).await {
                tracing::error!("admin bot failed: {e}");
            }
        });
    } else {
        tracing::info!("ADMIN_BOT_TOKEN not set; admin bot disabled");
    }

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        gate,
        model,
        memory,
        prompt,
    });

    let bot = Bot::new(cfg.telegram_bot_token.clone());
    licbot_telegram::router::run_polling(bot, state)
        .await
        .map_err(|e| licbot_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
