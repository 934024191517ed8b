use gamewarden::app::App;
use gamewarden::config::Config;
use gamewarden::event::MsgType;
use gamewarden::rcon::TcpDialer;
use gamewarden::relay::DiscordRelay;
use gamewarden::{BOT_NAME, CONSOLE_TARGET, Error, commands, handlers, logging, shutdown};
use poise::serenity_prelude::{self as serenity, ChannelId, GatewayIntents};
use std::sync::Arc;
use tracing::info;

/// Main function to run the service
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let config = Config::load().await?;
    let mut app = App::start(config, Arc::new(TcpDialer)).await?;

    let result = if app.data.config.discord.enabled {
        run_discord(&mut app).await
    } else {
        info!(target: CONSOLE_TARGET, "Discord disabled, running core services only");
        shutdown::wait_for_signal().await.map_err(Into::into)
    };

    app.shutdown().await;
    result
}

/// Run the Discord client until it stops or a shutdown signal arrives
async fn run_discord(app: &mut App) -> Result<(), Error> {
    let token = app
        .data
        .config
        .discord
        .token
        .clone()
        .ok_or("discord.token is not set")?;
    let data = app.data.clone();

    // Configure the Poise framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged();
    let mut client = serenity::ClientBuilder::new(token, intents)
        .event_handler(handlers::Handler)
        .framework(framework)
        .await?;

    if let Some(channel) = app.data.config.discord.relay_channel_id.filter(|id| *id != 0) {
        let capacity = app.data.config.events.consumer_queue_capacity;
        let rx = app.data.events.subscribe("discord relay", &MsgType::CHAT, capacity)?;
        let relay = DiscordRelay::new(Arc::clone(&client.http), ChannelId::new(channel));
        let signal = app.shutdown_signal();
        app.spawn("discord relay", relay.run(rx, signal));
    }

    let shard_manager = Arc::clone(&client.shard_manager);
    info!(target: CONSOLE_TARGET, "Starting {BOT_NAME}");
    tokio::select! {
        result = client.start() => result?,
        signal = shutdown::wait_for_signal() => {
            signal?;
            shard_manager.shutdown_all().await;
        }
    }
    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
