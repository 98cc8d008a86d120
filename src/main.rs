#![deny(clippy::implicit_return)]
#![allow(clippy::needless_return)]

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::Error;
use tokio::sync::mpsc;
use yansi::Paint;

use rivulet::application::cli;
use rivulet::application::repl;
use rivulet::configuration::Config;
use rivulet::configuration::ConfigKey;
use rivulet::domain::models::Event;
use rivulet::domain::services::ChatController;
use rivulet::domain::services::ConversationStore;
use rivulet::domain::services::Sessions;
use rivulet::infrastructure::fallback::FallbackClient;
use rivulet::infrastructure::transport::WebSocketTransport;

fn handle_error(err: Error) {
    eprintln!(
        "{}",
        Paint::red(format!(
            "Oh no! Rivulet has failed with the following app version and error.\n\nVersion: {}\nError: {}",
            env!("CARGO_PKG_VERSION"),
            err
        ))
    );

    let backtrace = err.backtrace();
    if backtrace.to_string() == "disabled backtrace" {
        let args = env::args().collect::<Vec<String>>().join(" ");
        eprintln!("\nRunning the following can help explain further what the issue is:");
        eprintln!("\nRUST_BACKTRACE=1 {args}");
    } else {
        eprintln!("\n{}", backtrace);
    }

    process::exit(1);
}

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        better_panic::Settings::auto().create_panic_handler()(panic_info);
    }));

    let debug_log_dir = env::var("RIVULET_LOG_DIR").unwrap_or_else(|_| {
        return dirs::cache_dir()
            .unwrap()
            .join("rivulet")
            .to_string_lossy()
            .to_string();
    });

    let file_appender = tracing_appender::rolling::never(debug_log_dir, "debug.log");
    let (writer, _guard) = tracing_appender::non_blocking(file_appender);
    if env::var("RUST_LOG")
        .unwrap_or_else(|_| return "".to_string())
        .contains("rivulet")
    {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(writer)
            .init();
    }

    let ready_res = cli::parse().await;
    if let Err(ready_err) = ready_res {
        handle_error(ready_err);
        return;
    }
    if !ready_res.unwrap() {
        process::exit(0);
    }

    let store = match resume_store().await {
        Ok(store) => store,
        Err(err) => {
            handle_error(err);
            return;
        }
    };

    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    let transport = WebSocketTransport::new(event_tx.clone());
    let fallback = Arc::new(FallbackClient::default());
    let mut controller = ChatController::new(store, transport, fallback, event_tx);
    controller.connect();

    if let Err(err) = repl::start(controller, event_rx).await {
        handle_error(err);
        return;
    }

    process::exit(0);
}

async fn resume_store() -> anyhow::Result<ConversationStore> {
    let session_id = Config::get(ConfigKey::SessionID);
    if session_id.is_empty() {
        return Ok(ConversationStore::default());
    }

    let session = Sessions::default().load(&session_id).await?;
    return Ok(ConversationStore::new(session));
}
