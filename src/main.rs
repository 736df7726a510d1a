use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};

use live_courier::client::classifier::{Classifier, HttpClassifier};
use live_courier::client::{HttpPlatform, Platform};
use live_courier::config::EngineConfig;
use live_courier::engine::{Engine, EngineDeps};
use live_courier::sign::{HttpKeyProvider, KeySlot};
use live_courier::store::{ConfigStore, JsonFileStore};

const DEFAULT_API_BASE: &str = "https://api.live.bilibili.com";
const DEFAULT_NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";
const DEFAULT_RULES_URL: &str =
    "https://raw.githubusercontent.com/laplace-live/public/refs/heads/master/artifacts/livesrtream-keywords.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let room = std::env::var("LIVE_COURIER_ROOM")
        .context("LIVE_COURIER_ROOM not set (room number or room URL)")?;

    let session = std::env::var("LIVE_COURIER_SESSION").ok();
    if session.is_none() {
        eprintln!("Warning: LIVE_COURIER_SESSION not set; sends will fail until provided");
    }

    let data_path = std::env::var("LIVE_COURIER_DATA")
        .unwrap_or_else(|_| "./data/live-courier.json".to_string());
    let api_base =
        std::env::var("LIVE_COURIER_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
    let nav_url =
        std::env::var("LIVE_COURIER_NAV_URL").unwrap_or_else(|_| DEFAULT_NAV_URL.to_string());
    let rules_url = match std::env::var("LIVE_COURIER_RULES_URL") {
        Ok(url) if url.is_empty() => None,
        Ok(url) => Some(url),
        Err(_) => Some(DEFAULT_RULES_URL.to_string()),
    };
    let classifier_url = std::env::var("LIVE_COURIER_CLASSIFIER_URL").ok();

    eprintln!("live-courier v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Room: {room}");
    eprintln!("   Store: {data_path}");
    eprintln!("   Type `help` for commands.\n");

    let http = reqwest::Client::new();

    // Signing key material resolves in the background; sends go unsigned
    // until then.
    let keys = Arc::new(KeySlot::new());
    keys.spawn_harvest(Arc::new(HttpKeyProvider::new(http.clone(), nav_url)));

    let platform: Arc<dyn Platform> = Arc::new(HttpPlatform::new(
        http.clone(),
        api_base,
        session.map(SecretString::from),
        Arc::clone(&keys),
    ));

    let classifier = classifier_url
        .map(|url| Arc::new(HttpClassifier::new(http.clone(), url)) as Arc<dyn Classifier>);

    let store: Arc<dyn ConfigStore> = Arc::new(
        JsonFileStore::open(&data_path)
            .await
            .with_context(|| format!("failed to open store at {data_path}"))?,
    );

    let config = EngineConfig {
        room,
        rules_url,
        ..Default::default()
    };
    let engine = Engine::spawn(
        config,
        EngineDeps {
            store,
            platform,
            classifier,
        },
    )
    .await?;

    // Print engine events as they happen.
    let mut events = engine.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{event}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    run_repl(&engine).await;

    engine.shutdown();
    engine.join().await;
    Ok(())
}

/// Minimal stdin REPL driving the engine.
async fn run_repl(engine: &Engine) {
    let stdin = tokio::io::stdin();
    let reader = BufReader::new(stdin);
    let mut lines = reader.lines();

    eprint!("> ");
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        let (cmd, rest) = match line.split_once(' ') {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (line, ""),
        };

        match cmd {
            "" => {}
            "start" => engine.start(),
            "stop" => engine.stop(),
            "status" => println!("{}", engine.status()),
            "send" => engine.send_once(rest),
            "sync" => engine.sync_now(),
            "log" => {
                for entry in engine.log_lines() {
                    println!("{entry}");
                }
            }
            "rules" => {
                let rules = engine.local_rules();
                if rules.is_empty() {
                    println!("(no local rules)");
                }
                for (i, rule) in rules.iter().enumerate() {
                    println!("{i}: {} -> {}", rule.from, rule.to);
                }
            }
            "rule" => handle_rule(engine, rest).await,
            "tpl" => handle_template(engine, rest).await,
            "settings" => println!("{:#?}", engine.settings()),
            "set" => handle_set(engine, rest).await,
            "quit" | "exit" => break,
            "help" => print_help(),
            other => println!("unknown command: {other} (try `help`)"),
        }
        eprint!("> ");
    }
}

async fn handle_rule(engine: &Engine, rest: &str) {
    match rest.split_once(' ') {
        Some(("add", args)) => match args.split_once(' ') {
            Some((from, to)) => {
                if let Err(e) = engine.add_rule(from, to).await {
                    println!("error: {e}");
                }
            }
            None => {
                // Empty replacement deletes the phrase.
                if let Err(e) = engine.add_rule(args, "").await {
                    println!("error: {e}");
                }
            }
        },
        Some(("rm", index)) => match index.parse::<usize>() {
            Ok(index) => match engine.remove_rule(index).await {
                Ok(Some(rule)) => println!("removed {} -> {}", rule.from, rule.to),
                Ok(None) => println!("no rule at index {index}"),
                Err(e) => println!("error: {e}"),
            },
            Err(_) => println!("usage: rule rm <index>"),
        },
        _ => println!("usage: rule add <from> <to> | rule rm <index>"),
    }
}

async fn handle_template(engine: &Engine, rest: &str) {
    let result = match rest.split_once(' ') {
        Some(("set", text)) => {
            // `\n` escapes become real line breaks.
            engine
                .edit_active_template(text.replace("\\n", "\n"))
                .await
        }
        Some(("use", index)) => match index.parse::<usize>() {
            Ok(index) => engine.select_template(index).await,
            Err(_) => {
                println!("usage: tpl use <index>");
                return;
            }
        },
        None if rest == "add" => engine.add_template().await,
        None if rest == "rm" => engine.remove_active_template().await,
        None if rest.is_empty() => {
            let set = engine.templates();
            for (i, template) in set.all().iter().enumerate() {
                let marker = if i == set.active_index() { "*" } else { " " };
                let preview = template.lines().next().unwrap_or("");
                println!("{marker}{i}: {preview}");
            }
            return;
        }
        _ => {
            println!("usage: tpl | tpl set <text> | tpl use <index> | tpl add | tpl rm");
            return;
        }
    };
    if let Err(e) = result {
        println!("error: {e}");
    }
}

async fn handle_set(engine: &Engine, rest: &str) {
    let Some((key, value)) = rest.split_once(' ') else {
        println!("usage: set <interval|maxlen|loglines|color|jitter|noise|evasion> <value>");
        return;
    };
    let value = value.trim();
    let mut settings = engine.settings();
    let parsed = match key {
        "interval" => value.parse().map(|v| settings.msg_send_interval = v).is_ok(),
        "maxlen" => value.parse().map(|v| settings.max_length = v).is_ok(),
        "loglines" => value.parse().map(|v| settings.max_log_lines = v).is_ok(),
        "color" => parse_switch(value).map(|v| settings.random_color = v).is_some(),
        "jitter" => parse_switch(value)
            .map(|v| settings.random_interval = v)
            .is_some(),
        "noise" => parse_switch(value).map(|v| settings.random_char = v).is_some(),
        "evasion" => parse_switch(value).map(|v| settings.ai_evasion = v).is_some(),
        other => {
            println!("unknown setting: {other}");
            return;
        }
    };
    if !parsed {
        println!("invalid value: {value}");
        return;
    }
    if let Err(e) = engine.update_settings(settings).await {
        println!("error: {e}");
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn print_help() {
    println!(
        "commands:\n  \
         start | stop | status        control the dispatch loop\n  \
         send <text>                  one-off send\n  \
         tpl [set|use|add|rm]         manage templates\n  \
         rule [add|rm] / rules        manage local replacement rules\n  \
         sync                         fetch remote rules now\n  \
         set <key> <value>            change a setting (interval, maxlen, color, ...)\n  \
         log | settings               inspect state\n  \
         quit                         exit"
    );
}
