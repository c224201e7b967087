use std::future::Future;
use std::io::{self, Stdout, Write};

use clap::Parser;
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use hunt_stream::cli::{parse_command, Args, Command};
use hunt_stream::{
    GameApi, HttpGameClient, HuntConfig, StreamOrchestrator, TerminalView, TurnStatus, TurnUpdate,
};

type View = TerminalView<Stdout>;

/// Run `fut` while rendering every update it produces.
async fn drive<F, T>(fut: F, rx: &mut UnboundedReceiver<TurnUpdate>, view: &mut View) -> io::Result<T>
where
    F: Future<Output = T>,
{
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => {
                while let Ok(update) = rx.try_recv() {
                    view.apply(&update)?;
                }
                return Ok(out);
            }
            Some(update) = rx.recv() => view.apply(&update)?,
        }
    }
}

fn prompt(view: &View) -> io::Result<()> {
    let label = if view.input_enabled() { "you> " } else { "(locked)> " };
    print!("{}", label.bright_white().bold());
    io::stdout().flush()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if args.no_color {
        colored::control::set_override(false);
    }

    let mut config = match &args.config {
        Some(path) => HuntConfig::load(path)?,
        None => HuntConfig::default(),
    };
    config.apply_env();
    config.apply_overrides(args.base_url.clone(), args.session.clone());
    config.validate()?;

    let client = HttpGameClient::new(&config.server)?;
    let orchestrator = StreamOrchestrator::new(client, args.conversation.clone(), &config)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut view = TerminalView::new(io::stdout(), !args.no_color);

    match orchestrator.api().site_info().await {
        Ok(info) => {
            if info.is_expired {
                println!("{}", "The event has ended.".bright_red());
            } else if !info.deadline.is_empty() {
                println!("{}: {}", "Deadline".bright_yellow(), info.deadline);
            }
            view.set_contact(info);
        }
        Err(e) => warn!(error = %e, "site info unavailable"),
    }

    let conv = drive(orchestrator.load_conversation(&tx), &mut rx, &mut view).await??;
    view.conversation(&conv)?;

    if let Some(choice) = args.bonus {
        drive(orchestrator.choose_bonus(choice, &tx), &mut rx, &mut view).await??;
        return Ok(());
    }

    if let Some(message) = &args.message {
        view.begin_reply()?;
        let outcome = drive(
            orchestrator.send_message(message, args.image.as_deref(), &tx),
            &mut rx,
            &mut view,
        )
        .await??;
        view.end_reply()?;
        if matches!(outcome.status, TurnStatus::Revealed(_)) {
            // The outcome is presented after the reveal delay.
            tokio::time::sleep(config.turn.reveal_delay()).await;
            tokio::task::yield_now().await;
            while let Ok(update) = rx.try_recv() {
                view.apply(&update)?;
            }
        }
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt(&view)?;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            Some(update) = rx.recv() => {
                view.apply(&update)?;
                continue;
            }
        };
        let Some(line) = line else { break };

        match parse_command(&line) {
            Command::Quit => break,
            Command::Nothing => {}
            Command::Status => {
                let conv = drive(orchestrator.load_conversation(&tx), &mut rx, &mut view).await?;
                match conv {
                    Ok(conv) => view.conversation(&conv)?,
                    Err(e) => println!("{}", e.to_string().bright_red()),
                }
            }
            Command::Bonus(choice) => {
                if let Err(e) = drive(orchestrator.choose_bonus(choice, &tx), &mut rx, &mut view).await? {
                    println!("{}", e.to_string().bright_red());
                }
            }
            Command::Send { message, image_url } => {
                if !view.input_enabled() {
                    println!("{}", "Input is locked for this conversation.".bright_yellow());
                } else {
                    view.begin_reply()?;
                    let result = drive(
                        orchestrator.send_message(&message, image_url.as_deref(), &tx),
                        &mut rx,
                        &mut view,
                    )
                    .await?;
                    view.end_reply()?;
                    if let Err(e) = result {
                        println!("{}", e.to_string().bright_red());
                    }
                }
            }
        }
        prompt(&view)?;
    }

    Ok(())
}
