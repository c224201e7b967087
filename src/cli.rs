use std::path::PathBuf;

use clap::Parser;

use crate::client::BonusChoice;

#[derive(Parser, Debug)]
#[command(name = "hunt-stream")]
#[command(version = "0.3.0")]
#[command(about = "Terminal client for the password-hunt chat game")]
pub struct Args {
    /// Conversation to continue
    #[arg(long, short)]
    pub conversation: String,

    /// Send this one message and exit instead of reading stdin
    #[arg(long, short)]
    pub message: Option<String>,

    /// Image URL to attach to the one-shot message
    #[arg(long)]
    pub image: Option<String>,

    /// Answer a pending bonus offer and exit
    #[arg(long, value_enum)]
    pub bonus: Option<BonusChoice>,

    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Game server base URL (overrides config and HUNT_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Session cookie value (overrides config and HUNT_SESSION)
    #[arg(long)]
    pub session: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// One line typed at the interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Bonus(BonusChoice),
    /// Reload the conversation status.
    Status,
    Send {
        message: String,
        image_url: Option<String>,
    },
    /// Blank line.
    Nothing,
}

/// Interpret a prompt line. Anything that is not a known `:` command is sent
/// as a message.
pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    match trimmed {
        "" => Command::Nothing,
        ":q" | ":quit" => Command::Quit,
        ":claim" => Command::Bonus(BonusChoice::Claim),
        ":continue" => Command::Bonus(BonusChoice::Continue),
        ":status" => Command::Status,
        _ => match trimmed.strip_prefix(":image ") {
            Some(rest) => {
                let rest = rest.trim_start();
                let (url, message) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                Command::Send {
                    message: message.trim().to_string(),
                    image_url: Some(url.to_string()),
                }
            }
            None => Command::Send {
                message: trimmed.to_string(),
                image_url: None,
            },
        },
    }
}
