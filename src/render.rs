//! Terminal view for [`TurnUpdate`]s.
//!
//! Reply text arrives as the full visible transcript on every update. The
//! view prints only the new suffix; when the transcript is rewritten (redaction
//! or an error replacing the reply) the whole reply is printed again.

use std::io::{self, Write};

use colored::*;

use crate::client::{ConversationStatus, SiteInfo};
use crate::event::BonusOffer;
use crate::orchestrator::{StatusLevel, TurnUpdate};

fn paint(color: bool, text: &str, style: fn(&str) -> ColoredString) -> String {
    if color {
        style(text).to_string()
    } else {
        text.to_string()
    }
}

pub struct TerminalView<W: Write> {
    out: W,
    color: bool,
    shown: String,
    input_enabled: bool,
    contact: Option<SiteInfo>,
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            shown: String::new(),
            input_enabled: true,
            contact: None,
        }
    }

    /// Admin contact details printed with a win.
    pub fn set_contact(&mut self, info: SiteInfo) {
        self.contact = Some(info);
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Header for the next assistant reply.
    pub fn begin_reply(&mut self) -> io::Result<()> {
        self.shown.clear();
        let label = paint(self.color, "assistant>", |s| s.bright_cyan().bold());
        write!(self.out, "{} ", label)?;
        self.out.flush()
    }

    pub fn end_reply(&mut self) -> io::Result<()> {
        self.shown.clear();
        writeln!(self.out)
    }

    pub fn apply(&mut self, update: &TurnUpdate) -> io::Result<()> {
        match update {
            TurnUpdate::Text(text) => self.text(text)?,
            TurnUpdate::InputEnabled(enabled) => self.input_enabled = *enabled,
            TurnUpdate::Status { level, message } => self.status(*level, message)?,
            TurnUpdate::TurnCounter {
                turn_count,
                max_turns,
            } => {
                let line = format!(
                    "[turn {}/{}, {} left]",
                    turn_count,
                    max_turns,
                    max_turns.saturating_sub(*turn_count)
                );
                let line = paint(self.color, &line, |s| s.bright_blue());
                writeln!(self.out, "\n{}", line)?;
            }
            TurnUpdate::Revealed { found, via_bonus } => {
                let headline = if *via_bonus {
                    "Consolation prize claimed!".to_string()
                } else if found.is_first_winner {
                    "You are the first to find the secret!".to_string()
                } else {
                    "Secret found, but someone got there first.".to_string()
                };
                let headline = paint(self.color, &headline, |s| s.bright_green().bold());
                writeln!(self.out, "\n{}", headline)?;
                writeln!(
                    self.out,
                    "{}: {}",
                    paint(self.color, "Secret", |s| s.bright_yellow()),
                    found.password
                )?;
                if !found.prize_amount.is_empty() {
                    writeln!(
                        self.out,
                        "{}: {} ({})",
                        paint(self.color, "Prize", |s| s.bright_yellow()),
                        found.prize_amount,
                        found.prize_type
                    )?;
                }
                self.contact()?;
            }
            TurnUpdate::BonusOffer(offer) => self.bonus_offer(offer)?,
            TurnUpdate::Failed(message) => {
                let line = paint(self.color, message, |s| s.bright_red());
                writeln!(self.out, "\n{}", line)?;
            }
        }
        self.out.flush()
    }

    fn text(&mut self, text: &str) -> io::Result<()> {
        match text.strip_prefix(self.shown.as_str()) {
            Some(delta) => write!(self.out, "{}", delta)?,
            None => {
                let note = paint(self.color, "(reply updated)", |s| s.dimmed());
                write!(self.out, "\n{}\n{}", note, text)?;
            }
        }
        self.shown = text.to_string();
        Ok(())
    }

    fn status(&mut self, level: StatusLevel, message: &str) -> io::Result<()> {
        let line = match level {
            StatusLevel::Info => paint(self.color, message, |s| s.normal()),
            StatusLevel::Success => paint(self.color, message, |s| s.bright_green()),
            StatusLevel::Warning => paint(self.color, message, |s| s.bright_yellow()),
            StatusLevel::Error => paint(self.color, message, |s| s.bright_red()),
        };
        writeln!(self.out, "\n{}", line)
    }

    fn contact(&mut self) -> io::Result<()> {
        let Some(info) = &self.contact else {
            return Ok(());
        };
        let channels: Vec<String> = [
            ("QQ", &info.admin_qq),
            ("WeChat", &info.admin_wechat),
            ("Email", &info.admin_email),
        ]
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| format!("{} {}", name, value))
        .collect();
        if channels.is_empty() {
            return Ok(());
        }
        writeln!(
            self.out,
            "{}: {}",
            paint(self.color, "Contact the admin to claim", |s| s.bright_yellow()),
            channels.join(", ")
        )
    }

    fn bonus_offer(&mut self, offer: &BonusOffer) -> io::Result<()> {
        let rule = paint(self.color, &"=".repeat(50), |s| s.bright_blue());
        writeln!(self.out, "\n{}", rule)?;
        writeln!(
            self.out,
            "{}",
            paint(self.color, "BONUS OFFER", |s| s.bright_magenta().bold())
        )?;
        writeln!(
            self.out,
            "After {} turns you may take a consolation prize of {}.",
            offer.total_turns, offer.consolation_prize_amount
        )?;
        if offer.grand_available {
            writeln!(self.out, "The main prize is still available if you keep going.")?;
        } else {
            writeln!(self.out, "The main prize has already been claimed.")?;
        }
        writeln!(self.out, "Type :claim or :continue to answer.")?;
        writeln!(self.out, "{}", rule)
    }

    /// Summary line shown once after loading a conversation.
    pub fn conversation(&mut self, conv: &ConversationStatus) -> io::Result<()> {
        let state = if conv.is_success {
            "won"
        } else if conv.is_active {
            "active"
        } else {
            "ended"
        };
        writeln!(
            self.out,
            "{}: {} ({}, turn {}/{})",
            paint(self.color, "Conversation", |s| s.bright_yellow()),
            conv.id,
            state,
            conv.turn_count,
            conv.max_turns
        )?;
        self.out.flush()
    }
}
