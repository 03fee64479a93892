use crate::conversation::ConversationTurn;
use crate::protocol::NormalizedEvent;
use crossterm::style::Stylize;
use std::io::{self, Write};

const INPUT_PREVIEW: usize = 200;
const OUTPUT_PREVIEW: usize = 300;

/// Prints a conversation to a terminal as events arrive.
pub struct TranscriptPrinter<W: Write> {
    out: W,
    at_line_start: bool,
}

impl<W: Write> TranscriptPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            at_line_start: true,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn user(&mut self, content: &str) -> io::Result<()> {
        self.start_line()?;
        writeln!(self.out, "{}", "You:".blue().bold())?;
        for line in content.lines() {
            writeln!(self.out, "{}", format!("  {line}").blue())?;
        }
        writeln!(self.out, "{}", "Assistant:".yellow().bold())?;
        self.at_line_start = true;
        self.out.flush()
    }

    pub fn event(&mut self, event: &NormalizedEvent, turn: &ConversationTurn) -> io::Result<()> {
        match event {
            NormalizedEvent::Text { content } => {
                write!(self.out, "{}", content.as_str().yellow())?;
                if !content.is_empty() {
                    self.at_line_start = content.ends_with('\n');
                }
            }
            NormalizedEvent::Action { name, input, .. } => {
                self.start_line()?;
                let input = serde_json::to_string(input).unwrap_or_default();
                writeln!(self.out, "{}", format!("tool: {name}(").green().bold())?;
                for line in truncate(&input, INPUT_PREVIEW, "...\n[truncated]").lines() {
                    writeln!(self.out, "{}", format!("  {line}").green())?;
                }
                writeln!(self.out, "{}", ")".green().bold())?;
                self.at_line_start = true;
            }
            NormalizedEvent::ActionResult { output, is_error, .. } => {
                self.start_line()?;
                let name = turn
                    .last_result()
                    .map(|action| action.name.as_str())
                    .unwrap_or("tool");
                let header = format!("→ {name} result:");
                let body = truncate(output, OUTPUT_PREVIEW, "...\n[output truncated]");
                if *is_error {
                    writeln!(self.out, "{}", header.red().bold())?;
                    for line in body.lines() {
                        writeln!(self.out, "{}", format!("  {line}").red())?;
                    }
                } else {
                    writeln!(self.out, "{}", header.cyan().bold())?;
                    for line in body.lines() {
                        writeln!(self.out, "{}", format!("  {line}").cyan())?;
                    }
                }
                self.at_line_start = true;
            }
            NormalizedEvent::Error { content } => {
                self.start_line()?;
                writeln!(self.out, "{}", format!("Error: {content}").red().bold())?;
                self.at_line_start = true;
            }
            NormalizedEvent::Done => {
                self.start_line()?;
                writeln!(self.out)?;
            }
        }
        self.out.flush()
    }

    fn start_line(&mut self) -> io::Result<()> {
        if !self.at_line_start {
            writeln!(self.out)?;
            self.at_line_start = true;
        }
        Ok(())
    }
}

fn truncate(value: &str, max: usize, suffix: &str) -> String {
    match value.char_indices().nth(max) {
        Some((end, _)) => format!("{}{}", &value[..end], suffix),
        None => value.to_string(),
    }
}
