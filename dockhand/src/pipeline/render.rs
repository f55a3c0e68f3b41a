//! Frame rendering
//!
//! Turns a [`Pipeline`] into the text of one frame. Styling comes from the
//! [`Theme`] handed to the renderer; nothing here is global.

use crossterm::style::{Attribute, Color, Stylize};

use crate::pipeline::machine::Pipeline;
use crate::pipeline::stage::Stage;

/// Lines of the live log pane shown while a stage runs
pub const LOG_TAIL_LINES: usize = 5;

/// Colours, glyphs and spinner frames of the live display
#[derive(Debug, Clone)]
pub struct Theme {
    /// Emit ANSI styling; off for plain output and tests
    pub styled: bool,
    pub spinner: Color,
    pub success: Color,
    pub pending: Color,
    pub cancel: Color,
    pub error: Color,
    pub accent: Color,
    pub banner_bg: Color,
    pub spinner_frames: Vec<&'static str>,
    pub success_glyph: &'static str,
    pub pending_glyph: &'static str,
    pub error_glyph: &'static str,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            styled: true,
            spinner: Color::AnsiValue(63),
            success: Color::Rgb {
                r: 0x04,
                g: 0xb5,
                b: 0x75,
            },
            pending: Color::AnsiValue(240),
            cancel: Color::AnsiValue(220),
            error: Color::Rgb { r: 0xff, g: 0, b: 0 },
            accent: Color::AnsiValue(69),
            banner_bg: Color::Rgb {
                r: 0x41,
                g: 0x48,
                b: 0x68,
            },
            spinner_frames: vec!["∙", "∘", "○", "◌", "○", "∘"],
            success_glyph: "✔",
            pending_glyph: "•",
            error_glyph: "⚠",
        }
    }
}

impl Theme {
    /// The default theme without ANSI styling
    pub fn plain() -> Self {
        Self {
            styled: false,
            ..Self::default()
        }
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.styled {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn faint(&self, text: &str) -> String {
        if self.styled {
            text.attribute(Attribute::Dim).to_string()
        } else {
            text.to_string()
        }
    }

    fn banner(&self, text: &str) -> String {
        if self.styled {
            text.white().on(self.banner_bg).to_string()
        } else {
            text.to_string()
        }
    }

    fn spinner_frame(&self, tick: usize) -> &str {
        if self.spinner_frames.is_empty() {
            return "";
        }
        self.spinner_frames[tick % self.spinner_frames.len()]
    }
}

/// Renders pipeline frames for a terminal of a given width
#[derive(Debug, Clone)]
pub struct Renderer {
    theme: Theme,
    width: usize,
    diagnostic_file: String,
}

impl Renderer {
    pub fn new(theme: Theme, width: usize, diagnostic_file: impl Into<String>) -> Self {
        Self {
            theme,
            width: width.max(20),
            diagnostic_file: diagnostic_file.into(),
        }
    }

    /// Render the whole frame
    pub fn render(&self, pipeline: &Pipeline) -> String {
        let mut lines = Vec::new();
        lines.push(String::new());
        lines.push(self.banner_line(pipeline.banner()));
        lines.push(String::new());

        let active = pipeline.active_index();
        for (index, stage) in pipeline.stages().iter().enumerate() {
            if pipeline.all_done() || index < active {
                lines.push(self.success_line(stage));
            } else if index == active {
                self.active_stage(&mut lines, pipeline, stage);
            } else if pipeline.quitting() {
                lines.push(
                    self.theme
                        .paint(&format!(" CANCELLED {}", stage.title), self.theme.cancel),
                );
            } else {
                lines.push(self.theme.paint(
                    &format!(" {} {}", self.theme.pending_glyph, stage.title),
                    self.theme.pending,
                ));
            }
        }

        if let Some((duration, url)) = pipeline.result() {
            lines.push(String::new());
            lines.push(self.theme.paint(
                &format!(" 🚀 Deployed successfully in {}.", format_duration(duration)),
                self.theme.accent,
            ));
            lines.push(self.theme.paint(
                &format!(" 😎 View your app at https://{}", url),
                self.theme.accent,
            ));
        }

        lines.push(String::new());
        lines.join("\n")
    }

    fn banner_line(&self, banner: &str) -> String {
        let width = self.width;
        let len = banner.chars().count();
        let left = width.saturating_sub(len) / 2;
        let right = width.saturating_sub(len + left);
        let padded = format!("{}{}{}", " ".repeat(left), banner, " ".repeat(right));
        self.theme.banner(&padded)
    }

    fn success_line(&self, stage: &Stage) -> String {
        self.theme.paint(
            &format!(" {} {}", self.theme.success_glyph, stage.success_label),
            self.theme.success,
        )
    }

    fn active_stage(&self, lines: &mut Vec<String>, pipeline: &Pipeline, stage: &Stage) {
        if stage.has_error {
            lines.push(self.theme.paint(
                &format!(" {} {}", self.theme.error_glyph, stage.title),
                self.theme.error,
            ));
            let count = stage.logs.len();
            for (i, log) in stage.logs.iter().enumerate() {
                let branch = if i + 1 == count { "└──" } else { "├──" };
                for (j, part) in log.trim_end().lines().enumerate() {
                    let prefix = if j == 0 { branch } else { "   " };
                    lines.push(
                        self.theme
                            .paint(&format!(" {} {}", prefix, part), self.theme.error),
                    );
                }
            }
            lines.push(String::new());
            lines.push(self.theme.paint(
                &format!(" ⚠️ Check {} for more details", self.diagnostic_file),
                self.theme.accent,
            ));
            return;
        }

        if pipeline.quitting() {
            lines.push(
                self.theme
                    .paint(&format!(" CANCELLED {}", stage.title), self.theme.cancel),
            );
            return;
        }

        lines.push(format!(
            " {} {}",
            self.theme
                .paint(self.theme.spinner_frame(pipeline.spinner_tick()), self.theme.spinner),
            stage.title
        ));

        if stage.captures_logs && !stage.logs.is_empty() {
            self.log_pane(lines, stage.tail(LOG_TAIL_LINES));
        }
    }

    fn log_pane(&self, lines: &mut Vec<String>, logs: &[String]) {
        let inner = (self.width * 8 / 10).saturating_sub(4).max(10);
        let border = "─".repeat(inner + 2);
        lines.push(self.theme.paint(&format!(" ╭{}╮", border), self.theme.accent));
        for log in logs {
            let text = truncate(log.trim_end(), inner);
            let pad = inner.saturating_sub(text.chars().count());
            lines.push(format!(
                " {} {}{} {}",
                self.theme.paint("│", self.theme.accent),
                self.theme.faint(&text),
                " ".repeat(pad),
                self.theme.paint("│", self.theme.accent)
            ));
        }
        lines.push(self.theme.paint(&format!(" ╰{}╯", border), self.theme.accent));
    }
}

fn truncate(text: &str, width: usize) -> String {
    // Tabs and carriage returns break the pane borders
    let clean: String = text
        .chars()
        .map(|c| if c == '\t' { ' ' } else { c })
        .filter(|c| *c != '\r')
        .collect();
    if clean.chars().count() <= width {
        return clean;
    }
    let mut out: String = clean.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Human readable duration, second precision
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}.{}s", secs, duration.subsec_millis() / 100)
    }
}
