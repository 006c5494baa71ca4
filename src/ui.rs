use std::path::Path;

use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget, Wrap},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::config::InputMode;
use crate::presentation::{Feedback, StimulusLayout};

const HORIZONTAL_MARGIN: u16 = 2;
const VERTICAL_MARGIN: u16 = 1;
const BUTTON_HEIGHT: u16 = 3;
const NEXT_BUTTON_WIDTH: u16 = 10;

/// What is currently on screen
#[derive(Debug, Clone, Copy)]
pub enum Screen<'a> {
    Blank,
    Instruction(&'a Path),
    Trial {
        layout: &'a StimulusLayout,
        highlight: Option<usize>,
    },
    Feedback(&'a Feedback),
}

/// Clickable areas of the last drawn screen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub choices: Vec<Rect>,
    pub next: Rect,
}

pub struct ScreenView<'a> {
    pub screen: Screen<'a>,
    pub mode: InputMode,
}

struct Areas {
    stimulus: Rect,
    answers: Rect,
    hint: Rect,
}

impl<'a> ScreenView<'a> {
    pub fn new(screen: Screen<'a>, mode: InputMode) -> Self {
        Self { screen, mode }
    }

    fn areas(area: Rect) -> Areas {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .horizontal_margin(HORIZONTAL_MARGIN)
            .vertical_margin(VERTICAL_MARGIN)
            .constraints([
                Constraint::Percentage(55),
                Constraint::Min(BUTTON_HEIGHT),
                Constraint::Length(1),
            ])
            .split(area);
        Areas {
            stimulus: chunks[0],
            answers: chunks[1],
            hint: chunks[2],
        }
    }

    pub fn geometry(&self, area: Rect) -> ScreenGeometry {
        let areas = Self::areas(area);
        match self.screen {
            Screen::Trial { layout, .. } => ScreenGeometry {
                choices: button_grid(areas.answers, layout.choices().len(), self.mode.columns()),
                next: Rect::default(),
            },
            Screen::Instruction(_) if self.mode == InputMode::Pointer => {
                let answers = areas.answers;
                let width = NEXT_BUTTON_WIDTH.min(answers.width);
                let height = BUTTON_HEIGHT.min(answers.height);
                ScreenGeometry {
                    choices: vec![],
                    next: Rect::new(
                        answers.right() - width,
                        answers.bottom() - height,
                        width,
                        height,
                    ),
                }
            }
            _ => ScreenGeometry::default(),
        }
    }

    fn key_hint(&self, slot: usize) -> Option<char> {
        self.mode.response_keys().and_then(|keys| keys.get(slot).copied())
    }

    fn render_buttons(&self, labels: &[String], highlight: Option<usize>, rects: &[Rect], buf: &mut Buffer) {
        let bold_style = Style::default().add_modifier(Modifier::BOLD);
        for (slot, (label, rect)) in labels.iter().zip(rects).enumerate() {
            let text = match self.key_hint(slot) {
                Some(key) => format!("[{key}] {label}"),
                None => label.clone(),
            };
            let border_style = if highlight == Some(slot) {
                Style::default().patch(bold_style).fg(Color::Red)
            } else {
                Style::default()
            };
            Paragraph::new(fit_label(&text, rect.width.saturating_sub(2) as usize))
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).border_style(border_style))
                .render(*rect, buf);
        }
    }

    fn render_hint(&self, text: &str, area: Rect, buf: &mut Buffer) {
        Paragraph::new(Span::styled(
            text.to_string(),
            Style::default().add_modifier(Modifier::ITALIC | Modifier::DIM),
        ))
        .alignment(Alignment::Center)
        .render(area, buf);
    }

    fn answer_hint(&self) -> String {
        match self.mode.response_keys() {
            Some(keys) => format!(
                "answer with {} / (esc)ape",
                keys.iter().map(char::to_string).collect::<Vec<_>>().join(" ")
            ),
            None => "click an answer / (esc)ape".to_string(),
        }
    }
}

impl Widget for &ScreenView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let areas = ScreenView::areas(area);
        let geometry = self.geometry(area);

        match self.screen {
            Screen::Blank => {}
            Screen::Instruction(image) => {
                let stimulus = areas.stimulus.union(areas.answers);
                image_panel("Instructions", image, stimulus, buf);

                if self.mode == InputMode::Pointer {
                    Paragraph::new("Next")
                        .alignment(Alignment::Center)
                        .block(Block::default().borders(Borders::ALL))
                        .render(geometry.next, buf);
                    self.render_hint("click Next to continue / (esc)ape", areas.hint, buf);
                } else {
                    self.render_hint("Press a button to continue", areas.hint, buf);
                }
            }
            Screen::Trial { layout, highlight } => {
                render_stimulus(layout, areas.stimulus, buf);
                self.render_buttons(layout.choices(), highlight, &geometry.choices, buf);
                self.render_hint(&self.answer_hint(), areas.hint, buf);
            }
            Screen::Feedback(feedback) => {
                render_pair(&feedback.painting, &feedback.context, areas.stimulus, buf);
                Paragraph::new(vec![
                    Line::from("The correct artist is:"),
                    Line::from(Span::styled(
                        feedback.correct_artist.clone(),
                        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
                    )),
                ])
                .alignment(Alignment::Center)
                .render(areas.answers, buf);
            }
        }
    }
}

fn render_stimulus(layout: &StimulusLayout, area: Rect, buf: &mut Buffer) {
    match layout {
        StimulusLayout::Study {
            painting, context, ..
        } => render_pair(painting, context, area, buf),
        StimulusLayout::GenTest { painting, .. } | StimulusLayout::RecTest { painting, .. } => {
            image_panel("Painting:", painting, centered(area), buf)
        }
        StimulusLayout::GenRecTest { context, .. } => {
            image_panel("Location:", context, centered(area), buf)
        }
    }
}

fn render_pair(painting: &Path, context: &Path, area: Rect, buf: &mut Buffer) {
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    image_panel("Painting:", painting, halves[0], buf);
    image_panel("Location:", context, halves[1], buf);
}

fn centered(area: Rect) -> Rect {
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Percentage(60),
            Constraint::Percentage(20),
        ])
        .split(area)[1]
}

/// Images are shown by path; the terminal cannot draw them.
fn image_panel(title: &str, image: &Path, area: Rect, buf: &mut Buffer) {
    Paragraph::new(image.display().to_string())
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::styled(
                    title.to_string(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
        )
        .render(area, buf);
}

/// Lay `count` buttons out row by row, `columns` per row, clipped to `area`.
pub fn button_grid(area: Rect, count: usize, columns: usize) -> Vec<Rect> {
    let columns = columns.max(1);
    let width = area.width / columns as u16;
    (0..count)
        .map(|i| {
            let col = (i % columns) as u16;
            let row = (i / columns) as u16;
            Rect::new(
                area.x + col * width,
                area.y.saturating_add(row * BUTTON_HEIGHT),
                width.saturating_sub(1),
                BUTTON_HEIGHT,
            )
            .intersection(area)
        })
        .collect()
}

fn fit_label(label: &str, width: usize) -> String {
    if label.width() <= width {
        return label.to_string();
    }
    if width == 0 {
        return String::new();
    }

    let mut out = String::new();
    let mut used = 0;
    for c in label.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}
