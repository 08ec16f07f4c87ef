//! Line editor for the interactive wizard
//!
//! reedline blocks while reading, so the editor lives on its own thread. Each
//! prompt is released by [`LineEditor::next_line`], which keeps the prompt
//! from being drawn before the previous reply has been printed.

use std::path::PathBuf;
use std::sync::{mpsc as std_mpsc, Arc, RwLock};
use std::thread;

use anyhow::Result;
use reedline::{
    default_emacs_keybindings, ColumnarMenu, Completer, DefaultPrompt, DefaultPromptSegment,
    Emacs, FileBackedHistory, KeyCode, KeyModifiers, MenuBuilder, Reedline, ReedlineEvent,
    ReedlineMenu, Signal, Span, Suggestion,
};
use tokio::sync::mpsc;

use crate::messages::WizardView;

const VERBS: [&str; 10] = [
    "role", "contact", "mode", "scope", "back", "commit", "another", "state", "help", "quit",
];
const MODES: [&str; 2] = ["contribute", "review"];
const HISTORY_SIZE: usize = 1000;
const COMPLETION_MENU: &str = "completion_menu";

/// Words offered for completion, refreshed from the latest wizard view
#[derive(Debug, Default)]
pub struct Vocabulary {
    roles: Vec<String>,
    modes: Vec<String>,
    units: Vec<String>,
}

impl Vocabulary {
    pub fn update(&mut self, view: &WizardView) {
        if !view.roles.is_empty() {
            self.roles = view.roles.iter().map(|option| option.role.clone()).collect();
        }
        self.modes = view.state.available_modes.clone();
        self.units = view
            .units
            .iter()
            .filter(|status| status.available)
            .map(|status| status.unit.to_string())
            .collect();
    }

    /// Where the word under the cursor starts, and its candidates
    pub fn candidates(&self, line: &str, pos: usize) -> (usize, Vec<String>) {
        let line = line.get(..pos).unwrap_or(line);
        let start = line.rfind(' ').map(|i| i + 1).unwrap_or(0);
        let word = &line[start..];
        let previous: Vec<&str> = line[..start].split_whitespace().collect();

        let pool: Vec<&str> = match previous.as_slice() {
            [] => VERBS.to_vec(),
            ["role"] => self.roles.iter().map(String::as_str).collect(),
            ["mode"] if self.modes.is_empty() => MODES.to_vec(),
            ["mode"] => self.modes.iter().map(String::as_str).collect(),
            ["commit"] => vec!["notify"],
            ["scope", ..] => self
                .units
                .iter()
                .map(String::as_str)
                .filter(|unit| !previous.contains(unit))
                .collect(),
            _ => Vec::new(),
        };

        let words = pool
            .into_iter()
            .filter(|candidate| candidate.starts_with(word))
            .map(String::from)
            .collect();
        (start, words)
    }
}

struct WizardCompleter(Arc<RwLock<Vocabulary>>);

impl Completer for WizardCompleter {
    fn complete(&mut self, line: &str, pos: usize) -> Vec<Suggestion> {
        let Ok(vocabulary) = self.0.read() else {
            return Vec::new();
        };
        let (start, words) = vocabulary.candidates(line, pos);
        words
            .into_iter()
            .map(|value| Suggestion {
                value,
                span: Span::new(start, pos),
                append_whitespace: true,
                ..Suggestion::default()
            })
            .collect()
    }
}

/// Lines typed by the operator
pub struct LineEditor {
    lines: mpsc::Receiver<String>,
    ready: std_mpsc::Sender<String>,
    vocabulary: Arc<RwLock<Vocabulary>>,
}

impl LineEditor {
    pub fn spawn(history: Option<PathBuf>) -> Self {
        let (line_tx, lines) = mpsc::channel(1);
        let (ready, ready_rx) = std_mpsc::channel();
        let vocabulary = Arc::new(RwLock::new(Vocabulary::default()));
        let completer = WizardCompleter(vocabulary.clone());

        thread::spawn(move || {
            if let Err(e) = read_lines(history, completer, line_tx, ready_rx) {
                tracing::error!("Line editor stopped: {}", e);
            }
        });

        Self {
            lines,
            ready,
            vocabulary,
        }
    }

    /// Prompt for the next line; `None` once the operator leaves
    pub async fn next_line(&mut self, stage: &str) -> Option<String> {
        self.ready.send(stage.replace('_', " ")).ok()?;
        self.lines.recv().await
    }

    pub fn learn(&self, view: &WizardView) {
        if let Ok(mut vocabulary) = self.vocabulary.write() {
            vocabulary.update(view);
        }
    }
}

fn read_lines(
    history: Option<PathBuf>,
    completer: WizardCompleter,
    lines: mpsc::Sender<String>,
    ready: std_mpsc::Receiver<String>,
) -> Result<()> {
    let history = match history {
        Some(path) => FileBackedHistory::with_file(HISTORY_SIZE, path)?,
        None => FileBackedHistory::new(HISTORY_SIZE)?,
    };

    let mut keybindings = default_emacs_keybindings();
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Tab,
        ReedlineEvent::UntilFound(vec![
            ReedlineEvent::Menu(COMPLETION_MENU.to_string()),
            ReedlineEvent::MenuNext,
        ]),
    );
    let menu = ColumnarMenu::default().with_name(COMPLETION_MENU);

    let mut editor = Reedline::create()
        .with_history(Box::new(history))
        .with_completer(Box::new(completer))
        .with_menu(ReedlineMenu::EngineCompleter(Box::new(menu)))
        .with_edit_mode(Box::new(Emacs::new(keybindings)));

    while let Ok(stage) = ready.recv() {
        let prompt = DefaultPrompt::new(
            DefaultPromptSegment::Basic(stage),
            DefaultPromptSegment::Empty,
        );
        let line = match editor.read_line(&prompt)? {
            Signal::Success(line) => line,
            // Ctrl-C drops the current line
            Signal::CtrlC => String::new(),
            Signal::CtrlD => break,
        };
        if lines.blocking_send(line).is_err() {
            break;
        }
    }

    Ok(())
}
