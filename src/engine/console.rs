use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::Result;

use crate::error::ConsoleError;
use crate::messenger::{Message, MessageKind, Messenger, RecipientId};

pub const CONSOLE_TAGS: [&str; 2] = ["engine", "console"];

struct Command {
    descr: String,
    recipient: RecipientId,
}

#[derive(Default)]
struct ConsoleState {
    commands: BTreeMap<String, Command>,
    aliases: BTreeMap<String, String>,
    history: Vec<String>,
    log: Vec<String>,
}

/// Splits a line into commands on `;`, ignoring separators inside quotes.
pub fn split_commands(line: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ';' if !in_quotes => commands.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    commands.push(current);
    commands
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Splits a command into whitespace separated words. Double quotes group
/// words and are dropped.
pub fn parse_parameters(command: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_word = false;
    for c in command.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_word {
                    params.push(std::mem::take(&mut current));
                    has_word = false;
                }
            }
            _ => {
                current.push(c);
                has_word = true;
            }
        }
    }
    if has_word {
        params.push(current);
    }
    params
}

/// Command line front end on top of the bus.
///
/// Every command is a protected strict recipient on
/// `{"engine", "console", <name>}`; running a line sends one message per
/// command with the command text as its description.
#[derive(Clone)]
pub struct Console {
    state: Rc<RefCell<ConsoleState>>,
    log_recipient: RecipientId,
}

impl Console {
    /// Registers the built-in `help` command and the console log.
    pub fn new(bus: &mut Messenger) -> Self {
        let state = Rc::new(RefCell::new(ConsoleState::default()));

        let log_state = Rc::clone(&state);
        let log_recipient = bus.register_protected("consolelog", CONSOLE_TAGS, true, move |_, msg| {
            log_state.borrow_mut().log.push(msg.descr().to_string());
            Ok(())
        });

        let console = Self {
            state,
            log_recipient,
        };

        let help_state = Rc::clone(&console.state);
        let registered = console.add_command(
            bus,
            "help",
            "List every command, or describe one: help [command]",
            move |bus, params| {
                let text = {
                    let state = help_state.borrow();
                    match params.first() {
                        Some(name) => state
                            .commands
                            .get(name)
                            .map(|cmd| format!("{name} - {}", cmd.descr)),
                        None => Some(
                            state
                                .commands
                                .iter()
                                .map(|(name, cmd)| format!("{name} - {}", cmd.descr))
                                .collect::<Vec<_>>()
                                .join("\n"),
                        ),
                    }
                };
                match text {
                    Some(text) => bus.send(CONSOLE_TAGS, MessageKind::Info, text),
                    None => bus.send(
                        CONSOLE_TAGS,
                        MessageKind::Warning,
                        format!("No such command \"{}\"", params.join(" ")),
                    ),
                }
                Ok(())
            },
        );
        if let Err(err) = registered {
            tracing::error!(target: "console", "{err}");
        }

        console
    }

    pub fn add_command<F>(
        &self,
        bus: &mut Messenger,
        name: &str,
        descr: &str,
        mut handler: F,
    ) -> Result<(), ConsoleError>
    where
        F: FnMut(&mut Messenger, &[String]) -> Result<()> + 'static,
    {
        if self.state.borrow().commands.contains_key(name) {
            return Err(ConsoleError::DuplicateCommand(name.to_string()));
        }

        let recipient = bus.register_protected(
            format!("console_{name}"),
            ["engine", "console", name],
            true,
            move |bus, msg| {
                let params = parse_parameters(msg.descr());
                handler(bus, params.get(1..).unwrap_or_default())
            },
        );
        self.state.borrow_mut().commands.insert(
            name.to_string(),
            Command {
                descr: descr.to_string(),
                recipient,
            },
        );
        tracing::debug!(target: "console", command = name, "registered console command");
        Ok(())
    }

    pub fn remove_command(&self, bus: &mut Messenger, name: &str) -> bool {
        match self.state.borrow_mut().commands.remove(name) {
            Some(cmd) => bus.unregister_protected(cmd.recipient),
            None => false,
        }
    }

    pub fn add_alias(&self, alias: impl Into<String>, expansion: impl Into<String>) {
        self.state
            .borrow_mut()
            .aliases
            .insert(alias.into(), expansion.into());
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.state.borrow().commands.contains_key(name)
    }

    pub fn history(&self) -> Vec<String> {
        self.state.borrow().history.clone()
    }

    /// Descriptions of every message that reached `{"engine", "console"}`.
    pub fn log(&self) -> Vec<String> {
        self.state.borrow().log.clone()
    }

    /// Command and alias names starting with `prefix`, sorted.
    pub fn complete(&self, prefix: &str) -> Vec<String> {
        let state = self.state.borrow();
        let mut matches: Vec<String> = state
            .commands
            .keys()
            .chain(state.aliases.keys())
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        matches.sort();
        matches.dedup();
        matches
    }

    /// Records history and expands the line into `(name, command)` pairs.
    fn prepare(&self, bus: &mut Messenger, line: &str) -> Result<Vec<(String, String)>, ConsoleError> {
        if line.trim().is_empty() {
            return Err(ConsoleError::Empty);
        }

        let commands = {
            let mut state = self.state.borrow_mut();
            if !line.starts_with(' ') && state.history.last().map(String::as_str) != Some(line) {
                state.history.push(line.to_string());
            }

            let mut commands = Vec::new();
            for command in split_commands(line) {
                let name = parse_parameters(&command).into_iter().next().unwrap_or_default();
                match state.aliases.get(&name) {
                    Some(expansion) => {
                        let rest = command.trim_start().strip_prefix(name.as_str()).unwrap_or("");
                        let expanded = format!("{expansion}{rest}");
                        commands.extend(split_commands(&expanded));
                    }
                    None => commands.push(command),
                }
            }
            commands
        };

        bus.send(CONSOLE_TAGS, MessageKind::Info, format!("> {}", line.trim()));

        let state = self.state.borrow();
        let mut prepared = Vec::new();
        for command in commands {
            let name = parse_parameters(&command).into_iter().next().unwrap_or_default();
            if !state.commands.contains_key(&name) {
                return Err(ConsoleError::UnknownCommand(name));
            }
            prepared.push((name, command));
        }
        Ok(prepared)
    }

    /// Queues every command on the line for the next `handle_messages`.
    /// A line naming an unknown command is refused as a whole.
    pub fn run(&self, bus: &mut Messenger, line: &str) -> Result<(), ConsoleError> {
        let prepared = self.prepare(bus, line).inspect_err(|err| Self::report(bus, err))?;
        for (name, command) in prepared {
            bus.send(["engine", "console", name.as_str()], MessageKind::General, command);
        }
        Ok(())
    }

    /// Runs every command on the line immediately.
    pub fn run_urgent(&self, bus: &mut Messenger, line: &str) -> Result<()> {
        let prepared = self.prepare(bus, line).inspect_err(|err| Self::report(bus, err))?;
        let mut failure = None;
        for (name, command) in prepared {
            let msg = Message::new(
                bus.ticks(),
                ["engine", "console", name.as_str()],
                MessageKind::General,
                command,
            );
            if let Err(err) = bus.send_urgent(msg) {
                failure = Some(err);
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn report(bus: &mut Messenger, err: &ConsoleError) {
        if !matches!(err, ConsoleError::Empty) {
            bus.send(CONSOLE_TAGS, MessageKind::Warning, err.to_string());
        }
    }

    /// Unregisters every command and the console log.
    pub fn detach(&self, bus: &mut Messenger) {
        let commands = std::mem::take(&mut self.state.borrow_mut().commands);
        for cmd in commands.into_values() {
            bus.unregister_protected(cmd.recipient);
        }
        bus.unregister_protected(self.log_recipient);
    }
}
