use std::io::{self, Write};
use std::time::Duration;

use quest_sdk::messages::{collapse_for_display, Message, MessageKind};
use quest_sdk::model::StateSnapshot;
use quest_sdk::notifications::NotificationFilter;
use quest_sdk::{ApiError, ClientEvent, GameClient, LossOrigin};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::CliError;

const RELOAD_DELAY: Duration = Duration::from_secs(5);
const REDRAW_INTERVAL: Duration = Duration::from_millis(250);

/// A line typed at the shell prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Anything not starting with `:` goes to the server verbatim.
    Game(String),
    Refresh,
    Travel(String),
    Destinations,
    Notifications,
    Read(Value),
    ReadAll,
    Status,
    Logout,
    Help,
    Quit,
}

pub fn parse_line(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(Some(ShellCommand::Game(line.to_string())));
    };
    let (word, arg) = match rest.split_once(char::is_whitespace) {
        Some((word, arg)) => (word, arg.trim()),
        None => (rest, ""),
    };
    let command = match word {
        "refresh" | "r" => ShellCommand::Refresh,
        "travel" | "t" if !arg.is_empty() => ShellCommand::Travel(arg.to_string()),
        "travel" | "t" => return Err("usage: :travel <destination>".into()),
        "destinations" | "map" => ShellCommand::Destinations,
        "notifications" | "n" => ShellCommand::Notifications,
        "read" if !arg.is_empty() => ShellCommand::Read(notification_id(arg)),
        "read" => return Err("usage: :read <notification id>".into()),
        "read-all" => ShellCommand::ReadAll,
        "status" | "s" => ShellCommand::Status,
        "logout" => ShellCommand::Logout,
        "help" | "h" | "?" => ShellCommand::Help,
        "quit" | "q" | "exit" => ShellCommand::Quit,
        other => return Err(format!("unknown shell command :{other} (try :help)")),
    };
    Ok(Some(command))
}

/// Notification ids are numeric on the wire; anything else is sent as text.
fn notification_id(raw: &str) -> Value {
    raw.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn status_line(snapshot: &StateSnapshot, unread: u64) -> String {
    let player = &snapshot.player;
    let mut line = format!(
        "{} the {} | HP {}/{} | MP {}/{}",
        player.name, player.class, player.hp, player.max_hp, player.mana, player.max_mana
    );
    if let Some(position) = &snapshot.position {
        line.push_str(&format!(
            " | {} ({}, {})",
            position.map, position.x, position.y
        ));
    }
    line.push_str(&format!(" | {}", snapshot.state_name));
    if unread > 0 {
        line.push_str(&format!(" | {unread} unread"));
    }
    line
}

fn render(message: &Message) -> String {
    match message.kind {
        MessageKind::Command | MessageKind::Narrative => message.text.clone(),
        MessageKind::System => format!("* {}", message.text),
        MessageKind::Error => format!("! {}", message.text),
    }
}

const HELP: &str = "\
Anything you type is sent to the game. Shell commands:
  :refresh            re-read the game state
  :travel <place>     travel to a destination
  :destinations       list reachable destinations
  :notifications      list unread notifications
  :read <id>          mark one notification as read
  :read-all           mark every notification as read
  :status             print the status line
  :logout             forget the session and start over
  :quit               leave the shell";

enum Flow {
    Continue,
    Quit,
}

pub struct Shell<R> {
    client: GameClient,
    input: Lines<R>,
    cursor: u64,
    last_status: Option<String>,
    offline: Option<String>,
    reload_at: Option<Instant>,
}

impl<R> Shell<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(client: GameClient, input: R) -> Self {
        Self {
            client,
            input: input.lines(),
            cursor: 0,
            last_status: None,
            offline: None,
            reload_at: None,
        }
    }

    /// Picks up the persisted session, or prompts for a new one.
    /// Returns false when input ended before a session existed.
    pub async fn resume_or_start(&mut self) -> Result<bool, CliError> {
        match self.client.resume().await {
            Ok(true) => {
                println!("Resumed your adventure.");
                Ok(true)
            }
            Ok(false) => self.start(None, None).await,
            Err(err) if err.is_session_expired() => {
                println!("Your previous session has expired.");
                self.client.logout();
                self.start(None, None).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Starts a session, prompting for whatever was not supplied.
    pub async fn start(
        &mut self,
        name: Option<String>,
        class: Option<String>,
    ) -> Result<bool, CliError> {
        let name = match name {
            Some(name) => name,
            None => match self.ask("Character name: ").await? {
                Some(name) => name,
                None => return Ok(false),
            },
        };
        let class = match class {
            Some(class) => class,
            None => match self.choose_class().await? {
                Some(class) => class,
                None => return Ok(false),
            },
        };

        match self.client.start_session(&name, &class).await {
            Ok(_) => {
                info!(target: "quest::shell", %name, %class, "session started");
                Ok(true)
            }
            Err(ApiError::Unavailable(detail)) => Err(CliError::ServerUnavailable(detail)),
            Err(err) => Err(err.into()),
        }
    }

    /// Drives the shell until `:quit` or end of input.
    pub async fn run(mut self) -> Result<(), CliError> {
        let mut events = self.client.subscribe();
        let tasks = [
            self.client.start_health_monitor(),
            self.client.start_auto_refresh(),
            self.client.start_notification_poller(),
        ];
        println!("Type :help for shell commands.");

        let result = self.event_loop(&mut events).await;

        for task in &tasks {
            task.stop();
        }
        self.client.shutdown();
        result
    }

    async fn event_loop(
        &mut self,
        events: &mut broadcast::Receiver<ClientEvent>,
    ) -> Result<(), CliError> {
        let mut redraw = interval(REDRAW_INTERVAL);
        redraw.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut needs_prompt = true;

        loop {
            if self.flush() || needs_prompt {
                self.prompt()?;
                needs_prompt = false;
            }
            let reload_at = self.reload_at;

            tokio::select! {
                line = self.input.next_line() => {
                    let Some(line) = line? else {
                        println!();
                        return Ok(());
                    };
                    needs_prompt = true;
                    match parse_line(&line) {
                        Ok(None) => {}
                        Ok(Some(command)) => {
                            if let Flow::Quit = self.handle(command).await? {
                                return Ok(());
                            }
                        }
                        Err(usage) => println!("{usage}"),
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        needs_prompt = true;
                        if let Flow::Quit = self.on_event(event).await? {
                            return Ok(());
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: "quest::shell", skipped, "event receiver lagged");
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
                _ = sleep_until(reload_at.unwrap_or_else(Instant::now)), if reload_at.is_some() => {
                    self.reload_at = None;
                    needs_prompt = true;
                    if let Flow::Quit = self.reload().await? {
                        return Ok(());
                    }
                }
                _ = redraw.tick() => {}
            }
        }
    }

    async fn handle(&mut self, command: ShellCommand) -> Result<Flow, CliError> {
        match command {
            ShellCommand::Game(text) => {
                // Failures are already in the message log.
                if let Err(err) = self.client.execute(&text).await {
                    debug!(target: "quest::shell", error = %err, "command failed");
                }
            }
            ShellCommand::Travel(destination) => {
                if let Err(err) = self.client.travel_to(&destination).await {
                    debug!(target: "quest::shell", error = %err, "travel failed");
                }
            }
            ShellCommand::Refresh => match self.client.reconciler().refresh(true).await {
                Ok(outcome) => debug!(target: "quest::shell", ?outcome, "manual refresh"),
                Err(err) => println!("! refresh failed: {err}"),
            },
            ShellCommand::Destinations => self.print_destinations().await,
            ShellCommand::Notifications => {
                match self
                    .client
                    .notifications()
                    .list(&NotificationFilter::default())
                    .await
                {
                    Ok(page) if page.notifications.is_empty() => println!("No unread notifications."),
                    Ok(page) => {
                        for notification in &page.notifications {
                            println!(
                                "  [{}] ({}) {}",
                                notification.id, notification.kind, notification.message
                            );
                        }
                        println!("{} unread.", page.unread_total);
                    }
                    Err(err) => println!("! could not load notifications: {err}"),
                }
            }
            ShellCommand::Read(id) => match self.client.notifications().mark_read(id).await {
                Ok(_) => println!("Marked as read."),
                Err(err) => println!("! {err}"),
            },
            ShellCommand::ReadAll => match self.client.notifications().mark_all_read().await {
                Ok(_) => println!("All notifications marked as read."),
                Err(err) => println!("! {err}"),
            },
            ShellCommand::Status => {
                self.last_status = None;
                if self.client.reconciler().state().is_none() {
                    println!("No game state yet.");
                }
            }
            ShellCommand::Logout => {
                self.client.logout();
                self.last_status = None;
                println!("Logged out.");
                if !self.start(None, None).await? {
                    return Ok(Flow::Quit);
                }
            }
            ShellCommand::Help => println!("{HELP}"),
            ShellCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    async fn on_event(&mut self, event: ClientEvent) -> Result<Flow, CliError> {
        match event {
            ClientEvent::SessionExpired => {
                println!("Your session has expired. Start a new adventure.");
                self.client.logout();
                self.last_status = None;
                self.reload_at = None;
                if !self.start(None, None).await? {
                    return Ok(Flow::Quit);
                }
            }
            ClientEvent::ConnectionLost { origin, detail } => {
                if self.offline.is_none() {
                    let cause = match origin {
                        LossOrigin::Transport => "requests keep failing",
                        LossOrigin::HealthProbe => "health checks keep failing",
                    };
                    println!(
                        "!! Connection to the game server lost ({cause}): {detail}. Reloading in {}s.",
                        RELOAD_DELAY.as_secs()
                    );
                    self.client
                        .messages()
                        .append(Message::error(format!("Connection lost: {detail}")));
                    self.reload_at = Some(Instant::now() + RELOAD_DELAY);
                }
                self.offline = Some(detail);
            }
            ClientEvent::ConnectionRestored => {
                if self.offline.take().is_some() {
                    println!("Connection restored.");
                }
            }
            ClientEvent::DestinationPickerRequested => self.print_destinations().await,
        }
        Ok(Flow::Continue)
    }

    async fn reload(&mut self) -> Result<Flow, CliError> {
        info!(target: "quest::shell", "reloading after connection loss");
        self.last_status = None;
        match self.client.resume().await {
            Ok(true) => {}
            Ok(false) => {
                if !self.start(None, None).await? {
                    return Ok(Flow::Quit);
                }
            }
            // Expiry arrives as an event; anything else keeps the banner up.
            Err(err) if err.is_session_expired() => {}
            Err(err) => {
                warn!(target: "quest::shell", error = %err, "reload failed");
                println!("! reload failed: {err}");
            }
        }
        Ok(Flow::Continue)
    }

    async fn print_destinations(&self) {
        let destinations = self.client.reconciler().destinations().await;
        if destinations.is_empty() {
            println!("No destinations available.");
            return;
        }
        println!("Choose a destination with :travel <id>");
        for destination in &destinations {
            let id = match &destination.id {
                Value::String(id) => id.clone(),
                other => other.to_string(),
            };
            let marker = if destination.current { " (you are here)" } else { "" };
            println!("  {id:<12} {}{marker}  {}", destination.name, destination.description);
        }
    }

    async fn choose_class(&mut self) -> Result<Option<String>, CliError> {
        let classes = self.client.catalogue().load(false).await;
        println!("Classes:");
        for (id, info) in &classes {
            println!("  {id:<10} {}", info.description);
        }
        loop {
            let Some(choice) = self.ask("Class: ").await? else {
                return Ok(None);
            };
            let choice = choice.to_lowercase();
            if classes.contains_key(&choice) {
                return Ok(Some(choice));
            }
            println!("Unknown class {choice:?}.");
        }
    }

    async fn ask(&mut self, label: &str) -> Result<Option<String>, CliError> {
        loop {
            print!("{label}");
            io::stdout().flush()?;
            match self.input.next_line().await? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(line.trim().to_string())),
            }
        }
    }

    /// Prints new log entries and a changed status line. Returns whether
    /// anything was written.
    fn flush(&mut self) -> bool {
        let (fresh, cursor) = self.client.messages().since(self.cursor);
        self.cursor = cursor;
        let mut wrote = false;
        for message in collapse_for_display(&fresh) {
            println!("{}", render(&message));
            wrote = true;
        }

        if let Some(snapshot) = self.client.reconciler().state() {
            let status = status_line(&snapshot, self.client.notifications().unread_total());
            if self.last_status.as_deref() != Some(status.as_str()) {
                println!("[{status}]");
                self.last_status = Some(status);
                wrote = true;
            }
        }
        wrote
    }

    fn prompt(&self) -> io::Result<()> {
        let mut stdout = io::stdout();
        if self.offline.is_some() {
            write!(stdout, "[offline] ")?;
        }
        write!(stdout, "quest> ")?;
        stdout.flush()
    }
}
