//! Command-line parsing.
//!
//! Each verb is a route in a [`DispatchTable`]: the verb is the event kind,
//! the remaining arguments are the target, and the handler turns them into a
//! [`Command`].

use studycache_core::auth::security::parse_unit_number;
use studycache_core::dispatch::{DispatchTable, Registrar};

pub type Routes = DispatchTable<String, Vec<String>, Result<Command, String>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { username: String, email: String },
    Logout,
    WhoAmI,
    Visit { unit_type: String, unit_number: i64 },
    Complete {
        unit_type: String,
        unit_number: i64,
        score: Option<f64>,
        time_spent: Option<i64>,
    },
    Progress,
    Badges,
    Subscribe { email: String },
    Stats,
    Music(MusicCommand),
    Key(KeyCommand),
    Cache(CacheCommand),
    Push { payload: Option<String> },
    Click { action: String, windows: Vec<String> },
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MusicCommand {
    Status,
    Play,
    Pause,
    Toggle,
    Volume(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyCommand {
    Set(String),
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheCommand {
    Install,
    Activate,
    Info,
    Clear,
    Sync,
    Add(Vec<String>),
    Get { url: String, document: bool },
    Online(bool),
}

pub const USAGE: &str = "\
Usage: studycache <command> [args]

Account:
  login <username> <email>      Log in, creating the account on first use
  logout                        Forget the saved session
  whoami                        Show the logged-in user
  stats                         Count registered users

Progress:
  visit <type> <number>         Record a visit to a unit
  complete <type> <number> [score] [seconds]
                                Mark a unit completed
  progress                      Show completed units
  badges                        Show achievements

Other:
  subscribe <email>             Subscribe to the newsletter
  music [play|pause|toggle|volume <0-1>]
  key set <api-key> | key delete
                                Keep the store API key in the OS keychain
  push [json]                   Render a push notification
  click <action> [window-url...]
                                Route a notification click

Offline cache:
  cache install | activate | info | clear | sync
  cache add <url>...            Cache extra resources
  cache get <url> [--document]  Fetch through the cache
  cache online | offline        Set connectivity
";

/// Build the command routes.
pub fn routes() -> Routes {
    let mut table = Routes::new();
    table.wire(register);
    table
}

fn register(r: &mut Registrar<'_, String, Vec<String>, Result<Command, String>>) {
    r.on("login".into(), |a: &Vec<String>| a.len() == 2, |a| {
        Ok(Command::Login {
            username: a[0].clone(),
            email: a[1].clone(),
        })
    })
    .on("logout".into(), |a: &Vec<String>| a.is_empty(), |_| Ok(Command::Logout))
    .on("whoami".into(), |a: &Vec<String>| a.is_empty(), |_| Ok(Command::WhoAmI))
    .on("stats".into(), |a: &Vec<String>| a.is_empty(), |_| Ok(Command::Stats))
    .on("visit".into(), |a: &Vec<String>| a.len() == 2, |a| {
        Ok(Command::Visit {
            unit_type: a[0].clone(),
            unit_number: unit_number(&a[1])?,
        })
    })
    .on(
        "complete".into(),
        |a: &Vec<String>| (2..=4).contains(&a.len()),
        |a| {
            Ok(Command::Complete {
                unit_type: a[0].clone(),
                unit_number: unit_number(&a[1])?,
                score: optional(a.get(2), "score")?,
                time_spent: optional(a.get(3), "seconds")?,
            })
        },
    )
    .on("progress".into(), |a: &Vec<String>| a.is_empty(), |_| Ok(Command::Progress))
    .on("badges".into(), |a: &Vec<String>| a.is_empty(), |_| Ok(Command::Badges))
    .on("subscribe".into(), |a: &Vec<String>| a.len() == 1, |a| {
        Ok(Command::Subscribe { email: a[0].clone() })
    })
    .on("music".into(), |_| true, |a| music(a).map(Command::Music))
    .on("key".into(), |_| true, |a| key(a).map(Command::Key))
    .on("cache".into(), |a: &Vec<String>| !a.is_empty(), |a| cache(a).map(Command::Cache))
    .on("push".into(), |a: &Vec<String>| a.len() <= 1, |a| {
        Ok(Command::Push {
            payload: a.first().cloned(),
        })
    })
    .on("click".into(), |a: &Vec<String>| !a.is_empty(), |a| {
        Ok(Command::Click {
            action: a[0].clone(),
            windows: a[1..].to_vec(),
        })
    })
    .on("help".into(), |_| true, |_| Ok(Command::Help));
}

/// Parse `args` (without the program name).
pub fn parse(routes: &Routes, args: &[String]) -> Result<Command, String> {
    let Some((verb, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };
    let verb = match verb.as_str() {
        "-h" | "--help" => "help".to_string(),
        other => other.to_string(),
    };

    routes
        .dispatch(&verb, &rest.to_vec())
        .into_iter()
        .next()
        .unwrap_or_else(|| Err(format!("Unrecognised command: {}", args.join(" "))))
}

fn unit_number(input: &str) -> Result<i64, String> {
    parse_unit_number(input).map_err(|e| e.to_string())
}

fn optional<T: std::str::FromStr>(value: Option<&String>, name: &str) -> Result<Option<T>, String> {
    value
        .map(|v| v.parse::<T>().map_err(|_| format!("Invalid {}: {}", name, v)))
        .transpose()
}

fn music(args: &[String]) -> Result<MusicCommand, String> {
    match args {
        [] => Ok(MusicCommand::Status),
        [cmd] if cmd == "play" => Ok(MusicCommand::Play),
        [cmd] if cmd == "pause" => Ok(MusicCommand::Pause),
        [cmd] if cmd == "toggle" => Ok(MusicCommand::Toggle),
        [cmd, value] if cmd == "volume" => value
            .parse::<f32>()
            .map(MusicCommand::Volume)
            .map_err(|_| format!("Invalid volume: {}", value)),
        _ => Err(format!("Unrecognised music command: {}", args.join(" "))),
    }
}

fn key(args: &[String]) -> Result<KeyCommand, String> {
    match args {
        [cmd, value] if cmd == "set" => Ok(KeyCommand::Set(value.clone())),
        [cmd] if cmd == "delete" => Ok(KeyCommand::Delete),
        _ => Err("Usage: key set <api-key> | key delete".to_string()),
    }
}

fn cache(args: &[String]) -> Result<CacheCommand, String> {
    let (sub, rest) = args
        .split_first()
        .ok_or_else(|| "Missing cache command".to_string())?;
    match (sub.as_str(), rest) {
        ("install", []) => Ok(CacheCommand::Install),
        ("activate", []) => Ok(CacheCommand::Activate),
        ("info", []) => Ok(CacheCommand::Info),
        ("clear", []) => Ok(CacheCommand::Clear),
        ("sync", []) => Ok(CacheCommand::Sync),
        ("online", []) => Ok(CacheCommand::Online(true)),
        ("offline", []) => Ok(CacheCommand::Online(false)),
        ("add", urls) if !urls.is_empty() => Ok(CacheCommand::Add(urls.to_vec())),
        ("get", [url]) => Ok(CacheCommand::Get {
            url: url.clone(),
            document: false,
        }),
        ("get", [url, flag]) if flag == "--document" => Ok(CacheCommand::Get {
            url: url.clone(),
            document: true,
        }),
        _ => Err(format!("Unrecognised cache command: {}", args.join(" "))),
    }
}
