//! Interactive command parsing
//!
//! Every input line is either a `/command` or chat text to broadcast.

/// Help text shown by `/help`
pub const HELP_TEXT: &str = "\
Commands:
  /connect <host[:port]>        connect to a peer
  /peers                        list connected peers
  /myid                         show your identity
  /key                          show the group key fingerprint
  /sendfile <path> [password]   send a file to every peer
  /unlock <n> <password>        open a received password-protected file
  /help                         show this help
  /quit                         leave the chat
Anything else is sent to the group.";

/// A parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Connect(String),
    Peers,
    MyId,
    Key,
    SendFile {
        path: String,
        password: Option<String>,
    },
    Unlock {
        index: usize,
        password: String,
    },
    Help,
    Quit,
    /// Known command with missing or bad arguments
    Usage(&'static str),
    Unknown(String),
    /// Plain chat text
    Say(String),
}

impl ReplCommand {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        let Some(rest) = line.trim_start().strip_prefix('/') else {
            return Some(ReplCommand::Say(line.to_string()));
        };

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        let command = match name {
            "connect" => match args.split_whitespace().next() {
                Some(addr) => ReplCommand::Connect(addr.to_string()),
                None => ReplCommand::Usage("/connect <host[:port]>"),
            },
            "peers" => ReplCommand::Peers,
            "myid" => ReplCommand::MyId,
            "key" => ReplCommand::Key,
            "sendfile" => match args.split_once(char::is_whitespace) {
                Some((path, password)) => ReplCommand::SendFile {
                    path: path.to_string(),
                    password: Some(password.trim().to_string()),
                },
                None if !args.is_empty() => ReplCommand::SendFile {
                    path: args.to_string(),
                    password: None,
                },
                None => ReplCommand::Usage("/sendfile <path> [password]"),
            },
            "unlock" => {
                let parsed = args.split_once(char::is_whitespace).and_then(|(n, pw)| {
                    let index = n.parse::<usize>().ok().filter(|i| *i > 0)?;
                    let password = pw.trim();
                    (!password.is_empty()).then(|| (index, password.to_string()))
                });
                match parsed {
                    Some((index, password)) => ReplCommand::Unlock { index, password },
                    None => ReplCommand::Usage("/unlock <n> <password>"),
                }
            }
            "help" => ReplCommand::Help,
            "quit" | "exit" => ReplCommand::Quit,
            other => ReplCommand::Unknown(other.to_string()),
        };
        Some(command)
    }
}
