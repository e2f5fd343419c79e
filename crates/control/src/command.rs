use std::fmt;

use serde::Serialize;

/// Administrator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Status,
    Test,
    Sync,
    Update,
    Reset,
    Help,
}

/// Keyword → command, in the order shown by `help`.
const COMMANDS: &[(&str, Command, &str)] = &[
    ("status", Command::Status, "Show bot status"),
    ("test", Command::Test, "Check that the bot responds"),
    ("sync", Command::Sync, "Sync groups"),
    ("update", Command::Update, "Check for updates"),
    ("reset", Command::Reset, "Reset the session"),
    ("help", Command::Help, "This help"),
];

impl Command {
    /// Match a whole message, ignoring case and surrounding whitespace.
    pub fn parse(text: &str) -> Option<Self> {
        let keyword = text.trim().to_lowercase();
        COMMANDS
            .iter()
            .find(|(name, ..)| *name == keyword)
            .map(|(_, cmd, _)| *cmd)
    }

    pub fn keyword(self) -> &'static str {
        COMMANDS
            .iter()
            .find(|(_, cmd, _)| *cmd == self)
            .map_or("", |(name, ..)| *name)
    }

    pub fn all() -> impl Iterator<Item = Command> {
        COMMANDS.iter().map(|(_, cmd, _)| *cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Reply for the `help` command.
pub fn help_text() -> String {
    let mut out = String::from("🤖 *AVAILABLE COMMANDS:*\n\n");
    for (name, _, description) in COMMANDS {
        out.push_str(&format!("• *{name}* - {description}\n"));
    }
    out.push_str(
        "\n📝 *To send messages:*\n\
         • Type the message normally\n\
         • Send an image with a caption\n\
         • Send just an image URL",
    );
    out
}
