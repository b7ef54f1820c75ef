//! FTP control-channel commands and login state.

/// A parsed control-channel line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    User(String),
    Pass(String),
    Quit,
    Noop,
    Syst,
    Feat,
    Type(String),
    Mode(String),
    Stru(String),
    Pwd,
    Cwd(String),
    Cdup,
    Mkd(String),
    Pasv,
    Epsv,
    Stor(String),
    /// Known command the service never permits (listing, retrieval, deletion, renaming)
    Denied(String),
    Unknown(String),
}

const DENIED: [&str; 14] = [
    "LIST", "NLST", "MLSD", "MLST", "RETR", "DELE", "RMD", "XRMD", "RNFR", "RNTO", "SIZE", "MDTM",
    "APPE", "STOU",
];

impl Command {
    pub fn parse(line: &[u8]) -> Self {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };

        match verb.as_str() {
            "USER" => Command::User(arg),
            "PASS" => Command::Pass(arg),
            "QUIT" => Command::Quit,
            "NOOP" => Command::Noop,
            "SYST" => Command::Syst,
            "FEAT" => Command::Feat,
            "TYPE" => Command::Type(arg.to_ascii_uppercase()),
            "MODE" => Command::Mode(arg.to_ascii_uppercase()),
            "STRU" => Command::Stru(arg.to_ascii_uppercase()),
            "PWD" | "XPWD" => Command::Pwd,
            "CWD" | "XCWD" => Command::Cwd(arg),
            "CDUP" | "XCUP" => Command::Cdup,
            "MKD" | "XMKD" => Command::Mkd(arg),
            "PASV" => Command::Pasv,
            "EPSV" => Command::Epsv,
            "STOR" => Command::Stor(arg),
            _ if DENIED.contains(&verb.as_str()) => Command::Denied(verb),
            _ => Command::Unknown(verb),
        }
    }

    /// Allowed before login
    pub fn is_pre_login(&self) -> bool {
        matches!(
            self,
            Command::User(_)
                | Command::Pass(_)
                | Command::Quit
                | Command::Noop
                | Command::Syst
                | Command::Feat
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Login {
    #[default]
    Anonymous,
    /// USER received, waiting for PASS
    Pending(String),
    LoggedIn(String),
}

impl Login {
    pub fn identity(&self) -> Option<&str> {
        match self {
            Login::LoggedIn(identity) => Some(identity),
            _ => None,
        }
    }
}
