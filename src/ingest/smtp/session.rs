//! SMTP conversation as a state machine.
//!
//! The session never touches the network or the stores. Each input line is
//! turned into a [`Step`] that the connection task carries out; steps that
//! need an answer from the core (authentication) are resolved by calling
//! back into the session.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

static MAIL_FROM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^FROM:\s*<([^>]*)>(.*)$").expect("valid regex"));
static RCPT_TO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^TO:\s*<([^>]*)>").expect("valid regex"));
static SIZE_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSIZE=(\d+)").expect("valid regex"));

/// base64 "Username:"
const USERNAME_PROMPT: &str = "334 VXNlcm5hbWU6";
/// base64 "Password:"
const PASSWORD_PROMPT: &str = "334 UGFzc3dvcmQ6";

const PRE_AUTH_COMMANDS: [&str; 6] = ["AUTH", "EHLO", "HELO", "NOOP", "RSET", "QUIT"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Greeting,
    AwaitingCommand,
    AwaitingAuthUsername,
    AwaitingAuthPassword { identity: String },
    ReceivingData,
}

/// What the connection has to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Send a reply and read the next line
    Reply(String),
    /// Read the next line without replying
    Wait,
    /// Check the credentials, then report back with [`Session::authenticated`]
    Authenticate { identity: String, key: String },
    /// Accept a complete message from the authenticated identity
    Deliver { identity: String, message: Vec<u8> },
    /// Send the reply and close the connection
    Quit(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Accepted,
    Rejected,
    /// The credential check itself failed
    Unavailable,
}

#[derive(Debug)]
pub struct Session {
    state: State,
    hostname: String,
    max_message_bytes: usize,
    greeted: bool,
    pending_identity: Option<String>,
    identity: Option<String>,
    mail_from: Option<String>,
    recipients: Vec<String>,
    data: Vec<u8>,
    oversized: bool,
}

impl Session {
    pub fn new(hostname: &str, max_message_bytes: usize) -> Self {
        Self {
            state: State::Greeting,
            hostname: hostname.to_string(),
            max_message_bytes,
            greeted: false,
            pending_identity: None,
            identity: None,
            mail_from: None,
            recipients: Vec::new(),
            data: Vec::new(),
            oversized: false,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// The banner, sent once when the connection opens
    pub fn greeting(&mut self) -> String {
        self.state = State::AwaitingCommand;
        format!("220 {} ESMTP camwarden", self.hostname)
    }

    /// Sent instead of a reply when the client stays silent too long
    pub fn idle_timeout(&self) -> String {
        format!("421 {} Idle timeout, closing connection", self.hostname)
    }

    pub fn feed(&mut self, line: &[u8]) -> Step {
        match self.state.clone() {
            State::Greeting => {
                self.state = State::AwaitingCommand;
                self.on_command(line)
            }
            State::AwaitingCommand => self.on_command(line),
            State::AwaitingAuthUsername => self.on_auth_username(line),
            State::AwaitingAuthPassword { identity } => self.on_auth_password(identity, line),
            State::ReceivingData => self.on_data(line),
        }
    }

    /// Outcome of a [`Step::Authenticate`]
    pub fn authenticated(&mut self, result: AuthResult) -> Step {
        let identity = self.pending_identity.take();
        match (result, identity) {
            (AuthResult::Accepted, Some(identity)) => {
                self.identity = Some(identity);
                reply("235 2.7.0 Authentication successful")
            }
            (AuthResult::Unavailable, _) => reply("454 4.7.0 Temporary authentication failure"),
            _ => reply("535 5.7.8 Authentication credentials invalid"),
        }
    }

    fn on_command(&mut self, line: &[u8]) -> Step {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
            None => (line.to_ascii_uppercase(), ""),
        };

        if self.identity.is_none() && !PRE_AUTH_COMMANDS.contains(&verb.as_str()) {
            return reply("530 5.7.0 Authentication required");
        }

        match verb.as_str() {
            "HELO" | "EHLO" => self.helo(&verb, arg),
            "AUTH" => self.auth(arg),
            "NOOP" => reply("250 OK"),
            "RSET" => {
                self.reset_envelope();
                reply("250 OK")
            }
            "QUIT" => Step::Quit(format!("221 {} closing connection", self.hostname)),
            "MAIL" => self.mail(arg),
            "RCPT" => self.rcpt(arg),
            "DATA" => self.data(),
            "VRFY" => reply("252 Cannot VRFY user"),
            _ => reply("500 Command not recognized"),
        }
    }

    fn helo(&mut self, verb: &str, domain: &str) -> Step {
        if self.greeted {
            return reply("503 Duplicate HELO/EHLO");
        }
        if domain.is_empty() {
            return Step::Reply(format!("501 Syntax: {} hostname", verb));
        }
        self.greeted = true;

        if verb == "HELO" {
            Step::Reply(format!("250 {}", self.hostname))
        } else {
            Step::Reply(format!(
                "250-{}\r\n250-SIZE {}\r\n250 AUTH LOGIN",
                self.hostname, self.max_message_bytes
            ))
        }
    }

    fn auth(&mut self, arg: &str) -> Step {
        if self.identity.is_some() {
            return reply("503 Already authenticated");
        }

        let (mechanism, initial) = match arg.split_once(' ') {
            Some((mechanism, initial)) => (mechanism, Some(initial.trim())),
            None => (arg, None),
        };
        if mechanism.is_empty() {
            return reply("501 Syntax: AUTH mechanism");
        }
        if !mechanism.eq_ignore_ascii_case("LOGIN") {
            return reply("504 Unrecognized authentication type");
        }

        match initial {
            Some(initial) => self.on_auth_username(initial.as_bytes()),
            None => {
                self.state = State::AwaitingAuthUsername;
                reply(USERNAME_PROMPT)
            }
        }
    }

    fn on_auth_username(&mut self, line: &[u8]) -> Step {
        match decode_auth_line(line) {
            AuthLine::Value(identity) => {
                self.state = State::AwaitingAuthPassword { identity };
                reply(PASSWORD_PROMPT)
            }
            AuthLine::Cancelled => self.auth_aborted("501 Authentication cancelled"),
            AuthLine::Invalid => self.auth_aborted("501 Cannot decode response"),
        }
    }

    fn on_auth_password(&mut self, identity: String, line: &[u8]) -> Step {
        match decode_auth_line(line) {
            AuthLine::Value(key) => {
                self.state = State::AwaitingCommand;
                self.pending_identity = Some(identity.clone());
                Step::Authenticate { identity, key }
            }
            AuthLine::Cancelled => self.auth_aborted("501 Authentication cancelled"),
            AuthLine::Invalid => self.auth_aborted("501 Cannot decode response"),
        }
    }

    fn auth_aborted(&mut self, message: &str) -> Step {
        self.state = State::AwaitingCommand;
        reply(message)
    }

    fn mail(&mut self, arg: &str) -> Step {
        if self.mail_from.is_some() {
            return reply("503 Nested MAIL command");
        }
        let Some(captures) = MAIL_FROM.captures(arg) else {
            return reply("501 Syntax: MAIL FROM:<address>");
        };

        let size = SIZE_PARAM
            .captures(&captures[2])
            .and_then(|c| c[1].parse::<usize>().ok());
        if size.map_or(false, |size| size > self.max_message_bytes) {
            return reply("552 Message size exceeds fixed maximum message size");
        }

        self.mail_from = Some(captures[1].to_string());
        reply("250 OK")
    }

    fn rcpt(&mut self, arg: &str) -> Step {
        if self.mail_from.is_none() {
            return reply("503 Need MAIL command");
        }
        let Some(captures) = RCPT_TO.captures(arg) else {
            return reply("501 Syntax: RCPT TO:<address>");
        };

        self.recipients.push(captures[1].to_string());
        reply("250 OK")
    }

    fn data(&mut self) -> Step {
        if self.mail_from.is_none() {
            return reply("503 Need MAIL command");
        }
        if self.recipients.is_empty() {
            return reply("503 Need RCPT command");
        }

        self.data.clear();
        self.oversized = false;
        self.state = State::ReceivingData;
        reply("354 End data with <CR><LF>.<CR><LF>")
    }

    fn on_data(&mut self, line: &[u8]) -> Step {
        if line == b"." {
            self.state = State::AwaitingCommand;
            let oversized = self.oversized;
            let message = std::mem::take(&mut self.data);
            self.reset_envelope();

            if oversized {
                return reply("552 Message size exceeds fixed maximum message size");
            }
            return match self.identity.clone() {
                Some(identity) => Step::Deliver { identity, message },
                None => reply("530 5.7.0 Authentication required"),
            };
        }

        if self.oversized {
            return Step::Wait;
        }

        let line = line.strip_prefix(b".").unwrap_or(line);
        if self.data.len() + line.len() + 2 > self.max_message_bytes {
            self.oversized = true;
            self.data = Vec::new();
            return Step::Wait;
        }

        self.data.extend_from_slice(line);
        self.data.extend_from_slice(b"\r\n");
        Step::Wait
    }

    fn reset_envelope(&mut self) {
        self.mail_from = None;
        self.recipients.clear();
        self.data.clear();
        self.oversized = false;
    }
}

enum AuthLine {
    Value(String),
    Cancelled,
    Invalid,
}

fn decode_auth_line(line: &[u8]) -> AuthLine {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line == "*" {
        return AuthLine::Cancelled;
    }

    match STANDARD.decode(line).ok().and_then(|raw| String::from_utf8(raw).ok()) {
        Some(value) => AuthLine::Value(value),
        None => AuthLine::Invalid,
    }
}

fn reply(message: &str) -> Step {
    Step::Reply(message.to_string())
}
