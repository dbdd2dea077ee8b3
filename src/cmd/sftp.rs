//! `sftp` file transfer.

use once_cell::sync::Lazy;
use regex::Regex;

use super::CommandParser;
use crate::observer::{LineContext, LineDispatch};

static CONFIRM_CONNECTION: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"(?i)Are\syou\ssure\syou\swant\sto\scontinue\sconnecting\s\(yes/no\)\?") {
        Ok(re) => re,
        Err(err) => panic!("invalid CONFIRM_CONNECTION regex: {err}"),
    }
});

static PASSWORD: Lazy<Regex> = Lazy::new(|| match Regex::new(r"(?i)(?P<USER_HOST>.*)\spassword:") {
    Ok(re) => re,
    Err(err) => panic!("invalid PASSWORD regex: {err}"),
});

static FAILURE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"Permission denied|Connection refused|Could not resolve hostname|Couldn't stat remote file") {
        Ok(re) => re,
        Err(err) => panic!("invalid FAILURE regex: {err}"),
    }
});

/// Non-interactive sftp transfer.
///
/// Answers the host key confirmation and the password prompt, and collects
/// every other output line.
#[derive(Debug, Clone)]
pub struct Sftp {
    host: String,
    user: Option<String>,
    password: String,
    pathname: Option<String>,
    new_pathname: Option<String>,
    batch_file: Option<String>,
    confirm_connection: bool,
    lines: Vec<String>,
}

impl Sftp {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            password: String::new(),
            pathname: None,
            new_pathname: None,
            batch_file: None,
            confirm_connection: true,
            lines: Vec::new(),
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Remote file to fetch.
    pub fn pathname(mut self, pathname: impl Into<String>) -> Self {
        self.pathname = Some(pathname.into());
        self
    }

    /// Local destination.
    pub fn new_pathname(mut self, new_pathname: impl Into<String>) -> Self {
        self.new_pathname = Some(new_pathname.into());
        self
    }

    pub fn batch_file(mut self, batch_file: impl Into<String>) -> Self {
        self.batch_file = Some(batch_file.into());
        self
    }

    /// Answer to an unknown host key, `yes` by default.
    pub fn confirm_connection(mut self, confirm: bool) -> Self {
        self.confirm_connection = confirm;
        self
    }

    fn confirm(&mut self, line: &str, ctx: &mut LineContext<'_, Vec<String>>) -> LineDispatch {
        if CONFIRM_CONNECTION.is_match(line) {
            ctx.sendline(if self.confirm_connection { "yes" } else { "no" });
            return LineDispatch::Claimed;
        }
        LineDispatch::NotClaimed
    }

    fn send_password(&mut self, line: &str, ctx: &mut LineContext<'_, Vec<String>>) -> LineDispatch {
        if PASSWORD.is_match(line) {
            ctx.sendline(self.password.clone());
            return LineDispatch::Claimed;
        }
        LineDispatch::NotClaimed
    }

    fn collect(&mut self, line: &str, is_full_line: bool) -> LineDispatch {
        if is_full_line {
            self.lines.push(line.trim_end().to_string());
        }
        LineDispatch::NotClaimed
    }
}

impl CommandParser for Sftp {
    type Output = Vec<String>;

    fn command_string(&self) -> String {
        let mut cmd = "sftp".to_string();
        if let Some(batch_file) = &self.batch_file {
            cmd = format!("{cmd} -b {batch_file}");
        }
        cmd = match &self.user {
            Some(user) => format!("{cmd} {user}@{}", self.host),
            None => format!("{cmd} {}", self.host),
        };
        if let Some(pathname) = &self.pathname {
            cmd = format!("{cmd}:{pathname}");
        }
        if let Some(new_pathname) = &self.new_pathname {
            cmd = format!("{cmd} {new_pathname}");
        }
        cmd
    }

    fn on_line(
        &mut self,
        line: &str,
        is_full_line: bool,
        ctx: &mut LineContext<'_, Self::Output>,
    ) -> LineDispatch {
        self.confirm(line, ctx)
            .or_else(|| self.send_password(line, ctx))
            .or_else(|| self.collect(line, is_full_line))
    }

    fn result(&self) -> Option<Self::Output> {
        (!self.lines.is_empty()).then(|| self.lines.clone())
    }

    fn is_failure(&self, line: &str) -> bool {
        FAILURE.is_match(line)
    }
}

pub const COMMAND_OUTPUT: &str = "xyz@debian:/home$ sftp fred@192.168.0.102:cat /home/xyz/Docs/cat
The authenticity of host '192.168.0.102 (192.168.0.102)' can't be established.
ECDSA key fingerprint is SHA256:ghQ3iy/gH4YTqZOggql1eJCe3EETOOpn5yANJwFeRt0.
Are you sure you want to continue connecting (yes/no)? yes
Warning: Permanently added '192.168.0.102' (ECDSA) to the list of known hosts.
fred@192.168.0.102's password: 
Connected to 192.168.0.102.
Fetching /upload/cat to /home/xyz/Docs/cat
/upload/cat                                   100%   23    34.4KB/s   00:00    
xyz@debian:/home$";

pub const COMMAND_PROMPT: &str = r"^xyz@debian:/home\$\s*$";

pub const COMMAND_RESULT: &[&str] = &[
    "The authenticity of host '192.168.0.102 (192.168.0.102)' can't be established.",
    "ECDSA key fingerprint is SHA256:ghQ3iy/gH4YTqZOggql1eJCe3EETOOpn5yANJwFeRt0.",
    "Warning: Permanently added '192.168.0.102' (ECDSA) to the list of known hosts.",
    "Connected to 192.168.0.102.",
    "Fetching /upload/cat to /home/xyz/Docs/cat",
    "/upload/cat                                   100%   23    34.4KB/s   00:00",
];

/// Parameters of the documented run.
pub fn command_params() -> Sftp {
    Sftp::new("192.168.0.102")
        .user("fred")
        .pathname("cat")
        .new_pathname("/home/xyz/Docs/cat")
        .password("1234")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::TextualCommand;
    use crate::error::ObserverError;
    use crate::fixture;

    fn expected() -> Vec<String> {
        COMMAND_RESULT.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn command_string_is_built_from_parameters() {
        assert_eq!(
            command_params().command_string(),
            "sftp fred@192.168.0.102:cat /home/xyz/Docs/cat"
        );
        assert_eq!(
            Sftp::new("host").batch_file("cmds.txt").command_string(),
            "sftp -b cmds.txt host"
        );
    }

    #[test]
    fn transfer_fixture_answers_prompts() {
        let command = TextualCommand::with_prompt(command_params(), COMMAND_PROMPT).expect("prompt");
        let run = fixture::run_command_fixture(command, COMMAND_OUTPUT);

        assert_eq!(run.result, Ok(expected()));
        assert_eq!(
            run.sent,
            vec![
                "sftp fred@192.168.0.102:cat /home/xyz/Docs/cat\n".to_string(),
                "yes\n".to_string(),
                "1234\n".to_string(),
            ]
        );
    }

    #[test]
    fn partial_prompts_are_answered_once() {
        let command = TextualCommand::with_prompt(command_params(), COMMAND_PROMPT).expect("prompt");
        let run = fixture::run_command_fixture_in_chunks(command, COMMAND_OUTPUT, 5);

        assert_eq!(run.result, Ok(expected()));
        assert_eq!(run.sent.len(), 3);
    }

    #[test]
    fn refused_host_key_is_answered_with_no() {
        let command = TextualCommand::with_prompt(
            command_params().confirm_connection(false),
            COMMAND_PROMPT,
        )
        .expect("prompt");
        let run = fixture::run_command_fixture(command, COMMAND_OUTPUT);
        assert_eq!(run.sent[1], "no\n");
    }

    #[test]
    fn permission_denied_fails_the_transfer() {
        let command = TextualCommand::with_prompt(command_params(), COMMAND_PROMPT).expect("prompt");
        let output = "xyz@debian:/home$ sftp fred@192.168.0.102:cat /home/xyz/Docs/cat\n\
                      fred@192.168.0.102: Permission denied (publickey,password).\n\
                      xyz@debian:/home$";
        let run = fixture::run_command_fixture(command, output);
        assert!(matches!(run.result, Err(ObserverError::CommandFailure(_))));
    }
}
