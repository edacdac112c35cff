// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::Duration;

use log::{debug, info, warn};

use crate::batch::{Batcher, CaseTag, Caser, Expecter};
use crate::{Error, Result, PROMPT_EXPRESSION};

/// How many times the login and password prompts may be answered.
pub const LOGIN_RETRIES: u32 = 10;

/// How long an already logged in shell gets to show its prompt.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const RETRY_TIMEOUT: Duration = Duration::from_secs(60);
const CONFIGURE_TIMEOUT: Duration = Duration::from_secs(30);

const TERMINAL_COLUMNS: u32 = 500;
const RETURN_CODE_ZERO: &str = r"\n0\r?\n";
const LOGIN_INCORRECT: &str = "Login incorrect";

/// Matches the prompt of a logged in shell on `hostname`, either as `username`
/// or as root after switching from `username`.
pub fn shell_prompt(username: &str, hostname: &str) -> String {
    let user = regex::escape(username);
    let hosts = format!("(?:localhost|{})", regex::escape(hostname));
    format!(r"(?:\[{user}@{hosts} ~\]\$ |\[root@{hosts} {user}\]# )")
}

/// Brings a VM serial console to a logged in, configured shell.
#[derive(Clone, Debug)]
pub struct Login {
    pub username: String,
    pub password: String,
    pub hostname: String,
    pub probe_timeout: Duration,
    pub login_timeout: Duration,
    pub retry_timeout: Duration,
    pub configure_timeout: Duration,
}

impl Login {
    pub fn new(username: &str, password: &str, hostname: &str) -> Self {
        Login {
            username: username.to_string(),
            password: password.to_string(),
            hostname: hostname.to_string(),
            probe_timeout: PROBE_TIMEOUT,
            login_timeout: LOGIN_TIMEOUT,
            retry_timeout: RETRY_TIMEOUT,
            configure_timeout: CONFIGURE_TIMEOUT,
        }
    }

    pub fn prompt(&self) -> String {
        shell_prompt(&self.username, &self.hostname)
    }

    pub fn run(&self, expecter: &mut Expecter) -> Result<()> {
        let prompt = self.prompt();

        let probe = [Batcher::Send("\n".to_string()), Batcher::Expect(prompt.clone())];
        match expecter.expect_batch_validated(&probe, self.probe_timeout) {
            Ok(_) => {
                info!("Console of {} is already logged in", self.hostname);
                return self.configure(expecter);
            }
            Err(e) if e.is_timeout() => {
                debug!("Console of {} has no shell prompt, logging in", self.hostname);
            }
            Err(e) => return Err(e),
        }

        let batch = self.login_batch(&prompt);
        match expecter.expect_batch(&batch, self.login_timeout) {
            Ok(_) => {}
            Err(e) if e.is_timeout() => {
                warn!(
                    "Timed out logging into {}, retrying for {:?}",
                    self.hostname, self.retry_timeout
                );
                expecter
                    .expect_batch(&batch, self.retry_timeout)
                    .map_err(login_error)?;
            }
            Err(e) => return Err(login_error(e)),
        }
        info!("Logged into the console of {}", self.hostname);

        self.configure(expecter)
    }

    fn login_batch(&self, prompt: &str) -> [Batcher; 3] {
        let login_prompt = format!(
            "(?:localhost|{}) login: ",
            regex::escape(&self.hostname)
        );
        [
            Batcher::Send("\n".to_string()),
            Batcher::Send("\n".to_string()),
            Batcher::Case(vec![
                Caser::new(
                    &login_prompt,
                    Some(self.username.as_str()),
                    CaseTag::Next,
                    LOGIN_RETRIES,
                ),
                Caser::new(
                    "Password:",
                    Some(self.password.as_str()),
                    CaseTag::Next,
                    LOGIN_RETRIES,
                ),
                Caser::new(
                    LOGIN_INCORRECT,
                    None,
                    CaseTag::Fail(format!("login incorrect for user {}", self.username)),
                    0,
                ),
                Caser::new(prompt, None, CaseTag::Ok, 0),
            ]),
        ]
    }

    /// Widens the terminal so long output lines are not wrapped and checks
    /// that privileged commands run.
    fn configure(&self, expecter: &mut Expecter) -> Result<()> {
        let batch = [
            Batcher::Send(format!("stty cols {TERMINAL_COLUMNS}")),
            Batcher::Expect(PROMPT_EXPRESSION.to_string()),
            Batcher::Send("sudo true".to_string()),
            Batcher::Expect(PROMPT_EXPRESSION.to_string()),
            Batcher::Send("echo $?".to_string()),
            Batcher::Expect(RETURN_CODE_ZERO.to_string()),
        ];
        expecter
            .expect_batch_validated(&batch, self.configure_timeout)
            .map_err(|e| Error::ConfigureConsole(Box::new(e)))?;
        Ok(())
    }
}

fn login_error(e: Error) -> Error {
    match e {
        Error::CaseFailed { reason, .. } => Error::PermissionDenied(reason),
        e => e,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use regex::Regex;

    use super::*;
    use crate::batch::tests::scripted_guest;

    const USER: &str = "cloud-user";
    const PASSWORD: &str = "secret";
    const HOST: &str = "vmi-under-test";

    #[derive(Default)]
    struct Guest {
        logged_in: bool,
        user: Option<String>,
        prompt_pending: bool,
    }

    /// Minimal getty plus shell.
    fn guest(initially_logged_in: bool) -> Expecter {
        let state = Arc::new(Mutex::new(Guest {
            logged_in: initially_logged_in,
            ..Default::default()
        }));
        scripted_guest("", move |line| {
            let mut guest = state.lock().unwrap();
            let shell = format!("[{USER}@{HOST} ~]$ ");
            if guest.logged_in {
                let reply = if line == "echo $?" { "0\r\n" } else { "" };
                return format!("{line}\r\n{reply}{shell}");
            }
            match guest.user.take() {
                Some(user) if user == USER && line == PASSWORD => {
                    guest.logged_in = true;
                    format!("\r\n{shell}")
                }
                Some(_) => {
                    guest.prompt_pending = true;
                    format!("\r\n{LOGIN_INCORRECT}\r\n{HOST} login: ")
                }
                None if line.is_empty() => {
                    if guest.prompt_pending {
                        String::new()
                    } else {
                        guest.prompt_pending = true;
                        format!("\r\n{HOST} login: ")
                    }
                }
                None => {
                    guest.prompt_pending = false;
                    guest.user = Some(line.to_string());
                    format!("{line}\r\nPassword: ")
                }
            }
        })
    }

    fn login(password: &str) -> Login {
        let mut login = Login::new(USER, password, HOST);
        login.probe_timeout = Duration::from_millis(300);
        login.login_timeout = Duration::from_secs(5);
        login.retry_timeout = Duration::from_secs(1);
        login
    }

    #[test]
    fn test_shell_prompt() {
        let re = Regex::new(&shell_prompt(USER, HOST)).unwrap();
        assert!(re.is_match("[cloud-user@vmi-under-test ~]$ "));
        assert!(re.is_match("[cloud-user@localhost ~]$ "));
        assert!(re.is_match("[root@vmi-under-test cloud-user]# "));
        assert!(!re.is_match("[other@vmi-under-test ~]$ "));
    }

    #[test]
    fn test_login_from_login_prompt() {
        let mut expecter = guest(false);
        login(PASSWORD).run(&mut expecter).unwrap();
    }

    #[test]
    fn test_login_already_logged_in() {
        let mut expecter = guest(true);
        let mut login = login("not-needed");
        // Any attempt at a full login would fail on the password.
        login.login_timeout = Duration::from_millis(1);
        login.run(&mut expecter).unwrap();
    }

    #[test]
    fn test_login_incorrect() {
        let mut expecter = guest(false);
        let err = login("wrong").run(&mut expecter).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)), "{err:?}");
    }

    #[test]
    fn test_login_configure_failure() {
        let mut expecter = scripted_guest("", |line| {
            let reply = if line == "echo $?" { "1\r\n" } else { "" };
            format!("{line}\r\n{reply}[{USER}@{HOST} ~]$ ")
        });
        let mut login = login(PASSWORD);
        login.probe_timeout = Duration::from_secs(5);
        login.configure_timeout = Duration::from_millis(300);
        let err = login.run(&mut expecter);
        assert!(matches!(err, Err(Error::ConfigureConsole(_))));
    }
}
