// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::{Duration, Instant};

use log::debug;
use regex::bytes::{Captures, Regex};

use crate::channel::{ConsoleChannel, ConsoleTransport};
use crate::{Error, Result};

/// One step of an expect batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Batcher {
    /// Write the text, followed by a newline unless it already ends with one.
    Send(String),
    /// Wait for the pattern to appear in the console output.
    Expect(String),
    /// Wait for any of the branches to match.
    Case(Vec<Caser>),
}

/// What a matching [`Caser`] does to the enclosing case step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaseTag {
    /// Keep waiting on the same case step.
    Next,
    /// The case step is satisfied.
    Ok,
    /// Abort the batch with the given reason.
    Fail(String),
}

/// A branch of a [`Batcher::Case`] step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caser {
    pub pattern: String,
    pub send: Option<String>,
    pub tag: CaseTag,
    pub retries: u32,
}

impl Caser {
    pub fn new(pattern: &str, send: Option<&str>, tag: CaseTag, retries: u32) -> Self {
        Caser {
            pattern: pattern.to_string(),
            send: send.map(str::to_string),
            tag,
            retries,
        }
    }
}

/// Output captured by a satisfied expect or case step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Index of the step within the batch.
    pub idx: usize,
    /// Console output consumed by the step, up to the end of the match.
    pub output: String,
    /// Whole match followed by every capture group, empty when unmatched.
    pub captures: Vec<String>,
}

/// Runs send/expect batches over a console.
///
/// Output accumulates in a buffer that is only ever consumed up to the end of
/// a match, so a pattern can match bytes that arrived before it was expected.
pub struct Expecter {
    channel: ConsoleChannel,
    buffer: Vec<u8>,
}

struct Match {
    start: usize,
    end: usize,
    captures: Vec<String>,
}

impl Match {
    fn from_captures(caps: &Captures) -> Option<Self> {
        let whole = caps.get(0)?;
        Some(Match {
            start: whole.start(),
            end: whole.end(),
            captures: caps
                .iter()
                .map(|m| m.map(|m| lossy(m.as_bytes())).unwrap_or_default())
                .collect(),
        })
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::InvalidPattern(pattern.to_string(), e))
}

impl Expecter {
    pub fn new(transport: Box<dyn ConsoleTransport>) -> Result<Self> {
        Ok(Expecter {
            channel: ConsoleChannel::new(transport)?,
            buffer: Vec::new(),
        })
    }

    /// Writes `text` to the console, terminated by a newline.
    pub fn send(&self, text: &str) -> Result<()> {
        debug!("Console send: {:?}", text);
        if text.ends_with('\n') {
            self.channel.send(text.as_bytes())
        } else {
            let mut data = Vec::with_capacity(text.len() + 1);
            data.extend_from_slice(text.as_bytes());
            data.push(b'\n');
            self.channel.send(&data)
        }
    }

    /// Runs every step of `batch` in order. `timeout` bounds the whole batch.
    pub fn expect_batch(
        &mut self,
        batch: &[Batcher],
        timeout: Duration,
    ) -> Result<Vec<BatchResult>> {
        let deadline = Instant::now() + timeout;
        let mut results = Vec::new();

        for (idx, step) in batch.iter().enumerate() {
            match step {
                Batcher::Send(text) => self.send(text)?,
                Batcher::Expect(pattern) => {
                    let re = compile(pattern)?;
                    let found = loop {
                        let found = re
                            .captures(&self.buffer)
                            .as_ref()
                            .and_then(Match::from_captures);
                        if let Some(found) = found {
                            break found;
                        }
                        if !self.read_more(deadline)? {
                            return Err(self.timeout(idx, results));
                        }
                    };
                    let output = lossy(&self.buffer[..found.end]);
                    self.buffer.drain(..found.end);
                    debug!("Console matched {:?}: {:?}", pattern, output);
                    results.push(BatchResult {
                        idx,
                        output,
                        captures: found.captures,
                    });
                }
                Batcher::Case(cases) => {
                    let result = self.switch_case(idx, cases, deadline, &mut results)?;
                    results.push(result);
                }
            }
        }

        Ok(results)
    }

    fn switch_case(
        &mut self,
        idx: usize,
        cases: &[Caser],
        deadline: Instant,
        results: &mut Vec<BatchResult>,
    ) -> Result<BatchResult> {
        let patterns = cases
            .iter()
            .map(|case| compile(&case.pattern))
            .collect::<Result<Vec<_>>>()?;
        let mut matched = vec![0u32; cases.len()];

        loop {
            // Earliest match in the buffer wins, ties go to the first branch.
            let hit = patterns
                .iter()
                .enumerate()
                .filter_map(|(branch, re)| {
                    re.captures(&self.buffer)
                        .as_ref()
                        .and_then(Match::from_captures)
                        .map(|found| (branch, found))
                })
                .min_by_key(|(branch, found)| (found.start, *branch));

            let Some((branch, found)) = hit else {
                if !self.read_more(deadline)? {
                    return Err(self.timeout(idx, std::mem::take(results)));
                }
                continue;
            };

            let case = &cases[branch];
            let output = lossy(&self.buffer);
            self.buffer.clear();
            debug!("Console case {:?} matched: {:?}", case.pattern, output);

            if let Some(text) = &case.send {
                self.send(text)?;
            }

            match &case.tag {
                CaseTag::Ok => {
                    return Ok(BatchResult {
                        idx,
                        output,
                        captures: found.captures,
                    })
                }
                CaseTag::Fail(reason) => {
                    return Err(Error::CaseFailed {
                        step: idx,
                        reason: reason.clone(),
                    })
                }
                CaseTag::Next => {
                    matched[branch] += 1;
                    if matched[branch] > case.retries {
                        return Err(Error::RetriesExhausted {
                            step: idx,
                            pattern: case.pattern.clone(),
                            retries: case.retries,
                        });
                    }
                }
            }
        }
    }

    /// Appends pending output to the buffer, waiting for some if there is
    /// none. Returns false once the deadline has passed, even if the console
    /// keeps printing.
    fn read_more(&mut self, deadline: Instant) -> Result<bool> {
        if Instant::now() >= deadline {
            return Ok(false);
        }
        let Some(chunk) = self.channel.recv_deadline(deadline)? else {
            return Ok(false);
        };
        self.buffer.extend_from_slice(&chunk);

        // Everything already queued goes in before the next scan.
        while Instant::now() < deadline {
            match self.channel.try_recv() {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => break,
            }
        }
        Ok(true)
    }

    fn timeout(&self, step: usize, results: Vec<BatchResult>) -> Error {
        Error::Timeout {
            step,
            results,
            pending: lossy(&self.buffer),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;
    use std::thread;

    use super::*;

    /// Spawns a guest that answers each line it reads with the reply computed
    /// by `respond`, and returns an expecter bound to it.
    pub(crate) fn scripted_guest<F>(greeting: &str, respond: F) -> Expecter
    where
        F: Fn(&str) -> String + Send + 'static,
    {
        let (host, guest) = UnixStream::pair().unwrap();
        let greeting = greeting.to_string();
        thread::spawn(move || {
            let mut writer = guest.try_clone().unwrap();
            writer.write_all(greeting.as_bytes()).unwrap();
            let reader = BufReader::new(guest);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if writer.write_all(respond(&line).as_bytes()).is_err() {
                    break;
                }
            }
        });
        Expecter::new(Box::new(host)).unwrap()
    }

    #[test]
    fn test_expect_batch_collects_results() {
        let mut expecter =
            scripted_guest("", |line| format!("{line}\r\nvalue={}\r\n$ ", line.len()));
        let results = expecter
            .expect_batch(
                &[
                    Batcher::Send("abc".to_string()),
                    Batcher::Expect(r"value=(\d+)".to_string()),
                    Batcher::Expect(r"\$ ".to_string()),
                ],
                Duration::from_secs(5),
            )
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].idx, 1);
        assert_eq!(results[0].captures, vec!["value=3", "3"]);
        assert!(results[0].output.starts_with("abc\r\n"));
        assert_eq!(results[1].idx, 2);
        assert_eq!(results[1].output, "\r\n$ ");
    }

    #[test]
    fn test_expect_matches_output_received_earlier() {
        let mut expecter = scripted_guest("banner\r\nready> ", |_| String::new());
        let results = expecter
            .expect_batch(&[Batcher::Expect("ready> ".to_string())], Duration::from_secs(5))
            .unwrap();
        assert_eq!(results[0].output, "banner\r\nready> ");
    }

    #[test]
    fn test_expect_timeout_keeps_partial_results() {
        let mut expecter = scripted_guest("", |line| format!("{line}\r\n"));
        let err = expecter
            .expect_batch(
                &[
                    Batcher::Send("first".to_string()),
                    Batcher::Expect("first".to_string()),
                    Batcher::Expect("never".to_string()),
                ],
                Duration::from_millis(200),
            )
            .unwrap_err();

        match err {
            Error::Timeout { step, results, pending } => {
                assert_eq!(step, 2);
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].idx, 1);
                assert_eq!(pending, "\r\n");
            }
            e => panic!("unexpected error: {e:?}"),
        }
    }

    #[test]
    fn test_expect_timeout_while_console_floods() {
        let (host, guest) = UnixStream::pair().unwrap();
        let flood = thread::spawn(move || {
            let mut writer = guest;
            let chunk = [b'x'; 4096];
            while writer.write_all(&chunk).is_ok() {}
        });
        let mut expecter = Expecter::new(Box::new(host)).unwrap();
        // Let a backlog build up before expecting.
        thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        let err = expecter
            .expect_batch(&[Batcher::Expect("never".to_string())], Duration::from_millis(200))
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(5), "took {:?}", start.elapsed());
        drop(expecter);
        flood.join().unwrap();
    }

    #[test]
    fn test_expect_stream_closed() {
        let (host, guest) = UnixStream::pair().unwrap();
        let mut expecter = Expecter::new(Box::new(host)).unwrap();
        drop(guest);

        let err = expecter
            .expect_batch(&[Batcher::Expect("prompt".to_string())], Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, Error::StreamClosed));
    }

    #[test]
    fn test_expect_invalid_pattern() {
        let mut expecter = scripted_guest("", |_| String::new());
        let err = expecter
            .expect_batch(&[Batcher::Expect("(unclosed".to_string())], Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPattern(..)));
    }

    #[test]
    fn test_case_earliest_match_wins() {
        let mut expecter = scripted_guest("second first ", |_| String::new());
        let results = expecter
            .expect_batch(
                &[Batcher::Case(vec![
                    Caser::new("first", None, CaseTag::Ok, 0),
                    Caser::new("second", None, CaseTag::Fail("second matched".to_string()), 0),
                ])],
                Duration::from_secs(5),
            )
            .unwrap_err();
        assert!(matches!(
            results,
            Error::CaseFailed { step: 0, ref reason } if reason == "second matched"
        ));
    }

    #[test]
    fn test_case_next_sends_and_continues() {
        let mut expecter = scripted_guest("name? ", |line| {
            if line == "alice" {
                "hello alice\r\n".to_string()
            } else {
                "name? ".to_string()
            }
        });
        let results = expecter
            .expect_batch(
                &[Batcher::Case(vec![
                    Caser::new(r"name\? ", Some("alice"), CaseTag::Next, 3),
                    Caser::new("hello (\\w+)", None, CaseTag::Ok, 0),
                ])],
                Duration::from_secs(5),
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].captures, vec!["hello alice", "alice"]);
    }

    #[test]
    fn test_case_retries_exhausted() {
        let mut expecter = scripted_guest("again ", |_| "again ".to_string());
        let err = expecter
            .expect_batch(
                &[Batcher::Case(vec![Caser::new("again ", Some(""), CaseTag::Next, 2)])],
                Duration::from_secs(5),
            )
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { step: 0, retries: 2, .. }));
    }
}
