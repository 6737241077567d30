//! Content match: tails new lines appended to a file since the last
//! cycle and tests them against the service's match patterns.
//!
//! Only lines terminated with `\n` are tested. When a line without a
//! terminator is read, the writer is assumed to still be writing it; the
//! scan stops with the cursor unchanged and resumes at the same spot next
//! cycle. Lines longer than [`MATCH_LINE_LENGTH`] are truncated for
//! matching; the remainder up to the newline is consumed but ignored.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, error};

use crate::event::{EventKind, EventSink, EventState};
use crate::model::{Service, MATCH_LINE_LENGTH};
use crate::platform::{Platform, ReadSeek};

use super::Validator;

struct CappedLine {
    /// Line text without the trailing newline, truncated to the cap.
    text: String,
    /// Bytes consumed from the stream, including the newline and any
    /// discarded overflow.
    consumed: u64,
}

/// Reads one newline-terminated line of at most `MATCH_LINE_LENGTH - 1`
/// bytes. Returns `None` at EOF, on an incomplete trailing line, and when
/// an over-long line has no newline yet; in all three cases the caller
/// stops scanning with the cursor unchanged.
fn read_capped_line(reader: &mut Box<dyn ReadSeek>) -> io::Result<Option<CappedLine>> {
    const CAP: usize = MATCH_LINE_LENGTH - 1;
    let mut buf = [0u8; CAP];
    let mut filled = 0;
    while filled < CAP {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }

    if let Some(idx) = buf[..filled].iter().position(|&b| b == b'\n') {
        return Ok(Some(CappedLine {
            text: String::from_utf8_lossy(&buf[..idx]).into_owned(),
            consumed: (idx + 1) as u64,
        }));
    }

    if filled < CAP {
        // Incomplete line, the writer has not finished it yet.
        return Ok(None);
    }

    // Buffer full without a newline: keep the truncated text and consume
    // the remainder of the line.
    let mut consumed = filled as u64;
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte)?;
        if n == 0 {
            // The over-long line has no terminator yet either.
            return Ok(None);
        }
        consumed += 1;
        if byte[0] == b'\n' {
            break;
        }
    }
    Ok(Some(CappedLine {
        text: String::from_utf8_lossy(&buf).into_owned(),
        consumed,
    }))
}

impl<P: Platform, S: EventSink> Validator<P, S> {
    pub(crate) fn check_match(&mut self, service: &mut Service) {
        if service.matches.is_empty() {
            return;
        }
        let path = service.path.clone();
        let mut reader = match self.platform.open(&path) {
            Ok(reader) => reader,
            Err(e) => {
                error!(service = %service.name, path = %path.display(), error = %e, "cannot open file");
                return;
            }
        };

        let size = service.inf.file.size;
        let mut scan = true;
        if path.starts_with(Path::new("/proc")) {
            // Pseudo-files report no stable size; always read from the top.
            service.inf.file.read_pos = 0;
        } else {
            if service.inf.file.inode != service.inf.file.prev_inode
                || service.inf.file.read_pos > size
            {
                service.inf.file.read_pos = 0;
            }
            if service.inf.file.read_pos == size {
                debug!(
                    service = %service.name,
                    "content match skipped, neither size nor inode changed since last test"
                );
                scan = false;
            }
        }

        // Per-cycle accumulators, one per match pattern.
        let mut logs: Vec<String> = vec![String::new(); service.matches.len()];

        if scan {
            'lines: loop {
                if let Err(e) = reader.seek(SeekFrom::Start(service.inf.file.read_pos)) {
                    error!(service = %service.name, path = %path.display(), error = %e, "cannot seek file");
                    break;
                }
                let line = match read_capped_line(&mut reader) {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!(service = %service.name, path = %path.display(), error = %e, "cannot read file");
                        break;
                    }
                };
                service.inf.file.read_pos += line.consumed;

                for rule in &service.match_ignores {
                    if rule.pattern.matches(&line.text) != rule.not {
                        debug!(
                            service = %service.name,
                            pattern = rule.pattern.as_str(),
                            not = rule.not,
                            "ignore pattern match on content line"
                        );
                        continue 'lines;
                    }
                }

                for (i, rule) in service.matches.iter().enumerate() {
                    if rule.pattern.matches(&line.text) != rule.not {
                        debug!(
                            service = %service.name,
                            pattern = rule.pattern.as_str(),
                            not = rule.not,
                            line = %line.text,
                            "pattern match on content line"
                        );
                        let log = &mut logs[i];
                        if log.len() < MATCH_LINE_LENGTH {
                            log.push_str(&line.text);
                            log.push('\n');
                            if log.len() >= MATCH_LINE_LENGTH {
                                log.push_str("...\n");
                            }
                        }
                    }
                }
            }
        }

        for i in 0..service.matches.len() {
            let action = service.matches[i].action;
            if logs[i].is_empty() {
                self.post(
                    service,
                    EventKind::Content,
                    EventState::ChangedNot,
                    action,
                    "content doesn't match".to_string(),
                );
            } else {
                let message = format!("content match:\n{}", logs[i]);
                self.post(service, EventKind::Content, EventState::Changed, action, message);
            }
        }
    }
}
