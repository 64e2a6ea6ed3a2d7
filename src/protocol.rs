//! Framing for the smtpd filter protocol: one `|`-separated event per line.
//!
//! Lines are handled as bytes. The framing fields are ASCII, but mail
//! content carried by `data-line` may be in any 8-bit encoding.

use crate::error::FilterError;
use std::borrow::Cow;

pub const DELIMITER: u8 = b'|';
pub const CONFIG_READY: &str = "config|ready";
pub const REGISTER_READY: &str = "register|ready";

const FID_KIND: usize = 0;
const FID_NAME: usize = 4;
const FID_SID: usize = 5;
const FID_TOKEN: usize = 6;
const FID_LINE: usize = 7;

const MIN_FIELDS: usize = 6;

/// Report events, in registration order.
pub const REPORT_EVENTS: &[&str] = &[
    "link-connect",
    "link-disconnect",
    "link-auth",
    "tx-reset",
    "tx-begin",
    "tx-mail",
    "tx-rcpt",
    "tx-data",
    "tx-commit",
    "tx-rollback",
];

/// Filter events, in registration order.
pub const FILTER_EVENTS: &[&str] = &["data-line"];

/// A handshake line preceding `config|ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLine {
    Protocol(String),
    Subsystem(String),
    Other { key: String, value: String },
    Ready,
}

pub fn parse_config_line(line: &[u8]) -> Result<ConfigLine, FilterError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| FilterError::Config(String::from_utf8_lossy(line).into_owned()))?;
    let fields: Vec<&str> = text.split(DELIMITER as char).collect();
    if fields.len() < 2 || fields[0] != "config" {
        return Err(FilterError::Config(text.to_string()));
    }
    let value = || {
        fields
            .get(2)
            .map(|_| String::from_utf8_lossy(field_remainder(line, 2)).into_owned())
            .ok_or_else(|| FilterError::Config(text.to_string()))
    };
    match fields[1] {
        "ready" => Ok(ConfigLine::Ready),
        "protocol" => Ok(ConfigLine::Protocol(value()?)),
        "subsystem" => Ok(ConfigLine::Subsystem(value()?)),
        key => Ok(ConfigLine::Other {
            key: key.to_string(),
            value: value().unwrap_or_default(),
        }),
    }
}

/// A decoded `report` or `filter` line from the main loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    LinkConnect {
        sid: String,
        rdns: String,
        confirmed: String,
        src: String,
        dst: String,
    },
    LinkDisconnect {
        sid: String,
    },
    LinkAuth {
        sid: String,
        result: String,
        username: String,
    },
    TxReset {
        sid: String,
        mid: String,
    },
    TxBegin {
        sid: String,
        mid: String,
    },
    TxMail {
        sid: String,
        mid: String,
        result: String,
        address: String,
    },
    TxRcpt {
        sid: String,
        mid: String,
        result: String,
        address: String,
    },
    TxData {
        sid: String,
        mid: String,
        result: String,
    },
    TxCommit {
        sid: String,
        mid: String,
        size: String,
    },
    TxRollback {
        sid: String,
        mid: String,
    },
    DataLine {
        sid: String,
        token: String,
        line: Vec<u8>,
    },
    /// A report or filter event this filter never registered for.
    Ignored {
        kind: String,
        name: String,
    },
}

impl Event {
    pub fn name(&self) -> &str {
        match self {
            Event::LinkConnect { .. } => "link-connect",
            Event::LinkDisconnect { .. } => "link-disconnect",
            Event::LinkAuth { .. } => "link-auth",
            Event::TxReset { .. } => "tx-reset",
            Event::TxBegin { .. } => "tx-begin",
            Event::TxMail { .. } => "tx-mail",
            Event::TxRcpt { .. } => "tx-rcpt",
            Event::TxData { .. } => "tx-data",
            Event::TxCommit { .. } => "tx-commit",
            Event::TxRollback { .. } => "tx-rollback",
            Event::DataLine { .. } => "data-line",
            Event::Ignored { name, .. } => name,
        }
    }
}

fn require_args(
    name: &str,
    line: &[u8],
    fields: &[Cow<'_, str>],
    count: usize,
) -> Result<(), FilterError> {
    if fields.len() < count {
        return Err(FilterError::Arity {
            event: name.to_string(),
            expected: count,
            got: fields.len(),
            line: String::from_utf8_lossy(line).into_owned(),
        });
    }
    Ok(())
}

/// Everything after the `index`-th delimiter of `line`, byte for byte.
///
/// The offset is taken from the original line so delimiters inside the
/// mail content come through untouched. Callers must have checked that the
/// line has more than `index` fields.
fn field_remainder(line: &[u8], index: usize) -> &[u8] {
    match line
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == DELIMITER)
        .nth(index - 1)
    {
        Some((offset, _)) => &line[offset + 1..],
        None => &[],
    }
}

pub fn parse_event(line: &[u8]) -> Result<Event, FilterError> {
    let fields: Vec<Cow<'_, str>> = line
        .split(|&b| b == DELIMITER)
        .map(String::from_utf8_lossy)
        .collect();
    if fields.len() < MIN_FIELDS {
        return Err(FilterError::Framing(
            String::from_utf8_lossy(line).into_owned(),
        ));
    }
    let name: &str = &fields[FID_NAME];
    let sid = fields[FID_SID].to_string();
    let arg = |i: usize| fields[i].to_string();

    match fields[FID_KIND].as_ref() {
        "report" => {
            let event = match name {
                "link-connect" => {
                    require_args(name, line, &fields, 10)?;
                    Event::LinkConnect {
                        sid,
                        rdns: arg(6),
                        confirmed: arg(7),
                        src: arg(8),
                        dst: arg(9),
                    }
                }
                "link-disconnect" => Event::LinkDisconnect { sid },
                "link-auth" => {
                    require_args(name, line, &fields, 8)?;
                    Event::LinkAuth {
                        sid,
                        result: arg(6),
                        username: arg(7),
                    }
                }
                "tx-reset" => {
                    require_args(name, line, &fields, 7)?;
                    Event::TxReset { sid, mid: arg(6) }
                }
                "tx-begin" => {
                    require_args(name, line, &fields, 7)?;
                    Event::TxBegin { sid, mid: arg(6) }
                }
                "tx-mail" => {
                    require_args(name, line, &fields, 9)?;
                    Event::TxMail {
                        sid,
                        mid: arg(6),
                        result: arg(7),
                        address: arg(8),
                    }
                }
                "tx-rcpt" => {
                    require_args(name, line, &fields, 9)?;
                    Event::TxRcpt {
                        sid,
                        mid: arg(6),
                        result: arg(7),
                        address: arg(8),
                    }
                }
                "tx-data" => {
                    require_args(name, line, &fields, 8)?;
                    Event::TxData {
                        sid,
                        mid: arg(6),
                        result: arg(7),
                    }
                }
                "tx-commit" => {
                    require_args(name, line, &fields, 8)?;
                    Event::TxCommit {
                        sid,
                        mid: arg(6),
                        size: arg(7),
                    }
                }
                "tx-rollback" => {
                    require_args(name, line, &fields, 7)?;
                    Event::TxRollback { sid, mid: arg(6) }
                }
                other => Event::Ignored {
                    kind: "report".to_string(),
                    name: other.to_string(),
                },
            };
            Ok(event)
        }
        "filter" => {
            require_args(name, line, &fields, FID_TOKEN + 1)?;
            match name {
                "data-line" => {
                    require_args(name, line, &fields, FID_LINE + 1)?;
                    Ok(Event::DataLine {
                        sid,
                        token: arg(FID_TOKEN),
                        line: field_remainder(line, FID_LINE).to_vec(),
                    })
                }
                other => Ok(Event::Ignored {
                    kind: "filter".to_string(),
                    name: other.to_string(),
                }),
            }
        }
        _ => Err(FilterError::UnexpectedInput(
            String::from_utf8_lossy(line).into_owned(),
        )),
    }
}

/// The registration block sent once after the handshake.
pub fn register_lines(subsystem: &str) -> Vec<String> {
    let reports = REPORT_EVENTS
        .iter()
        .map(|name| format!("register|report|{subsystem}|{name}"));
    let filters = FILTER_EVENTS
        .iter()
        .map(|name| format!("register|filter|{subsystem}|{name}"));
    reports
        .chain(filters)
        .chain(std::iter::once(REGISTER_READY.to_string()))
        .collect()
}

pub fn format_dataline(sid: &str, token: &str, line: &[u8]) -> Vec<u8> {
    let mut out = format!("filter-dataline|{sid}|{token}|").into_bytes();
    out.extend_from_slice(line);
    out
}
