use crate::address::parse_email_address;
use crate::classes::Classifier;
use crate::dataline::filter_data_line;
use crate::error::FilterError;
use crate::protocol::{
    format_dataline, parse_config_line, parse_event, register_lines, ConfigLine, Event,
};
use crate::session::{Message, Session, SessionStore, TxState};
use std::collections::BTreeMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// An smtpd filter process: handshake, registration, then one event per line
/// until the input ends or something fatal happens.
pub struct Filter<C> {
    name: String,
    protocol: String,
    subsystem: String,
    smtpd_config: BTreeMap<String, String>,
    sessions: SessionStore,
    classifier: C,
}

impl<C: Classifier> Filter<C> {
    pub fn new(name: &str, classifier: C) -> Self {
        Self {
            name: name.to_string(),
            protocol: String::new(),
            subsystem: String::new(),
            smtpd_config: BTreeMap::new(),
            sessions: SessionStore::new(),
            classifier,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn run<R, W>(&mut self, mut reader: R, writer: &mut W) -> Result<(), FilterError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = Vec::new();
        self.config(&mut reader, &mut line).await?;
        self.register(writer).await?;

        while read_line(&mut reader, &mut line).await? {
            let output = self.dispatch(&line)?;
            write_lines(writer, &output).await?;
        }
        log::warn!("{}: unexpected EOF on stdin", self.name);
        Ok(())
    }

    async fn config<R>(&mut self, reader: &mut R, line: &mut Vec<u8>) -> Result<(), FilterError>
    where
        R: AsyncBufRead + Unpin,
    {
        while read_line(reader, line).await? {
            log::debug!("{} config: {}", self.name, String::from_utf8_lossy(line));
            match parse_config_line(line)? {
                ConfigLine::Protocol(version) => self.protocol = version,
                ConfigLine::Subsystem(subsystem) => self.subsystem = subsystem,
                ConfigLine::Other { key, value } => {
                    self.smtpd_config.insert(key, value);
                }
                ConfigLine::Ready => {
                    log::debug!(
                        "{}: protocol={} subsystem={} smtpd={:?}",
                        self.name,
                        self.protocol,
                        self.subsystem,
                        self.smtpd_config
                    );
                    return Ok(());
                }
            }
        }
        Err(FilterError::ConfigIncomplete)
    }

    async fn register<W>(&self, writer: &mut W) -> Result<(), FilterError>
    where
        W: AsyncWrite + Unpin,
    {
        let lines = register_lines(&self.subsystem);
        for line in &lines {
            if line.starts_with("register|report|") {
                log::info!("{}.register: {line}", self.name);
            } else {
                log::debug!("{}.register: {line}", self.name);
            }
        }
        write_lines(writer, &lines).await
    }

    /// Applies one main-loop line and returns the protocol lines to send back.
    pub fn dispatch(&mut self, line: &[u8]) -> Result<Vec<Vec<u8>>, FilterError> {
        let event = parse_event(line)?;
        let name = event.name().to_string();
        let name = name.as_str();
        match event {
            Event::LinkConnect {
                sid,
                rdns,
                confirmed,
                src,
                dst,
            } => self.link_connect(name, &sid, &rdns, &confirmed, &src, &dst)?,
            Event::LinkDisconnect { sid } => self.link_disconnect(name, &sid)?,
            Event::LinkAuth {
                sid,
                result,
                username,
            } => self.link_auth(name, &sid, &result, &username)?,
            Event::TxReset { sid, mid } => self.tx_reset(name, &sid, &mid)?,
            Event::TxBegin { sid, mid } => self.tx_begin(name, &sid, &mid)?,
            Event::TxMail {
                sid,
                mid,
                result,
                address,
            } => self.tx_mail(name, &sid, &mid, &result, &address)?,
            Event::TxRcpt {
                sid,
                mid,
                result,
                address,
            } => self.tx_rcpt(name, &sid, &mid, &result, &address)?,
            Event::TxData { sid, mid, result } => self.tx_data(name, &sid, &mid, &result)?,
            Event::TxCommit { sid, mid, size } => self.tx_commit(name, &sid, &mid, &size)?,
            Event::TxRollback { sid, mid } => self.tx_rollback(name, &sid, &mid)?,
            Event::DataLine { sid, token, line } => {
                return self.data_line(name, &sid, &token, &line);
            }
            Event::Ignored { kind, name } => {
                log::debug!("{}: ignoring unregistered {kind} event {name}", self.name);
            }
        }
        Ok(Vec::new())
    }

    fn link_connect(
        &mut self,
        event: &str,
        sid: &str,
        rdns: &str,
        confirmed: &str,
        src: &str,
        dst: &str,
    ) -> Result<(), FilterError> {
        log::debug!(
            "{}.{event}: session={sid} rdns={rdns} confirmed={confirmed} src={src} dst={dst}",
            self.name
        );
        let session = Session::new(sid, rdns, confirmed == "pass", src, dst);
        self.sessions.insert(event, session)
    }

    fn link_disconnect(&mut self, event: &str, sid: &str) -> Result<(), FilterError> {
        log::debug!("{}.{event}: session={sid}", self.name);
        self.sessions.remove(event, sid)?;
        Ok(())
    }

    fn link_auth(
        &mut self,
        event: &str,
        sid: &str,
        result: &str,
        username: &str,
    ) -> Result<(), FilterError> {
        log::debug!(
            "{}.{event}: session={sid} result={result} username={username}",
            self.name
        );
        let session = self.sessions.get_mut(event, sid)?;
        if result == "pass" {
            session.authorized_user = Some(username.to_string());
        }
        Ok(())
    }

    fn tx_reset(&mut self, event: &str, sid: &str, mid: &str) -> Result<(), FilterError> {
        log::debug!("{}.{event}: session={sid} message={mid}", self.name);
        let message = self.sessions.message_mut(event, sid, mid)?;
        *message = Message::new(mid);
        Ok(())
    }

    fn tx_begin(&mut self, event: &str, sid: &str, mid: &str) -> Result<(), FilterError> {
        log::debug!("{}.{event}: session={sid} message={mid}", self.name);
        let session = self.sessions.get_mut(event, sid)?;
        if session.messages.contains_key(mid) {
            return Err(FilterError::DuplicateMessage {
                event: event.to_string(),
                session: sid.to_string(),
                message: mid.to_string(),
            });
        }
        session.messages.insert(mid.to_string(), Message::new(mid));
        Ok(())
    }

    fn tx_mail(
        &mut self,
        event: &str,
        sid: &str,
        mid: &str,
        result: &str,
        address: &str,
    ) -> Result<(), FilterError> {
        log::debug!(
            "{}.{event}: session={sid} message={mid} result={result} address={address}",
            self.name
        );
        let message = self.sessions.message_mut(event, sid, mid)?;
        if result == "ok" {
            match parse_email_address(address) {
                Ok(parsed) => message.envelope_from.push(parsed),
                Err(e) => log::warn!("{}.{event}: envelopeFrom: {e}", self.name),
            }
        }
        Ok(())
    }

    fn tx_rcpt(
        &mut self,
        event: &str,
        sid: &str,
        mid: &str,
        result: &str,
        address: &str,
    ) -> Result<(), FilterError> {
        log::debug!(
            "{}.{event}: session={sid} message={mid} result={result} address={address}",
            self.name
        );
        let message = self.sessions.message_mut(event, sid, mid)?;
        if result == "ok" {
            match parse_email_address(address) {
                Ok(parsed) => message.envelope_to.push(parsed),
                Err(e) => log::warn!("{}.{event}: envelopeTo: {e}", self.name),
            }
        }
        Ok(())
    }

    fn tx_data(
        &mut self,
        event: &str,
        sid: &str,
        mid: &str,
        result: &str,
    ) -> Result<(), FilterError> {
        log::debug!(
            "{}.{event}: session={sid} message={mid} result={result}",
            self.name
        );
        let session = self.sessions.get_mut(event, sid)?;
        let message = session.message_mut(event, mid)?;
        if result == "ok" {
            message.state = TxState::Data;
            message.in_header = true;
            session.data_message = Some(mid.to_string());
        }
        Ok(())
    }

    fn tx_commit(
        &mut self,
        event: &str,
        sid: &str,
        mid: &str,
        size: &str,
    ) -> Result<(), FilterError> {
        log::debug!(
            "{}.{event}: session={sid} message={mid} size={size}",
            self.name
        );
        self.sessions.message_mut(event, sid, mid)?.state = TxState::Commit;
        Ok(())
    }

    fn tx_rollback(&mut self, event: &str, sid: &str, mid: &str) -> Result<(), FilterError> {
        log::debug!("{}.{event}: session={sid} message={mid}", self.name);
        self.sessions.message_mut(event, sid, mid)?.state = TxState::Rollback;
        Ok(())
    }

    /// Drops a session as if it had disconnected.
    ///
    /// Nothing in the event loop calls this; it exists for callers that track
    /// smtpd's session timeout themselves.
    pub fn session_timeout(&mut self, sid: &str) -> Result<(), FilterError> {
        let event = "session-timeout";
        log::debug!("{}.{event}: session={sid}", self.name);
        self.sessions.remove(event, sid)?;
        Ok(())
    }

    fn data_line(
        &mut self,
        event: &str,
        sid: &str,
        token: &str,
        line: &[u8],
    ) -> Result<Vec<Vec<u8>>, FilterError> {
        log::debug!(
            "{}.{event}: sid={sid} token={token} line={}",
            self.name,
            String::from_utf8_lossy(line)
        );
        let session = self.sessions.get_mut(event, sid)?;
        let mid = session
            .data_message
            .clone()
            .ok_or_else(|| FilterError::NoDataMessage {
                event: event.to_string(),
                session: sid.to_string(),
            })?;
        let message = session.message_mut(event, &mid)?;
        let lines = filter_data_line(event, message, line, &self.classifier)?;
        Ok(lines
            .iter()
            .map(|output| format_dataline(sid, token, output))
            .collect())
    }
}

/// Reads one line into `line` without its `\n` (or `\r\n`) terminator.
///
/// Returns `false` at end of input. The bytes are not required to be UTF-8.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>) -> Result<bool, FilterError>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    if reader.read_until(b'\n', line).await? == 0 {
        return Ok(false);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(true)
}

async fn write_lines<W, L>(writer: &mut W, lines: &[L]) -> Result<(), FilterError>
where
    W: AsyncWrite + Unpin,
    L: AsRef<[u8]>,
{
    for line in lines {
        writer.write_all(line.as_ref()).await?;
        writer.write_all(b"\n").await?;
    }
    writer.flush().await?;
    Ok(())
}
