//! Decoder for the fixed-width login records kept in utmp/wtmp (see utmp(5)).
//!
//! The file is a plain concatenation of records with no length prefix or
//! delimiter: record *n* starts at byte `n * UTMP_SIZE`. The layout is the
//! glibc one for 64-bit Linux, where `ut_tv` and `ut_session` are kept at
//! 32 bits so that 32- and 64-bit binaries share the file.
//!
//! Every multi-byte integer is read little-endian. That matches the files
//! written on x86-64 and aarch64 hosts; a log copied over from a big-endian
//! machine will decode into garbage.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::iter::FusedIterator;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{ProbeError, Result};

pub const LINE_SIZE: usize = 32;
pub const ID_SIZE: usize = 4;
pub const NAME_SIZE: usize = 32;
pub const HOST_SIZE: usize = 256;
const RESERVED_SIZE: usize = 20;

/// Size in bytes of one on-disk record.
pub const UTMP_SIZE: usize = 384;

// type + alignment padding, pid, line, id, user, host, exit, session, tv, addr_v6, reserved
const _: () = assert!(
    2 + 2 + 4 + LINE_SIZE + ID_SIZE + NAME_SIZE + HOST_SIZE + 4 + 4 + 8 + 16 + RESERVED_SIZE
        == UTMP_SIZE
);

/// The `ut_type` tag of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Empty,
    RunLevel,
    BootTime,
    NewTime,
    OldTime,
    InitProcess,
    LoginProcess,
    UserProcess,
    DeadProcess,
    Accounting,
    Unknown(i16),
}

impl From<i16> for RecordType {
    fn from(value: i16) -> Self {
        match value {
            0 => RecordType::Empty,
            1 => RecordType::RunLevel,
            2 => RecordType::BootTime,
            3 => RecordType::NewTime,
            4 => RecordType::OldTime,
            5 => RecordType::InitProcess,
            6 => RecordType::LoginProcess,
            7 => RecordType::UserProcess,
            8 => RecordType::DeadProcess,
            9 => RecordType::Accounting,
            other => RecordType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitStatus {
    pub termination: i16,
    pub exit: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeVal {
    pub sec: i32,
    pub usec: i32,
}

/// One record exactly as it sits on disk. The byte buffers stay private to
/// this module; callers only ever see the [`LoginRecord`] built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utmp {
    ut_type: i16,
    pid: i32,
    line: [u8; LINE_SIZE],
    id: [u8; ID_SIZE],
    user: [u8; NAME_SIZE],
    host: [u8; HOST_SIZE],
    exit: ExitStatus,
    session: i32,
    tv: TimeVal,
    addr_v6: [i32; 4],
}

struct FieldCursor<'a> {
    buf: &'a [u8; UTMP_SIZE],
    off: usize,
}

impl FieldCursor<'_> {
    fn bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.off..self.off + N]);
        self.off += N;
        out
    }

    fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.bytes())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.bytes())
    }

    fn skip(&mut self, n: usize) {
        self.off += n;
    }
}

impl Utmp {
    pub fn from_bytes(buf: &[u8; UTMP_SIZE]) -> Self {
        let mut c = FieldCursor { buf, off: 0 };

        let ut_type = c.i16();
        c.skip(2);
        let pid = c.i32();
        let line = c.bytes();
        let id = c.bytes();
        let user = c.bytes();
        let host = c.bytes();
        let exit = ExitStatus { termination: c.i16(), exit: c.i16() };
        let session = c.i32();
        let tv = TimeVal { sec: c.i32(), usec: c.i32() };
        let addr_v6 = [c.i32(), c.i32(), c.i32(), c.i32()];
        c.skip(RESERVED_SIZE);
        debug_assert_eq!(c.off, UTMP_SIZE);

        Utmp { ut_type, pid, line, id, user, host, exit, session, tv, addr_v6 }
    }
}

/// Pulls fixed-size records off a byte stream until it runs dry.
///
/// A clean end of stream finishes the iteration. A partial trailing record
/// yields one [`ProbeError::TruncatedRecord`] and any other read failure one
/// [`ProbeError::Io`]; the iterator is exhausted after either.
pub struct UtmpReader<R> {
    inner: R,
    done: bool,
}

impl<R: Read> UtmpReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    fn read_record(&mut self) -> Result<Option<Utmp>> {
        let mut buf = [0u8; UTMP_SIZE];
        let mut filled = 0;

        while filled < UTMP_SIZE {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match filled {
            0 => Ok(None),
            UTMP_SIZE => Ok(Some(Utmp::from_bytes(&buf))),
            read => Err(ProbeError::TruncatedRecord { read, expected: UTMP_SIZE }),
        }
    }
}

impl<R: Read> Iterator for UtmpReader<R> {
    type Item = Result<Utmp>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read> FusedIterator for UtmpReader<R> {}

/// Decodes every record in `reader`.
///
/// A truncated final record is logged and dropped, keeping what was decoded
/// before it. Any other read error fails the whole pass.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<Utmp>> {
    let mut records = Vec::new();

    for record in UtmpReader::new(reader) {
        match record {
            Ok(record) => records.push(record),
            Err(e @ ProbeError::TruncatedRecord { .. }) => {
                warn!(decoded = records.len(), "stopping at partial record: {e}");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(records)
}

/// The remote address of a session.
///
/// `ut_addr_v6` holds either an IPv4 address in its first word with the other
/// three zeroed, or an IPv6 address spread across all four words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginAddress {
    V4(Ipv4Addr),
    /// Eight hextets taken low half first from each little-endian word.
    V6Shaped([u16; 8]),
}

impl LoginAddress {
    pub fn from_words(words: [i32; 4]) -> Self {
        if words[1..].iter().all(|&w| w == 0) {
            return LoginAddress::V4(Ipv4Addr::from((words[0] as u32).to_le_bytes()));
        }

        let mut hextets = [0u16; 8];
        for (i, &word) in words.iter().enumerate() {
            let word = word as u32;
            hextets[2 * i] = (word & 0xffff) as u16;
            hextets[2 * i + 1] = (word >> 16) as u16;
        }
        LoginAddress::V6Shaped(hextets)
    }
}

impl fmt::Display for LoginAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginAddress::V4(addr) => write!(f, "{addr}"),
            LoginAddress::V6Shaped(h) => write!(
                f,
                "{:x}:{:x}:{:x}:{:x}:{:x}:{:x}:{:x}:{:x}",
                h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7]
            ),
        }
    }
}

/// A decoded login record with its byte buffers turned into strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    pub record_type: i32,
    pub pid: i32,
    pub device: String,
    pub id: String,
    pub user: String,
    /// Remote host, or `host:display` for X sessions.
    pub host: String,
    /// `(termination signal, exit code)`
    pub exit: (i32, i32),
    pub session: i32,
    /// Login time in UTC, whole seconds.
    pub timestamp: DateTime<Utc>,
    pub address: LoginAddress,
}

impl LoginRecord {
    pub fn kind(&self) -> RecordType {
        RecordType::from(self.record_type as i16)
    }
}

impl From<&Utmp> for LoginRecord {
    fn from(raw: &Utmp) -> Self {
        LoginRecord {
            record_type: i32::from(raw.ut_type),
            pid: raw.pid,
            device: c_string(&raw.line),
            id: c_string(&raw.id),
            user: c_string(&raw.user),
            host: c_string(&raw.host),
            exit: (i32::from(raw.exit.termination), i32::from(raw.exit.exit)),
            session: raw.session,
            timestamp: DateTime::from_timestamp(i64::from(raw.tv.sec), 0).unwrap_or_default(),
            address: LoginAddress::from_words(raw.addr_v6),
        }
    }
}

/// Reads a NUL-terminated string out of a fixed buffer.
///
/// A buffer with no NUL at all decodes to the empty string rather than to
/// its full contents.
fn c_string(buf: &[u8]) -> String {
    match buf.iter().position(|&b| b == 0) {
        Some(end) => String::from_utf8_lossy(&buf[..end]).into_owned(),
        None => String::new(),
    }
}

#[cfg(test)]
impl Utmp {
    pub(crate) fn blank() -> Self {
        Utmp {
            ut_type: 0,
            pid: 0,
            line: [0; LINE_SIZE],
            id: [0; ID_SIZE],
            user: [0; NAME_SIZE],
            host: [0; HOST_SIZE],
            exit: ExitStatus::default(),
            session: 0,
            tv: TimeVal::default(),
            addr_v6: [0; 4],
        }
    }

    /// A user-process record for `user` logged in from `host` at `sec`.
    pub(crate) fn login(user: &str, host: &str, sec: i32) -> Self {
        let mut u = Utmp::blank();
        u.ut_type = 7;
        put(&mut u.user, user);
        put(&mut u.host, host);
        put(&mut u.line, "pts/0");
        u.tv.sec = sec;
        u
    }

    pub(crate) fn to_bytes(&self) -> [u8; UTMP_SIZE] {
        let mut out = Vec::with_capacity(UTMP_SIZE);
        out.extend_from_slice(&self.ut_type.to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.pid.to_le_bytes());
        out.extend_from_slice(&self.line);
        out.extend_from_slice(&self.id);
        out.extend_from_slice(&self.user);
        out.extend_from_slice(&self.host);
        out.extend_from_slice(&self.exit.termination.to_le_bytes());
        out.extend_from_slice(&self.exit.exit.to_le_bytes());
        out.extend_from_slice(&self.session.to_le_bytes());
        out.extend_from_slice(&self.tv.sec.to_le_bytes());
        out.extend_from_slice(&self.tv.usec.to_le_bytes());
        for word in self.addr_v6 {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.resize(UTMP_SIZE, 0);
        out.try_into().unwrap()
    }
}

#[cfg(test)]
fn put(buf: &mut [u8], s: &str) {
    buf[..s.len()].copy_from_slice(s.as_bytes());
}
