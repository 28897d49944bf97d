//! `std`: buffer access and date handling.

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc,
    format::{Parsed, StrftimeItems, parse},
};
use chrono_tz::Tz;
use wasmtime::Caller;

use super::{Capability, Registrar, context};
use crate::{
    memory::{GuestMemory, guest_offset},
    state::HostState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
enum Status {
    InvalidDescriptor = -1,
    InvalidBufferSize = -2,
    FailedMemoryWrite = -3,
    InvalidString = -4,
    InvalidDateString = -5,
}

impl Status {
    #[allow(clippy::cast_precision_loss)]
    const fn as_f64(self) -> f64 {
        self as i32 as f64
    }
}

pub struct Std;

impl Capability for Std {
    fn namespace(&self) -> &'static str {
        "std"
    }

    fn register(&self, registrar: &mut Registrar<'_>) {
        registrar
            .func("destroy", destroy)
            .func("buffer_len", buffer_len)
            .func("read_buffer", read_buffer)
            .func("current_date", current_date)
            .func("utc_offset", utc_offset)
            .func("parse_date", parse_date);
    }
}

fn destroy(caller: Caller<'_, HostState>, handle: i32) {
    context(&caller).arena().lock().remove(handle);
}

fn buffer_len(caller: Caller<'_, HostState>, handle: i32) -> i32 {
    let ctx = context(&caller);
    let arena = ctx.arena().lock();
    arena.bytes(handle).map_or(Status::InvalidDescriptor as i32, |bytes| {
        i32::try_from(bytes.len()).unwrap_or(Status::InvalidBufferSize as i32)
    })
}

fn read_buffer(mut caller: Caller<'_, HostState>, handle: i32, ptr: i32, size: i32) -> i32 {
    let ctx = context(&caller);
    let chunk = {
        let arena = ctx.arena().lock();
        let Ok(bytes) = arena.bytes(handle) else {
            return Status::InvalidDescriptor as i32;
        };
        match usize::try_from(size) {
            Ok(size) if size <= bytes.len() => bytes[..size].to_vec(),
            _ => return Status::InvalidBufferSize as i32,
        }
    };
    let written = guest_offset(ptr).and_then(|ptr| {
        GuestMemory::from_caller(&mut caller)?.write_bytes(&mut caller, ptr, &chunk)
    });
    match written {
        Ok(()) => 0,
        Err(_) => Status::FailedMemoryWrite as i32,
    }
}

#[allow(clippy::cast_precision_loss)]
fn current_date() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// The host clock is reported in UTC.
const fn utc_offset() -> i64 {
    0
}

#[allow(clippy::too_many_arguments, clippy::cast_precision_loss)]
fn parse_date(
    mut caller: Caller<'_, HostState>,
    string_ptr: i32,
    string_len: i32,
    format_ptr: i32,
    format_len: i32,
    locale_ptr: i32,
    locale_len: i32,
    timezone_ptr: i32,
    timezone_len: i32,
) -> f64 {
    let Ok(memory) = GuestMemory::from_caller(&mut caller) else {
        return Status::InvalidString.as_f64();
    };
    let read = |ptr: i32, len: i32| -> Option<String> {
        let (ptr, len) = (guest_offset(ptr).ok()?, guest_offset(len).ok()?);
        memory.read_str(&caller, ptr, len).ok()
    };
    let (Some(input), Some(format)) = (read(string_ptr, string_len), read(format_ptr, format_len))
    else {
        return Status::InvalidString.as_f64();
    };
    let optional = |ptr: i32, len: i32| (len > 0).then(|| read(ptr, len)).flatten();
    // Month and weekday names are matched in English regardless of locale.
    let _locale = optional(locale_ptr, locale_len);
    let timezone = optional(timezone_ptr, timezone_len);

    parse_timestamp(&input, &format, timezone.as_deref()).map_or(
        Status::InvalidDateString.as_f64(),
        |date| date.timestamp_millis() as f64 / 1000.0,
    )
}

/// Zone a local date from `parse_date` is interpreted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    Fixed(FixedOffset),
    Named(Tz),
}

impl Zone {
    /// Resolve the time zone argument.
    ///
    /// Accepts `UTC`, `GMT`, `current`, numeric offsets such as `+09:00`,
    /// `-0530` or `GMT+8`, and IANA names such as `Asia/Tokyo`. Anything
    /// else falls back to UTC.
    fn resolve(timezone: Option<&str>) -> Self {
        let utc = Self::Fixed(Utc.fix());
        let Some(name) = timezone.map(str::trim) else {
            return utc;
        };
        if name.eq_ignore_ascii_case("current") {
            return utc;
        }
        let numeric = name
            .strip_prefix("GMT")
            .or_else(|| name.strip_prefix("UTC"))
            .unwrap_or(name);
        if numeric.is_empty() {
            return utc;
        }
        if let Some(offset) = parse_offset(numeric) {
            return Self::Fixed(offset);
        }
        name.parse::<Tz>().map_or_else(
            |_| {
                tracing::debug!(timezone = name, "unknown time zone, using UTC");
                utc
            },
            Self::Named,
        )
    }

    /// The instant `local` names in this zone. Ambiguous times pick the
    /// earlier instant; times skipped by a DST transition have none.
    fn localize(self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            Self::Fixed(offset) => local
                .and_local_timezone(offset)
                .earliest()
                .map(|date| date.with_timezone(&Utc)),
            Self::Named(tz) => local
                .and_local_timezone(tz)
                .earliest()
                .map(|date| date.with_timezone(&Utc)),
        }
    }
}

fn parse_offset(text: &str) -> Option<FixedOffset> {
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != rest.len() - rest.matches(':').count() {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Parse `input` with a Unicode date pattern (`yyyy-MM-dd'T'HH:mm:ss`).
///
/// Missing time fields default to midnight. An offset in the input wins over
/// `timezone`.
pub(crate) fn parse_timestamp(
    input: &str,
    pattern: &str,
    timezone: Option<&str>,
) -> Option<DateTime<Utc>> {
    let format = unicode_to_strftime(pattern);
    let mut parsed = Parsed::new();
    parse(&mut parsed, input.trim(), StrftimeItems::new(&format)).ok()?;

    let date: NaiveDate = parsed.to_naive_date().ok()?;
    let time = parsed.to_naive_time().unwrap_or(NaiveTime::MIN);
    let local = NaiveDateTime::new(date, time);
    let zone = parsed
        .to_fixed_offset()
        .map_or_else(|_| Zone::resolve(timezone), Zone::Fixed);
    zone.localize(local)
}

/// Translate a Unicode (LDML) date pattern into chrono's strftime syntax.
pub(crate) fn unicode_to_strftime(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                out.push('\'');
                continue;
            }
            while let Some(quoted) = chars.next() {
                if quoted == '\'' {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                        out.push('\'');
                        continue;
                    }
                    break;
                }
                push_literal(&mut out, quoted);
            }
            continue;
        }
        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            continue;
        }
        let mut count = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            count += 1;
        }
        out.push_str(field(c, count).unwrap_or_else(|| {
            tracing::debug!(symbol = %c, count, "unsupported date pattern symbol");
            ""
        }));
    }
    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

const fn field(symbol: char, count: usize) -> Option<&'static str> {
    Some(match (symbol, count) {
        ('y' | 'u', 2) => "%y",
        ('y' | 'u', _) => "%Y",
        ('M' | 'L', 1 | 2) => "%m",
        ('M' | 'L', 3) => "%b",
        ('M' | 'L', _) => "%B",
        ('d', _) => "%d",
        ('D', _) => "%j",
        ('E', 1..=3) => "%a",
        ('E', _) => "%A",
        ('a', _) => "%p",
        ('H' | 'k', _) => "%H",
        ('h' | 'K', _) => "%I",
        ('m', _) => "%M",
        ('s', _) => "%S",
        ('S', 6) => "%6f",
        ('S', 9) => "%9f",
        ('S', _) => "%3f",
        ('Z', 1..=3) | ('X' | 'x', 1 | 2) => "%z",
        ('Z', _) | ('X' | 'x', _) => "%:z",
        ('z', _) => "%Z",
        _ => return None,
    })
}
